//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`. It joins relative
//! paths onto a base URL, injects default and bearer headers, optionally retries
//! transient failures through `reqwest-retry`, and hands back a standardized
//! `ApiResponse` whose body is decoded only for 2xx statuses.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Errors raised before a response status is known, or while decoding a 2xx body.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The base URL or the joined request URL is not a valid absolute URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// The underlying `reqwest::Client` could not be built.
    #[error("failed to build http client: {0}")]
    Build(String),
    /// The request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(String),
    /// DNS, connect, TLS, timeout or read failure.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A 2xx response whose body did not match the expected type.
    #[error("failed to decode response (status {status}): {message}")]
    Decode {
        /// HTTP status of the undecodable response.
        status: u16,
        /// Decoder message.
        message: String,
    },
}

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized response body for 2xx statuses.
    pub data: Option<T>,
    /// The raw body returned by the server when the status was not 2xx.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// Transport knobs for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Retries on transient failures. `0` disables the retry middleware.
    pub max_retries: u32,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
            user_agent: "AlphaViewer/1.0".to_string(),
        }
    }
}

/// A flexible asynchronous HTTP client.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
    default_headers: HeaderMap,
}

impl ApiClient {
    /// Creates a client with default [`ClientOptions`].
    ///
    /// # Errors
    /// Fails with [`RetrieveError::InvalidUrl`] when `base_url` is not absolute.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, RetrieveError> {
        Self::with_options(base_url, auth_token, ClientOptions::default())
    }

    /// Creates a client with explicit transport options.
    ///
    /// A missing trailing slash is added to `base_url` so that relative paths
    /// are appended rather than replacing the last segment.
    pub fn with_options(
        base_url: &str,
        auth_token: Option<String>,
        options: ClientOptions,
    ) -> Result<Self, RetrieveError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let url = Url::parse(&normalized).map_err(|e| RetrieveError::InvalidUrl(format!("{base_url}: {e}")))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(RetrieveError::InvalidUrl(format!("{base_url}: expected an absolute http(s) url")));
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| RetrieveError::Build(e.to_string()))?;

        let inner = if options.max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
            ClientBuilder::new(client)
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build()
        } else {
            ClientBuilder::new(client).build()
        };

        Ok(Self {
            inner,
            base_url: url,
            auth_token,
            default_headers: HeaderMap::new(),
        })
    }

    /// Headers sent with every request, before per-request headers.
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request and decodes a 2xx body into `T`.
    ///
    /// Non-2xx statuses are not errors: they come back with `success == false`
    /// and the raw body in `error_body`, so callers can classify them.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
        headers: Option<HeaderMap>,
    ) -> Result<ApiResponse<T>, RetrieveError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let full_url = self
            .base_url
            .join(path)
            .map_err(|e| RetrieveError::InvalidUrl(format!("{path}: {e}")))?;
        let mut req = self.inner.request(method, full_url);

        if !self.default_headers.is_empty() {
            req = req.headers(self.default_headers.clone());
        }
        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(b) = body {
            let json_body = serde_json::to_string(&b).map_err(|e| RetrieveError::Encode(e.to_string()))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response = req.send().await.map_err(|e| RetrieveError::Transport(e.to_string()))?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await.map_err(|e| RetrieveError::Transport(e.to_string()))?;

        if status.is_success() {
            let data = serde_json::from_str::<T>(&text).map_err(|e| RetrieveError::Decode {
                status: status.as_u16(),
                message: e.to_string(),
            })?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: Some(text),
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rejects_relative_base_url() {
        let err = ApiClient::new("not a url", None).err().expect("should fail");
        assert!(matches!(err, RetrieveError::InvalidUrl(_)));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let api = ApiClient::new("https://example.supabase.co/base", None).unwrap();
        assert_eq!(api.base_url().as_str(), "https://example.supabase.co/base/");
    }

    #[tokio::test]
    async fn joins_path_and_sends_headers() {
        let (url, server) = serve_once("200 OK", r#"{"ok":true}"#);
        let mut defaults = HeaderMap::new();
        defaults.insert("apikey", HeaderValue::from_static("anon-key"));
        let api = ApiClient::new(&url, Some("secret".into())).unwrap().with_default_headers(defaults);

        let res = api
            .request::<serde_json::Value, ()>(Method::GET, "rest/v1/alpha?select=*", None, None)
            .await
            .unwrap();
        let head = server.join().unwrap().to_lowercase();

        assert!(res.success);
        assert_eq!(res.data.unwrap()["ok"], true);
        assert!(head.starts_with("get /rest/v1/alpha?select=* http/1.1"));
        assert!(head.contains("apikey: anon-key"));
        assert!(head.contains("authorization: bearer secret"));
    }

    #[tokio::test]
    async fn non_success_status_is_not_an_error() {
        let (url, server) = serve_once("404 Not Found", r#"{"message":"missing"}"#);
        let api = ApiClient::new(&url, None).unwrap();

        let res = api
            .request::<serde_json::Value, ()>(Method::GET, "status/404", None, None)
            .await
            .unwrap();
        server.join().unwrap();

        assert!(!res.success);
        assert_eq!(res.status, 404);
        assert!(res.error_body.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_decode_error() {
        let (url, server) = serve_once("200 OK", "<html>");
        let api = ApiClient::new(&url, None).unwrap();

        let err = api
            .request::<serde_json::Value, ()>(Method::GET, "x", None, None)
            .await
            .err()
            .expect("should fail");
        server.join().unwrap();

        assert!(matches!(err, RetrieveError::Decode { status: 200, .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        // Bind then drop to get a port that is very likely closed.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let api = ApiClient::new(&format!("http://127.0.0.1:{}", port), None).unwrap();

        let err = api
            .request::<serde_json::Value, ()>(Method::GET, "x", None, None)
            .await
            .err()
            .expect("should fail");

        assert!(matches!(err, RetrieveError::Transport(_)));
    }
}
