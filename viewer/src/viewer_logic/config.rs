use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_viewer::connections::GatewayConfig;
use lib_viewer::core::{DetectionMode, PollInterval, SchedulerSettings};
use lib_viewer::views::{ExportFormat, FilterColumn};

const DEFAULT_CONFIG_FILE: &str = "alpha_viewer.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live terminal viewer for the alpha vehicle registry table", version)]
#[serde(default)]
pub struct Config {
    #[clap(long, env = "ALPHA_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SUPABASE_URL", help = "Base URL of the hosted database project.")]
    pub supabase_url: Option<String>,

    #[clap(long, env = "SUPABASE_KEY", hide_env_values = true, help = "API key of the hosted database project.")]
    pub supabase_key: Option<String>,

    #[clap(long, env = "ALPHA_TABLE", help = "Table to watch.")]
    pub table: Option<String>,

    #[clap(long, env = "ALPHA_POLL_INTERVAL", help = "Seconds between polls: 1, 3 or 5.")]
    pub poll_interval: Option<u64>,

    #[clap(long, env = "ALPHA_AUTO_UPDATE", help = "Start polling right away (true/false).")]
    pub auto_update: Option<bool>,

    #[clap(long, env = "ALPHA_DETECTION", help = "Change detection: count or content.")]
    pub detection: Option<String>,

    #[clap(long, env = "ALPHA_REQUEST_TIMEOUT_SECS", help = "HTTP request timeout in seconds.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "ALPHA_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ALPHA_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, help = "Initial search term.")]
    pub search: Option<String>,

    #[clap(long, help = "Column the search applies to: all, plate_number or call_sign.")]
    pub filter_column: Option<String>,

    #[clap(long, env = "ALPHA_EXPORT_FORMAT", help = "Export format: csv, excel or json.")]
    pub export_format: Option<String>,

    #[clap(long, env = "ALPHA_EXPORT_DIR", help = "Directory exports are written to.")]
    pub export_dir: Option<PathBuf>,

    #[clap(long, action = ArgAction::SetTrue, help = "Fetch once, print the table and statistics, export if requested, then exit.")]
    pub once: bool,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            supabase_url: other.supabase_url.or(self.supabase_url),
            supabase_key: other.supabase_key.or(self.supabase_key),
            table: other.table.or(self.table),
            poll_interval: other.poll_interval.or(self.poll_interval),
            auto_update: other.auto_update.or(self.auto_update),
            detection: other.detection.or(self.detection),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            search: other.search.or(self.search),
            filter_column: other.filter_column.or(self.filter_column),
            export_format: other.export_format.or(self.export_format),
            export_dir: other.export_dir.or(self.export_dir),
            once: other.once || self.once,
        }
    }

    fn defaults() -> Config {
        Config {
            table: Some("alpha".to_string()),
            poll_interval: Some(PollInterval::default().seconds()),
            auto_update: Some(true),
            detection: Some("count".to_string()),
            request_timeout_secs: Some(10),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            filter_column: Some("all".to_string()),
            export_dir: Some(PathBuf::from(".")),
            ..Default::default()
        }
    }
}

/// Everything the binary needs, validated and typed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub scheduler: SchedulerSettings,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub search: Option<String>,
    pub filter_column: FilterColumn,
    pub export_format: Option<ExportFormat>,
    pub export_dir: PathBuf,
    pub once: bool,
}

/// Defaults, then the config file, then environment and CLI.
pub fn load_config() -> Result<Settings> {
    let cli = Config::parse();
    let file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let file = read_config_file(&file_path)?;
    resolve(layer(file, cli))
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        // Logging is not set up yet; the choice is reported after resolve.
        return Ok(None);
    }
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(Some(config))
}

fn layer(file: Option<Config>, cli: Config) -> Config {
    let mut current = Config::defaults();
    if let Some(file) = file {
        current = current.merge(file);
    }
    current.merge(cli)
}

fn resolve(config: Config) -> Result<Settings> {
    let url = config
        .supabase_url
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("SUPABASE_URL is not set (use --supabase-url, the env var, .env or the config file)"))?;
    let key = config
        .supabase_key
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("SUPABASE_KEY is not set (use --supabase-key, the env var, .env or the config file)"))?;

    let mut gateway = GatewayConfig::new(url, key);
    if let Some(secs) = config.request_timeout_secs {
        if secs == 0 {
            return Err(anyhow!("request_timeout_secs must be greater than zero"));
        }
        gateway.timeout = Duration::from_secs(secs);
    }

    let interval = match config.poll_interval {
        Some(secs) => PollInterval::try_from(secs)?,
        None => PollInterval::default(),
    };
    let detection = match config.detection.as_deref() {
        Some(s) => s.parse::<DetectionMode>().map_err(|e| anyhow!(e))?,
        None => DetectionMode::default(),
    };
    let filter_column = match config.filter_column.as_deref() {
        Some(s) => s.parse::<FilterColumn>().map_err(|e| anyhow!(e))?,
        None => FilterColumn::default(),
    };
    let export_format = config
        .export_format
        .as_deref()
        .map(|s| s.parse::<ExportFormat>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let scheduler = SchedulerSettings {
        table: config.table.unwrap_or_else(|| "alpha".to_string()),
        interval,
        auto_update: config.auto_update.unwrap_or(true),
        detection,
    };

    Ok(Settings {
        gateway,
        scheduler,
        log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
        search: config.search.filter(|s| !s.trim().is_empty()),
        filter_column,
        export_format,
        export_dir: config.export_dir.unwrap_or_else(|| PathBuf::from(".")),
        once: config.once,
    })
}
