//! # Alpha Table Live Fetch Test
//!
//! Reads the configured table twice through lib_viewer's gateway and prints
//! what the viewer would show: row count, content signature, statistics and
//! the change classification between the two reads.

use clap::Parser;
use lib_viewer::connections::{Gateway, GatewayConfig, SupabaseGateway};
use lib_viewer::core::DetectionMode;
use lib_viewer::views::{statistics, DEFAULT_TOP_N};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(about = "Live fetch check for the alpha table")]
struct Args {
    #[clap(long, env = "SUPABASE_URL")]
    supabase_url: String,

    #[clap(long, env = "SUPABASE_KEY", hide_env_values = true)]
    supabase_key: String,

    #[clap(long, env = "ALPHA_TABLE", default_value = "alpha")]
    table: String,

    /// Seconds to wait between the two reads.
    #[clap(long, default_value_t = 3)]
    pause: u64,
}

/// Executes the live fetch.
///
/// // Statement: Exits with status 1 on the first gateway error.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let gateway = SupabaseGateway::new(GatewayConfig::new(&args.supabase_url, &args.supabase_key))?;

    println!("[*] Reading '{}' from {} ...", args.table, args.supabase_url);

    let first = match gateway.fetch_all(&args.table).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("\n[ERROR] First read failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    };

    println!("\n[SUCCESS] {} records received", first.len());
    println!("-----------------------------------------------");
    println!("Signature: {}", first.signature());
    println!("{}", serde_json::to_string_pretty(&statistics(first.records(), DEFAULT_TOP_N))?);
    println!("-----------------------------------------------");

    // // Statement: Second read to exercise change detection against a live baseline
    tokio::time::sleep(Duration::from_secs(args.pause)).await;
    match gateway.fetch_all(&args.table).await {
        Ok(second) => {
            println!("[INFO] Count detection:   {}", DetectionMode::Count.detect(Some(&first), &second));
            println!("[INFO] Content detection: {}", DetectionMode::Content.detect(Some(&first), &second));
        }
        Err(e) => {
            eprintln!("\n[ERROR] Second read failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
