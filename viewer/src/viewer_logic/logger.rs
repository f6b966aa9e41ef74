use anyhow::{Context, Result};
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_PREFIX: &str = "alpha_viewer_";

/// Where log records go besides the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    /// Also print to stdout.
    Stdout,
    /// File only. The interactive dashboard owns the terminal.
    Quiet,
}

/// Routes the `log` facade to a timestamped file in `log_dir`, and to stdout
/// unless `console` is [`Console::Quiet`]. Returns the log file path.
pub fn setup_logging(log_dir: &Path, log_level: &str, console: Console) -> Result<PathBuf> {
    let (dispatch, log_path) = build_dispatch(log_dir, log_level, console)?;
    dispatch.apply().context("Logger already initialised")?;
    Ok(log_path)
}

fn build_dispatch(log_dir: &Path, log_level: &str, console: Console) -> Result<(fern::Dispatch, PathBuf)> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir).with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    }

    // Clean up old log files, keeping only the most recent one
    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}{}.log", LOG_PREFIX, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // The HTTP stack is chatty at debug.
        .level_for("hyper_util", log::LevelFilter::Info)
        .level_for("reqwest", log::LevelFilter::Info)
        .chain(fern::log_file(&log_path).with_context(|| format!("Failed to open log file {}", log_path.display()))?);

    if console == Console::Stdout {
        dispatch = dispatch.chain(std::io::stdout());
    }

    Ok((dispatch, log_path))
}

fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|(modified, _)| Reverse(*modified));

    // Keep the most recent one (index 0), delete the rest
    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let file = File::create(dir.join(name)).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn cleanup_keeps_newest_viewer_log_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "alpha_viewer_old.log", 300);
        touch(dir.path(), "alpha_viewer_older.log", 600);
        touch(dir.path(), "alpha_viewer_new.log", 10);
        touch(dir.path(), "unrelated.log", 900);

        cleanup_old_logs(dir.path()).unwrap();

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["alpha_viewer_new.log", "unrelated.log"]);
    }

    #[test]
    fn records_reach_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let (dispatch, path) = build_dispatch(&log_dir, "debug", Console::Quiet).unwrap();
        assert!(path.starts_with(&log_dir));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(LOG_PREFIX));

        let (max, logger) = dispatch.into_log();
        assert_eq!(max, log::LevelFilter::Debug);
        logger.log(
            &log::Record::builder()
                .args(format_args!("Loaded 3 records from 'alpha'"))
                .level(log::Level::Info)
                .target("lib_viewer::core::scheduler")
                .build(),
        );
        logger.flush();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[lib_viewer::core::scheduler][INFO] Loaded 3 records from 'alpha'"));
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("bogus"), log::LevelFilter::Info);
    }
}
