use anyhow::{Result, bail};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use lib_viewer::connections::{Gateway, Record};
use lib_viewer::core::{
    PollEvent, PollScheduler, PollView, SchedulerSettings, SessionError, SessionHandle, TickOutcome, WarningKind,
};
use lib_viewer::views::{self, DEFAULT_TOP_N, ExportError, ExportFormat, FilterColumn, Statistics};

use super::config::Settings;

const HELP: &str = "\
Commands:
  r               refresh now
  p               toggle auto-update
  1 | 3 | 5       poll every 1, 3 or 5 seconds (enables auto-update)
  a               acknowledge new data
  t               show the table
  s               show statistics
  / <term>        search (a bare / clears the search)
  c <column>      search column: all, plate_number, call_sign
  e [format]      export: csv, excel, json
  h               this help
  q               quit";

/// One line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Toggle,
    Interval(u64),
    Acknowledge,
    Show,
    Stats,
    Search(Option<String>),
    Column(FilterColumn),
    Export(Option<ExportFormat>),
    Help,
    Quit,
}

/// Parses a command line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(term) = line.strip_prefix('/') {
        let term = term.trim();
        return Ok(Some(Command::Search((!term.is_empty()).then(|| term.to_string()))));
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let command = match head.to_lowercase().as_str() {
        "r" | "refresh" => Command::Refresh,
        "p" | "pause" | "toggle" => Command::Toggle,
        "a" | "ack" => Command::Acknowledge,
        "t" | "table" | "show" => Command::Show,
        "s" | "stats" => Command::Stats,
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        "i" | "interval" => Command::Interval(parse_seconds(rest)?),
        "c" | "column" => Command::Column(rest.parse()?),
        "e" | "export" if rest.is_empty() => Command::Export(None),
        "e" | "export" => Command::Export(Some(rest.parse()?)),
        other if other.chars().all(|c| c.is_ascii_digit()) => Command::Interval(parse_seconds(other)?),
        other => return Err(format!("Unknown command '{}'. Type h for help.", other)),
    };
    Ok(Some(command))
}

fn parse_seconds(s: &str) -> Result<u64, String> {
    s.parse::<u64>().map_err(|_| format!("'{}' is not a number of seconds", s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Presentation state of the terminal dashboard: search, column and export target.
pub struct Dashboard {
    table: String,
    search: Option<String>,
    column: FilterColumn,
    export_format: ExportFormat,
    export_dir: PathBuf,
}

impl Dashboard {
    pub fn new(settings: &Settings) -> Self {
        Self {
            table: settings.scheduler.table.clone(),
            search: settings.search.clone(),
            column: settings.filter_column,
            export_format: settings.export_format.unwrap_or_default(),
            export_dir: settings.export_dir.clone(),
        }
    }

    /// Notification line for an event, if it warrants one.
    pub fn render_event(&self, event: &PollEvent) -> Option<String> {
        match event {
            PollEvent::Loaded { count } => Some(format!("Loaded {} records from '{}'.", count, self.table)),
            PollEvent::NewData { delta, count } if *delta > 0 => Some(format!(
                "New data detected! +{} rows ({} total). Type a to acknowledge.",
                delta, count
            )),
            PollEvent::NewData { delta, count } if *delta < 0 => {
                Some(format!("Rows removed: {} ({} total). Type a to acknowledge.", delta, count))
            }
            PollEvent::NewData { count, .. } => Some(format!(
                "Rows changed in place ({} total). Type a to acknowledge.",
                count
            )),
            PollEvent::FetchFailed(warning) => Some(match warning.kind {
                WarningKind::Query => format!("ERROR: {}", warning.message),
                WarningKind::Connection => format!("Warning: {} (will retry on the next tick)", warning.message),
            }),
            PollEvent::Unchanged { .. } | PollEvent::Discarded | PollEvent::PhaseChanged(_) => None,
        }
    }

    pub fn render_status(&self, view: &PollView) -> String {
        let mut line = if view.polling_enabled {
            format!("Auto-update ON, {}", view.interval.label())
        } else {
            "Auto-update OFF".to_string()
        };
        if let Some(at) = view.last_checked {
            let _ = write!(line, " | last checked {}", at.format("%H:%M:%S UTC"));
        }
        if let Some(snapshot) = &view.snapshot {
            let _ = write!(line, " | {} records", snapshot.len());
        }
        if view.new_data {
            line.push_str(" | NEW DATA");
        }
        if view.warning.is_some() {
            line.push_str(" | last fetch failed");
        }
        line
    }

    /// Plate number and call sign of the rows matching the current search.
    pub fn render_table(&self, view: &PollView) -> String {
        let Some(snapshot) = &view.snapshot else {
            return "No data loaded yet.".to_string();
        };
        if snapshot.is_empty() {
            return "No records found in the database.".to_string();
        }

        let rows = views::filter_records(snapshot.records(), self.search.as_deref().unwrap_or(""), self.column);
        let plate_width = rows
            .iter()
            .map(|r| cell(&r.plate_number).chars().count())
            .chain(std::iter::once("Plate Number".len()))
            .max()
            .unwrap_or(0);

        let mut out = String::new();
        let _ = writeln!(out, "{:<plate_width$}  Call Sign", "Plate Number");
        let _ = writeln!(out, "{}  {}", "-".repeat(plate_width), "-".repeat(9));
        for r in &rows {
            let _ = writeln!(out, "{:<plate_width$}  {}", cell(&r.plate_number), cell(&r.call_sign));
        }
        match &self.search {
            Some(term) => {
                let _ = write!(
                    out,
                    "Showing {} of {} records matching '{}' in {}",
                    rows.len(),
                    snapshot.len(),
                    term,
                    self.column
                );
            }
            None => {
                let _ = write!(out, "Total records: {}", snapshot.len());
            }
        }
        out
    }

    pub fn render_stats(stats: &Statistics) -> String {
        let mut out = format!(
            "Total records: {}\nUnique call signs: {}\nTop call signs:",
            stats.total, stats.unique_call_signs
        );
        for entry in &stats.top_call_signs {
            let _ = write!(out, "\n  {:<20} {}", entry.call_sign, entry.count);
        }
        out
    }

    fn export(&self, records: &[Record], format: ExportFormat) -> String {
        match views::write_export(records, format, &self.export_dir) {
            Ok(path) => format!("Exported {} records to {} ({})", records.len(), path.display(), format.mime_type()),
            Err(ExportError::NoData) => ExportError::NoData.to_string(),
            Err(e) => {
                log::error!("Export failed: {}", e);
                format!("Export failed: {}", e)
            }
        }
    }

    fn apply(&mut self, command: Command, session: &SessionHandle) -> Result<Flow> {
        let view = session.view();
        let output = match command {
            Command::Quit => return Ok(Flow::Quit),
            Command::Help => HELP.to_string(),
            Command::Refresh => {
                session.refresh_now()?;
                "Refreshing...".to_string()
            }
            Command::Toggle if view.polling_enabled => {
                session.disable()?;
                "Auto-update OFF".to_string()
            }
            Command::Toggle => {
                session.enable(view.interval.seconds())?;
                format!("Auto-update ON, {}", view.interval.label())
            }
            Command::Interval(secs) => match session.enable(secs) {
                Ok(()) => format!("Auto-update ON, polling every {}s", secs),
                Err(SessionError::Config(e)) => e.to_string(),
                Err(e) => return Err(e.into()),
            },
            Command::Acknowledge => {
                session.acknowledge()?;
                "New data acknowledged.".to_string()
            }
            Command::Show => format!("{}\n{}", self.render_table(&view), self.render_status(&view)),
            Command::Stats => match &view.snapshot {
                Some(snapshot) => Self::render_stats(&views::statistics(snapshot.records(), DEFAULT_TOP_N)),
                None => "No data loaded yet.".to_string(),
            },
            Command::Search(term) => {
                self.search = term;
                self.render_table(&view)
            }
            Command::Column(column) => {
                self.column = column;
                self.render_table(&view)
            }
            Command::Export(format) => {
                let format = format.unwrap_or(self.export_format);
                let records = view.snapshot.as_ref().map(|s| s.records()).unwrap_or(&[]);
                self.export(records, format)
            }
        };
        println!("{}", output);
        Ok(Flow::Continue)
    }
}

/// Interactive loop: prints notifications as the session emits them and
/// executes stdin commands until quit, end of input with polling off, or
/// `shutdown`.
pub async fn run(session: &SessionHandle, settings: &Settings, shutdown: CancellationToken) -> Result<()> {
    let mut dashboard = Dashboard::new(settings);
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!("Alpha viewer: watching '{}'. Type h for help.", dashboard.table);
    let view = session.view();
    if view.snapshot.is_some() {
        println!("{}", dashboard.render_table(&view));
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = dashboard.render_event(&event) {
                        println!("{}", text);
                    }
                    if matches!(event, PollEvent::Loaded { .. } | PollEvent::NewData { .. }) {
                        let view = session.view();
                        println!("{}\n{}", dashboard.render_table(&view), dashboard.render_status(&view));
                    }
                }
                Err(RecvError::Lagged(skipped)) => log::warn!("Dashboard fell behind, skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if dashboard.apply(command, session)? == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{}", message),
                },
                Ok(None) => {
                    log::info!("Standard input closed, continuing until shutdown");
                    stdin_open = false;
                    if !session.view().polling_enabled {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to read standard input: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}

/// Single fetch without a timer: prints the table and statistics and writes
/// the export when a format is configured.
pub async fn run_once<G: Gateway + 'static>(gateway: Arc<G>, settings: &Settings) -> Result<Option<PathBuf>> {
    let mut scheduler = PollScheduler::new(
        gateway,
        SchedulerSettings {
            auto_update: false,
            ..settings.scheduler.clone()
        },
    );

    match scheduler.refresh_now().await {
        TickOutcome::Notified(_) => {}
        TickOutcome::Failed(_) => match scheduler.state().last_warning() {
            Some(warning) => bail!("{}", warning.message),
            None => bail!("fetch from '{}' failed", settings.scheduler.table),
        },
        other => bail!("fetch from '{}' did not complete: {:?}", settings.scheduler.table, other),
    }

    let dashboard = Dashboard::new(settings);
    let view = scheduler.view();
    println!("{}", dashboard.render_table(&view));

    let records = view.snapshot.as_ref().map(|s| s.records()).unwrap_or(&[]);
    println!("{}", Dashboard::render_stats(&views::statistics(records, DEFAULT_TOP_N)));

    match settings.export_format {
        Some(format) => {
            let path = views::write_export(records, format, &settings.export_dir)?;
            println!("Exported {} records to {}", records.len(), path.display());
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

fn cell(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lib_viewer::connections::{DbError, GatewayConfig, Snapshot};
    use lib_viewer::core::{FetchWarning, Phase, PollInterval};

    fn settings(dir: PathBuf) -> Settings {
        Settings {
            gateway: GatewayConfig::new("http://localhost:1", "key"),
            scheduler: SchedulerSettings::default(),
            log_dir: dir.clone(),
            log_level: "info".to_string(),
            search: None,
            filter_column: FilterColumn::All,
            export_format: None,
            export_dir: dir,
            once: true,
        }
    }

    fn view_with(records: Vec<Record>) -> PollView {
        PollView {
            phase: Phase::Waiting,
            polling_enabled: true,
            interval: PollInterval::FAST,
            snapshot: Some(Arc::new(Snapshot::new(records))),
            new_data: true,
            last_change: None,
            warning: None,
            last_checked: Some(Utc::now()),
            ticks: 2,
        }
    }

    struct FixedGateway(Result<Vec<Record>, DbError>);

    impl Gateway for FixedGateway {
        async fn fetch_all(&self, _table: &str) -> Result<Snapshot, DbError> {
            self.0.clone().map(Snapshot::new)
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("r"), Ok(Some(Command::Refresh)));
        assert_eq!(parse_command("5"), Ok(Some(Command::Interval(5))));
        assert_eq!(parse_command("interval 2"), Ok(Some(Command::Interval(2))));
        assert_eq!(parse_command("/ Fal "), Ok(Some(Command::Search(Some("Fal".to_string())))));
        assert_eq!(parse_command("/"), Ok(Some(Command::Search(None))));
        assert_eq!(parse_command("c call sign"), Ok(Some(Command::Column(FilterColumn::CallSign))));
        assert_eq!(parse_command("e xlsx"), Ok(Some(Command::Export(Some(ExportFormat::Excel)))));
        assert_eq!(parse_command("E"), Ok(Some(Command::Export(None))));
        assert!(parse_command("e pdf").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn renders_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let dash = Dashboard::new(&settings(dir.path().to_path_buf()));

        assert_eq!(
            dash.render_event(&PollEvent::NewData { delta: 2, count: 7 }).as_deref(),
            Some("New data detected! +2 rows (7 total). Type a to acknowledge.")
        );
        assert!(dash.render_event(&PollEvent::Unchanged { count: 7 }).is_none());

        let warning = FetchWarning {
            kind: WarningKind::Query,
            message: "relation missing".to_string(),
            at: Utc::now(),
        };
        assert_eq!(
            dash.render_event(&PollEvent::FetchFailed(warning)).as_deref(),
            Some("ERROR: relation missing")
        );
    }

    #[test]
    fn table_honours_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut dash = Dashboard::new(&settings(dir.path().to_path_buf()));
        let view = view_with(vec![
            Record::new("1", Some("ABC-123"), Some("Falcon")),
            Record::new("2", Some("XYZ-9"), Some("Eagle")),
        ]);

        let full = dash.render_table(&view);
        assert!(full.contains("ABC-123") && full.contains("XYZ-9"));
        assert!(full.ends_with("Total records: 2"));

        dash.search = Some("eag".to_string());
        let filtered = dash.render_table(&view);
        assert!(!filtered.contains("ABC-123"));
        assert!(filtered.ends_with("Showing 1 of 2 records matching 'eag' in All Columns"));

        let status = dash.render_status(&view);
        assert!(status.starts_with("Auto-update ON, Fast (1 second)"));
        assert!(status.ends_with("2 records | NEW DATA"));
    }

    #[test]
    fn empty_and_missing_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let dash = Dashboard::new(&settings(dir.path().to_path_buf()));
        assert_eq!(dash.render_table(&view_with(vec![])), "No records found in the database.");

        let mut view = view_with(vec![]);
        view.snapshot = None;
        assert_eq!(dash.render_table(&view), "No data loaded yet.");
    }

    #[tokio::test]
    async fn once_mode_fetches_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path().to_path_buf());
        s.export_format = Some(ExportFormat::Csv);
        let gw = Arc::new(FixedGateway(Ok(vec![Record::new("1", Some("ABC-123"), Some("Falcon"))])));

        let path = run_once(gw, &s).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("vehicle_data.csv"));
        assert!(std::fs::read_to_string(path).unwrap().contains("1,ABC-123,Falcon"));
    }

    #[tokio::test]
    async fn once_mode_reports_fetch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let gw = Arc::new(FixedGateway(Err(DbError::QueryError("relation missing".to_string()))));
        let err = run_once(gw, &settings(dir.path().to_path_buf())).await.unwrap_err();
        assert!(err.to_string().contains("relation missing"));
    }
}
