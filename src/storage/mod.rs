mod event_log;
mod export;
mod report_store;

pub use event_log::{EventLog, Level, LogEntry};
pub use export::{export_report, parse_report, render_report, ExportError, ParseError, ReportEntry};
pub use report_store::ReportStore;
