pub mod aggregate;
pub mod classify;
pub mod diagnostics;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod risk;

pub use aggregate::{aggregate, observe, Aggregate, Aggregator, ScriptPolicy};
pub use classify::{category_for_port, classify};
pub use diagnostics::{Diagnostic, DiagnosticLevel};
pub use model::{HostRecord, PortObservation, RiskLevel, ServiceCategory};
pub use parser::{
    load_document, parse_document, parse_hosts, DocumentError, HostEntry, ParsedDocument,
    RawPort, ScriptResult,
};
pub use pipeline::{
    collect_documents, emit, parse_documents, run_pipeline, PipelineConfig, PipelineError,
    RunOutcome, RunSummary, DEFAULT_INPUT_DIR, DEFAULT_OUTPUT_DIR,
};
pub use report::{
    host_summary_table, port_detail_table, render_table, write_table, Cell, ReportError,
    ReportFormat, ReportOptions, ReportTable,
};
pub use risk::{assess_risk, extract_vulnerability_ids};
