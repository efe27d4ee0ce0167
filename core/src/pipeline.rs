use crate::aggregate::{aggregate, Aggregate, ScriptPolicy};
use crate::diagnostics::Diagnostic;
use crate::parser::{load_document, ParsedDocument};
use crate::report::{
    host_summary_table, port_detail_table, write_table, ReportError, ReportOptions,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const DEFAULT_INPUT_DIR: &str = "./nmap_xml/";
pub const DEFAULT_OUTPUT_DIR: &str = "./output/";
pub const HOST_SUMMARY_STEM: &str = "all_hosts";
pub const PORT_DETAIL_STEM: &str = "port_detailed_report";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read input directory {path:?}: {source}")]
    InputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report {path:?}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: ReportError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub options: ReportOptions,
    #[serde(default)]
    pub script_policy: ScriptPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            options: ReportOptions::default(),
            script_policy: ScriptPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn host_summary_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{HOST_SUMMARY_STEM}.{}",
            self.options.format.extension()
        ))
    }

    pub fn port_detail_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{PORT_DETAIL_STEM}.{}",
            self.options.format.extension()
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub documents_found: usize,
    pub documents_parsed: usize,
    pub hosts: usize,
    pub observations: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub aggregate: Aggregate,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Documents: {} parsed of {} found",
            self.documents_parsed, self.documents_found
        )?;
        writeln!(
            f,
            "Hosts: {}, open port observations: {}",
            self.hosts, self.observations
        )?;
        if !self.diagnostics.is_empty() {
            writeln!(f, "Diagnostics:")?;
            for diagnostic in &self.diagnostics {
                writeln!(f, "  - {diagnostic}")?;
            }
        }
        if !self.outputs.is_empty() {
            writeln!(f, "Reports:")?;
            for output in &self.outputs {
                writeln!(f, "  - {output}")?;
            }
        }
        Ok(())
    }
}

impl RunSummary {
    /// Documents that could not be read at all, as opposed to rejected ones.
    pub fn unreadable_documents(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.is_error())
            .count()
    }
}

/// Lists `*.xml` files directly inside `dir`, sorted by file name.
pub fn collect_documents(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let input_err = |source| PipelineError::InputDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(input_err)? {
        let path = entry.map_err(input_err)?.path();
        let is_xml = path
            .file_name()
            .map(|name| name.to_string_lossy().ends_with(".xml"))
            .unwrap_or(false);
        if is_xml && path.is_file() {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

/// Parses every document in parallel. Results keep the order of `paths`;
/// documents that fail to parse are reported as diagnostics and dropped.
pub fn parse_documents(paths: &[PathBuf]) -> (Vec<ParsedDocument>, Vec<Diagnostic>) {
    let results: Vec<_> = paths
        .par_iter()
        .map(|path| (path, load_document(path)))
        .collect();

    let mut documents = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();

    for (path, result) in results {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        match result {
            Ok(document) => {
                debug!(document = %name, hosts = document.hosts.len(), "parsed document");
                documents.push(document);
            }
            Err(err) => {
                let diagnostic = Diagnostic::skipped_document(name, &err);
                if diagnostic.is_error() {
                    error!("{diagnostic}");
                } else {
                    warn!("{diagnostic}");
                }
                diagnostics.push(diagnostic);
            }
        }
    }

    (documents, diagnostics)
}

/// Writes both tables. Either write failing aborts the run.
pub fn emit(
    aggregate: &Aggregate,
    options: ReportOptions,
    host_summary_path: &Path,
    port_detail_path: &Path,
) -> Result<(), PipelineError> {
    let hosts = host_summary_table(&aggregate.hosts, options.include_risk);
    write_table(&hosts, options.format, host_summary_path).map_err(|source| {
        PipelineError::Report {
            path: host_summary_path.to_path_buf(),
            source,
        }
    })?;
    info!("host summary written to {}", host_summary_path.display());

    let details = port_detail_table(&aggregate.observations, options.include_risk);
    write_table(&details, options.format, port_detail_path).map_err(|source| {
        PipelineError::Report {
            path: port_detail_path.to_path_buf(),
            source,
        }
    })?;
    info!("port details written to {}", port_detail_path.display());

    Ok(())
}

pub fn run_pipeline(config: &PipelineConfig) -> Result<RunOutcome, PipelineError> {
    let paths = collect_documents(&config.input_dir)?;
    info!(
        "found {} scan document(s) in {}",
        paths.len(),
        config.input_dir.display()
    );

    let (documents, diagnostics) = parse_documents(&paths);
    let aggregate = aggregate(&documents, config.script_policy);

    let host_summary_path = config.host_summary_path();
    let port_detail_path = config.port_detail_path();
    emit(
        &aggregate,
        config.options,
        &host_summary_path,
        &port_detail_path,
    )?;

    let summary = RunSummary {
        documents_found: paths.len(),
        documents_parsed: documents.len(),
        hosts: aggregate.hosts.len(),
        observations: aggregate.observations.len(),
        diagnostics,
        outputs: vec![
            host_summary_path.to_string_lossy().to_string(),
            port_detail_path.to_string_lossy().to_string(),
        ],
    };

    Ok(RunOutcome { summary, aggregate })
}
