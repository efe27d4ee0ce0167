use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use portsheet_core::{
    aggregate, host_summary_table, load_document, port_detail_table, render_table, run_pipeline,
    PipelineConfig, ReportFormat, ReportOptions, RunOutcome, ScriptPolicy, DEFAULT_INPUT_DIR,
    DEFAULT_OUTPUT_DIR,
};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Summarize nmap XML scan results into host and port reports")]
struct PortsheetCli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Aggregate every scan document in a directory and write both reports
    Run {
        /// Directory containing nmap XML documents
        #[arg(long, default_value = DEFAULT_INPUT_DIR)]
        input: PathBuf,
        /// Directory receiving all_hosts and port_detailed_report
        #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
        /// Report serialization
        #[arg(long, default_value_t = OutputFormat::Xlsx)]
        format: OutputFormat,
        /// Omit the risk level and CVE columns
        #[arg(long)]
        no_risk: bool,
        /// Keep every script result per port instead of only the last one
        #[arg(long)]
        all_scripts: bool,
        /// Print the host summary table to stdout
        #[arg(long)]
        preview: bool,
        /// Output the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse a single scan document and print its open ports
    Inspect {
        /// Path to an nmap XML document
        input: PathBuf,
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Xlsx,
}

impl From<OutputFormat> for ReportFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Csv => ReportFormat::Csv,
            OutputFormat::Xlsx => ReportFormat::Xlsx,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
        };
        write!(f, "{value}")
    }
}

fn main() -> anyhow::Result<()> {
    let cli = PortsheetCli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            input,
            output_dir,
            format,
            no_risk,
            all_scripts,
            preview,
            json,
        } => {
            let config = PipelineConfig {
                input_dir: input,
                output_dir,
                options: ReportOptions {
                    format: format.into(),
                    include_risk: !no_risk,
                },
                script_policy: if all_scripts {
                    ScriptPolicy::All
                } else {
                    ScriptPolicy::LastOnly
                },
            };
            let outcome = run_pipeline(&config).context("report generation failed")?;
            output_run(&outcome, &config, preview, json)?;
        }
        Command::Inspect { input, json } => {
            let document = load_document(&input)
                .with_context(|| format!("failed to parse {}", input.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                let result = aggregate(std::slice::from_ref(&document), ScriptPolicy::LastOnly);
                println!("{} ({} host entries)", document.name, document.hosts.len());
                if result.observations.is_empty() {
                    println!("No open ports.");
                } else {
                    println!("{}", render_table(&port_detail_table(&result.observations, true)));
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn output_run(
    outcome: &RunOutcome,
    config: &PipelineConfig,
    preview: bool,
    json: bool,
) -> anyhow::Result<()> {
    if json {
        let payload = json!({
            "summary": outcome.summary,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if preview && !outcome.aggregate.hosts.is_empty() {
        let table = host_summary_table(&outcome.aggregate.hosts, config.options.include_risk);
        println!("{}\n", render_table(&table));
    }
    print!("{}", outcome.summary);
    let unreadable = outcome.summary.unreadable_documents();
    if unreadable > 0 {
        println!("\n[error] {unreadable} document(s) could not be read");
    } else if outcome.summary.documents_parsed < outcome.summary.documents_found {
        println!("\n[warn] some documents were skipped");
    }
    Ok(())
}
