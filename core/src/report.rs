use crate::model::{HostRecord, PortObservation};
use comfy_table::{presets::ASCII_FULL, Table};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

pub const LIST_SEPARATOR: &str = ";";
pub const EMPTY_HOSTNAMES: &str = "N/A";

// Excel rejects longer cell strings.
const XLSX_MAX_CELL_CHARS: usize = 32_767;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("workbook error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Csv,
    #[default]
    Xlsx,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub format: ReportFormat,
    /// Adds the Risk Level(s) and CVE List(s) columns.
    pub include_risk: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            format: ReportFormat::default(),
            include_risk: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Number(u64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(text) => f.write_str(text),
            Cell::Number(number) => write!(f, "{number}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub title: &'static str,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<Cell>>,
}

impl ReportTable {
    /// Cell under `column` in `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let index = self.columns.iter().position(|name| *name == column)?;
        self.rows.get(row)?.get(index)
    }
}

fn joined<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values.into_iter().collect::<Vec<_>>().join(LIST_SEPARATOR)
}

fn hostnames_cell<'a>(hostnames: impl IntoIterator<Item = &'a String>) -> String {
    let names: Vec<&str> = hostnames.into_iter().map(String::as_str).collect();
    if names.is_empty() {
        EMPTY_HOSTNAMES.to_string()
    } else {
        names.join(LIST_SEPARATOR)
    }
}

fn optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn vulnerability_cell(observation: &PortObservation) -> String {
    joined(observation.vulnerability_ids.iter().map(String::as_str))
}

/// One row per host. Every list column projects the host's port sequence
/// in the same order, so the Nth entry of each column describes the same
/// observation.
///
/// CVE Lists is the exception: each port's ids are joined with the same
/// `;` as the outer list, so a port with several ids contributes several
/// entries and the column can hold more entries than Ports.
pub fn host_summary_table(hosts: &[HostRecord], include_risk: bool) -> ReportTable {
    let mut columns = vec![
        "IP",
        "Hostnames",
        "OS",
        "Port Count",
        "Ports",
        "Protocols",
        "Services",
        "Categories",
        "Products",
        "Service FPs",
        "NSE Script IDs",
        "NSE Script Outputs",
    ];
    if include_risk {
        columns.extend(["Risk Levels", "CVE Lists"]);
    }
    columns.extend(["Source File", "Timestamp"]);

    let rows = hosts
        .iter()
        .map(|host| {
            let ports = &host.ports;
            let port_numbers: Vec<String> = ports.iter().map(|p| p.port.to_string()).collect();
            let vulnerability_lists: Vec<String> = ports.iter().map(vulnerability_cell).collect();

            let mut row: Vec<Cell> = vec![
                host.address.as_str().into(),
                hostnames_cell(&host.hostnames).into(),
                host.os_guess.as_str().into(),
                Cell::Number(host.port_count() as u64),
                joined(port_numbers.iter().map(String::as_str)).into(),
                joined(ports.iter().map(|p| p.protocol.as_str())).into(),
                joined(ports.iter().map(|p| p.service.as_str())).into(),
                joined(ports.iter().map(|p| p.category.as_str())).into(),
                joined(ports.iter().map(|p| optional(&p.product))).into(),
                joined(ports.iter().map(|p| optional(&p.fingerprint))).into(),
                joined(ports.iter().map(|p| optional(&p.script_id))).into(),
                joined(ports.iter().map(|p| optional(&p.script_output))).into(),
            ];
            if include_risk {
                row.push(joined(ports.iter().map(|p| p.risk.as_str())).into());
                row.push(joined(vulnerability_lists.iter().map(String::as_str)).into());
            }
            row.push(host.source.as_str().into());
            row.push(host.scanned_at.as_str().into());
            row
        })
        .collect();

    ReportTable {
        title: "All Hosts",
        columns,
        rows,
    }
}

/// One row per observation, in the order given (the aggregator sorts by
/// port, then address). Notes is always written empty.
pub fn port_detail_table(observations: &[PortObservation], include_risk: bool) -> ReportTable {
    let mut columns = vec![
        "Port",
        "IP",
        "Host",
        "OS",
        "Protocol",
        "Service",
        "Category",
        "Product",
        "Service FP",
        "NSE Script ID",
        "NSE Script Output",
    ];
    if include_risk {
        columns.extend(["Risk Level", "CVE List"]);
    }
    columns.extend(["Source File", "Notes"]);

    let rows = observations
        .iter()
        .map(|obs| {
            let mut row: Vec<Cell> = vec![
                Cell::Number(u64::from(obs.port)),
                obs.address.as_str().into(),
                hostnames_cell(&obs.hostnames).into(),
                obs.os_guess.as_str().into(),
                obs.protocol.as_str().into(),
                obs.service.as_str().into(),
                obs.category.as_str().into(),
                optional(&obs.product).into(),
                optional(&obs.fingerprint).into(),
                optional(&obs.script_id).into(),
                optional(&obs.script_output).into(),
            ];
            if include_risk {
                row.push(obs.risk.as_str().into());
                row.push(vulnerability_cell(obs).into());
            }
            row.push(obs.source.as_str().into());
            row.push(obs.notes.as_str().into());
            row
        })
        .collect();

    ReportTable {
        title: "Port Details",
        columns,
        rows,
    }
}

/// Writes `table` to `path`, creating the parent directory if needed.
pub fn write_table(
    table: &ReportTable,
    format: ReportFormat,
    path: &Path,
) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match format {
        ReportFormat::Csv => write_csv(table, path),
        ReportFormat::Xlsx => write_xlsx(table, path),
    }
}

fn write_csv(table: &ReportTable, path: &Path) -> Result<(), ReportError> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_path(path)?;

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(Cell::to_string))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(table: &ReportTable, path: &Path) -> Result<(), ReportError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(table.title)?;

    let header_format = Format::new().set_bold();
    for (col, column) in table.columns.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *column, &header_format)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        let row_number = index as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            match cell {
                Cell::Number(number) => {
                    sheet.write_number(row_number, col as u16, *number as f64)?;
                }
                Cell::Text(text) => {
                    sheet.write_string(row_number, col as u16, clamp_cell(text))?;
                }
            }
        }
    }

    if !table.columns.is_empty() {
        let last_col = table.columns.len() as u16 - 1;
        sheet.autofilter(0, 0, table.rows.len() as u32, last_col)?;
    }
    sheet.autofit();

    workbook.save(path)?;
    Ok(())
}

fn clamp_cell(text: &str) -> &str {
    match text.char_indices().nth(XLSX_MAX_CELL_CHARS) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Console rendering of a table.
pub fn render_table(table: &ReportTable) -> String {
    let mut display = Table::new();
    display.load_preset(ASCII_FULL);
    display.set_header(table.columns.clone());

    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(Cell::to_string).collect();
        display.add_row(cells);
    }

    display.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RiskLevel, ServiceCategory};
    use calamine::{open_workbook, Data, Reader, Xlsx};
    use std::collections::BTreeSet;
    use std::io::Read;

    fn observation(
        port: u16,
        address: &str,
        service: &str,
        category: ServiceCategory,
    ) -> PortObservation {
        PortObservation {
            port,
            address: address.to_string(),
            hostnames: Vec::new(),
            os_guess: "Linux".to_string(),
            protocol: "tcp".to_string(),
            service: service.to_string(),
            category,
            product: None,
            fingerprint: None,
            script_id: None,
            script_output: None,
            risk: RiskLevel::Low,
            vulnerability_ids: Vec::new(),
            source: "scan.xml".to_string(),
            notes: String::new(),
        }
    }

    fn record() -> HostRecord {
        let mut http = observation(80, "10.0.0.5", "http", ServiceCategory::Web);
        http.product = Some("nginx".to_string());
        http.script_id = Some("http-vuln".to_string());
        http.script_output = Some("VULNERABLE CVE-2017-5638 CVE-2018-11776".to_string());
        http.risk = RiskLevel::High;
        http.vulnerability_ids = vec!["CVE-2017-5638".to_string(), "CVE-2018-11776".to_string()];

        HostRecord {
            address: "10.0.0.5".to_string(),
            hostnames: BTreeSet::new(),
            os_guess: "Linux".to_string(),
            ports: vec![observation(22, "10.0.0.5", "ssh", ServiceCategory::Ssh), http],
            source: "scan.xml".to_string(),
            scanned_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn text(table: &ReportTable, row: usize, column: &str) -> String {
        table
            .cell(row, column)
            .map(Cell::to_string)
            .unwrap_or_else(|| panic!("missing cell {column}"))
    }

    #[test]
    fn host_summary_columns_stay_aligned() {
        let table = host_summary_table(&[record()], true);
        assert_eq!(table.columns.len(), 16);
        assert_eq!(text(&table, 0, "Hostnames"), "N/A");
        assert_eq!(table.cell(0, "Port Count"), Some(&Cell::Number(2)));
        assert_eq!(text(&table, 0, "Ports"), "22;80");
        assert_eq!(text(&table, 0, "Services"), "ssh;http");
        assert_eq!(text(&table, 0, "Categories"), "ssh;web");
        // empty entries are kept as empty strings, never N/A
        assert_eq!(text(&table, 0, "Products"), ";nginx");
        assert_eq!(text(&table, 0, "NSE Script IDs"), ";http-vuln");
        assert_eq!(text(&table, 0, "Risk Levels"), "Low;High");
        assert_eq!(text(&table, 0, "CVE Lists"), ";CVE-2017-5638;CVE-2018-11776");
        assert_eq!(text(&table, 0, "Timestamp"), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn risk_columns_are_optional() {
        let hosts = host_summary_table(&[record()], false);
        assert_eq!(hosts.columns.len(), 14);
        assert!(hosts.cell(0, "Risk Levels").is_none());
        assert_eq!(hosts.columns[12], "Source File");

        let detail = port_detail_table(&record().ports, false);
        assert_eq!(
            detail.columns,
            vec![
                "Port", "IP", "Host", "OS", "Protocol", "Service", "Category", "Product",
                "Service FP", "NSE Script ID", "NSE Script Output", "Source File", "Notes"
            ]
        );
    }

    #[test]
    fn port_detail_rows_follow_input_order() {
        let mut named = observation(443, "10.0.0.6", "https", ServiceCategory::Web);
        named.hostnames = vec!["a.corp".to_string(), "b.corp".to_string()];
        let observations = vec![observation(22, "10.0.0.5", "ssh", ServiceCategory::Ssh), named];

        let table = port_detail_table(&observations, true);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(1, "Port"), Some(&Cell::Number(443)));
        assert_eq!(text(&table, 0, "Host"), "N/A");
        assert_eq!(text(&table, 1, "Host"), "a.corp;b.corp");
        assert_eq!(text(&table, 0, "Risk Level"), "Low");
        assert_eq!(text(&table, 0, "CVE List"), "");
        assert_eq!(text(&table, 1, "Notes"), "");
    }

    #[test]
    fn csv_output_quotes_embedded_separators() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("hosts.csv");

        let mut host = record();
        host.ports[1].script_output = Some("line one,\n\"quoted\"".to_string());
        let table = host_summary_table(&[host], true);
        write_table(&table, ReportFormat::Csv, &path).expect("csv written");

        let mut reader = csv::Reader::from_path(&path).expect("csv readable");
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(headers.get(0), Some("IP"));

        let records: Vec<csv::StringRecord> =
            reader.records().collect::<Result<_, _>>().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get(11), Some(";line one,\n\"quoted\""));
    }

    #[test]
    fn xlsx_output_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ports.xlsx");
        let table = port_detail_table(&record().ports, true);
        write_table(&table, ReportFormat::Xlsx, &path).expect("xlsx written");

        let mut workbook: Xlsx<_> = open_workbook(&path).expect("xlsx opens");
        assert_eq!(workbook.sheet_names(), vec!["Port Details".to_string()]);

        let range = workbook
            .worksheet_range("Port Details")
            .expect("sheet present");
        let header: Vec<String> = range
            .rows()
            .next()
            .expect("header row")
            .iter()
            .map(|cell| cell.to_string())
            .collect();
        assert_eq!(header, table.columns);
        assert_eq!(range.height(), table.rows.len() + 1);

        assert_eq!(range.get_value((1, 0)), Some(&Data::Float(22.0)));
        assert_eq!(range.get_value((2, 0)), Some(&Data::Float(80.0)));
        assert_eq!(
            range.get_value((1, 1)),
            Some(&Data::String("10.0.0.5".to_string()))
        );
    }

    #[test]
    fn xlsx_headers_are_bold() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hosts.xlsx");
        let table = host_summary_table(&[record()], true);
        write_table(&table, ReportFormat::Xlsx, &path).expect("xlsx written");

        let file = fs::File::open(&path).expect("xlsx readable");
        let mut archive = zip::ZipArchive::new(file).expect("xlsx is a zip container");
        let mut styles = String::new();
        archive
            .by_name("xl/styles.xml")
            .expect("styles part")
            .read_to_string(&mut styles)
            .expect("styles are utf-8");
        assert!(styles.contains("<b/>"), "a bold font is registered");

        let mut workbook: Xlsx<_> = open_workbook(&path).expect("xlsx opens");
        let range = workbook.worksheet_range("All Hosts").expect("sheet present");
        assert_eq!(range.get_value((0, 3)), Some(&Data::String("Port Count".to_string())));
        assert_eq!(range.get_value((1, 3)), Some(&Data::Float(2.0)));
    }

    #[test]
    fn clamps_oversized_cells() {
        let long = "x".repeat(XLSX_MAX_CELL_CHARS + 10);
        assert_eq!(clamp_cell(&long).len(), XLSX_MAX_CELL_CHARS);
        assert_eq!(clamp_cell("short"), "short");
    }

    #[test]
    fn preview_renders_headers() {
        let rendered = render_table(&host_summary_table(&[record()], true));
        assert!(rendered.contains("Port Count"));
        assert!(rendered.contains("10.0.0.5"));
    }
}
