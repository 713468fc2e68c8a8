//! Result output: console or file, text blocks, CSV rows or tables.
//!
//! The sink is owned and written by the dispatcher alone. Write policy
//! (overwrite, append, refuse) is enforced in [`ResultSink::open`], before
//! any host is probed.

use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::error::SiteCheckError;
use crate::result::ProbeResult;

/// Sentinel output value meaning "print to the console".
pub const CONSOLE_SENTINEL: &str = "PRINT";

/// Fixed CSV columns, in order. Metadata columns follow when enabled.
pub const CSV_COLUMNS: [&str; 11] = [
    "host",
    "port",
    "peername",
    "commonName",
    "SAN",
    "issuer",
    "expires",
    "http_connect",
    "http_status",
    "http_headers",
    "error",
];

const DIVIDER: &str = "--------------------------------------";

/// What to do when the output file already exists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WriteMode {
    /// Truncate before the first write
    Overwrite,
    /// Keep existing content and add to it
    Append,
    /// Fail if the file exists
    #[default]
    Refuse,
}

/// Report layout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    /// Divider-framed block per host
    #[default]
    Text,
    /// One delimited row per host
    Csv,
    /// One table per batch
    Table,
}

/// Where results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Console,
    File(PathBuf),
}

impl Destination {
    /// `PRINT`, `-` or an empty value select the console, anything else is a path.
    pub fn parse(value: &str) -> Destination {
        let value = value.trim();
        if value.is_empty() || value == "-" || value.eq_ignore_ascii_case(CONSOLE_SENTINEL) {
            Destination::Console
        } else {
            Destination::File(PathBuf::from(value))
        }
    }
}

enum Output {
    Csv(csv::Writer<Box<dyn Write>>),
    Text(Box<dyn Write>),
}

/// Writer for probe results.
pub struct ResultSink {
    output: Output,
    path: Option<PathBuf>,
    format: OutputFormat,
    merge_metadata: bool,
    header_pending: bool,
    metadata_columns: Vec<String>,
    written: usize,
}

impl ResultSink {
    /// Opens `destination` under the given write policy.
    ///
    /// # Errors
    ///
    /// * `SiteCheckError::OutputExists` - the file exists and `mode` is `Refuse`
    /// * `SiteCheckError::OutputUnwritable` - the file cannot be created or opened
    pub fn open(
        destination: &Destination,
        format: OutputFormat,
        mode: WriteMode,
    ) -> Result<Self, SiteCheckError> {
        let path = match destination {
            Destination::Console => {
                return Ok(Self::from_writer(Box::new(io::stdout()), format));
            }
            Destination::File(path) => path,
        };

        let existing_len = fs::metadata(path).ok().map(|m| m.len());
        let appending = mode == WriteMode::Append && existing_len.unwrap_or(0) > 0;
        let existing_columns = match format {
            OutputFormat::Csv if appending => existing_metadata_columns(path)?,
            _ => Vec::new(),
        };
        let mut options = OpenOptions::new();
        match (mode, existing_len) {
            (WriteMode::Refuse, Some(_)) => {
                return Err(SiteCheckError::OutputExists { path: path.clone() });
            }
            (WriteMode::Append, _) => options.create(true).append(true),
            _ => options.create(true).write(true).truncate(true),
        };
        let file = options
            .open(path)
            .map_err(|e| SiteCheckError::OutputUnwritable {
                path: Some(path.clone()),
                details: e.to_string(),
            })?;
        debug!("writing {} results to {}", format, path.display());

        let mut sink = Self::from_writer(Box::new(BufWriter::new(file)), format);
        sink.path = Some(path.clone());
        // appending to a non-empty file keeps the header already there
        sink.header_pending = !appending;
        sink.metadata_columns = existing_columns;
        Ok(sink)
    }

    /// Sink over an arbitrary writer, header included on the first write.
    pub fn from_writer(writer: Box<dyn Write>, format: OutputFormat) -> Self {
        let output = match format {
            OutputFormat::Csv => Output::Csv(
                csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(writer),
            ),
            _ => Output::Text(writer),
        };
        ResultSink {
            output,
            path: None,
            format,
            merge_metadata: false,
            header_pending: true,
            metadata_columns: Vec::new(),
            written: 0,
        }
    }

    /// Carry each target's metadata into the report.
    pub fn merge_metadata(mut self, merge: bool) -> Self {
        self.merge_metadata = merge;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Results written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Writes one completed batch and flushes.
    pub fn write_batch(&mut self, results: &[ProbeResult]) -> Result<(), SiteCheckError> {
        if self.header_pending && self.merge_metadata {
            if let Some(first) = results.first() {
                self.metadata_columns = first.target.metadata.keys().cloned().collect();
            }
        }
        self.write_header()?;

        match &mut self.output {
            Output::Csv(writer) => {
                for result in results {
                    let row = csv_row(result, &self.metadata_columns);
                    writer
                        .write_record(&row)
                        .map_err(|e| unwritable(&self.path, e))?;
                }
                writer.flush().map_err(|e| unwritable(&self.path, e))?;
            }
            Output::Text(writer) => {
                let rendered = match self.format {
                    OutputFormat::Table if results.is_empty() => String::new(),
                    OutputFormat::Table => format!("{}\n", render_table(results)),
                    _ => results
                        .iter()
                        .map(|r| render_text(r, self.merge_metadata))
                        .collect(),
                };
                writer
                    .write_all(rendered.as_bytes())
                    .and_then(|_| writer.flush())
                    .map_err(|e| unwritable(&self.path, e))?;
            }
        }
        self.written += results.len();
        Ok(())
    }

    /// Emits the CSV header if nothing was written yet and flushes.
    pub fn finish(mut self) -> Result<usize, SiteCheckError> {
        self.write_header()?;
        let flushed = match &mut self.output {
            Output::Csv(writer) => writer.flush(),
            Output::Text(writer) => writer.flush(),
        };
        flushed.map_err(|e| unwritable(&self.path, e))?;
        Ok(self.written)
    }

    fn write_header(&mut self) -> Result<(), SiteCheckError> {
        if !self.header_pending {
            return Ok(());
        }
        self.header_pending = false;
        if let Output::Csv(writer) = &mut self.output {
            let header = CSV_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .chain(self.metadata_columns.iter().cloned());
            writer
                .write_record(header)
                .map_err(|e| unwritable(&self.path, e))?;
        }
        Ok(())
    }
}

/// Metadata columns of an existing report, everything after the fixed ones.
fn existing_metadata_columns(path: &Path) -> Result<Vec<String>, SiteCheckError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| unwritable(&Some(path.to_path_buf()), e))?;
    let headers = reader
        .headers()
        .map_err(|e| unwritable(&Some(path.to_path_buf()), e))?;
    Ok(headers
        .iter()
        .skip(CSV_COLUMNS.len())
        .map(str::to_string)
        .collect())
}

fn unwritable(path: &Option<PathBuf>, e: impl std::fmt::Display) -> SiteCheckError {
    SiteCheckError::OutputUnwritable {
        path: path.clone(),
        details: e.to_string(),
    }
}

fn csv_row(result: &ProbeResult, metadata_columns: &[String]) -> Vec<String> {
    let cert = result.certificate();
    let headers = result
        .http_headers()
        .map(|h| serde_json::to_string(h).unwrap_or_default())
        .unwrap_or_default();

    let mut row = vec![
        result.target.hostname.clone(),
        result.target.port.to_string(),
        result.peer_address().unwrap_or_default().to_string(),
        cert.map(|c| c.common_name.clone()).unwrap_or_default(),
        cert.map(|c| c.san_list()).unwrap_or_default(),
        cert.map(|c| c.issuer.clone()).unwrap_or_default(),
        cert.map(|c| c.not_valid_after.clone()).unwrap_or_default(),
        result.http_reachable().to_string(),
        result.http_status().map(|s| s.to_string()).unwrap_or_default(),
        headers,
        result.error().unwrap_or_default(),
    ];
    row.extend(
        metadata_columns
            .iter()
            .map(|column| result.target.metadata.get(column).cloned().unwrap_or_default()),
    );
    row
}

/// Multi-line block for one host, framed by divider lines.
pub fn render_text(result: &ProbeResult, with_metadata: bool) -> String {
    let mut out = String::new();
    let mut line = |text: String| {
        out.push_str(&text);
        out.push('\n');
    };

    line(DIVIDER.to_string());
    line(format!("Hostname: {}", result.target.hostname));
    line(format!("Port: {}", result.target.port));
    line(format!("HTTP reachable: {}", result.http_reachable()));
    if let Some(status) = result.http_status() {
        line(format!(
            "HTTP status: {} ({})",
            status,
            result.http_scheme().unwrap_or("https")
        ));
    }
    if let Some(headers) = result.http_headers() {
        line("HTTP headers:".to_string());
        for (name, value) in headers {
            line(format!("\t{}: {}", name, value));
        }
    }
    if let Some(peer) = result.peer_address() {
        line(format!("Peer address: {}", peer));
    }
    if let Some(cert) = result.certificate() {
        line(format!("Common Name: {}", cert.common_name));
        line("Subject Alternative Names:".to_string());
        for san in &cert.subject_alt_names {
            line(format!("\tDNS Name: {}", san));
        }
        line(format!("Issuer: {}", cert.issuer));
        line(format!("Expires: {}", cert.not_valid_after));
        line(format!("Days left: {}", cert.days_remaining));
    }
    if let Some(error) = result.error() {
        line(format!("Error: {}", error));
    }
    if with_metadata && !result.target.metadata.is_empty() {
        line("Metadata:".to_string());
        for (key, value) in &result.target.metadata {
            line(format!("\t{}: {}", key, value));
        }
    }
    line(DIVIDER.to_string());
    out
}

/// One table row per host.
pub fn render_table(results: &[ProbeResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec![
            "Host", "Port", "HTTP", "Status", "Peer", "Common Name", "Issuer", "Expires",
            "Days", "Error",
        ]);
    for result in results {
        let cert = result.certificate();
        table.add_row(vec![
            result.target.hostname.clone(),
            result.target.port.to_string(),
            result.http_reachable().to_string(),
            result.http_status().map(|s| s.to_string()).unwrap_or_default(),
            result.peer_address().unwrap_or_default().to_string(),
            cert.map(|c| c.common_name.clone()).unwrap_or_default(),
            cert.map(|c| c.issuer.clone()).unwrap_or_default(),
            cert.map(|c| c.not_valid_after.clone()).unwrap_or_default(),
            cert.map(|c| c.days_remaining.to_string()).unwrap_or_default(),
            result.error().unwrap_or_default(),
        ]);
    }
    table
}
