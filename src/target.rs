//! Probe targets and the input files they are read from.
//!
//! Two input shapes are supported: a flat list with one host per line, and a
//! CSV file with a `host` column, an optional `port` column and any number of
//! extra columns that travel with the target as metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Split};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::SiteCheckError;

/// Port used when a target does not name one.
pub const DEFAULT_PORT: u16 = 443;

/// One host to probe. Immutable once handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub hostname: String,
    pub port: u16,
    /// Extra columns of the source row, keyed by header name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ProbeTarget {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        ProbeTarget {
            hostname: hostname.into(),
            port,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parses `host`, `host:port`, `[v6]:port` or a URL such as
    /// `https://host:8443/path`.
    ///
    /// ```
    /// # use sitecheck::ProbeTarget;
    /// let target = ProbeTarget::parse("example.com:8443").unwrap();
    /// assert_eq!(target.hostname, "example.com");
    /// assert_eq!(target.port, 8443);
    /// ```
    pub fn parse(input: &str) -> Result<ProbeTarget, SiteCheckError> {
        let input = input.trim();
        if input.contains("://") {
            return Self::parse_url(input);
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid(input, "unclosed '['"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid(input, "unexpected text after ']'")),
            }
        } else if input.matches(':').count() == 1 {
            let (host, port) = input.split_once(':').unwrap_or((input, ""));
            (host, Some(port))
        } else {
            // bare IPv6 literals carry several colons and never a port
            (input, None)
        };

        let port = match port {
            Some(raw) => parse_port(raw)?,
            None => DEFAULT_PORT,
        };
        if host.trim().is_empty() {
            return Err(invalid(input, "hostname cannot be empty"));
        }
        Ok(ProbeTarget::new(host.trim(), port))
    }

    fn parse_url(input: &str) -> Result<ProbeTarget, SiteCheckError> {
        let url = Url::parse(input).map_err(|e| invalid(input, &e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid(input, "URL has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        Ok(ProbeTarget::new(host, url.port().unwrap_or(DEFAULT_PORT)))
    }

    /// Name to send as TLS Server Name Indication.
    ///
    /// The hostname is always run through IDNA, so ASCII names come back
    /// lowercased and unchanged otherwise. IP literals get no SNI.
    pub fn server_name(&self) -> Option<String> {
        if self.hostname.parse::<IpAddr>().is_ok() {
            return None;
        }
        match Host::parse(&self.hostname) {
            Ok(Host::Domain(domain)) => Some(domain),
            Ok(Host::Ipv4(_)) | Ok(Host::Ipv6(_)) => None,
            Err(_) => Some(self.hostname.to_ascii_lowercase()),
        }
    }

    /// `scheme://host:port/`, bracketing IPv6 literals.
    pub fn url(&self, scheme: &str) -> String {
        if self.hostname.contains(':') {
            format!("{}://[{}]:{}/", scheme, self.hostname, self.port)
        } else {
            format!("{}://{}:{}/", scheme, self.hostname, self.port)
        }
    }

    /// `host:port` for log lines and error messages.
    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

fn parse_port(raw: &str) -> Result<u16, SiteCheckError> {
    let raw = raw.trim();
    // spreadsheets like to export ports as 443.0
    let digits = raw.strip_suffix(".0").unwrap_or(raw);
    match digits.parse::<u16>() {
        Ok(0) | Err(_) => Err(SiteCheckError::InvalidInput {
            field: "port".to_string(),
            reason: format!("'{}' is not a valid TCP port", raw),
        }),
        Ok(port) => Ok(port),
    }
}

fn invalid(input: &str, reason: &str) -> SiteCheckError {
    SiteCheckError::InvalidInput {
        field: "host".to_string(),
        reason: format!("'{}': {}", input, reason),
    }
}

/// Shape of the input file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InputFormat {
    /// `Csv` for `.csv` files, `Lines` for everything else
    #[default]
    Auto,
    Lines,
    Csv,
}

impl InputFormat {
    pub fn resolve(self, path: &Path) -> InputFormat {
        match self {
            InputFormat::Auto => {
                let is_csv = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if is_csv {
                    InputFormat::Csv
                } else {
                    InputFormat::Lines
                }
            }
            other => other,
        }
    }
}

/// Streaming reader producing one [`ProbeTarget`] per usable input row.
///
/// Rows that cannot be turned into a target are logged and skipped. Errors
/// that make the rest of the file unreadable are yielded as `Err`.
pub struct TargetReader {
    path: PathBuf,
    row: usize,
    kind: ReaderKind,
}

enum ReaderKind {
    Lines(Split<BufReader<File>>),
    Csv {
        records: csv::StringRecordsIntoIter<File>,
        headers: csv::StringRecord,
        host: usize,
        port: Option<usize>,
    },
    Empty,
}

impl TargetReader {
    /// Opens `path`. Fails when the file is missing or unreadable, or when a
    /// CSV file has no `host` column.
    pub fn open<P: AsRef<Path>>(path: P, format: InputFormat) -> Result<Self, SiteCheckError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| open_error(&path, e))?;
        let kind = match format.resolve(&path) {
            InputFormat::Csv => Self::csv_kind(&path, file)?,
            _ => ReaderKind::Lines(BufReader::new(file).split(b'\n')),
        };
        debug!("reading targets from {}", path.display());
        Ok(TargetReader { path, row: 0, kind })
    }

    fn csv_kind(path: &Path, file: File) -> Result<ReaderKind, SiteCheckError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| SiteCheckError::InputUnreadable {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?
            .clone();
        if headers.is_empty() {
            return Ok(ReaderKind::Empty);
        }

        let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let host = column("host").ok_or_else(|| SiteCheckError::InvalidInput {
            field: "host".to_string(),
            reason: format!("{} has no 'host' column", path.display()),
        })?;
        let port = column("port");
        Ok(ReaderKind::Csv {
            records: reader.into_records(),
            headers,
            host,
            port,
        })
    }

    fn unreadable(&self, details: String) -> SiteCheckError {
        SiteCheckError::InputUnreadable {
            path: self.path.clone(),
            details,
        }
    }
}

fn open_error(path: &Path, e: io::Error) -> SiteCheckError {
    if e.kind() == io::ErrorKind::NotFound {
        SiteCheckError::InputNotFound {
            path: path.to_path_buf(),
        }
    } else {
        SiteCheckError::InputUnreadable {
            path: path.to_path_buf(),
            details: e.to_string(),
        }
    }
}

impl Iterator for TargetReader {
    type Item = Result<ProbeTarget, SiteCheckError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.row += 1;
            let row = self.row;
            let parsed = match &mut self.kind {
                ReaderKind::Empty => return None,
                ReaderKind::Lines(lines) => match lines.next()? {
                    Err(e) => return Some(Err(self.unreadable(e.to_string()))),
                    Ok(bytes) => {
                        let line = match String::from_utf8(bytes) {
                            Ok(line) => line,
                            Err(e) => {
                                warn!("skipping row {} of {}: {}", row, self.path.display(), e);
                                continue;
                            }
                        };
                        let line = line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        ProbeTarget::parse(line)
                    }
                },
                ReaderKind::Csv {
                    records,
                    headers,
                    host,
                    port,
                } => match records.next()? {
                    Err(e) => match e.kind() {
                        csv::ErrorKind::Io(_) => {
                            return Some(Err(self.unreadable(e.to_string())));
                        }
                        _ => {
                            warn!("skipping row {}: {}", row, e);
                            continue;
                        }
                    },
                    Ok(record) => target_from_record(&record, headers, *host, *port),
                },
            };

            match parsed {
                Ok(target) => return Some(Ok(target)),
                Err(e) => warn!("skipping row {} of {}: {}", row, self.path.display(), e),
            }
        }
    }
}

fn target_from_record(
    record: &csv::StringRecord,
    headers: &csv::StringRecord,
    host_column: usize,
    port_column: Option<usize>,
) -> Result<ProbeTarget, SiteCheckError> {
    let hostname = record.get(host_column).unwrap_or("").trim();
    if hostname.is_empty() {
        return Err(invalid(hostname, "hostname cannot be empty"));
    }
    let port = match port_column.and_then(|idx| record.get(idx)).map(str::trim) {
        Some(raw) if !raw.is_empty() => parse_port(raw)?,
        _ => DEFAULT_PORT,
    };

    let metadata = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != host_column && Some(*idx) != port_column)
        .map(|(idx, name)| (name.to_string(), record.get(idx).unwrap_or("").to_string()))
        .collect();
    Ok(ProbeTarget::new(hostname, port).with_metadata(metadata))
}
