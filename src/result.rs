//! Per-host probe results.
//!
//! Each probe phase reports a variant carrying either its data or the cause
//! of its failure, and [`ProbeResult`] combines the two phases. Callers read
//! the flat view (`http_reachable`, `certificate`, `error`, ...) through
//! accessors.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{error_chain, ProbeError};
use crate::target::ProbeTarget;

/// Certificate fields read from a completed handshake.
///
/// Fields the certificate does not carry are empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    pub issuer: String,
    pub not_valid_after: String,
    pub days_remaining: i32,
}

impl CertificateInfo {
    /// DNS subject alternative names, comma joined in certificate order.
    pub fn san_list(&self) -> String {
        self.subject_alt_names.join(",")
    }
}

/// Outcome of the HTTP reachability phase.
#[derive(Debug)]
pub enum HttpOutcome {
    Reachable {
        /// `https`, or `http` when the plain fallback answered
        scheme: &'static str,
        status: u16,
        headers: BTreeMap<String, String>,
    },
    /// No answer within the timeout. A normal negative result, not an error.
    TimedOut,
    Failed(ProbeError),
}

/// Outcome of the certificate phase.
#[derive(Debug)]
pub enum CertificateOutcome {
    /// Not attempted because the host was not reachable over HTTP
    Skipped,
    Retrieved {
        peer_address: String,
        certificate: CertificateInfo,
    },
    Failed(ProbeError),
}

/// Everything learned about one target.
#[derive(Debug)]
pub struct ProbeResult {
    pub target: ProbeTarget,
    http: HttpOutcome,
    tls: CertificateOutcome,
}

impl ProbeResult {
    /// Combines both phases. A certificate outcome is only kept when the HTTP
    /// phase reached the host.
    pub fn new(target: ProbeTarget, http: HttpOutcome, tls: CertificateOutcome) -> Self {
        let tls = match http {
            HttpOutcome::Reachable { .. } => tls,
            _ => CertificateOutcome::Skipped,
        };
        ProbeResult { target, http, tls }
    }

    pub fn http(&self) -> &HttpOutcome {
        &self.http
    }

    pub fn tls(&self) -> &CertificateOutcome {
        &self.tls
    }

    pub fn http_reachable(&self) -> bool {
        matches!(self.http, HttpOutcome::Reachable { .. })
    }

    pub fn http_status(&self) -> Option<u16> {
        match &self.http {
            HttpOutcome::Reachable { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn http_headers(&self) -> Option<&BTreeMap<String, String>> {
        match &self.http {
            HttpOutcome::Reachable { headers, .. } => Some(headers),
            _ => None,
        }
    }

    pub fn http_scheme(&self) -> Option<&'static str> {
        match &self.http {
            HttpOutcome::Reachable { scheme, .. } => Some(scheme),
            _ => None,
        }
    }

    pub fn peer_address(&self) -> Option<&str> {
        match &self.tls {
            CertificateOutcome::Retrieved { peer_address, .. } => Some(peer_address),
            _ => None,
        }
    }

    pub fn certificate(&self) -> Option<&CertificateInfo> {
        match &self.tls {
            CertificateOutcome::Retrieved { certificate, .. } => Some(certificate),
            _ => None,
        }
    }

    /// Cause of whichever phase failed, if one did.
    pub fn error(&self) -> Option<String> {
        match (&self.http, &self.tls) {
            (HttpOutcome::Failed(e), _) => Some(error_chain(e)),
            (_, CertificateOutcome::Failed(e)) => Some(error_chain(e)),
            _ => None,
        }
    }
}
