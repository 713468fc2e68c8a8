//! Two-phase host probe: HTTP reachability first, certificate inspection
//! only for hosts that answered.

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{error_chain, ProbeError};
use crate::result::{CertificateOutcome, HttpOutcome, ProbeResult};
use crate::target::ProbeTarget;
use crate::tls::{self, CONNECT_TIMEOUT};

/// Anything able to turn a target into a result.
///
/// Implementations must be total: every failure is reported inside the
/// returned [`ProbeResult`].
pub trait Prober: Sync {
    fn probe(&self, target: ProbeTarget) -> ProbeResult;
}

/// Knobs for [`HostProber`].
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Bound on the whole HTTP request
    pub http_timeout: Duration,
    /// Bound on TCP connect and each handshake read/write
    pub connect_timeout: Duration,
    /// Retry over plain `http://` when the HTTPS request fails without timing out
    pub plain_http_fallback: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        ProbeOptions {
            http_timeout: Duration::from_secs(5),
            connect_timeout: CONNECT_TIMEOUT,
            plain_http_fallback: true,
        }
    }
}

/// Network prober backed by a shared blocking HTTP client and OpenSSL.
pub struct HostProber {
    client: Client,
    options: ProbeOptions,
}

impl HostProber {
    pub fn new(options: ProbeOptions) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .no_proxy()
            .timeout(options.http_timeout)
            .connect_timeout(options.http_timeout)
            .user_agent(concat!("sitecheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Http {
                url: String::new(),
                details: error_chain(&e),
            })?;
        Ok(HostProber { client, options })
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// HTTP reachability phase.
    pub fn check_web_request(&self, target: &ProbeTarget) -> HttpOutcome {
        let https = self.get(target, "https");
        if !self.options.plain_http_fallback || !matches!(https, HttpOutcome::Failed(_)) {
            return https;
        }
        match self.get(target, "http") {
            reachable @ HttpOutcome::Reachable { .. } => reachable,
            _ => https,
        }
    }

    fn get(&self, target: &ProbeTarget, scheme: &'static str) -> HttpOutcome {
        let url = target.url(scheme);
        match self.client.get(&url).send() {
            Ok(response) => HttpOutcome::Reachable {
                scheme,
                status: response.status().as_u16(),
                headers: header_map(response.headers()),
            },
            Err(e) if e.is_timeout() => {
                debug!("{} timed out", url);
                HttpOutcome::TimedOut
            }
            Err(e) => HttpOutcome::Failed(ProbeError::Http {
                url,
                details: error_chain(&e),
            }),
        }
    }

    /// Certificate phase.
    pub fn check_socket_connect(&self, target: &ProbeTarget) -> CertificateOutcome {
        match tls::fetch_certificate(target, self.options.connect_timeout) {
            Ok(peer) => CertificateOutcome::Retrieved {
                peer_address: peer.peer_address.to_string(),
                certificate: peer.certificate,
            },
            Err(e) => {
                warn!("Failed to connect to {}. {}", target.address(), e);
                CertificateOutcome::Failed(e)
            }
        }
    }
}

impl Prober for HostProber {
    fn probe(&self, target: ProbeTarget) -> ProbeResult {
        let http = self.check_web_request(&target);
        let tls = match http {
            HttpOutcome::Reachable { .. } => self.check_socket_connect(&target),
            _ => CertificateOutcome::Skipped,
        };
        let result = ProbeResult::new(target, http, tls);
        debug!(
            host = %result.target.address(),
            reachable = result.http_reachable(),
            certificate = result.certificate().is_some(),
            "probe finished"
        );
        result
    }
}

/// Flattens response headers, joining repeated names with `, `.
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}
