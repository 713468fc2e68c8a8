//! Certificate retrieval over an unverified TLS handshake.
//!
//! The handshake accepts any chain so expired, self-signed and mismatched
//! certificates can still be read and reported.

use openssl::asn1::{Asn1Time, Asn1TimeRef, TimeDiff};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslVerifyMode};
use openssl::x509::{X509NameRef, X509Ref};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

use crate::error::ProbeError;
use crate::result::CertificateInfo;
use crate::target::ProbeTarget;

/// Default bound on TCP connect and on each read/write of the handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Certificate and peer address captured from one handshake.
#[derive(Debug)]
pub struct PeerCertificate {
    pub peer_address: SocketAddr,
    pub certificate: CertificateInfo,
}

/// SSL context that completes a handshake with any server.
///
/// SECURITY: chain and hostname verification are both disabled here. The
/// result is used to read whatever certificate a server presents and must
/// never carry application data that relies on the peer being trusted.
pub fn insecure_context() -> Result<SslContext, ProbeError> {
    let mut context = SslContext::builder(SslMethod::tls())?;
    context.set_verify(SslVerifyMode::NONE);
    // accept the legacy ciphers and key sizes older servers still present
    context.set_security_level(0);
    Ok(context.build())
}

/// Connects to `target`, completes a TLS handshake without verification and
/// reads the leaf certificate.
pub fn fetch_certificate(
    target: &ProbeTarget,
    connect_timeout: Duration,
) -> Result<PeerCertificate, ProbeError> {
    let context = insecure_context()?;
    let mut ssl = Ssl::new(&context)?;
    if let Some(server_name) = target.server_name() {
        ssl.set_hostname(&server_name)?;
    }

    let tcp_stream = connect(target, connect_timeout)?;
    let peer_address = tcp_stream.peer_addr().map_err(|e| ProbeError::ConnectionFailed {
        address: target.address(),
        source: e,
    })?;
    tcp_stream
        .set_read_timeout(Some(connect_timeout))
        .and_then(|_| tcp_stream.set_write_timeout(Some(connect_timeout)))
        .map_err(|e| ProbeError::ConnectionFailed {
            address: target.address(),
            source: e,
        })?;

    let stream = ssl.connect(tcp_stream)?;
    let x509 = stream
        .ssl()
        .peer_certificate()
        .ok_or_else(|| ProbeError::CertificateError {
            reason: "server presented no certificate".to_string(),
        })?;

    Ok(PeerCertificate {
        peer_address,
        certificate: certificate_info(&x509),
    })
}

/// Resolves the target and connects to the first address that answers.
fn connect(target: &ProbeTarget, timeout: Duration) -> Result<TcpStream, ProbeError> {
    let addresses: Vec<SocketAddr> = (target.hostname.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| ProbeError::DnsResolution {
            hostname: target.hostname.clone(),
            source: e,
        })?
        .collect();

    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = e,
        }
    }

    if last_error.kind() == io::ErrorKind::TimedOut {
        return Err(ProbeError::Timeout {
            operation: format!("TCP connect to {}", target.address()),
        });
    }
    Err(ProbeError::ConnectionFailed {
        address: target.address(),
        source: last_error,
    })
}

/// Extracts the reported fields. Missing names or extensions become empty
/// values, and an expiry that cannot be compared with the clock reports zero
/// days remaining.
pub fn certificate_info(cert: &X509Ref) -> CertificateInfo {
    let subject_alt_names = cert
        .subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    CertificateInfo {
        common_name: common_name(cert.subject_name()),
        subject_alt_names,
        issuer: common_name(cert.issuer_name()),
        not_valid_after: cert.not_after().to_string(),
        days_remaining: days_remaining(cert.not_after()),
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_default()
}

fn days_remaining(not_after: &Asn1TimeRef) -> i32 {
    let diff = Asn1Time::days_from_now(0).and_then(|now| now.diff(not_after));
    whole_days(diff, not_after)
}

fn whole_days(diff: Result<TimeDiff, ErrorStack>, not_after: &Asn1TimeRef) -> i32 {
    match diff {
        Ok(diff) => diff.days,
        Err(e) => {
            debug!("cannot compute days until {}: {}", not_after, e);
            0
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process servers for exercising the certificate phase.

    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::ssl::{SslAcceptor, SslMethod};
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509Name, X509};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Self-signed certificate for `common_name` listing `sans` as DNS names.
    pub fn self_signed(common_name: &str, sans: &[&str], days: u32) -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        if !sans.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for dns in sans {
                san.dns(dns);
            }
            let extension = san.build(&builder.x509v3_context(None, None)).unwrap();
            builder.append_extension(extension).unwrap();
        }
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    /// Serves TLS with the given certificate on `127.0.0.1`, returns the port.
    pub fn tls_server(cert: X509, key: PKey<Private>, connections: usize) -> u16 {
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        acceptor.set_private_key(&key).unwrap();
        let acceptor = acceptor.build();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for stream in listener.incoming().take(connections).flatten() {
                if let Ok(mut tls) = acceptor.accept(stream) {
                    let mut buf = [0u8; 1024];
                    if let Ok(n) = tls.read(&mut buf) {
                        if n > 0 {
                            let _ = tls.write_all(
                                b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            );
                        }
                    }
                }
            }
        });
        port
    }

    /// Answers every connection with a plain HTTP response, returns the port.
    pub fn plain_http_server(connections: usize) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for mut stream in listener.incoming().take(connections).flatten() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 200 OK\r\nServer: plain\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });
        port
    }
}
