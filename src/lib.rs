//! Batch web server and TLS certificate reachability checker.
//!
//! Every target goes through two phases. An HTTPS `GET` decides whether a
//! web server answers at all; only hosts that answered get a raw TLS
//! handshake, with verification disabled, to read the certificate they
//! present. Targets are processed in batches on a small worker pool and each
//! batch is written out before the next one is read.
//!
//! ```no_run
//! use sitecheck::{Dispatcher, HostProber, ProbeOptions, ResultSink, TargetReader};
//! use sitecheck::{Destination, InputFormat, OutputFormat, WriteMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let prober = HostProber::new(ProbeOptions::default())?;
//! let dispatcher = Dispatcher::new(prober, 5, 1000);
//! let source = TargetReader::open("hosts.txt", InputFormat::Auto)?;
//! let mut sink = ResultSink::open(&Destination::Console, OutputFormat::Text, WriteMode::Refuse)?;
//! let summary = dispatcher.run(source, &mut sink)?;
//! sink.finish()?;
//! println!("{} hosts probed", summary.probed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod probe;
pub mod result;
pub mod sink;
pub mod target;
pub mod tls;

pub use dispatch::{Dispatcher, RunSummary};
pub use error::{ProbeError, SiteCheckError};
pub use probe::{HostProber, ProbeOptions, Prober};
pub use result::{CertificateInfo, CertificateOutcome, HttpOutcome, ProbeResult};
pub use sink::{Destination, OutputFormat, ResultSink, WriteMode};
pub use target::{InputFormat, ProbeTarget, TargetReader};
