//! Probe a handful of hosts on three workers and write a CSV report.
//!
//! Run with: cargo run --example batch_to_csv

use sitecheck::{
    Destination, Dispatcher, HostProber, OutputFormat, ProbeOptions, ProbeTarget, ResultSink,
    WriteMode,
};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let hosts = ["rust-lang.org", "crates.io", "docs.rs", "expired.badssl.com", "nonexistent.invalid"];
    let targets = hosts.iter().map(|h| Ok(ProbeTarget::new(*h, 443)));

    let prober = HostProber::new(ProbeOptions {
        http_timeout: Duration::from_secs(3),
        ..ProbeOptions::default()
    })?;
    let dispatcher = Dispatcher::new(prober, 3, 2);

    let destination = Destination::File("sitecheck-demo.csv".into());
    let mut sink = ResultSink::open(&destination, OutputFormat::Csv, WriteMode::Overwrite)?;
    let summary = dispatcher.run(targets, &mut sink)?;
    sink.finish()?;

    println!(
        "{} hosts in {} batches: {} reachable, {} certificates, {} errors",
        summary.probed, summary.batches, summary.reachable, summary.certificates, summary.errors
    );
    Ok(())
}
