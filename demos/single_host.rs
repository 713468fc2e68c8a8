//! Probe one host and print what was found.
//!
//! Run with: cargo run --example single_host -- example.com:443

use sitecheck::sink::render_text;
use sitecheck::{HostProber, ProbeOptions, ProbeTarget, Prober};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::args().nth(1).unwrap_or_else(|| "example.com".to_string());
    let target = ProbeTarget::parse(&host)?;

    let prober = HostProber::new(ProbeOptions::default())?;
    let result = prober.probe(target);

    print!("{}", render_text(&result, false));
    if let Some(cert) = result.certificate() {
        println!("SAN list: {}", cert.san_list());
    }
    Ok(())
}
