use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::exit;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sitecheck::config::{Config, PrometheusConfig, Settings, DEFAULT_CONFIG_FILE};
use sitecheck::{
    Destination, Dispatcher, HostProber, InputFormat, OutputFormat, ProbeOptions, ResultSink,
    RunSummary, SiteCheckError, TargetReader, WriteMode,
};

mod metrics;

/// Check a list of hosts for web servers and read the TLS certificates they present.
#[derive(Parser, Debug)]
#[command(name = "sitecheck", version, author, about, long_about = None)]
struct Args {
    /// The file containing the list of hosts (one per line, or CSV with a host column)
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    file: Option<PathBuf>,

    /// How to read the input file
    #[arg(long, value_name = "auto|lines|csv")]
    input_format: Option<InputFormat>,

    /// Maximum concurrent worker threads (1-10)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// TCP connect and TLS handshake timeout in seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Output file, or PRINT for the console
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<String>,

    /// Report layout
    #[arg(long, value_name = "text|csv|table")]
    format: Option<OutputFormat>,

    /// Overwrite the output file if it already exists
    #[arg(long, conflicts_with = "append")]
    overwrite: bool,

    /// Append to the output file if it already exists
    #[arg(long)]
    append: bool,

    /// Number of targets read and probed per batch
    #[arg(long, value_name = "N")]
    chunksize: Option<usize>,

    /// Copy the extra input columns into the report
    #[arg(long)]
    merge_metadata: bool,

    /// Do not retry over plain HTTP when HTTPS fails
    #[arg(long)]
    no_plain_http_fallback: bool,

    /// Configuration file (defaults to ./sitecheck.toml when present)
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Push run metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long, value_name = "URL")]
    prometheus_address: Option<String>,
}

impl Args {
    /// Only the values given on the command line, for merging.
    fn to_config(&self) -> Config {
        let write_mode = if self.overwrite {
            Some(WriteMode::Overwrite)
        } else if self.append {
            Some(WriteMode::Append)
        } else {
            None
        };

        Config {
            input: self.file.clone(),
            input_format: self.input_format,
            concurrency: self.threads,
            http_timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            output: self.output.clone(),
            format: self.format,
            write_mode,
            batch_size: self.chunksize,
            merge_metadata: self.merge_metadata.then_some(true),
            plain_http_fallback: self.no_plain_http_fallback.then_some(false),
            log_level: self.log_level.clone(),
            prometheus: Some(PrometheusConfig {
                enabled: self.prometheus.then_some(true),
                address: self.prometheus_address.clone(),
            }),
        }
    }
}

fn load_settings(args: &Args) -> Result<Settings, SiteCheckError> {
    let file_config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::from_file(DEFAULT_CONFIG_FILE)?,
        None => Config::default(),
    };

    let settings = Config::defaults()
        .merge_with(file_config)
        .merge_with(args.to_config())
        .validate()?;
    Ok(settings)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(settings: &Settings) -> Result<RunSummary, SiteCheckError> {
    // both ends are opened before any host is contacted
    let source = TargetReader::open(&settings.input, settings.input_format)?;
    let mut sink = ResultSink::open(
        &Destination::parse(&settings.output),
        settings.format,
        settings.write_mode,
    )?
    .merge_metadata(settings.merge_metadata);

    let prober = HostProber::new(ProbeOptions {
        http_timeout: settings.http_timeout,
        connect_timeout: settings.connect_timeout,
        plain_http_fallback: settings.plain_http_fallback,
    })
    .map_err(|e| SiteCheckError::Config {
        details: e.to_string(),
    })?;
    let dispatcher = Dispatcher::new(prober, settings.concurrency, settings.batch_size);

    let summary = dispatcher.run(source, &mut sink)?;
    sink.finish()?;
    Ok(summary)
}

fn main() {
    let args = Args::parse();

    if args.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    };
    init_logging(&settings.log_level);
    info!(
        input = %settings.input.display(),
        concurrency = settings.concurrency,
        batch_size = settings.batch_size,
        "starting sitecheck v{}",
        env!("CARGO_PKG_VERSION")
    );

    match run(&settings) {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                probed = summary.probed,
                reachable = summary.reachable,
                certificates = summary.certificates,
                errors = summary.errors,
                "run complete"
            );
            if let Some(address) = &settings.prometheus {
                metrics::prom::prometheus_metrics(&summary, address);
            }
            exit(0);
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}
