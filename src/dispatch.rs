//! Batch dispatcher: fans targets out over a fixed-size worker pool, one
//! batch at a time, and hands every finished batch to the sink.

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info};

use crate::error::SiteCheckError;
use crate::probe::Prober;
use crate::result::ProbeResult;
use crate::sink::ResultSink;
use crate::target::ProbeTarget;

/// Upper bound accepted for the worker count.
pub const MAX_CONCURRENCY: usize = 10;

/// Totals for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    pub probed: usize,
    pub reachable: usize,
    pub certificates: usize,
    pub errors: usize,
}

impl RunSummary {
    fn record(&mut self, results: &[ProbeResult]) {
        self.batches += 1;
        self.probed += results.len();
        for result in results {
            if result.http_reachable() {
                self.reachable += 1;
            }
            if result.certificate().is_some() {
                self.certificates += 1;
            }
            if result.error().is_some() {
                self.errors += 1;
            }
        }
    }
}

/// Runs a [`Prober`] over a stream of targets.
pub struct Dispatcher<P: Prober> {
    prober: P,
    concurrency: usize,
    batch_size: usize,
}

impl<P: Prober> Dispatcher<P> {
    /// `concurrency` is clamped to `1..=MAX_CONCURRENCY`, `batch_size` to at
    /// least one.
    pub fn new(prober: P, concurrency: usize, batch_size: usize) -> Self {
        Dispatcher {
            prober,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            batch_size: batch_size.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Probes every target from `source`, writing each batch to `sink` before
    /// the next one is read.
    ///
    /// An `Err` from the source aborts the run. Targets read before it,
    /// including those of the unfinished batch, are probed and written first.
    /// Per-host failures never abort.
    pub fn run<I>(&self, source: I, sink: &mut ResultSink) -> Result<RunSummary, SiteCheckError>
    where
        I: IntoIterator<Item = Result<ProbeTarget, SiteCheckError>>,
    {
        let mut summary = RunSummary::default();
        let mut source = source.into_iter();
        loop {
            let mut batch = Vec::with_capacity(self.batch_size);
            let mut source_error = None;
            for target in source.by_ref().take(self.batch_size) {
                match target {
                    Ok(target) => batch.push(target),
                    Err(e) => {
                        source_error = Some(e);
                        break;
                    }
                }
            }

            if !batch.is_empty() {
                debug!("dispatching batch {} ({} targets)", summary.batches + 1, batch.len());
                let results = self.run_batch(batch);
                sink.write_batch(&results)?;
                summary.record(&results);
                info!(
                    batch = summary.batches,
                    probed = summary.probed,
                    reachable = summary.reachable,
                    "batch written"
                );
            } else if source_error.is_none() {
                break;
            }

            if let Some(e) = source_error {
                return Err(e);
            }
        }
        Ok(summary)
    }

    /// Probes one batch on scoped workers and waits for all of them.
    ///
    /// Results are returned in completion order.
    pub fn run_batch(&self, batch: Vec<ProbeTarget>) -> Vec<ProbeResult> {
        let total = batch.len();
        let workers = self.concurrency.min(total).max(1);
        let queue = Mutex::new(batch.into_iter());
        let (sender, receiver): (Sender<ProbeResult>, Receiver<ProbeResult>) = mpsc::channel();

        thread::scope(|scope| {
            for _ in 0..workers {
                let thread_tx = sender.clone();
                let queue = &queue;
                let prober = &self.prober;
                scope.spawn(move || loop {
                    let next = match queue.lock() {
                        Ok(mut pending) => pending.next(),
                        Err(_) => None,
                    };
                    let Some(target) = next else { break };
                    if thread_tx.send(prober.probe(target)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);

            let mut results = Vec::with_capacity(total);
            for result in receiver {
                results.push(result);
            }
            results
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::result::{CertificateOutcome, HttpOutcome};
    use crate::sink::OutputFormat;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails hosts starting with `bad`, tracks peak parallelism.
    struct FakeProber {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn new() -> Self {
            FakeProber {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Prober for FakeProber {
        fn probe(&self, target: ProbeTarget) -> ProbeResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);

            let http = if target.hostname.starts_with("bad") {
                HttpOutcome::Failed(ProbeError::Timeout {
                    operation: "test".to_string(),
                })
            } else {
                HttpOutcome::TimedOut
            };
            ProbeResult::new(target, http, CertificateOutcome::Skipped)
        }
    }

    fn targets(names: &[&str]) -> Vec<Result<ProbeTarget, SiteCheckError>> {
        names.iter().map(|n| Ok(ProbeTarget::new(*n, 443))).collect()
    }

    fn sink() -> ResultSink {
        ResultSink::from_writer(Box::new(std::io::sink()), OutputFormat::Csv)
    }

    #[test]
    fn test_issues_ceil_n_over_b_batches() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 3, 4);
        let names: Vec<String> = (0..10).map(|i| format!("host{}.example", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let mut sink = sink();
        let summary = dispatcher.run(targets(&refs), &mut sink).unwrap();
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.probed, 10);
        assert_eq!(sink.written(), 10);
    }

    #[test]
    fn test_worker_pool_is_bounded() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 2, 100);
        let names: Vec<String> = (0..8).map(|i| format!("host{}.example", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        dispatcher.run(targets(&refs), &mut sink()).unwrap();
        let peak = dispatcher.prober.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak parallelism was {}", peak);
        assert_eq!(dispatcher.prober.calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_batch_returns_every_target_once() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 4, 10);
        let batch: Vec<ProbeTarget> = ["a.example", "bad.example", "c.example"]
            .iter()
            .map(|n| ProbeTarget::new(*n, 443))
            .collect();

        let results = dispatcher.run_batch(batch);
        let hosts: HashSet<&str> = results.iter().map(|r| r.target.hostname.as_str()).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(hosts.len(), 3);
    }

    #[test]
    fn test_host_failures_do_not_abort_the_run() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 2, 2);
        let mut sink = sink();
        let summary = dispatcher
            .run(targets(&["bad1.example", "ok.example", "bad2.example"]), &mut sink)
            .unwrap();
        assert_eq!(summary.probed, 3);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.reachable, 0);
    }

    #[test]
    fn test_source_error_stops_before_next_batch() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 2, 2);
        let mut source = targets(&["a.example", "b.example"]);
        source.push(Err(SiteCheckError::InputUnreadable {
            path: "hosts.txt".into(),
            details: "stream did not contain valid UTF-8".to_string(),
        }));
        source.extend(targets(&["c.example"]));

        let mut sink = sink();
        let result = dispatcher.run(source, &mut sink);
        assert!(matches!(result, Err(SiteCheckError::InputUnreadable { .. })));
        assert_eq!(sink.written(), 2);
        assert_eq!(dispatcher.prober.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_source_error_flushes_partial_batch() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 2, 3);
        let mut source = targets(&["a.example", "b.example"]);
        source.push(Err(SiteCheckError::InputUnreadable {
            path: "hosts.txt".into(),
            details: "read failed".to_string(),
        }));
        source.extend(targets(&["c.example"]));

        let mut sink = sink();
        let result = dispatcher.run(source, &mut sink);
        assert!(matches!(result, Err(SiteCheckError::InputUnreadable { .. })));
        assert_eq!(sink.written(), 2);
        assert_eq!(dispatcher.prober.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_source_runs_no_batches() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 5, 1000);
        let summary = dispatcher.run(Vec::new(), &mut sink()).unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_settings_are_clamped() {
        let dispatcher = Dispatcher::new(FakeProber::new(), 0, 0);
        assert_eq!(dispatcher.concurrency(), 1);
        assert_eq!(dispatcher.batch_size(), 1);
        assert_eq!(Dispatcher::new(FakeProber::new(), 64, 5).concurrency(), MAX_CONCURRENCY);
    }
}
