// At most `queue_depth` batches are ever submitted but not completed; at the
// bound the coordinator waits for a completion before pulling upstream again.

use crate::core::batch::Batch;
use crate::core::error::{PipelineError, Result};
use crossbeam_channel::{self as channel, RecvTimeoutError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub timeout: Option<Duration>,
}

impl ExecutorConfig {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_depth: workers * 2,
            timeout: None,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::config("workers", "must be >= 1"));
        }
        if self.queue_depth == 0 {
            return Err(PipelineError::config("queue_depth", "must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn records(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn advance(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::Relaxed) + n
    }
}

#[derive(Debug)]
pub struct Completed<T> {
    pub index: usize,
    pub records: usize,
    pub output: T,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutorReport {
    pub batches_submitted: usize,
    pub batches_completed: usize,
    pub records_processed: u64,
    pub peak_in_flight: usize,
}

struct Outcome<T> {
    index: usize,
    records: usize,
    result: Result<T>,
}

pub struct BoundedExecutor {
    cfg: ExecutorConfig,
    progress: Progress,
}

impl BoundedExecutor {
    pub fn new(cfg: ExecutorConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            progress: Progress::default(),
        })
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Results reach `sink` in completion order. The first failure stops
    /// submission; in-flight batches are drained and discarded.
    pub fn run<I, E, T, F, S>(&self, batches: I, task: F, mut sink: S) -> Result<ExecutorReport>
    where
        I: IntoIterator<Item = Result<Batch<E>>>,
        E: Send,
        T: Send,
        F: Fn(&Batch<E>) -> Result<T> + Sync,
        S: FnMut(Completed<T>),
    {
        let workers = self.cfg.workers;
        let depth = self.cfg.queue_depth;
        let started = Instant::now();
        let deadline = self.cfg.timeout.map(|t| started + t);
        let task = &task;

        thread::scope(|scope| {
            let (job_tx, job_rx) = channel::bounded::<Batch<E>>(depth);
            let (done_tx, done_rx) = channel::unbounded::<Outcome<T>>();

            for id in 0..workers {
                let rx = job_rx.clone();
                let tx = done_tx.clone();
                scope.spawn(move || {
                    log::trace!("worker {id} started");
                    for batch in rx.iter() {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&batch)))
                            .unwrap_or_else(|payload| {
                                Err(PipelineError::WorkerPanic {
                                    batch: batch.index,
                                    message: panic_message(payload.as_ref()),
                                })
                            });
                        let outcome = Outcome {
                            index: batch.index,
                            records: batch.len(),
                            result,
                        };
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    log::trace!("worker {id} stopped");
                });
            }
            drop(job_rx);
            drop(done_tx);

            let mut upstream = batches.into_iter();
            let mut exhausted = false;
            let mut failure: Option<PipelineError> = None;
            let mut in_flight = 0usize;
            let mut report = ExecutorReport::default();

            loop {
                if failure.is_none() && !exhausted && in_flight < depth {
                    match upstream.next() {
                        Some(Ok(batch)) => {
                            if job_tx.send(batch).is_err() {
                                failure = Some(PipelineError::WorkerPanic {
                                    batch: report.batches_submitted,
                                    message: "worker pool shut down".to_string(),
                                });
                                continue;
                            }
                            in_flight += 1;
                            report.batches_submitted += 1;
                            report.peak_in_flight = report.peak_in_flight.max(in_flight);
                        }
                        Some(Err(e)) => {
                            log::warn!("input failed, draining {in_flight} batches: {e}");
                            failure = Some(e);
                        }
                        None => exhausted = true,
                    }
                    continue;
                }
                if in_flight == 0 {
                    break;
                }

                let outcome = match (deadline, failure.is_none()) {
                    (Some(deadline), true) => match done_rx.recv_deadline(deadline) {
                        Ok(outcome) => outcome,
                        Err(RecvTimeoutError::Timeout) => {
                            log::warn!("timed out, draining {in_flight} batches");
                            failure = Some(PipelineError::Timeout {
                                elapsed: started.elapsed(),
                            });
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    },
                    _ => match done_rx.recv() {
                        Ok(outcome) => outcome,
                        Err(_) => break,
                    },
                };
                in_flight -= 1;

                match outcome.result {
                    Ok(output) if failure.is_none() => {
                        report.batches_completed += 1;
                        let total = self.progress.advance(outcome.records as u64);
                        report.records_processed = total;
                        log::debug!("batch {} done, {} records processed", outcome.index, total);
                        sink(Completed {
                            index: outcome.index,
                            records: outcome.records,
                            output,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if failure.is_none() {
                            log::warn!("batch {} failed, draining {in_flight} batches: {e}", outcome.index);
                            failure = Some(match e {
                                panic @ PipelineError::WorkerPanic { .. } => panic,
                                other => PipelineError::Worker {
                                    batch: outcome.index,
                                    source: Box::new(other),
                                },
                            });
                        }
                    }
                }
            }
            drop(job_tx);

            match failure {
                Some(e) => Err(e),
                None => Ok(report),
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::Batcher;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn batches(n: usize, size: usize) -> impl Iterator<Item = Result<Batch<usize>>> {
        Batcher::new((0..n).map(Ok), size)
    }

    fn executor(workers: usize, depth: usize) -> BoundedExecutor {
        BoundedExecutor::new(ExecutorConfig::new(workers).with_queue_depth(depth)).unwrap()
    }

    #[test]
    fn processes_every_batch_and_reports_progress() {
        let exec = executor(4, 8);
        let mut seen = Vec::new();
        let report = exec
            .run(
                batches(1003, 10),
                |b| Ok(b.entries.iter().sum::<usize>()),
                |c| seen.push((c.index, c.records, c.output)),
            )
            .unwrap();
        assert_eq!(report.batches_submitted, 101);
        assert_eq!(report.batches_completed, 101);
        assert_eq!(report.records_processed, 1003);
        assert_eq!(exec.progress().records(), 1003);
        let total: usize = seen.iter().map(|(_, _, s)| s).sum();
        assert_eq!(total, (0..1003).sum::<usize>());
        let indices: BTreeSet<usize> = seen.iter().map(|(i, _, _)| *i).collect();
        assert_eq!(indices.len(), 101);
    }

    #[test]
    fn in_flight_never_exceeds_queue_depth() {
        let exec = executor(2, 3);
        let running = AtomicUsize::new(0);
        let peak_running = AtomicUsize::new(0);
        let report = exec
            .run(
                batches(200, 4),
                |b| {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak_running.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(b.len())
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(report.batches_completed, 50);
        assert!(report.peak_in_flight <= 3, "{report:?}");
        assert_eq!(report.peak_in_flight, 3);
        assert!(peak_running.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn no_submission_after_failure_is_observed() {
        let exec = executor(1, 1);
        let pulled = Mutex::new(Vec::new());
        let upstream = batches(100, 1).inspect(|b| {
            if let Ok(b) = b {
                pulled.lock().unwrap().push(b.index);
            }
        });
        let mut completed = Vec::new();
        let err = exec
            .run(
                upstream,
                |b| {
                    if b.index == 3 {
                        Err(PipelineError::parse("r3", "corrupt"))
                    } else {
                        Ok(())
                    }
                },
                |c| completed.push(c.index),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Worker { batch: 3, .. }), "{err}");
        assert!(err.is_parse());
        assert_eq!(completed, vec![0, 1, 2]);
        assert_eq!(*pulled.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn failure_with_many_workers_stops_submission() {
        let exec = executor(4, 4);
        let pulled = AtomicUsize::new(0);
        let upstream = batches(10_000, 1).inspect(|_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        });
        let completed = Mutex::new(BTreeSet::new());
        let result = exec.run(
            upstream,
            |b| {
                if b.index == 5 {
                    Err(PipelineError::parse("r5", "corrupt"))
                } else {
                    Ok(())
                }
            },
            |c| {
                completed.lock().unwrap().insert(c.index);
            },
        );
        assert!(result.is_err());
        let pulled = pulled.load(Ordering::SeqCst);
        assert!(pulled < 10_000);
        // Every reported batch was submitted before the failure was observed.
        assert!(completed.lock().unwrap().iter().all(|&i| i < pulled));
    }

    #[test]
    fn worker_panic_is_reported() {
        let exec = executor(2, 2);
        let err = exec
            .run(
                batches(10, 2),
                |b| {
                    if b.index == 1 {
                        panic!("kaboom");
                    }
                    Ok(())
                },
                |_| {},
            )
            .unwrap_err();
        match err {
            PipelineError::WorkerPanic { batch, message } => {
                assert_eq!(batch, 1);
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn upstream_error_is_propagated() {
        let exec = executor(2, 2);
        let upstream = (0..5).map(|i| {
            if i == 2 {
                Err(PipelineError::parse("rec", "truncated"))
            } else {
                Ok(Batch {
                    index: i,
                    entries: vec![i],
                })
            }
        });
        let err = exec.run(upstream, |_| Ok(()), |_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn timeout_stops_submission() {
        let exec = BoundedExecutor::new(
            ExecutorConfig::new(1)
                .with_queue_depth(1)
                .with_timeout(Some(Duration::from_millis(20))),
        )
        .unwrap();
        let err = exec
            .run(
                batches(1000, 1),
                |_| {
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                },
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert!(exec.progress().records() < 1000);
    }

    #[test]
    fn empty_input_completes_immediately() {
        let report = executor(3, 6)
            .run(batches(0, 10), |_| Ok(()), |_| {})
            .unwrap();
        assert_eq!(report, ExecutorReport::default());
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let err = BoundedExecutor::new(ExecutorConfig::new(2).with_queue_depth(0))
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }
}
