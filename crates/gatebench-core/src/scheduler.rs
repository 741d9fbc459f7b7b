//! Replay scheduler: paced, ordered dispatch over a bounded worker pool.
//!
//! A dispatcher thread walks the workload in input order, waiting (under
//! `respect_timestamps`) until each request's target time, and hands requests
//! to a fixed pool of workers through a bounded channel. Results come back
//! tagged with their input index and are re-ordered before being handed to
//! the caller's sink, which runs on the calling thread only.
//!
//! Target times are offsets from the fixed run start, never from the previous
//! dispatch, so a late dispatch does not push back every later one.

use crate::config::PacingMode;
use crate::request::Request;
use crossbeam_channel::{bounded, unbounded};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Longest single sleep while pacing, so cancellation stays responsive.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Run-level cancellation signal, shared between the signal handler and the
/// dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Wall clock anchored at run start.
#[derive(Debug, Clone, Copy)]
pub struct ReplayClock {
    start: Instant,
}

impl ReplayClock {
    pub fn start_now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since run start.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Block until `target_ms` after run start. Targets already in the past
    /// return immediately. Returns `false` if cancelled while waiting.
    pub fn wait_until(&self, target_ms: f64, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let remaining_ms = target_ms - self.elapsed_ms();
            if remaining_ms <= 0.0 {
                return true;
            }
            // Clamp in seconds first: far-future targets overflow Duration.
            let slice_s = (remaining_ms / 1000.0).min(MAX_WAIT_SLICE.as_secs_f64());
            std::thread::sleep(Duration::from_secs_f64(slice_s));
        }
    }
}

/// Target dispatch offset (ms after run start) for every request.
///
/// `None` means dispatch immediately: every request under
/// `as_fast_as_possible`, and requests without a timestamp under
/// `respect_timestamps`. The base is the first request carrying a timestamp.
pub fn target_offsets_ms(requests: &[Request], pacing: PacingMode) -> Vec<Option<f64>> {
    match pacing {
        PacingMode::AsFastAsPossible => vec![None; requests.len()],
        PacingMode::RespectTimestamps => {
            let base = requests.iter().find_map(|r| r.timestamp);
            requests
                .iter()
                .map(|r| match (r.timestamp, base) {
                    (Some(ts), Some(base)) => Some((ts - base) * 1000.0),
                    _ => None,
                })
                .collect()
        }
    }
}

/// How a replay ended.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStats {
    pub total: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub cancelled: bool,
    pub elapsed_ms: f64,
}

impl ReplayStats {
    pub fn is_partial(&self) -> bool {
        self.completed < self.total
    }
}

/// Replay scheduler configuration.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pacing: PacingMode,
    workers: usize,
}

impl Scheduler {
    pub fn new(pacing: PacingMode, workers: usize) -> Self {
        Self {
            pacing,
            workers: workers.max(1),
        }
    }

    pub fn pacing(&self) -> PacingMode {
        self.pacing
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Replay `requests` through `job`, feeding results to `sink` in input
    /// order.
    ///
    /// `job` receives the request and its actual dispatch offset in ms.
    /// Cancellation stops new dispatches; in-flight requests still complete
    /// and reach the sink. The first job error stops dispatching and is
    /// returned once the pool has drained.
    pub fn replay<O, E, F, S>(
        &self,
        requests: &[Request],
        cancel: &CancelToken,
        job: F,
        mut sink: S,
    ) -> Result<ReplayStats, E>
    where
        O: Send,
        E: Send,
        F: Fn(&Request, f64) -> Result<O, E> + Sync,
        S: FnMut(usize, O),
    {
        let offsets = target_offsets_ms(requests, self.pacing);
        let clock = ReplayClock::start_now();
        let abort = CancelToken::new();
        let job = &job;

        let (work_tx, work_rx) = bounded::<(usize, &Request, f64)>(self.workers);
        let (result_tx, result_rx) = unbounded::<(usize, Result<O, E>)>();

        let mut first_error: Option<(usize, E)> = None;
        let mut completed = 0usize;

        let dispatched = std::thread::scope(|scope| {
            let dispatcher = {
                let abort = abort.clone();
                scope.spawn(move || {
                    let mut dispatched = 0usize;
                    for (index, request) in requests.iter().enumerate() {
                        if cancel.is_cancelled() || abort.is_cancelled() {
                            break;
                        }
                        if let Some(target) = offsets[index] {
                            if !clock.wait_until(target, cancel) {
                                break;
                            }
                        }
                        if abort.is_cancelled() {
                            break;
                        }
                        let offset = clock.elapsed_ms();
                        if work_tx.send((index, request, offset)).is_err() {
                            break;
                        }
                        dispatched += 1;
                    }
                    dispatched
                })
            };

            for _ in 0..self.workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                let abort = abort.clone();
                scope.spawn(move || {
                    for (index, request, offset) in work_rx.iter() {
                        if abort.is_cancelled() {
                            continue;
                        }
                        if result_tx.send((index, job(request, offset))).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(work_rx);
            drop(result_tx);

            // Reorder buffer: results arrive in completion order.
            let mut pending: BTreeMap<usize, O> = BTreeMap::new();
            let mut next = 0usize;
            for (index, result) in result_rx.iter() {
                match result {
                    Ok(outcome) => {
                        pending.insert(index, outcome);
                        while let Some(outcome) = pending.remove(&next) {
                            sink(next, outcome);
                            next += 1;
                            completed += 1;
                        }
                    }
                    Err(e) => {
                        abort.cancel();
                        debug!(index, "replay job failed, stopping dispatch");
                        let earlier = first_error.as_ref().map_or(true, |(i, _)| index < *i);
                        if earlier {
                            first_error = Some((index, e));
                        }
                    }
                }
            }

            match dispatcher.join() {
                Ok(dispatched) => dispatched,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        if let Some((_, e)) = first_error {
            return Err(e);
        }

        let stats = ReplayStats {
            total: requests.len(),
            dispatched,
            completed,
            cancelled: cancel.is_cancelled() && dispatched < requests.len(),
            elapsed_ms: clock.elapsed_ms(),
        };
        info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            cancelled = stats.cancelled,
            elapsed_ms = stats.elapsed_ms,
            "replay finished"
        );
        Ok(stats)
    }
}
