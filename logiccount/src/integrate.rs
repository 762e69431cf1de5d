//! The antilatch integration loop.
//!
//! Reading counts over the whole integration window in one interval would
//! let a single detector latch-up corrupt the entire window. The loop
//! instead polls in small timeslices: a latched slice costs one timeslice of
//! data and a recovery pulse, nothing more. Recovery pulses are themselves
//! disruptive, so after several faulted slices in a row the loop stops
//! pulsing and waits out a cooldown before trying again.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::driver::LogicDriver;
use crate::err::{AbortReason, CountError};
use crate::sample::SampleReader;
use crate::session::DeviceSession;

/// Totals accumulated over one integration run.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationTotals {
    /// One total per coincidence group, in reader order
    pub coincidences: Vec<u64>,
    /// One total per singles channel, in reader order
    pub singles: Vec<u64>,
    /// Accumulated hardware time in seconds, from latch tick counts and the
    /// session's measured resolution
    pub elapsed: f64,
}

/// Tuning for one integration run.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationConfig {
    /// Target accumulated hardware time
    pub window: Duration,
    /// Polling granularity
    pub timeslice: Duration,
    /// Consecutive faulted slices tolerated before cooling down
    pub latch_retry_threshold: u32,
    /// Wait after repeated faults, instead of another recovery pulse
    pub cooldown: Duration,
    /// Wait after a single faulted slice
    pub retry_backoff: Duration,
    /// Cap on total wall-clock time spent in fault recovery; `None` waits
    /// indefinitely
    pub recovery_ceiling: Option<Duration>,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        IntegrationConfig {
            window: Duration::from_millis(500),
            timeslice: Duration::from_millis(100),
            latch_retry_threshold: 5,
            cooldown: Duration::from_secs(60),
            retry_backoff: Duration::from_millis(200),
            recovery_ceiling: None,
        }
    }
}

impl From<&logictools::cfg::Run> for IntegrationConfig {
    fn from(run: &logictools::cfg::Run) -> Self {
        IntegrationConfig {
            window: run.integration_window,
            timeslice: run.timeslice,
            latch_retry_threshold: run.antilatch.retry_threshold,
            cooldown: run.antilatch.cooldown,
            retry_backoff: run.antilatch.retry_backoff,
            recovery_ceiling: run.antilatch.recovery_ceiling,
        }
    }
}

/// Classify one slice's singles counts: `0` healthy, `1` some channel frozen
/// at zero, `2` all channels frozen. A live detector never counts zero over
/// a whole slice, so a zero is read as a latch-up; all channels at once
/// points at something systemic, like the detector assembly warming up.
///
/// An empty list classifies as healthy: with no singles channels configured
/// there is nothing to observe, and reading the vacuous "all zero" as a
/// latch would fault every slice of a coincidences-only run.
pub fn latch_flags(singles: &[u32]) -> u8 {
    let any = singles.iter().any(|&s| s == 0);
    let all = !singles.is_empty() && singles.iter().all(|&s| s == 0);
    any as u8 + all as u8
}

/// Drives repeated samples until the accumulated hardware time reaches the
/// target window, treating latched slices as recoverable faults.
///
/// The recovery hook is injected at construction and runs once per faulted
/// slice, e.g. to pulse a detector reset line. Cancellation is a channel:
/// send (or drop the sender) to abort, and the partial totals come back in
/// the error.
pub struct Integrator {
    cfg: IntegrationConfig,
    recovery: Box<dyn FnMut() + Send>,
    cancel: Option<flume::Receiver<()>>,
}

impl Integrator {
    pub fn new(cfg: IntegrationConfig, recovery: Box<dyn FnMut() + Send>) -> Self {
        Integrator {
            cfg,
            recovery,
            cancel: None,
        }
    }

    /// Abort the run when a message arrives on `cancel` or its sender drops
    pub fn with_cancel(mut self, cancel: flume::Receiver<()>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Accumulate counts until the window is satisfied.
    ///
    /// A faulted slice never adds to the totals or to the elapsed time; the
    /// interval left behind by its wait is latched away so the next sample
    /// starts clean. Elapsed time advances by `ticks * resolution` with the
    /// resolution the session measured at open, so the window is satisfied
    /// in hardware time, not wall-clock time.
    pub fn run<D: LogicDriver>(
        &mut self,
        session: &mut DeviceSession<D>,
        reader: &SampleReader,
    ) -> Result<IntegrationTotals, CountError> {
        let window = self.cfg.window.as_secs_f64();
        let tick = session.resolution();
        session.set_integration_window(self.cfg.window);

        let mut totals = IntegrationTotals {
            coincidences: vec![0; reader.coincidences_len()],
            singles: vec![0; reader.singles_len()],
            elapsed: 0.0,
        };
        let mut consecutive = 0u32;
        let mut fault_wall = Duration::ZERO;

        // Discard whatever interval was open before the run
        session.latch_and_read()?;

        while totals.elapsed <= window {
            if self.wait(self.cfg.timeslice) {
                return Err(aborted(AbortReason::Cancelled, totals));
            }
            let sample = reader.read(session)?;
            let flags = latch_flags(&sample.singles);

            if flags > 0 {
                let fault_started = Instant::now();
                consecutive += 1;
                (self.recovery)();
                if flags == 2 {
                    warn!(consecutive, "all singles channels latched");
                } else {
                    debug!(consecutive, "latched channel, slice discarded");
                }

                if consecutive > self.cfg.latch_retry_threshold {
                    warn!(
                        cooldown_s = self.cfg.cooldown.as_secs_f64(),
                        "repeated latch events, cooling down"
                    );
                    if self.wait(self.cfg.cooldown) {
                        return Err(aborted(AbortReason::Cancelled, totals));
                    }
                    consecutive = 0;
                } else if self.wait(self.cfg.retry_backoff) {
                    return Err(aborted(AbortReason::Cancelled, totals));
                }

                // The interval that built up during the wait is stale
                session.latch_and_read()?;

                fault_wall += fault_started.elapsed();
                if let Some(ceiling) = self.cfg.recovery_ceiling {
                    if fault_wall > ceiling {
                        warn!(
                            spent_s = fault_wall.as_secs_f64(),
                            "fault recovery exceeded its ceiling"
                        );
                        return Err(aborted(AbortReason::RecoveryStalled, totals));
                    }
                }
                continue;
            }

            consecutive = 0;
            for (total, &c) in totals.coincidences.iter_mut().zip(&sample.coincidences) {
                *total += c as u64;
            }
            for (total, &s) in totals.singles.iter_mut().zip(&sample.singles) {
                *total += s as u64;
            }
            totals.elapsed += sample.ticks as f64 * tick;
        }

        info!(elapsed_s = totals.elapsed, "integration window satisfied");
        Ok(totals)
    }

    /// Wait out `dur`, returning true if the run was cancelled instead
    fn wait(&self, dur: Duration) -> bool {
        match &self.cancel {
            Some(rx) => !matches!(rx.recv_timeout(dur), Err(flume::RecvTimeoutError::Timeout)),
            None => {
                std::thread::sleep(dur);
                false
            }
        }
    }
}

fn aborted(reason: AbortReason, partial: IntegrationTotals) -> CountError {
    CountError::IntegrationAborted { reason, partial }
}
