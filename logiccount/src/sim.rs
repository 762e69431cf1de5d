//! Scripted stand-in for the vendor driver.
//!
//! A [`SimDriver`] replays a fixed sequence of hardware intervals: every
//! latch freezes the next scripted slice, and gated counts are looked up in
//! the frozen slice by `(pos, neg)` mask pair, defaulting to zero. A mask
//! pair with no scripted count therefore reads as a latched channel, which
//! is exactly what the antilatch tests need. When the script runs out the
//! last slice repeats. Configuration calls are recorded in a shared
//! [`SimLog`] so tests can assert on them after the session is gone.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{DriverError, LogicDriver};

/// One scripted hardware interval.
#[derive(Debug, Clone, Default)]
pub struct SimSlice {
    counts: Vec<((u16, u16), u32)>,
    ticks: u64,
}

impl SimSlice {
    /// Slice with the given tick span and no counts anywhere
    pub fn idle(ticks: u64) -> Self {
        SimSlice {
            counts: Vec::new(),
            ticks,
        }
    }

    /// Add a count for one `(pos, neg)` mask pair
    pub fn count(mut self, pos: u16, neg: u16, n: u32) -> Self {
        self.counts.push(((pos, neg), n));
        self
    }
}

#[derive(Debug, Default)]
struct LogInner {
    open_calls: u32,
    close_calls: u32,
    latches: u32,
    logic_mode: bool,
    delays: Vec<(u8, u32)>,
    thresholds: Vec<(u8, f64)>,
    window_ticks: Option<u32>,
}

/// Shared record of everything a [`SimDriver`] was told to do.
#[derive(Clone, Default)]
pub struct SimLog(Arc<Mutex<LogInner>>);

impl SimLog {
    pub fn open_calls(&self) -> u32 {
        self.0.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.0.lock().close_calls
    }

    /// Number of latches issued, including discarded ones
    pub fn latches(&self) -> u32 {
        self.0.lock().latches
    }

    pub fn logic_mode(&self) -> bool {
        self.0.lock().logic_mode
    }

    pub fn delays(&self) -> Vec<(u8, u32)> {
        self.0.lock().delays.clone()
    }

    pub fn thresholds(&self) -> Vec<(u8, f64)> {
        self.0.lock().thresholds.clone()
    }

    pub fn window_ticks(&self) -> Option<u32> {
        self.0.lock().window_ticks
    }
}

/// Scripted [`LogicDriver`] for tests and demos.
pub struct SimDriver {
    resolution: f64,
    inputs: u8,
    fail_open: Option<String>,
    script: Vec<SimSlice>,
    cursor: usize,
    current: Option<SimSlice>,
    log: SimLog,
}

impl SimDriver {
    pub fn new(resolution: f64, inputs: u8, script: Vec<SimSlice>) -> Self {
        SimDriver {
            resolution,
            inputs,
            fail_open: None,
            script,
            cursor: 0,
            current: None,
            log: SimLog::default(),
        }
    }

    /// Make `open` fail with the given message
    pub fn fail_open(mut self, msg: &str) -> Self {
        self.fail_open = Some(msg.to_string());
        self
    }

    /// Handle on the call record, valid after the driver is moved away
    pub fn log(&self) -> SimLog {
        self.log.clone()
    }
}

impl LogicDriver for SimDriver {
    fn open(&mut self) -> Result<(), DriverError> {
        self.log.0.lock().open_calls += 1;
        match &self.fail_open {
            Some(msg) => Err(DriverError(msg.clone())),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        self.log.0.lock().close_calls += 1;
    }

    fn resolution(&self) -> f64 {
        self.resolution
    }

    fn input_count(&self) -> u8 {
        self.inputs
    }

    fn set_delay(&mut self, ch: u8, ticks: u32) {
        self.log.0.lock().delays.push((ch, ticks));
    }

    fn set_input_threshold(&mut self, ch: u8, volts: f64) {
        self.log.0.lock().thresholds.push((ch, volts));
    }

    fn switch_logic_mode(&mut self) {
        self.log.0.lock().logic_mode = true;
    }

    fn set_window_width(&mut self, ticks: u32) {
        self.log.0.lock().window_ticks = Some(ticks);
    }

    fn read_logic(&mut self) {
        self.log.0.lock().latches += 1;
        self.current = match self.script.get(self.cursor) {
            Some(slice) => {
                self.cursor += 1;
                Some(slice.clone())
            }
            // Script exhausted: the last slice repeats
            None => self.script.last().cloned(),
        };
    }

    fn time_counter(&mut self) -> u64 {
        self.current.as_ref().map(|s| s.ticks).unwrap_or(0)
    }

    fn calc_count(&mut self, pos: u16, neg: u16) -> u32 {
        self.current
            .as_ref()
            .and_then(|s| {
                s.counts
                    .iter()
                    .find(|&&(masks, _)| masks == (pos, neg))
                    .map(|&(_, n)| n)
            })
            .unwrap_or(0)
    }

    fn fpga_version(&self) -> i32 {
        275
    }
}
