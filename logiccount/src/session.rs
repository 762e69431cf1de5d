//! Exclusive ownership of the card and its configuration primitives.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::driver::{DriverError, LogicDriver};
use crate::err::CountError;

/// Customary cable delay applied when no per-channel value is given, in ns.
pub const DEFAULT_DELAY_NS: f64 = 100.0;
/// Customary discriminator threshold, in volts.
pub const DEFAULT_THRESHOLD_V: f64 = 0.5;

/// Owns the hardware handle for its whole lifetime.
///
/// The handle is acquired in [`DeviceSession::open`] and released exactly
/// once, on [`DeviceSession::close`] or on drop, whichever comes first. All
/// hardware access goes through `&mut self`, so a session cannot be shared
/// between threads mid-read; give each card its own session.
pub struct DeviceSession<D: LogicDriver> {
    driver: D,
    open: bool,
    logic_mode: bool,
    resolution: f64,
    total_channels: u8,
    fpga_version: i32,
    integration_window: Duration,
    coincidence_window_ns: f64,
}

impl<D: LogicDriver> DeviceSession<D> {
    /// Acquire the hardware and read back its tick resolution and input
    /// count. A handle that opens but reports an unusable resolution or no
    /// inputs is released and reported as unavailable.
    pub fn open(mut driver: D) -> Result<Self, CountError> {
        driver.open()?;
        let resolution = driver.resolution();
        let total_channels = driver.input_count();
        if !resolution.is_finite() || resolution <= 0.0 || total_channels == 0 {
            driver.close();
            return Err(CountError::HardwareUnavailable(DriverError(format!(
                "bad readback: {} s/tick, {} inputs",
                resolution, total_channels
            ))));
        }
        let fpga_version = driver.fpga_version();
        Ok(DeviceSession {
            driver,
            open: true,
            logic_mode: false,
            resolution,
            total_channels,
            fpga_version,
            integration_window: Duration::from_millis(500),
            coincidence_window_ns: 1.0,
        })
    }

    /// Seconds per hardware tick, as measured by the card
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Number of input channels on the card
    pub fn total_channels(&self) -> u8 {
        self.total_channels
    }

    /// Set one input's cable delay, given in nanoseconds
    pub fn set_delay(&mut self, ch: u8, delay_ns: f64) -> Result<(), CountError> {
        self.require_open()?;
        self.check_channel(ch)?;
        let ticks = self.ns_to_ticks(delay_ns);
        self.driver.set_delay(ch, ticks);
        Ok(())
    }

    /// Set every input's cable delay: `delays` overrides per channel, the
    /// rest get `default_ns`
    pub fn set_delays(
        &mut self,
        delays: &HashMap<u8, f64>,
        default_ns: f64,
    ) -> Result<(), CountError> {
        self.require_open()?;
        for &ch in delays.keys() {
            self.check_channel(ch)?;
        }
        for ch in 1..=self.total_channels {
            let ns = delays.get(&ch).copied().unwrap_or(default_ns);
            self.set_delay(ch, ns)?;
        }
        Ok(())
    }

    /// Set one input's discriminator threshold, in volts
    pub fn set_threshold(&mut self, ch: u8, volts: f64) -> Result<(), CountError> {
        self.require_open()?;
        self.check_channel(ch)?;
        self.driver.set_input_threshold(ch, volts);
        Ok(())
    }

    /// Set every input's discriminator threshold to the same value
    pub fn set_all_thresholds(&mut self, volts: f64) -> Result<(), CountError> {
        self.require_open()?;
        for ch in 1..=self.total_channels {
            self.driver.set_input_threshold(ch, volts);
        }
        Ok(())
    }

    /// Switch the card into coincidence-logic mode. Must precede
    /// [`Self::set_coincidence_window`] and any count read. One latch is
    /// issued and discarded so the first real read starts a clean interval.
    pub fn enable_logic_mode(&mut self) -> Result<(), CountError> {
        self.require_open()?;
        self.driver.switch_logic_mode();
        self.logic_mode = true;
        self.driver.read_logic();
        let _ = self.driver.time_counter();
        Ok(())
    }

    /// Set the coincidence window, given in nanoseconds
    pub fn set_coincidence_window(&mut self, window_ns: f64) -> Result<(), CountError> {
        self.require_logic()?;
        let ticks = self.ns_to_ticks(window_ns);
        self.driver.set_window_width(ticks);
        self.coincidence_window_ns = window_ns;
        Ok(())
    }

    /// Record the integration window reported by [`Self::status_report`]
    pub fn set_integration_window(&mut self, window: Duration) {
        self.integration_window = window;
    }

    /// Latch all counters and return the ticks elapsed since the previous
    /// latch. This freezes the interval for [`Self::count`] and resets the
    /// hardware counters for the next one.
    pub fn latch_and_read(&mut self) -> Result<u64, CountError> {
        self.require_logic()?;
        self.driver.read_logic();
        Ok(self.driver.time_counter())
    }

    /// Count accumulated in the latched interval, gated by the positive and
    /// negative masks. Only meaningful between two [`Self::latch_and_read`]
    /// calls.
    pub fn count(&mut self, pos: u16, neg: u16) -> Result<u32, CountError> {
        self.require_logic()?;
        Ok(self.driver.calc_count(pos, neg))
    }

    /// Read-only diagnostic snapshot; never used for control decisions
    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            fpga_version: self.fpga_version,
            resolution: self.resolution,
            input_channels: self.total_channels,
            integration_window_s: self.integration_window.as_secs_f64(),
            coincidence_window_ns: self.coincidence_window_ns,
        }
    }

    /// Release the hardware. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.open {
            self.driver.close();
            self.open = false;
        }
    }

    fn ns_to_ticks(&self, ns: f64) -> u32 {
        (ns * 1e-9 / self.resolution).round() as u32
    }

    fn check_channel(&self, ch: u8) -> Result<(), CountError> {
        if ch < 1 || ch > self.total_channels {
            return Err(CountError::InvalidChannel {
                channel: ch,
                total: self.total_channels,
            });
        }
        Ok(())
    }

    fn require_open(&self) -> Result<(), CountError> {
        if !self.open {
            return Err(CountError::InvalidState("session closed"));
        }
        Ok(())
    }

    fn require_logic(&self) -> Result<(), CountError> {
        self.require_open()?;
        if !self.logic_mode {
            return Err(CountError::InvalidState("logic mode not enabled"));
        }
        Ok(())
    }
}

impl<D: LogicDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Diagnostic snapshot of the card, fields in reporting order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub fpga_version: i32,
    pub resolution: f64,
    pub input_channels: u8,
    pub integration_window_s: f64,
    pub coincidence_window_ns: f64,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ">>> logic counting card")?;
        writeln!(f, "> FPGA version:\t\t{}", self.fpga_version)?;
        writeln!(f, "> Resolution:\t\t{}", self.resolution)?;
        writeln!(f, "> Input channels:\t{}", self.input_channels)?;
        writeln!(f, "> Integration window:\t{} s", self.integration_window_s)?;
        write!(f, "> Coincidence window:\t{} ns", self.coincidence_window_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::CountError;
    use crate::sim::{SimDriver, SimSlice};

    const RES: f64 = 5e-9;

    fn sim() -> SimDriver {
        SimDriver::new(RES, 16, vec![SimSlice::idle(0)])
    }

    #[test]
    fn open_fails_when_handle_unavailable() {
        let drv = sim().fail_open("no card found");
        match DeviceSession::open(drv) {
            Err(CountError::HardwareUnavailable(e)) => {
                assert_eq!(e.0, "no card found");
            }
            other => panic!("expected HardwareUnavailable, got {:?}", other.err()),
        }
    }

    #[test]
    fn open_fails_on_unusable_readback() {
        let drv = SimDriver::new(0.0, 16, vec![SimSlice::idle(0)]);
        let log = drv.log();
        assert!(matches!(
            DeviceSession::open(drv),
            Err(CountError::HardwareUnavailable(_))
        ));
        // The handle opened, so it must have been released again
        assert_eq!(log.open_calls(), 1);
        assert_eq!(log.close_calls(), 1);

        let drv = SimDriver::new(RES, 0, vec![SimSlice::idle(0)]);
        assert!(matches!(
            DeviceSession::open(drv),
            Err(CountError::HardwareUnavailable(_))
        ));
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let drv = sim();
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        s.close();
        s.close();
        drop(s);
        assert_eq!(log.close_calls(), 1);

        let drv = sim();
        let log = drv.log();
        let s = DeviceSession::open(drv).unwrap();
        drop(s);
        assert_eq!(log.close_calls(), 1);
    }

    #[test]
    fn delay_converts_ns_to_ticks() {
        let drv = sim();
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        s.set_delay(3, 100.0).unwrap();
        // 100 ns at 5 ns/tick
        assert_eq!(log.delays(), vec![(3, 20)]);
    }

    #[test]
    fn delay_broadcast_with_overrides() {
        let drv = SimDriver::new(RES, 4, vec![SimSlice::idle(0)]);
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        let mut map = HashMap::new();
        map.insert(2u8, 50.0);
        s.set_delays(&map, DEFAULT_DELAY_NS).unwrap();
        assert_eq!(log.delays(), vec![(1, 20), (2, 10), (3, 20), (4, 20)]);
    }

    #[test]
    fn channel_range_is_checked_before_hardware() {
        let drv = SimDriver::new(RES, 8, vec![SimSlice::idle(0)]);
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        assert!(matches!(
            s.set_delay(0, 100.0),
            Err(CountError::InvalidChannel { channel: 0, total: 8 })
        ));
        assert!(matches!(
            s.set_delay(9, 100.0),
            Err(CountError::InvalidChannel { channel: 9, total: 8 })
        ));
        assert!(matches!(
            s.set_threshold(9, 0.5),
            Err(CountError::InvalidChannel { channel: 9, total: 8 })
        ));
        assert!(log.delays().is_empty());
        assert!(log.thresholds().is_empty());
    }

    #[test]
    fn logic_mode_is_required_in_order() {
        let mut s = DeviceSession::open(sim()).unwrap();
        assert!(matches!(
            s.set_coincidence_window(2.0),
            Err(CountError::InvalidState(_))
        ));
        assert!(matches!(s.latch_and_read(), Err(CountError::InvalidState(_))));
        assert!(matches!(s.count(1, 0), Err(CountError::InvalidState(_))));

        s.enable_logic_mode().unwrap();
        s.set_coincidence_window(2.0).unwrap();
        s.latch_and_read().unwrap();
        s.count(1, 0).unwrap();
    }

    #[test]
    fn closed_session_rejects_hardware_calls() {
        let drv = sim();
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        s.enable_logic_mode().unwrap();
        s.close();

        assert!(matches!(s.latch_and_read(), Err(CountError::InvalidState(_))));
        assert!(matches!(s.count(1, 0), Err(CountError::InvalidState(_))));
        assert!(matches!(s.set_delay(1, 100.0), Err(CountError::InvalidState(_))));
        assert!(matches!(
            s.set_delays(&HashMap::new(), DEFAULT_DELAY_NS),
            Err(CountError::InvalidState(_))
        ));
        assert!(matches!(s.set_threshold(1, 0.5), Err(CountError::InvalidState(_))));
        assert!(matches!(s.set_all_thresholds(0.5), Err(CountError::InvalidState(_))));
        assert!(matches!(s.enable_logic_mode(), Err(CountError::InvalidState(_))));
        assert!(matches!(
            s.set_coincidence_window(2.0),
            Err(CountError::InvalidState(_))
        ));

        // Nothing reached the released handle: only enable's discard latch
        assert_eq!(log.latches(), 1);
        assert!(log.delays().is_empty());
        assert!(log.thresholds().is_empty());
        assert_eq!(log.window_ticks(), None);
    }

    #[test]
    fn coincidence_window_converts_ns_to_ticks() {
        let drv = sim();
        let log = drv.log();
        let mut s = DeviceSession::open(drv).unwrap();
        s.enable_logic_mode().unwrap();
        s.set_coincidence_window(25.0).unwrap();
        assert_eq!(log.window_ticks(), Some(5));
    }

    #[test]
    fn status_report_renders_fields_in_order() {
        let mut s = DeviceSession::open(sim()).unwrap();
        s.enable_logic_mode().unwrap();
        s.set_coincidence_window(2.0).unwrap();
        s.set_integration_window(Duration::from_secs(1));
        let report = s.status_report();
        assert_eq!(report.input_channels, 16);
        assert_eq!(report.integration_window_s, 1.0);
        assert_eq!(report.coincidence_window_ns, 2.0);
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[1].starts_with("> FPGA version:"));
        assert!(lines[2].starts_with("> Resolution:"));
        assert!(lines[3].starts_with("> Input channels:"));
        assert!(lines[4].starts_with("> Integration window:"));
        assert!(lines[5].starts_with("> Coincidence window:"));
    }
}
