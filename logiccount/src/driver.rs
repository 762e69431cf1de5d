//! The seam to the vendor hardware driver.

use thiserror::Error;

/// Failure reported by the vendor driver while acquiring the hardware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

/// Logic-mode capability of the counting card's vendor driver.
///
/// In logic mode, `read_logic` latches all counters, freezing them for
/// read-out and opening a new interval; `time_counter` returns the ticks
/// elapsed between the two most recent latches, and `calc_count` queries the
/// frozen interval gated by positive/negative channel masks.
///
/// Apart from `open`, the methods mirror the vendor API's void and plain
/// value returns: once the handle is held they do not fail, they misbehave,
/// which is why [`crate::session::DeviceSession`] sequences them.
pub trait LogicDriver {
    fn open(&mut self) -> Result<(), DriverError>;
    fn close(&mut self);
    /// Seconds per hardware tick
    fn resolution(&self) -> f64;
    /// Number of input channels
    fn input_count(&self) -> u8;
    fn set_delay(&mut self, ch: u8, ticks: u32);
    fn set_input_threshold(&mut self, ch: u8, volts: f64);
    fn switch_logic_mode(&mut self);
    fn set_window_width(&mut self, ticks: u32);
    /// Latch all counters, freezing them for read-out and opening a new interval
    fn read_logic(&mut self);
    /// Ticks elapsed between the two most recent latches
    fn time_counter(&mut self) -> u64;
    /// Count in the latched interval, gated by positive/negative masks
    fn calc_count(&mut self, pos: u16, neg: u16) -> u32;
    fn fpga_version(&self) -> i32;
}
