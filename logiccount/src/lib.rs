//! Integrated counting for the multichannel coincidence logic card.
//!
//! The card counts photon detection events in logic mode: a latch freezes
//! every counter for read-out and opens a new interval, and gated counts are
//! then queried with positive/negative channel bitmasks. This crate owns
//! that read-out cycle end to end:
//!
//! - [`driver::LogicDriver`] is the seam to the vendor driver;
//! - [`session::DeviceSession`] holds the hardware handle exclusively and
//!   exposes the configuration and read primitives;
//! - [`sample::SampleReader`] takes one latch-bounded count snapshot;
//! - [`integrate::Integrator`] accumulates snapshots until a target
//!   integration window of hardware time is reached, recovering from
//!   detector latch-ups (a counter frozen at zero) along the way;
//! - [`sim::SimDriver`] is a scripted driver for tests and demos.
//!
//! Pure mask and configuration tools live in [`logictools`].

pub mod driver;
pub mod err;
pub mod integrate;
pub mod sample;
pub mod session;
pub mod sim;

pub use err::{AbortReason, CountError};
