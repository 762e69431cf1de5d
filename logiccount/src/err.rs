//! Error taxonomy for the counting core.
//!
//! Detector latch-ups are deliberately absent: they are recoverable by
//! design and handled inside [`crate::integrate::Integrator`], never
//! surfaced as errors.

use std::fmt;

use thiserror::Error;

use crate::driver::DriverError;
use crate::integrate::IntegrationTotals;
use logictools::bit;

#[derive(Error, Debug)]
pub enum CountError {
    /// The hardware handle could not be acquired or queried. Fatal, no retry.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(#[from] DriverError),
    /// Channel id outside the card's input range, rejected before any
    /// hardware call
    #[error("invalid channel {channel}: card has inputs 1-{total}")]
    InvalidChannel { channel: u8, total: u8 },
    /// An operation that needs logic mode or an open session ran out of order
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The gate mask list fits neither broadcast (length 1) nor one-per-group
    #[error("configuration mismatch: {pos} coincidence groups but {neg} gate masks")]
    ConfigurationMismatch { pos: usize, neg: usize },
    /// Integration ended early; whatever was accumulated rides along
    #[error("integration aborted ({reason}) with {:.3} s accumulated", .partial.elapsed)]
    IntegrationAborted {
        reason: AbortReason,
        partial: IntegrationTotals,
    },
}

impl From<bit::InvalidChannel> for CountError {
    fn from(e: bit::InvalidChannel) -> Self {
        CountError::InvalidChannel {
            channel: e.0,
            total: bit::MAX_CHANNEL,
        }
    }
}

/// Why an integration run stopped before its window was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The caller's cancellation channel fired (or was dropped)
    Cancelled,
    /// Fault recovery exceeded the configured wall-clock ceiling
    RecoveryStalled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled by caller"),
            AbortReason::RecoveryStalled => write!(f, "fault recovery stalled"),
        }
    }
}
