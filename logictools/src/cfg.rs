//! Configuration tools: declaring and recording counting runs
//!
//! A run declaration names the singles channels and coincidence groups to
//! count, per-channel input settings, the integration window and timeslice,
//! and the antilatch tuning. The same format records a finished run by
//! switching the count-carrying enum variants and filling in the measured
//! duration. Durations parse as in [humantime](https://docs.rs/humantime/),
//! e.g. `500ms` or `2min 12s`.
//!
//! Validation happens here, against the channel count reported by the card,
//! before any mask is encoded or any hardware call is made.

use chrono::{offset::Local, DateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::bit::{self, InvalidChannel};

/// Problems in a run declaration, caught before any hardware call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("channel {0} out of range: card has {1} inputs")]
    ChannelOutOfRange(u8, u8),
    #[error("channel {0} listed twice in one group")]
    DuplicateChannel(u8),
    #[error("empty channel group")]
    EmptyGroup,
}

/// Counting run specification, for both declaring and recording runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Run {
    pub name:                   String,
    pub timestamp:              Option<DateTime<Local>>,
    /// Target accumulated hardware time
    #[serde(default = "default_window", with = "humantime_serde")]
    pub integration_window:     Duration,
    /// Polling granularity of the integration loop
    #[serde(default = "default_timeslice", with = "humantime_serde")]
    pub timeslice:              Duration,
    /// Coincidence window in nanoseconds
    #[serde(default = "default_coincidence_window_ns")]
    pub coincidence_window_ns:  f64,
    /// Measured duration in seconds, filled in when recording
    pub duration:               Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub singles:                Vec<Single>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coincidences:           Vec<Coincidence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_settings:       Vec<ChannelSettings>,
    #[serde(default)]
    pub antilatch:              Antilatch,
}

/// Specify a singles channel, or one with its recorded counts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Single {
    Channel(u8),
    ChannelCounts((u8, u64)),
}

/// Specify a coincidence group, optionally gated by veto channels,
/// or one with its recorded counts
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Coincidence {
    Channels(Vec<u8>),
    ChannelsGated((Vec<u8>, Vec<u8>)),
    ChannelsCounts((Vec<u8>, Vec<u8>, u64)),
}

/// Input settings for one channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub channel:    u8,
    /// Cable delay in nanoseconds
    pub delay:      Option<f64>,
    /// Discriminator threshold in volts
    pub threshold:  Option<f64>,
}

/// Antilatch tuning for the integration loop
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Antilatch {
    /// Consecutive faulted timeslices tolerated before cooling down
    pub retry_threshold:    u32,
    /// Wait after repeated faults, instead of another recovery pulse
    #[serde(with = "humantime_serde")]
    pub cooldown:           Duration,
    /// Wait after a single faulted timeslice
    #[serde(with = "humantime_serde")]
    pub retry_backoff:      Duration,
    /// Cap on total wall-clock time spent in fault recovery
    #[serde(default, with = "humantime_serde")]
    pub recovery_ceiling:   Option<Duration>,
}

fn default_window() -> Duration {
    Duration::from_millis(500)
}

fn default_timeslice() -> Duration {
    Duration::from_millis(100)
}

fn default_coincidence_window_ns() -> f64 {
    1.0
}

impl Default for Antilatch {
    fn default() -> Self {
        Antilatch {
            retry_threshold:    5,
            cooldown:           Duration::from_secs(60),
            retry_backoff:      Duration::from_millis(200),
            recovery_ceiling:   None,
        }
    }
}

/// Creates an empty Run with the card's customary timing defaults.
impl Default for Run {
    fn default() -> Self {
        Run {
            name:                   String::new(),
            timestamp:              None,
            integration_window:     default_window(),
            timeslice:              default_timeslice(),
            coincidence_window_ns:  default_coincidence_window_ns(),
            duration:               None,
            singles:                Vec::new(),
            coincidences:           Vec::new(),
            channel_settings:       Vec::new(),
            antilatch:              Antilatch::default(),
        }
    }
}

impl Run {
    /// Check every declared channel against the card's input count and every
    /// group for duplicates. Duplicates would double-count a bit when masks
    /// are combined, so they are rejected here rather than in the encoder.
    pub fn validate(&self, total_channels: u8) -> Result<(), ConfigError> {
        for s in &self.singles {
            let (Single::Channel(ch) | Single::ChannelCounts((ch, _))) = s;
            check_channel(*ch, total_channels)?;
        }
        for c in &self.coincidences {
            let (chs, gate) = match c {
                Coincidence::Channels(chs) => (chs, None),
                Coincidence::ChannelsGated((chs, gate)) => (chs, Some(gate)),
                Coincidence::ChannelsCounts((chs, gate, _)) => (chs, Some(gate)),
            };
            if chs.is_empty() {
                return Err(ConfigError::EmptyGroup);
            }
            check_group(chs, total_channels)?;
            if let Some(gate) = gate {
                check_group(gate, total_channels)?;
            }
        }
        for cs in &self.channel_settings {
            check_channel(cs.channel, total_channels)?;
        }
        Ok(())
    }

    /// Positive masks for the declared singles channels, in declaration order
    pub fn singles_masks(&self) -> Result<Vec<u16>, InvalidChannel> {
        self.singles
            .iter()
            .map(|s| {
                let (Single::Channel(ch) | Single::ChannelCounts((ch, _))) = s;
                bit::chan_to_mask(*ch)
            })
            .collect()
    }

    /// Positive and negative masks for the declared coincidence groups, in
    /// declaration order. Ungated groups get a zero negative mask.
    pub fn coincidence_masks(&self) -> Result<(Vec<u16>, Vec<u16>), InvalidChannel> {
        let mut pos = Vec::with_capacity(self.coincidences.len());
        let mut neg = Vec::with_capacity(self.coincidences.len());
        for c in &self.coincidences {
            let (chs, gate): (&[u8], &[u8]) = match c {
                Coincidence::Channels(chs) => (chs, &[]),
                Coincidence::ChannelsGated((chs, gate)) => (chs, gate),
                Coincidence::ChannelsCounts((chs, gate, _)) => (chs, gate),
            };
            pos.push(bit::chans_to_mask(chs)?);
            neg.push(bit::chans_to_mask(gate)?);
        }
        Ok((pos, neg))
    }
}

fn check_channel(ch: u8, total: u8) -> Result<(), ConfigError> {
    if ch < 1 || ch > total {
        return Err(ConfigError::ChannelOutOfRange(ch, total));
    }
    Ok(())
}

fn check_group(chs: &[u8], total: u8) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for &ch in chs {
        check_channel(ch, total)?;
        if !seen.insert(ch) {
            return Err(ConfigError::DuplicateChannel(ch));
        }
    }
    Ok(())
}
