//! Waveform packet and channel types.

use serde::{Deserialize, Serialize};

/// The three ground-motion components of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Vertical
    Z,
    /// North-south
    N,
    /// East-west
    E,
}

impl ChannelId {
    /// Fixed component ordering used by the inference tensor.
    pub const ALL: [ChannelId; 3] = [ChannelId::Z, ChannelId::N, ChannelId::E];

    /// Row index of this component in a `3 x W` block.
    pub fn index(self) -> usize {
        match self {
            ChannelId::Z => 0,
            ChannelId::N => 1,
            ChannelId::E => 2,
        }
    }

    /// Map a channel code's orientation letter (last character of e.g.
    /// `HLZ`, `EHN`) to a component.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().last()? {
            'Z' | 'z' => Some(ChannelId::Z),
            'N' | 'n' | '1' => Some(ChannelId::N),
            'E' | 'e' | '2' => Some(ChannelId::E),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelId::Z => write!(f, "Z"),
            ChannelId::N => write!(f, "N"),
            ChannelId::E => write!(f, "E"),
        }
    }
}

/// One waveform packet from the upstream transport.
///
/// Timestamps are absolute unix-epoch seconds; `samples` covers
/// `[start_time, end_time)` at `sample_rate_hz`. Samples arrive in raw counts
/// and are converted to physical units (counts / gain) on insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformPacket {
    pub station_id: String,
    pub channel: ChannelId,
    pub sample_rate_hz: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub samples: Vec<f64>,
    pub gain: f64,
}

impl WaveformPacket {
    /// Sample count implied by the time span and rate.
    pub fn expected_len(&self) -> usize {
        ((self.end_time - self.start_time) * self.sample_rate_hz).round() as usize
    }

    /// Length/time-span consistency check.
    pub fn is_consistent(&self) -> bool {
        self.samples.len() == self.expected_len()
    }
}

/// A fixed-window, three-component read from the wave buffer.
///
/// Each component holds exactly `window_samples` values aligned to the ring's
/// sample grid and ending at the requested end time. `valid[i]` is true only
/// when all three components hold a real (non-gap) sample at index `i`;
/// gap samples are zero-filled.
#[derive(Debug, Clone)]
pub struct ChannelBlock {
    pub z: Vec<f64>,
    pub n: Vec<f64>,
    pub e: Vec<f64>,
    pub valid: Vec<bool>,
    /// Absolute time of the first sample in the block.
    pub start_time: f64,
}
