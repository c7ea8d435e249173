//! Wave Buffer: per-(station, channel) bounded rings behind one facade.
//!
//! The station index map is built once from the site catalog and never
//! mutated, so lookups are plain reads; each channel ring sits behind its own
//! mutex so insertions on different channels never contend. Reads copy the
//! requested window out under the same short-held lock.

pub mod bandpass;
pub mod ring;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::types::{ChannelBlock, ChannelId, WaveformPacket};

use bandpass::{BandpassDesign, DesignError};
use ring::{ChannelRing, InsertOutcome};

// ============================================================================
// Errors & Counters
// ============================================================================

/// Per-packet insertion failures. All are local: the packet is dropped, a
/// counter moves, the buffer continues.
#[derive(Error, Debug)]
pub enum InsertError {
    #[error("unsupported sample rate {got} Hz (expected {expected} Hz)")]
    UnsupportedRate { got: f64, expected: f64 },

    #[error("inconsistent packet: {got} samples for a {expected}-sample span")]
    BadPacket { got: usize, expected: usize },

    #[error("station {0} not in the site catalog")]
    UnknownStation(String),
}

/// Monotonic observability counters for the wave path.
#[derive(Debug, Default)]
pub struct WaveCounters {
    pub packets_inserted: AtomicU64,
    pub dropped_stale: AtomicU64,
    pub dropped_bad_rate: AtomicU64,
    pub dropped_bad_packet: AtomicU64,
    pub dropped_unknown_station: AtomicU64,
    pub gap_resyncs: AtomicU64,
    pub duplicate_overwrites: AtomicU64,
}

/// Point-in-time copy of [`WaveCounters`] for the counters endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WaveCounterSnapshot {
    pub packets_inserted: u64,
    pub dropped_stale: u64,
    pub dropped_bad_rate: u64,
    pub dropped_bad_packet: u64,
    pub dropped_unknown_station: u64,
    pub gap_resyncs: u64,
    pub duplicate_overwrites: u64,
}

impl WaveCounters {
    pub fn snapshot(&self) -> WaveCounterSnapshot {
        WaveCounterSnapshot {
            packets_inserted: self.packets_inserted.load(Ordering::Relaxed),
            dropped_stale: self.dropped_stale.load(Ordering::Relaxed),
            dropped_bad_rate: self.dropped_bad_rate.load(Ordering::Relaxed),
            dropped_bad_packet: self.dropped_bad_packet.load(Ordering::Relaxed),
            dropped_unknown_station: self.dropped_unknown_station.load(Ordering::Relaxed),
            gap_resyncs: self.gap_resyncs.load(Ordering::Relaxed),
            duplicate_overwrites: self.duplicate_overwrites.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Wave Buffer
// ============================================================================

struct StationRings {
    z: Mutex<ChannelRing>,
    n: Mutex<ChannelRing>,
    e: Mutex<ChannelRing>,
}

impl StationRings {
    fn channel(&self, id: ChannelId) -> &Mutex<ChannelRing> {
        match id {
            ChannelId::Z => &self.z,
            ChannelId::N => &self.n,
            ChannelId::E => &self.e,
        }
    }
}

/// Bounded ring store for the most recent window of every catalog station.
pub struct WaveBuffer {
    design: BandpassDesign,
    stations: HashMap<String, StationRings>,
    window_samples: usize,
    rate: f64,
    pub counters: WaveCounters,
}

impl WaveBuffer {
    /// Build rings for `station_ids` (the catalog station set) using the
    /// configured window and bandpass.
    pub fn new<'a>(
        config: &RuntimeConfig,
        station_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, DesignError> {
        let design = BandpassDesign::new(
            config.wave.bandpass_low_hz,
            config.wave.bandpass_high_hz,
            config.wave.sample_rate_hz,
            config.wave.bandpass_order,
        )?;
        let window_samples = config.wave.window_samples();
        let rate = config.wave.sample_rate_hz;

        let stations: HashMap<String, StationRings> = station_ids
            .into_iter()
            .map(|id| {
                let rings = StationRings {
                    z: Mutex::new(ChannelRing::new(window_samples, rate, &design)),
                    n: Mutex::new(ChannelRing::new(window_samples, rate, &design)),
                    e: Mutex::new(ChannelRing::new(window_samples, rate, &design)),
                };
                (id.to_string(), rings)
            })
            .collect();

        debug!(stations = stations.len(), window_samples, "Wave buffer ready");

        Ok(Self {
            design,
            stations,
            window_samples,
            rate,
            counters: WaveCounters::default(),
        })
    }

    /// Insert one packet into its channel ring.
    pub fn insert(&self, packet: &WaveformPacket) -> Result<(), InsertError> {
        if (packet.sample_rate_hz - self.rate).abs() > f64::EPSILON {
            self.counters.dropped_bad_rate.fetch_add(1, Ordering::Relaxed);
            return Err(InsertError::UnsupportedRate {
                got: packet.sample_rate_hz,
                expected: self.rate,
            });
        }
        if !packet.is_consistent() {
            self.counters
                .dropped_bad_packet
                .fetch_add(1, Ordering::Relaxed);
            return Err(InsertError::BadPacket {
                got: packet.samples.len(),
                expected: packet.expected_len(),
            });
        }
        let Some(rings) = self.stations.get(&packet.station_id) else {
            self.counters
                .dropped_unknown_station
                .fetch_add(1, Ordering::Relaxed);
            return Err(InsertError::UnknownStation(packet.station_id.clone()));
        };

        let outcome = {
            let mut ring = rings
                .channel(packet.channel)
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            ring.insert(packet, &self.design)
        };

        match outcome {
            InsertOutcome::Inserted { overwrite } => {
                self.counters.packets_inserted.fetch_add(1, Ordering::Relaxed);
                if overwrite {
                    self.counters
                        .duplicate_overwrites
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            InsertOutcome::DroppedStale => {
                self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
            }
            InsertOutcome::Resync => {
                self.counters.packets_inserted.fetch_add(1, Ordering::Relaxed);
                self.counters.gap_resyncs.fetch_add(1, Ordering::Relaxed);
                warn!(
                    station = %packet.station_id,
                    channel = %packet.channel,
                    start = packet.start_time,
                    "Timestamp jump, channel ring resynchronized"
                );
            }
        }
        Ok(())
    }

    /// Copy the last window of all three components ending at `end_time`.
    ///
    /// Returns `None` when the station is unknown or any component has no
    /// valid sample in the window. Gap samples are zero with `valid = false`.
    pub fn read_window(&self, station_id: &str, end_time: f64) -> Option<ChannelBlock> {
        let rings = self.stations.get(station_id)?;
        let mut components: Vec<(Vec<f64>, Vec<bool>)> = Vec::with_capacity(3);
        let mut start_time = 0.0;
        for id in ChannelId::ALL {
            let ring = rings
                .channel(id)
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let (samples, mask, start, valid_count) = ring.window(end_time, self.window_samples)?;
            if valid_count == 0 {
                return None;
            }
            start_time = start;
            components.push((samples, mask));
        }

        let (e, e_mask) = components.pop()?;
        let (n, n_mask) = components.pop()?;
        let (z, z_mask) = components.pop()?;
        let valid = z_mask
            .iter()
            .zip(n_mask.iter())
            .zip(e_mask.iter())
            .map(|((&a, &b), &c)| a && b && c)
            .collect();

        Some(ChannelBlock {
            z,
            n,
            e,
            valid,
            start_time,
        })
    }

    /// Samples per read window.
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn buffer() -> WaveBuffer {
        let config = RuntimeConfig::default();
        WaveBuffer::new(&config, ["S1", "S2"]).unwrap()
    }

    fn packet(station: &str, channel: ChannelId, start: f64) -> WaveformPacket {
        WaveformPacket {
            station_id: station.into(),
            channel,
            sample_rate_hz: 100.0,
            start_time: start,
            end_time: start + 1.0,
            samples: vec![1.0; 100],
            gain: 1.0,
        }
    }

    #[test]
    fn rejects_unsupported_rate() {
        let buf = buffer();
        let mut p = packet("S1", ChannelId::Z, 100.0);
        p.sample_rate_hz = 50.0;
        p.samples = vec![1.0; 50];
        assert!(matches!(
            buf.insert(&p),
            Err(InsertError::UnsupportedRate { .. })
        ));
        assert_eq!(buf.counters.snapshot().dropped_bad_rate, 1);
    }

    #[test]
    fn rejects_unknown_station() {
        let buf = buffer();
        let p = packet("NOPE", ChannelId::Z, 100.0);
        assert!(matches!(buf.insert(&p), Err(InsertError::UnknownStation(_))));
        assert_eq!(buf.counters.snapshot().dropped_unknown_station, 1);
    }

    #[test]
    fn read_requires_all_components() {
        let buf = buffer();
        buf.insert(&packet("S1", ChannelId::Z, 100.0)).unwrap();
        buf.insert(&packet("S1", ChannelId::N, 100.0)).unwrap();
        // E never arrives.
        assert!(buf.read_window("S1", 101.0).is_none());
        buf.insert(&packet("S1", ChannelId::E, 100.0)).unwrap();
        let block = buf.read_window("S1", 101.0).unwrap();
        assert_eq!(block.z.len(), 3000);
        // Only the final second of the window is valid on all components.
        assert_eq!(block.valid.iter().filter(|&&v| v).count(), 100);
    }
}
