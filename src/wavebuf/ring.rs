//! Fixed-capacity circular sample store for one (station, channel).
//!
//! Slots are keyed by absolute time: logical index `i` holds the sample at
//! `anchor + i / rate`. The ring slides forward to fit newer packets,
//! invalidating rotated-out slots; slots skipped by a gap stay invalid so
//! windowed reads can report them in the mask.

use crate::types::WaveformPacket;

use super::bandpass::{BandpassDesign, FilterState};

/// What an insertion did to the ring (drives the buffer-level counters).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Samples written; `overwrite` is true when the packet did not advance
    /// the ring end (a re-send or overlap rewrite).
    Inserted { overwrite: bool },
    /// Packet entirely older than the retained window; nothing written.
    DroppedStale,
    /// Forward jump rotated out every retained sample; ring restarted at the
    /// packet start.
    Resync,
}

/// One channel's ring plus its filter delay line.
#[derive(Debug)]
pub struct ChannelRing {
    rate: f64,
    capacity: usize,
    data: Vec<f64>,
    valid: Vec<bool>,
    /// Physical index of logical slot 0.
    head: usize,
    /// Absolute time of logical slot 0.
    anchor: f64,
    /// One-past the newest logical index ever written since the last reset.
    filled_end: i64,
    /// End time of the last inserted packet (filter discontinuity tracking).
    last_end_time: f64,
    started: bool,
    filter_state: FilterState,
}

impl ChannelRing {
    pub fn new(window_samples: usize, rate: f64, design: &BandpassDesign) -> Self {
        Self {
            rate,
            capacity: window_samples,
            data: vec![0.0; window_samples],
            valid: vec![false; window_samples],
            head: 0,
            anchor: 0.0,
            filled_end: 0,
            last_end_time: 0.0,
            started: false,
            filter_state: design.state(),
        }
    }

    fn phys(&self, logical: usize) -> usize {
        (self.head + logical) % self.capacity
    }

    fn clear_all(&mut self) {
        self.data.fill(0.0);
        self.valid.fill(false);
        self.head = 0;
        self.filled_end = 0;
    }

    /// Insert one packet: gain conversion, stateful bandpass, slot placement.
    ///
    /// The caller has already validated rate and length consistency.
    pub fn insert(&mut self, packet: &WaveformPacket, design: &BandpassDesign) -> InsertOutcome {
        let len = packet.samples.len() as i64;
        let cap = self.capacity as i64;

        if !self.started {
            self.started = true;
            self.anchor = packet.start_time;
            self.clear_all();
        }

        let i0 = ((packet.start_time - self.anchor) * self.rate).round() as i64;

        if i0 + len <= 0 {
            return InsertOutcome::DroppedStale;
        }

        // Filter before placement. A discontinuity in either direction
        // (gap beyond two sample periods, or out-of-order arrival) restarts
        // the delay line.
        let gap = packet.start_time - self.last_end_time;
        if self.last_end_time > 0.0 && (gap > 2.0 / self.rate || gap < -1e-9) {
            self.filter_state.reset();
        }
        self.last_end_time = packet.end_time;

        let mut samples = packet.samples.clone();
        if packet.gain != 0.0 && packet.gain != 1.0 {
            for s in &mut samples {
                *s /= packet.gain;
            }
        }
        design.process(&mut self.filter_state, &mut samples);

        // Forward jump so large the slide would rotate out every retained
        // sample: restart the ring at the packet.
        if i0 + len - cap >= cap {
            self.clear_all();
            self.anchor = packet.start_time;
            self.write(0, &samples);
            return InsertOutcome::Resync;
        }

        // Slide forward so the packet end fits, invalidating rotated slots.
        let mut i0 = i0;
        if i0 + len > cap {
            let slide = i0 + len - cap;
            for k in 0..slide {
                let p = self.phys(k as usize);
                self.data[p] = 0.0;
                self.valid[p] = false;
            }
            self.head = (self.head + slide as usize) % self.capacity;
            self.anchor += slide as f64 / self.rate;
            self.filled_end = (self.filled_end - slide).max(0);
            i0 -= slide;
        }

        let overwrite = i0 + len <= self.filled_end;

        // Clip any prefix that now falls before the anchor.
        let skip = (-i0).max(0) as usize;
        self.write((i0 + skip as i64) as usize, &samples[skip..]);
        self.filled_end = self.filled_end.max(i0 + len);

        InsertOutcome::Inserted { overwrite }
    }

    fn write(&mut self, start: usize, samples: &[f64]) {
        for (offset, &sample) in samples.iter().enumerate() {
            let p = self.phys(start + offset);
            self.data[p] = sample;
            self.valid[p] = true;
        }
        self.filled_end = self.filled_end.max((start + samples.len()) as i64);
    }

    /// Copy out the `window` samples ending at `end_time`, zero-filling and
    /// masking slots that are out of range or invalid.
    ///
    /// Returns `(samples, mask, window_start_time, valid_count)`, or `None`
    /// if the ring has never seen a packet.
    pub fn window(&self, end_time: f64, window: usize) -> Option<(Vec<f64>, Vec<bool>, f64, usize)> {
        if !self.started {
            return None;
        }
        let ie = ((end_time - self.anchor) * self.rate).round() as i64;
        let start = ie - window as i64;
        let mut samples = vec![0.0; window];
        let mut mask = vec![false; window];
        let mut valid_count = 0;
        for (offset, idx) in (start..ie).enumerate() {
            if idx >= 0 && (idx as usize) < self.capacity {
                let p = self.phys(idx as usize);
                if self.valid[p] {
                    samples[offset] = self.data[p];
                    mask[offset] = true;
                    valid_count += 1;
                }
            }
        }
        let start_time = self.anchor + start as f64 / self.rate;
        Some((samples, mask, start_time, valid_count))
    }

    /// Absolute time of logical slot 0 (oldest retained sample position).
    #[cfg(test)]
    pub fn anchor(&self) -> f64 {
        self.anchor
    }
}
