//! Upstream transport abstractions for waveforms and picks.
//!
//! Two source traits in the same shape: the ingestor calls `next()` in a
//! select! with cancellation; implementations handle format decoding
//! internally. Provided sources: JSON-lines waveform replay (file or stdin),
//! whitespace text pick streams, and a Gaussian-noise synthetic waveform
//! generator for replay-less runs.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::types::{ChannelId, Phase, Pick, WaveformPacket};

/// Events produced by a waveform source.
pub enum WaveEvent {
    Packet(WaveformPacket),
    /// No more data (EOF for files/stdin, permanent disconnect upstream).
    Eof,
}

/// Events produced by a pick source.
pub enum PickEvent {
    Pick(Pick),
    Eof,
}

/// Where waveform packets come from.
#[async_trait]
pub trait WaveSource: Send + 'static {
    /// Read the next packet. `Err` means the transport is unrecoverable
    /// after the source's own retry handling.
    async fn next(&mut self) -> Result<WaveEvent>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Where phase picks come from.
#[async_trait]
pub trait PickSource: Send + 'static {
    async fn next(&mut self) -> Result<PickEvent>;
    fn name(&self) -> &str;
}

// ============================================================================
// JSON-lines waveform source (file / stdin replay)
// ============================================================================

/// Reads one JSON [`WaveformPacket`] per line.
pub struct JsonlWaveSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    line: String,
    name: String,
}

impl JsonlWaveSource {
    pub fn stdin() -> Self {
        Self {
            reader: Box::new(BufReader::new(tokio::io::stdin())),
            line: String::with_capacity(8192),
            name: "waves-stdin".to_string(),
        }
    }

    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening waveform replay {}", path.display()))?;
        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            line: String::with_capacity(8192),
            name: format!("waves-file:{}", path.display()),
        })
    }
}

#[async_trait]
impl WaveSource for JsonlWaveSource {
    async fn next(&mut self) -> Result<WaveEvent> {
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line).await?;
            if bytes == 0 {
                return Ok(WaveEvent::Eof);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WaveformPacket>(line) {
                Ok(packet) => return Ok(WaveEvent::Packet(packet)),
                Err(e) => {
                    warn!(source = %self.name, error = %e, "Skipping malformed waveform line");
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Text pick source
// ============================================================================

/// Reads whitespace-separated pick lines (one pick per line).
pub struct TextPickSource {
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    line: String,
    name: String,
}

impl TextPickSource {
    pub fn stdin() -> Self {
        Self {
            reader: Box::new(BufReader::new(tokio::io::stdin())),
            line: String::with_capacity(512),
            name: "picks-stdin".to_string(),
        }
    }

    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening pick stream {}", path.display()))?;
        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            line: String::with_capacity(512),
            name: format!("picks-file:{}", path.display()),
        })
    }
}

#[async_trait]
impl PickSource for TextPickSource {
    async fn next(&mut self) -> Result<PickEvent> {
        loop {
            self.line.clear();
            let bytes = self.reader.read_line(&mut self.line).await?;
            if bytes == 0 {
                return Ok(PickEvent::Eof);
            }
            match parse_pick_line(&self.line) {
                Some(pick) => return Ok(PickEvent::Pick(pick)),
                None => {
                    let line = self.line.trim();
                    if !line.is_empty() {
                        warn!(source = %self.name, line, "Skipping malformed pick line");
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse one pick line:
/// `station channel sample_rate network location phase pick_time weight
///  instrument upd_seconds duration amplitude p_or_s`
pub fn parse_pick_line(line: &str) -> Option<Pick> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 13 {
        return None;
    }
    let phase = match fields[12] {
        "P" | "p" => Phase::P,
        "S" | "s" => Phase::S,
        _ => return None,
    };
    Some(Pick {
        station_id: fields[0].to_string(),
        phase,
        pick_time: fields[6].parse().ok()?,
        weight: fields[7].parse().ok()?,
        amplitude_proxy: fields[11].parse().ok()?,
    })
}

// ============================================================================
// Synthetic sources (demo / soak runs)
// ============================================================================

/// Emits one second of Gaussian noise per station and component, paced to
/// wall clock.
pub struct SyntheticWaveSource {
    stations: Vec<String>,
    rate: f64,
    noise: Normal<f64>,
    rng: StdRng,
    pending: VecDeque<WaveformPacket>,
    next_batch_start: f64,
}

impl SyntheticWaveSource {
    pub fn new(stations: Vec<String>, rate: f64) -> Result<Self> {
        Ok(Self {
            stations,
            rate,
            // Quiet-site ambient noise, in counts.
            noise: Normal::new(0.0, 5.0).map_err(|e| anyhow::anyhow!("noise distribution: {e}"))?,
            rng: StdRng::from_entropy(),
            pending: VecDeque::new(),
            next_batch_start: 0.0,
        })
    }
}

#[async_trait]
impl WaveSource for SyntheticWaveSource {
    async fn next(&mut self) -> Result<WaveEvent> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(WaveEvent::Packet(packet));
        }

        let now = super::now_unix();
        if self.next_batch_start == 0.0 {
            self.next_batch_start = now.floor();
        }
        // Pace to wall clock: each batch covers one elapsed second.
        let batch_end = self.next_batch_start + 1.0;
        if now < batch_end {
            tokio::time::sleep(std::time::Duration::from_secs_f64(batch_end - now)).await;
        }

        let n = self.rate.round() as usize;
        for station in &self.stations {
            for channel in ChannelId::ALL {
                let samples: Vec<f64> =
                    (0..n).map(|_| self.noise.sample(&mut self.rng)).collect();
                self.pending.push_back(WaveformPacket {
                    station_id: station.clone(),
                    channel,
                    sample_rate_hz: self.rate,
                    start_time: self.next_batch_start,
                    end_time: batch_end,
                    samples,
                    gain: 1.0,
                });
            }
        }
        self.next_batch_start = batch_end;

        match self.pending.pop_front() {
            Some(packet) => Ok(WaveEvent::Packet(packet)),
            None => Ok(WaveEvent::Eof),
        }
    }

    fn name(&self) -> &str {
        "waves-synthetic"
    }
}

/// A pick source that never produces anything (quiet-network demo).
pub struct SilentPickSource;

#[async_trait]
impl PickSource for SilentPickSource {
    async fn next(&mut self) -> Result<PickEvent> {
        std::future::pending::<()>().await;
        Ok(PickEvent::Eof)
    }

    fn name(&self) -> &str {
        "picks-silent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_line_parses() {
        let line = "HWA HLZ 100 TW 00 P 1700000000.25 1.5 1 0.1 2.0 3.75 P";
        let pick = parse_pick_line(line).unwrap();
        assert_eq!(pick.station_id, "HWA");
        assert_eq!(pick.phase, Phase::P);
        assert!((pick.pick_time - 1_700_000_000.25).abs() < 1e-9);
        assert!((pick.weight - 1.5).abs() < 1e-9);
        assert!((pick.amplitude_proxy - 3.75).abs() < 1e-9);
    }

    #[test]
    fn s_phase_parses_and_short_lines_fail() {
        let line = "HWA HLZ 100 TW 00 S 1700000000.25 1.5 1 0.1 2.0 3.75 S";
        assert_eq!(parse_pick_line(line).unwrap().phase, Phase::S);
        assert!(parse_pick_line("HWA HLZ 100").is_none());
        assert!(parse_pick_line("").is_none());
    }
}
