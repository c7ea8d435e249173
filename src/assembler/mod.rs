//! Tensor Assembler: deterministic construction of the inference input.
//!
//! Snapshots the wave buffer and static catalogs into the fixed-shape bundle
//! the predictor expects: `[n_stations_max, 3, window_samples]` waveforms,
//! `[n_stations_max, 7]` station metadata, `[n_targets, 3]` targets, and a
//! station participation mask. For identical buffer contents and tick
//! request the output is byte-identical.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::{Array2, Array3};
use thiserror::Error;
use tracing::debug;

use crate::catalog::SiteCatalog;
use crate::config::defaults::{K_META, K_TGT};
use crate::types::TickRequest;
use crate::wavebuf::WaveBuffer;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("no participating station produced a valid waveform window")]
    InsufficientData,
}

/// Fixed-shape input bundle for one predictor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceInput {
    /// `[n_stations_max, 3, window_samples]`, demeaned and peak-normalised.
    pub waveforms: Array3<f32>,
    /// `[n_stations_max, K_META]`:
    /// lat, lon, elevation, vs30, norm scale, seconds since first pick, flag.
    pub station_meta: Array2<f32>,
    /// `[n_targets, K_TGT]`: lat, lon, vs30.
    pub targets: Array2<f32>,
    /// Participation mask over station rows.
    pub mask: Vec<bool>,
}

pub struct TensorAssembler {
    wave: Arc<WaveBuffer>,
    catalog: Arc<SiteCatalog>,
    n_stations_max: usize,
    /// Station rows skipped because their window read came back empty.
    pub stations_skipped: AtomicU64,
}

impl TensorAssembler {
    pub fn new(wave: Arc<WaveBuffer>, catalog: Arc<SiteCatalog>, n_stations_max: usize) -> Self {
        Self {
            wave,
            catalog,
            n_stations_max,
            stations_skipped: AtomicU64::new(0),
        }
    }

    /// Build the inference input for one tick.
    ///
    /// Station rows follow `tick.station_pick_order` (ascending first pick,
    /// lex tie-break), capped at `n_stations_max`; overflow sheds the
    /// stations that picked last. Rows whose window read fails are skipped;
    /// zero usable rows is an error and the tick is dropped upstream.
    pub fn assemble(&self, tick: &TickRequest) -> Result<InferenceInput, AssembleError> {
        let window = self.wave.window_samples();
        let mut waveforms = Array3::<f32>::zeros((self.n_stations_max, 3, window));
        let mut station_meta = Array2::<f32>::zeros((self.n_stations_max, K_META));
        let mut mask = vec![false; self.n_stations_max];

        let mut row = 0;
        for (station_id, first_pick_time) in tick.station_pick_order.iter() {
            if row >= self.n_stations_max {
                debug!(
                    event_id = tick.event_id,
                    dropped = tick.station_pick_order.len() - self.n_stations_max,
                    "Station overflow, shedding latest-picked stations"
                );
                break;
            }
            let Some(meta) = self.catalog.station_meta(station_id) else {
                self.stations_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            };
            let Some(block) = self.wave.read_window(station_id, tick.wave_end_time) else {
                self.stations_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            // Demean each component, then normalise all three by the
            // station's global peak so the network sees shape; the scale goes
            // into the metadata row so magnitude is recoverable.
            let mut components = [block.z, block.n, block.e];
            for samples in &mut components {
                let mean = samples.iter().sum::<f64>() / samples.len() as f64;
                for s in samples.iter_mut() {
                    *s -= mean;
                }
            }
            let mut scale = components
                .iter()
                .flat_map(|c| c.iter())
                .fold(0.0_f64, |acc, s| acc.max(s.abs()));
            if scale == 0.0 {
                scale = 1.0;
            }

            for (component, samples) in components.iter().enumerate() {
                for (i, s) in samples.iter().enumerate() {
                    waveforms[[row, component, i]] = (s / scale) as f32;
                }
            }

            let vs30 = self.catalog.station_vs30(meta);
            station_meta[[row, 0]] = meta.latitude as f32;
            station_meta[[row, 1]] = meta.longitude as f32;
            station_meta[[row, 2]] = meta.elevation_m as f32;
            station_meta[[row, 3]] = vs30 as f32;
            station_meta[[row, 4]] = scale as f32;
            station_meta[[row, 5]] = (tick.wave_end_time - first_pick_time) as f32;
            station_meta[[row, 6]] = 1.0;
            mask[row] = true;
            row += 1;
        }

        if row == 0 {
            return Err(AssembleError::InsufficientData);
        }

        let target_list = self.catalog.target_list();
        let mut targets = Array2::<f32>::zeros((target_list.len(), K_TGT));
        for (i, target) in target_list.iter().enumerate() {
            targets[[i, 0]] = target.latitude as f32;
            targets[[i, 1]] = target.longitude as f32;
            targets[[i, 2]] = target.vs30 as f32;
        }

        Ok(InferenceInput {
            waveforms,
            station_meta,
            targets,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::types::{ChannelId, StationMeta, Target, WaveformPacket};

    const RATE: f64 = 100.0;

    fn small_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.wave.window_seconds = 2.0;
        config.inference.n_stations_max = 3;
        config
    }

    fn catalog() -> Arc<SiteCatalog> {
        let stations = vec![
            StationMeta {
                station_id: "S1".into(),
                latitude: 24.0,
                longitude: 121.0,
                elevation_m: 10.0,
                vs30: Some(480.0),
                site_class: None,
            },
            StationMeta {
                station_id: "S2".into(),
                latitude: 24.1,
                longitude: 121.1,
                elevation_m: 20.0,
                vs30: None,
                site_class: None,
            },
        ];
        let targets = vec![
            Target {
                name: "Hualien".into(),
                county: "Hualien".into(),
                latitude: 23.99,
                longitude: 121.60,
                vs30: 450.0,
            },
            Target {
                name: "Taipei".into(),
                county: "Taipei".into(),
                latitude: 25.04,
                longitude: 121.51,
                vs30: 600.0,
            },
        ];
        Arc::new(SiteCatalog::from_parts(
            stations,
            targets,
            vec![(24.1, 121.1, 555.0)],
        ))
    }

    fn feed(wave: &WaveBuffer, station: &str, start: f64, seconds: f64) {
        for channel in ChannelId::ALL {
            let n = (seconds * RATE) as usize;
            let samples: Vec<f64> = (0..n)
                .map(|i| (2.0 * std::f64::consts::PI * 2.0 * i as f64 / RATE).sin() * 40.0)
                .collect();
            wave.insert(&WaveformPacket {
                station_id: station.into(),
                channel,
                sample_rate_hz: RATE,
                start_time: start,
                end_time: start + seconds,
                samples,
                gain: 1.0,
            })
            .unwrap();
        }
    }

    fn tick(stations: &[(&str, f64)], end: f64) -> TickRequest {
        TickRequest {
            event_id: 1,
            tick_index: 1,
            wave_end_time: end,
            station_pick_order: stations
                .iter()
                .map(|(s, t)| (s.to_string(), *t))
                .collect(),
            terminal: false,
        }
    }

    fn assembler() -> (Arc<WaveBuffer>, TensorAssembler) {
        let config = small_config();
        let wave = Arc::new(WaveBuffer::new(&config, ["S1", "S2"]).unwrap());
        let assembler = TensorAssembler::new(wave.clone(), catalog(), 3);
        (wave, assembler)
    }

    #[test]
    fn shape_is_invariant() {
        let (wave, assembler) = assembler();
        feed(&wave, "S1", 100.0, 4.0);
        let input = assembler
            .assemble(&tick(&[("S1", 101.0)], 104.0))
            .unwrap();
        assert_eq!(input.waveforms.dim(), (3, 3, 200));
        assert_eq!(input.station_meta.dim(), (3, K_META));
        assert_eq!(input.targets.dim(), (2, K_TGT));
        assert_eq!(input.mask, vec![true, false, false]);
    }

    #[test]
    fn normalisation_scale_recorded() {
        let (wave, assembler) = assembler();
        feed(&wave, "S1", 100.0, 4.0);
        let input = assembler
            .assemble(&tick(&[("S1", 101.0)], 104.0))
            .unwrap();
        let scale = input.station_meta[[0, 4]];
        assert!(scale > 1.0, "peak of a 40-amplitude tone, got {scale}");
        let peak = input
            .waveforms
            .iter()
            .fold(0.0_f32, |acc, v| acc.max(v.abs()));
        assert!((peak - 1.0).abs() < 1e-5);
        // Vs30 for S2-less row: station row 0 uses the record value.
        assert_eq!(input.station_meta[[0, 3]], 480.0);
        assert_eq!(input.station_meta[[0, 6]], 1.0);
        assert!((input.station_meta[[0, 5]] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn missing_station_window_is_skipped() {
        let (wave, assembler) = assembler();
        feed(&wave, "S1", 100.0, 4.0);
        // S2 never produced waveforms: its row is skipped, S1 takes row 0.
        let input = assembler
            .assemble(&tick(&[("S2", 100.5), ("S1", 101.0)], 104.0))
            .unwrap();
        assert_eq!(input.mask, vec![true, false, false]);
        assert_eq!(input.station_meta[[0, 0]], 24.0);
    }

    #[test]
    fn zero_stations_is_an_error() {
        let (_wave, assembler) = assembler();
        let result = assembler.assemble(&tick(&[("S1", 101.0)], 104.0));
        assert!(matches!(result, Err(AssembleError::InsufficientData)));
    }

    #[test]
    fn output_is_deterministic() {
        let (wave, assembler) = assembler();
        feed(&wave, "S1", 100.0, 4.0);
        feed(&wave, "S2", 100.0, 4.0);
        let request = tick(&[("S1", 101.0), ("S2", 101.5)], 104.0);
        let a = assembler.assemble(&request).unwrap();
        let b = assembler.assemble(&request).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn grid_vs30_used_when_record_absent() {
        let (wave, assembler) = assembler();
        feed(&wave, "S2", 100.0, 4.0);
        let input = assembler
            .assemble(&tick(&[("S2", 101.0)], 104.0))
            .unwrap();
        assert_eq!(input.station_meta[[0, 3]], 555.0);
    }
}
