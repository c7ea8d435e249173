//! Pipeline regression tests.
//!
//! Drives the wave buffer, pick aggregator, and inference dispatcher directly
//! (no wall-clock coupling) through the seed scenarios: cold start, minimal
//! trigger, pick dedup, gap resync, predictor timeout, and intensity
//! labelling against a fixed mixture.

use std::sync::Arc;

use ttsam_rt::assembler::TensorAssembler;
use ttsam_rt::bus::ReportBus;
use ttsam_rt::catalog::SiteCatalog;
use ttsam_rt::config::RuntimeConfig;
use ttsam_rt::inference::{
    Dispatcher, GaussianMixture, InferenceOutput, PredictError, Predictor, StubPredictor,
};
use ttsam_rt::picks::PickAggregator;
use ttsam_rt::reportlog::ReportLog;
use ttsam_rt::types::{ChannelId, IntensityLabel, Phase, Pick, ReportKind, StationMeta, Target, WaveformPacket};
use ttsam_rt::wavebuf::WaveBuffer;

const RATE: f64 = 100.0;

// ============================================================================
// Fixture helpers
// ============================================================================

fn catalog() -> Arc<SiteCatalog> {
    let stations = (1..=10)
        .map(|i| StationMeta {
            station_id: format!("S{i}"),
            latitude: 24.0 + 0.02 * i as f64,
            longitude: 121.0 + 0.02 * i as f64,
            elevation_m: 10.0 * i as f64,
            vs30: Some(500.0),
            site_class: None,
        })
        .collect();
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
        vec![(24.0, 121.0, 500.0)],
    ))
}

fn config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.wave.window_seconds = 10.0;
    config.inference.n_stations_max = 5;
    config
}

fn wave_buffer(config: &RuntimeConfig, catalog: &SiteCatalog) -> Arc<WaveBuffer> {
    let ids: Vec<String> = catalog.station_ids().map(str::to_string).collect();
    Arc::new(WaveBuffer::new(config, ids.iter().map(String::as_str)).unwrap())
}

/// Feed `seconds` of a low-frequency tone into all three components.
fn feed(wave: &WaveBuffer, station: &str, start: f64, seconds: f64) {
    for second in 0..seconds as usize {
        let t0 = start + second as f64;
        for channel in ChannelId::ALL {
            let samples: Vec<f64> = (0..RATE as usize)
                .map(|i| {
                    let t = t0 + i as f64 / RATE;
                    (2.0 * std::f64::consts::PI * 2.0 * t).sin() * 30.0
                })
                .collect();
            wave.insert(&WaveformPacket {
                station_id: station.into(),
                channel,
                sample_rate_hz: RATE,
                start_time: t0,
                end_time: t0 + 1.0,
                samples,
                gain: 1.0,
            })
            .unwrap();
        }
    }
}

fn pick(station: &str, time: f64, weight: f64) -> Pick {
    Pick {
        station_id: station.into(),
        phase: Phase::P,
        pick_time: time,
        weight,
        amplitude_proxy: 1.0,
    }
}

fn aggregator(config: &RuntimeConfig) -> PickAggregator {
    PickAggregator::new(
        config.trigger.clone(),
        config.inference.tick_interval_seconds,
        config.inference.initial_delay_seconds,
        catalog(),
    )
}

fn dispatcher(
    config: &RuntimeConfig,
    wave: Arc<WaveBuffer>,
    predictor: Box<dyn Predictor>,
    log_dir: &std::path::Path,
) -> (Dispatcher, ReportBus) {
    let catalog = catalog();
    let assembler = TensorAssembler::new(wave, catalog.clone(), config.inference.n_stations_max);
    let bus = ReportBus::new();
    let dispatcher = Dispatcher::new(
        assembler,
        predictor,
        bus.clone(),
        ReportLog::new(log_dir).unwrap(),
        catalog.target_list().to_vec(),
        config.inference.clone(),
        config.wave.window_seconds,
    );
    (dispatcher, bus)
}

// ============================================================================
// Cold start, no picks
// ============================================================================

#[test]
fn cold_start_produces_no_reports() {
    let config = config();
    let wave = wave_buffer(&config, &catalog());
    for i in 1..=10 {
        feed(&wave, &format!("S{i}"), 100.0, 60.0);
    }

    let mut agg = aggregator(&config);
    assert!(!agg.is_active());
    assert!(agg.on_timer(160.0).is_empty());

    // Every station serves a fully valid window once the ring has filled.
    for i in 1..=10 {
        let block = wave.read_window(&format!("S{i}"), 160.0).unwrap();
        assert!(block.valid.iter().all(|&v| v));
    }
}

// ============================================================================
// Minimal trigger
// ============================================================================

#[tokio::test]
async fn minimal_trigger_writes_report_log() {
    let config = config();
    let wave = wave_buffer(&config, &catalog());
    for i in 1..=3 {
        feed(&wave, &format!("S{i}"), 80.0, 30.0);
    }

    let mut agg = aggregator(&config);
    agg.on_pick(pick("S1", 100.0, 1.0), 100.0);
    agg.on_pick(pick("S2", 100.5, 1.0), 100.5);
    let (_, ticks) = agg.on_pick(pick("S3", 101.0, 1.0), 101.0);
    assert!(agg.is_active());
    assert!(ticks.is_empty(), "first tick waits for the initial delay");

    // First tick at first_pick_time + 3.0.
    let ticks = agg.on_timer(103.0);
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].tick_index, 1);

    let dir = tempfile::tempdir().unwrap();
    let (mut dispatcher, bus) =
        dispatcher(&config, wave, Box::new(StubPredictor::new()), dir.path());
    dispatcher.handle(ticks[0].clone()).await;

    let report = bus.latest().expect("report published");
    assert_eq!(report.event_id, 1);
    assert_eq!(report.picks_count, 3);
    assert_eq!(report.kind, ReportKind::Report);
    assert!(report.compute_time_seconds > 0.0);
    assert!(report.wave_lag_seconds >= 0.0);

    let report_dir = dir.path().join("report");
    let entries: Vec<_> = std::fs::read_dir(&report_dir).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let path = entries[0].as_ref().unwrap().path();
    assert!(path.file_name().unwrap().to_string_lossy().ends_with("_1.log"));
    let content = std::fs::read_to_string(path).unwrap();
    let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(first["picks"], 3);
    assert_eq!(first["event_id"], 1);
}

// ============================================================================
// Duplicate pick
// ============================================================================

#[test]
fn duplicate_pick_is_deduplicated() {
    let config = config();
    let mut agg = aggregator(&config);
    agg.on_pick(pick("S1", 100.0, 2.0), 100.0);
    agg.on_pick(pick("S2", 100.5, 1.0), 100.5);
    agg.on_pick(pick("S3", 101.0, 1.0), 101.0);
    assert!(agg.is_active());

    // Lower-weight duplicate for S1 within epsilon.
    agg.on_pick(pick("S1", 100.1, 0.5), 101.2);
    assert_eq!(agg.counters.snapshot().picks_deduplicated, 1);

    // The event still lists S1 exactly once, and the next tick still carries
    // three stations.
    let ticks = agg.on_timer(103.0);
    assert_eq!(ticks[0].station_pick_order.len(), 3);
    let s1_entries: Vec<_> = ticks[0]
        .station_pick_order
        .iter()
        .filter(|(s, _)| s == "S1")
        .collect();
    assert_eq!(s1_entries.len(), 1);
    assert!((s1_entries[0].1 - 100.0).abs() < 1e-9, "original pick kept");
}

// ============================================================================
// Gap resync
// ============================================================================

#[test]
fn gap_resync_resets_channel_ring() {
    let config = config();
    let wave = wave_buffer(&config, &catalog());
    feed(&wave, "S1", 170.0, 30.0); // data up to t=200

    assert_eq!(wave.counters.snapshot().gap_resyncs, 0);

    // One-second packet at t=260: more than one full window past the data.
    for channel in ChannelId::ALL {
        wave.insert(&WaveformPacket {
            station_id: "S1".into(),
            channel,
            sample_rate_hz: RATE,
            start_time: 260.0,
            end_time: 261.0,
            samples: vec![1.0; 100],
            gain: 1.0,
        })
        .unwrap();
    }
    assert_eq!(wave.counters.snapshot().gap_resyncs, 3);

    let block = wave.read_window("S1", 260.2).unwrap();
    let valid_count = block.valid.iter().filter(|&&v| v).count();
    assert_eq!(valid_count, 20, "only the newest 0.2 s is valid");
    assert!(block.valid.iter().rev().take(20).all(|&v| v));
    assert!(block.valid.iter().take(block.valid.len() - 20).all(|&v| !v));
}

// ============================================================================
// Predictor timeout
// ============================================================================

struct SleepyPredictor;

impl Predictor for SleepyPredictor {
    fn predict(&mut self, _input: &ttsam_rt::InferenceInput) -> Result<InferenceOutput, PredictError> {
        std::thread::sleep(std::time::Duration::from_millis(300));
        Ok(InferenceOutput { per_target: Vec::new() })
    }
}

#[tokio::test]
async fn predictor_timeout_keeps_event_alive() {
    let mut config = config();
    config.inference.predict_timeout_seconds = 0.05;
    let wave = wave_buffer(&config, &catalog());
    feed(&wave, "S1", 80.0, 30.0);

    let mut agg = aggregator(&config);
    agg.on_pick(pick("S1", 100.0, 1.0), 100.0);
    agg.on_pick(pick("S2", 100.5, 1.0), 100.5);
    agg.on_pick(pick("S3", 101.0, 1.0), 101.0);

    let dir = tempfile::tempdir().unwrap();
    let (mut dispatcher, bus) = dispatcher(&config, wave, Box::new(SleepyPredictor), dir.path());

    let tick1 = agg.on_timer(103.0).remove(0);
    let tick2 = agg.on_timer(104.0).remove(0);
    dispatcher.handle(tick1).await;
    let first = bus.latest().unwrap();
    assert_eq!(first.kind, ReportKind::PredictTimeout);
    assert_eq!(first.event_id, 1);
    assert_eq!(first.tick_index, 1);

    dispatcher.handle(tick2).await;
    let second = bus.latest().unwrap();
    assert_eq!(second.kind, ReportKind::PredictTimeout);
    assert_eq!(second.event_id, 1);
    assert_eq!(second.tick_index, 2);

    let report_dir = dir.path().join("report");
    let path = std::fs::read_dir(report_dir).unwrap().next().unwrap().unwrap().path();
    let content = std::fs::read_to_string(path).unwrap();
    let kinds: Vec<String> = content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["kind"]
            .as_str()
            .unwrap()
            .to_string())
        .collect();
    assert_eq!(kinds, ["predict_timeout", "predict_timeout"]);
}

// ============================================================================
// Intensity labelling through the dispatcher
// ============================================================================

/// Emits, for every target, a single Gaussian with P(>25 gal) ≈ 0.8 and
/// P(>80 gal) ≈ 0.3.
struct FixedMixturePredictor;

impl Predictor for FixedMixturePredictor {
    fn predict(&mut self, input: &ttsam_rt::InferenceInput) -> Result<InferenceOutput, PredictError> {
        let sigma = (80.0_f64.ln() - 25.0_f64.ln()) / (0.5244 + 0.8416);
        let mu = 25.0_f64.ln() + 0.8416 * sigma;
        let per_target = (0..input.targets.dim().0)
            .map(|_| GaussianMixture {
                weights: vec![1.0],
                means: vec![mu],
                log_stddevs: vec![sigma.ln()],
            })
            .collect();
        Ok(InferenceOutput { per_target })
    }
}

#[tokio::test]
async fn fixed_mixture_labels_four_and_alarms() {
    let config = config();
    let wave = wave_buffer(&config, &catalog());
    feed(&wave, "S1", 80.0, 30.0);

    let mut agg = aggregator(&config);
    agg.on_pick(pick("S1", 100.0, 1.0), 100.0);
    agg.on_pick(pick("S2", 100.5, 1.0), 100.5);
    agg.on_pick(pick("S3", 101.0, 1.0), 101.0);
    let tick = agg.on_timer(103.0).remove(0);

    let dir = tempfile::tempdir().unwrap();
    let (mut dispatcher, bus) =
        dispatcher(&config, wave, Box::new(FixedMixturePredictor), dir.path());
    dispatcher.handle(tick).await;

    let report = bus.latest().unwrap();
    assert_eq!(report.intensities["Hualien"], IntensityLabel::Four);
    assert_eq!(report.intensities["Taipei"], IntensityLabel::Four);
    // Default alarm threshold is "4": both targets alarm, name-ordered.
    assert_eq!(report.alarm, ["Hualien", "Taipei"]);
    assert_eq!(report.alarm_county, ["Hualien", "Taipei"]);
}

// ============================================================================
// Terminal tick closes the event log
// ============================================================================

#[tokio::test]
async fn event_drain_writes_terminal_record() {
    let config = config();
    let wave = wave_buffer(&config, &catalog());
    feed(&wave, "S1", 80.0, 30.0);

    let mut agg = aggregator(&config);
    agg.on_pick(pick("S1", 100.0, 1.0), 100.0);
    agg.on_pick(pick("S2", 100.5, 1.0), 100.5);
    agg.on_pick(pick("S3", 101.0, 1.0), 101.0);

    let dir = tempfile::tempdir().unwrap();
    let (mut dispatcher, _bus) =
        dispatcher(&config, wave, Box::new(StubPredictor::new()), dir.path());

    // Run the cadence past the drain horizon; the last request is terminal.
    let ticks = agg.on_timer(131.5);
    assert!(ticks.last().unwrap().terminal);
    assert!(!agg.is_active());
    for tick in ticks {
        dispatcher.handle(tick).await;
    }

    let path = std::fs::read_dir(dir.path().join("report"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let content = std::fs::read_to_string(path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(lines.len() >= 2);
    assert_eq!(lines.last().unwrap()["kind"], "event_end");

    // Tick indices are strictly increasing for the non-terminal records.
    let ticks: Vec<u64> = lines
        .iter()
        .filter(|l| l["kind"] == "report")
        .map(|l| l["tick_index"].as_u64().unwrap())
        .collect();
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
}
