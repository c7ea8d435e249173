//! System-wide default constants.
//!
//! Centralises the tunable values so the config structs and tests share one
//! source of truth. Grouped by subsystem.

// ============================================================================
// Wave Buffer
// ============================================================================

/// Retained waveform window per channel (seconds).
pub const WINDOW_SECONDS: f64 = 30.0;

/// The only supported sampling rate on the realtime path (Hz).
pub const SAMPLE_RATE_HZ: f64 = 100.0;

/// Bandpass low corner (Hz).
pub const BANDPASS_LOW_HZ: f64 = 0.075;

/// Bandpass high corner (Hz).
pub const BANDPASS_HIGH_HZ: f64 = 10.0;

/// Bandpass filter order (must be even; realised as order/2 biquads).
pub const BANDPASS_ORDER: usize = 4;

// ============================================================================
// Pick Aggregator / Event Trigger
// ============================================================================

/// Minimum co-picking stations to promote picks into an event.
pub const TRIGGER_MIN_STATIONS: usize = 3;

/// All qualifying picks must fall within this span of each other (seconds).
pub const TRIGGER_WINDOW_SECONDS: f64 = 15.0;

/// Maximum pairwise great-circle distance between qualifying stations (km).
pub const TRIGGER_SPATIAL_KM: f64 = 120.0;

/// Same-station picks closer than this are duplicates (seconds).
pub const EPSILON_PICK_SECONDS: f64 = 0.5;

/// Additional picks are accepted while within this span of the latest (seconds).
pub const EVENT_LINGER_SECONDS: f64 = 20.0;

/// Event terminates this long after the last accepted pick (seconds).
pub const EVENT_DRAIN_SECONDS: f64 = 30.0;

/// Cooperative timer granularity for the aggregator loop (milliseconds).
pub const AGGREGATOR_TIMER_MS: u64 = 100;

/// Bounded tick-request queue depth (drop-oldest-non-terminal on overflow).
pub const TICK_QUEUE_CAPACITY: usize = 8;

// ============================================================================
// Inference
// ============================================================================

/// Maximum station rows in the inference tensor.
pub const N_STATIONS_MAX: usize = 25;

/// Columns in the station-metadata tensor row.
pub const K_META: usize = 7;

/// Columns in the target tensor row.
pub const K_TGT: usize = 3;

/// Inference cadence during an active event (seconds).
pub const TICK_INTERVAL_SECONDS: f64 = 1.0;

/// Delay before the first tick so waveforms accumulate (seconds).
pub const INITIAL_DELAY_SECONDS: f64 = 3.0;

/// A target's label is the highest threshold whose exceedance probability
/// reaches this cutoff.
pub const INTENSITY_PROB_CUTOFF: f64 = 0.5;

/// Minimum intensity label that raises an alarm.
pub const ALARM_MIN_INTENSITY: &str = "4";

/// Soft timeout on a single predictor call (seconds).
pub const PREDICT_TIMEOUT_SECONDS: f64 = 2.5;

/// Mixture weights must sum to 1 within this tolerance.
pub const MIXTURE_WEIGHT_TOLERANCE: f64 = 1e-4;

// ============================================================================
// Transport / Channels
// ============================================================================

/// Pick channel depth (ingestor -> aggregator).
pub const PICK_CHANNEL_CAPACITY: usize = 256;

/// Upstream read retry backoff cap (seconds).
pub const TRANSPORT_BACKOFF_CAP_SECS: u64 = 5;

// ============================================================================
// Paths / Server
// ============================================================================

/// Default site catalog directory (stations.csv, targets.csv, vs30.csv).
pub const SITE_DIR: &str = "site";

/// Default log root; report and pick logs live beneath it.
pub const LOG_DIR: &str = "logs";

/// Default HTTP bind address for the report view channel.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";
