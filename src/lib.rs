//! TTSAM-RT: real-time earthquake shaking-intensity forecasting.
//!
//! Pipeline: waveform packets and P-phase picks stream in from the upstream
//! transports; per-channel ring buffers hold the last window of bandpassed
//! ground motion; qualifying co-picks promote to a seismic event; every tick
//! of an active event snapshots the buffers into a fixed-shape tensor, runs
//! the pre-trained predictor, and publishes per-target PGA exceedance
//! intensities.
//!
//! ## Components
//!
//! - **Wave Buffer** (`wavebuf`): bounded channel-major rings, gap-aware
//! - **Pick Aggregator** (`picks`): dedup, event trigger, tick cadence
//! - **Tensor Assembler** (`assembler`): deterministic fixed-shape input
//! - **Inference Dispatcher** (`inference`): serialized predictor pump,
//!   intensity labelling, report log, bus fan-out

pub mod api;
pub mod assembler;
pub mod bus;
pub mod catalog;
pub mod config;
pub mod inference;
pub mod picks;
pub mod pipeline;
pub mod reportlog;
pub mod types;
pub mod wavebuf;

// Re-export the commonly used surface
pub use assembler::{AssembleError, InferenceInput, TensorAssembler};
pub use bus::ReportBus;
pub use catalog::{CatalogError, SiteCatalog};
pub use config::RuntimeConfig;
pub use inference::{
    Dispatcher, GaussianMixture, InferenceOutput, PredictError, Predictor, StubPredictor,
};
pub use picks::{PickAggregator, TickQueue};
pub use pipeline::Pipeline;
pub use types::{
    ChannelBlock, ChannelId, EventState, IntensityLabel, Phase, Pick, Report, ReportKind,
    StationMeta, Target, TickRequest, WaveformPacket,
};
pub use wavebuf::{InsertError, WaveBuffer};
