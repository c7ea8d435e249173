//! Inference Dispatcher: single consumer of tick requests.
//!
//! Owns the sole predictor instance, serializes every invocation, converts
//! the MDN output into per-target intensity labels, persists each tick as a
//! line of the event log, and fans the report out on the bus. Every runtime
//! failure is local: error ticks produce error-report records with the same
//! event id so downstream observers see liveness.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::{AssembleError, TensorAssembler};
use crate::bus::ReportBus;
use crate::config::InferenceConfig;
use crate::picks::TickQueue;
use crate::reportlog::ReportLog;
use crate::types::{IntensityLabel, Report, ReportKind, Target, TickRequest};

use super::{intensity, InferenceOutput, PredictError, Predictor};

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub reports_published: AtomicU64,
    pub predict_failures: AtomicU64,
    pub predict_timeouts: AtomicU64,
    pub ticks_skipped: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DispatchCounterSnapshot {
    pub reports_published: u64,
    pub predict_failures: u64,
    pub predict_timeouts: u64,
    pub ticks_skipped: u64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> DispatchCounterSnapshot {
        DispatchCounterSnapshot {
            reports_published: self.reports_published.load(Ordering::Relaxed),
            predict_failures: self.predict_failures.load(Ordering::Relaxed),
            predict_timeouts: self.predict_timeouts.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    assembler: TensorAssembler,
    predictor: Arc<Mutex<Box<dyn Predictor>>>,
    bus: ReportBus,
    log: ReportLog,
    targets: Vec<Target>,
    config: InferenceConfig,
    window_seconds: f64,
    pub counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub fn new(
        assembler: TensorAssembler,
        predictor: Box<dyn Predictor>,
        bus: ReportBus,
        log: ReportLog,
        targets: Vec<Target>,
        config: InferenceConfig,
        window_seconds: f64,
    ) -> Self {
        Self {
            assembler,
            predictor: Arc::new(Mutex::new(predictor)),
            bus,
            log,
            targets,
            config,
            window_seconds,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Pump tick requests until shutdown, then drain what is already queued.
    pub async fn run(mut self, queue: Arc<TickQueue>, cancel: CancellationToken) {
        info!(targets = self.targets.len(), "Inference dispatcher running");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                tick = queue.pop() => self.handle(tick).await,
            }
        }
        while let Some(tick) = queue.try_pop() {
            self.handle(tick).await;
        }
        info!("Inference dispatcher stopped");
    }

    /// Process one tick request end to end.
    pub async fn handle(&mut self, tick: TickRequest) {
        if tick.terminal {
            let report = self.compose(&tick, ReportKind::EventEnd, None, Instant::now());
            self.persist_and_publish(report);
            return;
        }

        let t_start = Instant::now();
        let input = match self.assembler.assemble(&tick) {
            Ok(input) => input,
            Err(AssembleError::InsufficientData) => {
                // Skipped tick: no report, no log line. The aggregator keeps
                // its cadence, so the next tick retries naturally.
                self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_id = tick.event_id,
                    tick_index = tick.tick_index,
                    "Tick skipped: no usable station window"
                );
                return;
            }
        };

        let kind = match self.predict(input).await {
            Ok(output) => match self.labels_for(&output) {
                Ok(labels) => {
                    let report = self.compose(&tick, ReportKind::Report, Some(labels), t_start);
                    self.persist_and_publish(report);
                    return;
                }
                Err(e) => {
                    warn!(event_id = tick.event_id, error = %e, "Predictor output rejected");
                    self.counters.predict_failures.fetch_add(1, Ordering::Relaxed);
                    ReportKind::PredictFailed
                }
            },
            Err(PredictTimeoutOrError::Timeout) => {
                warn!(
                    event_id = tick.event_id,
                    tick_index = tick.tick_index,
                    timeout_s = self.config.predict_timeout_seconds,
                    "Predictor call timed out"
                );
                self.counters.predict_timeouts.fetch_add(1, Ordering::Relaxed);
                ReportKind::PredictTimeout
            }
            Err(PredictTimeoutOrError::Failed(e)) => {
                warn!(event_id = tick.event_id, error = %e, "Predictor call failed");
                self.counters.predict_failures.fetch_add(1, Ordering::Relaxed);
                ReportKind::PredictFailed
            }
        };

        // Error record: same event id and tick index, no intensities.
        let report = self.compose(&tick, kind, None, t_start);
        self.persist_and_publish(report);
    }

    /// Invoke the blocking predictor off the async thread, under the soft
    /// timeout. On timeout the call keeps running on its blocking thread and
    /// releases the predictor lock when it finishes; subsequent ticks queue
    /// on the lock rather than re-entering the predictor.
    async fn predict(
        &self,
        input: crate::assembler::InferenceInput,
    ) -> Result<InferenceOutput, PredictTimeoutOrError> {
        let predictor = self.predictor.clone();
        let call = tokio::task::spawn_blocking(move || {
            let mut predictor = predictor
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            predictor.predict(&input)
        });
        let timeout = Duration::from_secs_f64(self.config.predict_timeout_seconds);
        match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(PredictTimeoutOrError::Timeout),
            Ok(Err(join)) => Err(PredictTimeoutOrError::Failed(format!(
                "predictor task aborted: {join}"
            ))),
            Ok(Ok(Err(e))) => Err(PredictTimeoutOrError::Failed(e.to_string())),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }

    /// Validate the output and derive one label per configured target.
    fn labels_for(&self, output: &InferenceOutput) -> Result<Vec<IntensityLabel>, PredictError> {
        if output.per_target.len() != self.targets.len() {
            return Err(PredictError::BadOutput(format!(
                "{} target mixtures for {} targets",
                output.per_target.len(),
                self.targets.len()
            )));
        }
        let mut labels = Vec::with_capacity(self.targets.len());
        for mixture in &output.per_target {
            mixture.validate()?;
            labels.push(intensity::label_for(mixture, self.config.intensity_cutoff));
        }
        Ok(labels)
    }

    /// Build the report record for one tick.
    fn compose(
        &self,
        tick: &TickRequest,
        kind: ReportKind,
        labels: Option<Vec<IntensityLabel>>,
        t_start: Instant,
    ) -> Report {
        let now = Utc::now();
        let now_epoch = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;

        let mut intensities = BTreeMap::new();
        let mut alarm: Vec<(IntensityLabel, String, String)> = Vec::new();
        if let Some(labels) = labels {
            for (target, label) in self.targets.iter().zip(labels) {
                intensities.insert(target.name.clone(), label);
                if label >= self.config.alarm_min_intensity {
                    alarm.push((label, target.name.clone(), target.county.clone()));
                }
            }
        }
        // Descending intensity, tie-broken by target name.
        alarm.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        let mut alarm_county: Vec<String> = Vec::new();
        for (_, _, county) in &alarm {
            if !alarm_county.contains(county) {
                alarm_county.push(county.clone());
            }
        }

        Report {
            event_id: tick.event_id,
            kind,
            tick_index: tick.tick_index,
            report_time: now,
            wave_start_time: tick.wave_end_time - self.window_seconds,
            wave_end_time: tick.wave_end_time,
            wave_lag_seconds: (now_epoch - tick.wave_end_time).max(0.0),
            compute_time_seconds: t_start.elapsed().as_secs_f64().max(1e-9),
            picks_count: tick.station_pick_order.len(),
            alarm: alarm.into_iter().map(|(_, name, _)| name).collect(),
            alarm_county,
            intensities,
        }
    }

    fn persist_and_publish(&mut self, report: Report) {
        if let Err(e) = self.log.append(&report) {
            warn!(event_id = report.event_id, error = %e, "Event log write failed");
        }
        if report.kind == ReportKind::Report {
            info!(
                event_id = report.event_id,
                tick_index = report.tick_index,
                alarm = report.alarm.len(),
                wave_lag = report.wave_lag_seconds,
                run_time = report.compute_time_seconds,
                "Report published"
            );
        }
        self.counters.reports_published.fetch_add(1, Ordering::Relaxed);
        self.bus.publish(Arc::new(report));
    }
}

enum PredictTimeoutOrError {
    Timeout,
    Failed(String),
}
