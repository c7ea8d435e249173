//! Pipeline wiring: one task per long-lived component, bounded channels
//! between them, one cancellation token over all of them.
//!
//! ```text
//! wave source ─▶ ingestor ─▶ WaveBuffer rings
//! pick source ─▶ ingestor ─▶ pick channel ─▶ aggregator ─▶ tick queue
//! tick queue  ─▶ dispatcher ─▶ predictor ─▶ event log + bus (+ websocket)
//! ```

pub mod source;

pub use source::{
    parse_pick_line, JsonlWaveSource, PickEvent, PickSource, SilentPickSource,
    SyntheticWaveSource, TextPickSource, WaveEvent, WaveSource,
};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::TensorAssembler;
use crate::bus::ReportBus;
use crate::catalog::SiteCatalog;
use crate::config::defaults::{
    AGGREGATOR_TIMER_MS, PICK_CHANNEL_CAPACITY, TICK_QUEUE_CAPACITY,
    TRANSPORT_BACKOFF_CAP_SECS,
};
use crate::config::RuntimeConfig;
use crate::inference::{DispatchCounters, Dispatcher, Predictor};
use crate::picks::{PickAggregator, PickCounters, PickDisposition, TickQueue};
use crate::reportlog::{PickLog, ReportLog};
use crate::wavebuf::WaveBuffer;

/// Consecutive transport failures tolerated before the error is treated as
/// unrecoverable (exit code 3 at the top level).
const MAX_CONSECUTIVE_TRANSPORT_FAILURES: u32 = 8;

/// Wall clock as unix-epoch seconds.
pub fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unrecoverable transport failure: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Fully wired forecaster, ready to run against a pair of sources.
pub struct Pipeline {
    pub config: RuntimeConfig,
    pub catalog: Arc<SiteCatalog>,
    pub wave: Arc<WaveBuffer>,
    pub queue: Arc<TickQueue>,
    pub bus: ReportBus,
    pub pick_counters: Arc<PickCounters>,
    pub dispatch_counters: Arc<DispatchCounters>,
    aggregator: PickAggregator,
    dispatcher: Dispatcher,
    pick_log: PickLog,
}

impl Pipeline {
    /// Wire every component. Fails only on startup errors (filter design,
    /// log directory creation).
    pub fn new(
        config: RuntimeConfig,
        catalog: Arc<SiteCatalog>,
        predictor: Box<dyn Predictor>,
    ) -> Result<Self> {
        let station_ids: Vec<String> = catalog.station_ids().map(str::to_string).collect();
        let wave = Arc::new(WaveBuffer::new(
            &config,
            station_ids.iter().map(String::as_str),
        )?);

        let assembler = TensorAssembler::new(
            wave.clone(),
            catalog.clone(),
            config.inference.n_stations_max,
        );
        let bus = ReportBus::new();
        let report_log = ReportLog::new(&config.paths.log_dir)?;
        let pick_log = PickLog::new(&config.paths.log_dir)?;
        let queue = Arc::new(TickQueue::new(TICK_QUEUE_CAPACITY));

        let aggregator = PickAggregator::new(
            config.trigger.clone(),
            config.inference.tick_interval_seconds,
            config.inference.initial_delay_seconds,
            catalog.clone(),
        );
        let pick_counters = aggregator.counters.clone();

        let dispatcher = Dispatcher::new(
            assembler,
            predictor,
            bus.clone(),
            report_log,
            catalog.target_list().to_vec(),
            config.inference.clone(),
            config.wave.window_seconds,
        );
        let dispatch_counters = dispatcher.counters.clone();

        Ok(Self {
            config,
            catalog,
            wave,
            queue,
            bus,
            pick_counters,
            dispatch_counters,
            aggregator,
            dispatcher,
            pick_log,
        })
    }

    /// Run until cancellation (or an unrecoverable transport failure).
    ///
    /// Source EOF is not an error: replay runs keep the aggregator and
    /// dispatcher alive so in-flight events drain and the view channel stays
    /// up until the caller cancels.
    pub async fn run(
        self,
        wave_source: impl WaveSource,
        pick_source: impl PickSource,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        let Pipeline {
            wave,
            queue,
            aggregator,
            dispatcher,
            pick_log,
            ..
        } = self;

        let (pick_tx, pick_rx) = mpsc::channel(PICK_CHANNEL_CAPACITY);

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(run_wave_ingestor(wave_source, wave.clone(), cancel.clone()));
        tasks.spawn(run_pick_ingestor(pick_source, pick_tx, cancel.clone()));
        tasks.spawn(run_aggregator(
            aggregator,
            pick_rx,
            queue.clone(),
            pick_log,
            cancel.clone(),
        ));
        tasks.spawn({
            let queue = queue.clone();
            let cancel = cancel.clone();
            async move {
                dispatcher.run(queue, cancel).await;
                Ok(())
            }
        });

        let mut failure: Option<PipelineError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Pipeline task failed, shutting down");
                    failure.get_or_insert(PipelineError::Transport(e));
                    cancel.cancel();
                }
                Err(e) => {
                    warn!(error = %e, "Pipeline task panicked, shutting down");
                    failure.get_or_insert(PipelineError::Transport(anyhow::anyhow!(e)));
                    cancel.cancel();
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Component loops
// ============================================================================

/// Thread W: transport reads into the wave buffer, with capped backoff on
/// transient read failures.
async fn run_wave_ingestor(
    mut source: impl WaveSource,
    wave: Arc<WaveBuffer>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(source = source.name(), "Wave ingestor running");
    let mut consecutive_failures = 0u32;
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = source.next() => event,
        };
        match event {
            Ok(WaveEvent::Packet(packet)) => {
                consecutive_failures = 0;
                if let Err(e) = wave.insert(&packet) {
                    // Counters already moved; per-packet failures are local.
                    debug!(error = %e, "Waveform packet dropped");
                }
            }
            Ok(WaveEvent::Eof) => {
                info!(source = source.name(), "Waveform source reached end");
                break;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_TRANSPORT_FAILURES {
                    return Err(e.context("waveform transport"));
                }
                let backoff = transport_backoff(consecutive_failures);
                warn!(
                    error = %e,
                    retry_in_s = backoff.as_secs_f64(),
                    "Waveform transport read failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    Ok(())
}

/// Pick transport reads into the aggregator channel.
async fn run_pick_ingestor(
    mut source: impl PickSource,
    pick_tx: mpsc::Sender<crate::types::Pick>,
    cancel: CancellationToken,
) -> Result<()> {
    info!(source = source.name(), "Pick ingestor running");
    let mut consecutive_failures = 0u32;
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = source.next() => event,
        };
        match event {
            Ok(PickEvent::Pick(pick)) => {
                consecutive_failures = 0;
                if pick_tx.send(pick).await.is_err() {
                    break; // aggregator gone, shutdown in progress
                }
            }
            Ok(PickEvent::Eof) => {
                info!(source = source.name(), "Pick source reached end");
                break;
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_TRANSPORT_FAILURES {
                    return Err(e.context("pick transport"));
                }
                let backoff = transport_backoff(consecutive_failures);
                warn!(
                    error = %e,
                    retry_in_s = backoff.as_secs_f64(),
                    "Pick transport read failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    Ok(())
}

/// Thread P: the aggregator state machine driven by pick arrivals and a
/// coarse cooperative timer.
async fn run_aggregator(
    mut aggregator: PickAggregator,
    mut pick_rx: mpsc::Receiver<crate::types::Pick>,
    queue: Arc<TickQueue>,
    mut pick_log: PickLog,
    cancel: CancellationToken,
) -> Result<()> {
    let mut timer = tokio::time::interval(Duration::from_millis(AGGREGATOR_TIMER_MS));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("Pick aggregator running");

    // The pick channel closing (source EOF) must not stop the cadence: an
    // active event still needs its remaining ticks and terminal drain.
    let mut picks_open = true;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            pick = pick_rx.recv(), if picks_open => {
                match pick {
                    Some(pick) => {
                        let (disposition, ticks) = aggregator.on_pick(pick.clone(), now_unix());
                        if disposition == PickDisposition::Accepted {
                            if let Err(e) = pick_log.append(&pick) {
                                warn!(error = %e, "Pick audit log write failed");
                            }
                        }
                        for tick in ticks {
                            queue.push(tick);
                        }
                    }
                    None => picks_open = false,
                }
            }
            _ = timer.tick() => {
                for tick in aggregator.on_timer(now_unix()) {
                    queue.push(tick);
                }
            }
        }
    }

    // Drain the channel so the ingestor is never left blocked on send.
    while let Ok(pick) = pick_rx.try_recv() {
        let (disposition, ticks) = aggregator.on_pick(pick.clone(), now_unix());
        if disposition == PickDisposition::Accepted {
            if let Err(e) = pick_log.append(&pick) {
                warn!(error = %e, "Pick audit log write failed");
            }
        }
        for tick in ticks {
            queue.push(tick);
        }
    }
    Ok(())
}

fn transport_backoff(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(3);
    Duration::from_secs(1 << exp).min(Duration::from_secs(TRANSPORT_BACKOFF_CAP_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_five_seconds() {
        assert_eq!(transport_backoff(1), Duration::from_secs(1));
        assert_eq!(transport_backoff(2), Duration::from_secs(2));
        assert_eq!(transport_backoff(3), Duration::from_secs(4));
        assert_eq!(transport_backoff(4), Duration::from_secs(5));
        assert_eq!(transport_backoff(40), Duration::from_secs(5));
    }
}
