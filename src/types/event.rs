//! Active-event state and inference tick requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Pick;

/// The single active seismic event owned by the pick aggregator.
///
/// Created when the co-pick predicate fires; retained while picks keep
/// arriving within the linger window; drained after
/// `event_drain_seconds` of silence. Events never overlap.
#[derive(Debug, Clone)]
pub struct EventState {
    pub event_id: u64,
    /// Earliest pick time of the satisfying set.
    pub first_pick_time: f64,
    /// First accepted pick per station.
    pub picks: BTreeMap<String, Pick>,
    /// Time of the most recently accepted pick.
    pub latest_pick_time: f64,
    pub ticks_emitted: u32,
}

impl EventState {
    pub fn new(event_id: u64, picks: Vec<Pick>) -> Self {
        let first_pick_time = picks
            .iter()
            .map(|p| p.pick_time)
            .fold(f64::INFINITY, f64::min);
        let latest_pick_time = picks
            .iter()
            .map(|p| p.pick_time)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut map = BTreeMap::new();
        for pick in picks {
            map.entry(pick.station_id.clone()).or_insert(pick);
        }
        Self {
            event_id,
            first_pick_time,
            picks: map,
            latest_pick_time,
            ticks_emitted: 0,
        }
    }

    /// Stations ordered by (first pick time, station id), the tensor row
    /// order contract.
    pub fn station_pick_order(&self) -> Vec<(String, f64)> {
        let mut order: Vec<(String, f64)> = self
            .picks
            .values()
            .map(|p| (p.station_id.clone(), p.pick_time))
            .collect();
        order.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        order
    }
}

/// One inference invocation request emitted by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRequest {
    pub event_id: u64,
    /// 1-based tick counter within the event; 0 only for the terminal tick
    /// of an event that never fired.
    pub tick_index: u32,
    /// Window end for the wave-buffer snapshot (unix-epoch seconds).
    pub wave_end_time: f64,
    /// Participating stations with their first pick times, in tensor order.
    pub station_pick_order: Vec<(String, f64)>,
    /// Terminal ticks close the event log; they do not run inference.
    pub terminal: bool,
}
