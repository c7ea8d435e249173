//! Pick Aggregator: deduplicated P-pick store and event trigger.
//!
//! The aggregator is a pure state machine: [`PickAggregator::on_pick`] and
//! [`PickAggregator::on_timer`] take an explicit wall-clock `now` and return
//! the tick requests that became due, so trigger and cadence logic are
//! testable without a clock. The async loop in the pipeline drives it from
//! the pick channel plus a coarse 100 ms interval and forwards emitted
//! requests into the bounded [`TickQueue`].

pub mod queue;

pub use queue::TickQueue;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{haversine_km, SiteCatalog};
use crate::config::TriggerConfig;
use crate::types::{EventState, Phase, Pick, TickRequest};

// ============================================================================
// Counters
// ============================================================================

#[derive(Debug, Default)]
pub struct PickCounters {
    pub picks_received: AtomicU64,
    pub picks_accepted: AtomicU64,
    pub picks_deduplicated: AtomicU64,
    pub events_started: AtomicU64,
    pub ticks_emitted: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PickCounterSnapshot {
    pub picks_received: u64,
    pub picks_accepted: u64,
    pub picks_deduplicated: u64,
    pub events_started: u64,
    pub ticks_emitted: u64,
}

impl PickCounters {
    pub fn snapshot(&self) -> PickCounterSnapshot {
        PickCounterSnapshot {
            picks_received: self.picks_received.load(Ordering::Relaxed),
            picks_accepted: self.picks_accepted.load(Ordering::Relaxed),
            picks_deduplicated: self.picks_deduplicated.load(Ordering::Relaxed),
            events_started: self.events_started.load(Ordering::Relaxed),
            ticks_emitted: self.ticks_emitted.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

enum AggregatorState {
    Idle,
    Active(EventState),
}

/// What `on_pick` did with a pick (drives the audit log).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickDisposition {
    /// Stored (or promoted into the active event).
    Accepted,
    /// Lost a duplicate contest or replaced by a better duplicate.
    Deduplicated,
    /// Non-P phase, or station unknown to the catalog.
    Ignored,
}

pub struct PickAggregator {
    trigger: TriggerConfig,
    tick_interval: f64,
    initial_delay: f64,
    catalog: Arc<SiteCatalog>,
    /// Short-horizon pick buffer used while Idle.
    recent: VecDeque<Pick>,
    state: AggregatorState,
    next_event_id: u64,
    /// Shared so the API can snapshot while the run loop owns the aggregator.
    pub counters: Arc<PickCounters>,
}

impl PickAggregator {
    pub fn new(
        trigger: TriggerConfig,
        tick_interval: f64,
        initial_delay: f64,
        catalog: Arc<SiteCatalog>,
    ) -> Self {
        Self {
            trigger,
            tick_interval,
            initial_delay,
            catalog,
            recent: VecDeque::new(),
            state: AggregatorState::Idle,
            next_event_id: 1,
            counters: Arc::new(PickCounters::default()),
        }
    }

    /// True while an event is active.
    pub fn is_active(&self) -> bool {
        matches!(self.state, AggregatorState::Active(_))
    }

    /// Feed one pick; returns its disposition and any ticks now due.
    pub fn on_pick(&mut self, pick: Pick, now: f64) -> (PickDisposition, Vec<TickRequest>) {
        self.counters.picks_received.fetch_add(1, Ordering::Relaxed);

        if pick.phase != Phase::P {
            return (PickDisposition::Ignored, self.on_timer(now));
        }
        if self.catalog.station_meta(&pick.station_id).is_none() {
            debug!(station = %pick.station_id, "Pick from uncatalogued station ignored");
            return (PickDisposition::Ignored, self.on_timer(now));
        }

        let epsilon = self.trigger.epsilon_pick_seconds;
        let joins_event = match &self.state {
            AggregatorState::Idle => None,
            AggregatorState::Active(event) => {
                Some(pick.pick_time - event.latest_pick_time <= self.trigger.event_linger_seconds)
            }
        };

        let disposition = match joins_event {
            None => {
                let disposition = self.buffer_pick(pick.clone());
                if disposition == PickDisposition::Accepted {
                    self.try_trigger(&pick);
                }
                disposition
            }
            Some(true) => match &mut self.state {
                AggregatorState::Active(event) => Self::accept_into_event(event, pick, epsilon),
                AggregatorState::Idle => PickDisposition::Ignored,
            },
            // Too late for this event; hold for the next one.
            Some(false) => self.buffer_pick(pick),
        };

        if disposition == PickDisposition::Accepted {
            self.counters.picks_accepted.fetch_add(1, Ordering::Relaxed);
        } else if disposition == PickDisposition::Deduplicated {
            self.counters
                .picks_deduplicated
                .fetch_add(1, Ordering::Relaxed);
        }

        (disposition, self.on_timer(now))
    }

    /// Cooperative timer: emit due ticks and handle event drain.
    pub fn on_timer(&mut self, now: f64) -> Vec<TickRequest> {
        let AggregatorState::Active(event) = &mut self.state else {
            return Vec::new();
        };

        let mut out = Vec::new();

        // Cadence: tick k (1-based) fires at first_pick + initial_delay +
        // (k - 1) * interval.
        loop {
            let due = event.first_pick_time
                + self.initial_delay
                + f64::from(event.ticks_emitted) * self.tick_interval;
            if now < due {
                break;
            }
            let tick_index = event.ticks_emitted + 1;
            let wave_end_time = (event.latest_pick_time
                + self.tick_interval * f64::from(tick_index))
            .min(now);
            out.push(TickRequest {
                event_id: event.event_id,
                tick_index,
                wave_end_time,
                station_pick_order: event.station_pick_order(),
                terminal: false,
            });
            event.ticks_emitted = tick_index;
        }

        // Drain: no new picks for event_drain_seconds ends the event with a
        // terminal tick.
        if now - event.latest_pick_time >= self.trigger.event_drain_seconds {
            out.push(TickRequest {
                event_id: event.event_id,
                tick_index: event.ticks_emitted,
                wave_end_time: event.latest_pick_time,
                station_pick_order: event.station_pick_order(),
                terminal: true,
            });
            info!(
                event_id = event.event_id,
                ticks = event.ticks_emitted,
                picks = event.picks.len(),
                "Event drained"
            );
            self.state = AggregatorState::Idle;
        }

        self.counters
            .ticks_emitted
            .fetch_add(out.len() as u64, Ordering::Relaxed);
        out
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Store a pick in the idle-horizon buffer, resolving duplicates.
    fn buffer_pick(&mut self, pick: Pick) -> PickDisposition {
        // Prune picks that can no longer co-trigger with anything current.
        let horizon = pick.pick_time - self.trigger.window_seconds;
        while let Some(front) = self.recent.front() {
            if front.pick_time < horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        if let Some(existing) = self.recent.iter_mut().find(|p| {
            p.station_id == pick.station_id
                && (p.pick_time - pick.pick_time).abs() < self.trigger.epsilon_pick_seconds
        }) {
            if pick.beats(existing) {
                *existing = pick;
                return PickDisposition::Accepted;
            }
            return PickDisposition::Deduplicated;
        }

        self.recent.push_back(pick);
        PickDisposition::Accepted
    }

    /// Merge a pick into the active event's per-station set.
    fn accept_into_event(event: &mut EventState, pick: Pick, epsilon: f64) -> PickDisposition {
        match event.picks.get_mut(&pick.station_id) {
            Some(existing) => {
                if (existing.pick_time - pick.pick_time).abs() < epsilon {
                    if pick.beats(existing) {
                        event.latest_pick_time = event.latest_pick_time.max(pick.pick_time);
                        *existing = pick;
                        PickDisposition::Accepted
                    } else {
                        PickDisposition::Deduplicated
                    }
                } else {
                    // Same station re-picking later in the event extends the
                    // linger window but keeps the first arrival for ordering.
                    event.latest_pick_time = event.latest_pick_time.max(pick.pick_time);
                    PickDisposition::Accepted
                }
            }
            None => {
                event.latest_pick_time = event.latest_pick_time.max(pick.pick_time);
                event.first_pick_time = event.first_pick_time.min(pick.pick_time);
                event.picks.insert(pick.station_id.clone(), pick);
                PickDisposition::Accepted
            }
        }
    }

    /// Evaluate the co-pick predicate around a freshly accepted pick.
    fn try_trigger(&mut self, newest: &Pick) {
        // Candidates: one pick per station inside the trigger window ending
        // at the newest pick (earliest arrival per station wins).
        let lo = newest.pick_time - self.trigger.window_seconds;
        let mut per_station: std::collections::BTreeMap<&str, &Pick> =
            std::collections::BTreeMap::new();
        for pick in &self.recent {
            if pick.pick_time < lo || pick.pick_time > newest.pick_time {
                continue;
            }
            per_station
                .entry(pick.station_id.as_str())
                .and_modify(|existing| {
                    if pick.pick_time < existing.pick_time {
                        *existing = pick;
                    }
                })
                .or_insert(pick);
        }

        // Spatial gate relative to the newest pick's station first, then a
        // full pairwise verification, shedding the farthest station until the
        // set is clean.
        let Some(origin) = self.catalog.station_meta(&newest.station_id) else {
            return;
        };
        let mut members: Vec<&Pick> = per_station
            .values()
            .filter(|p| {
                let Some(meta) = self.catalog.station_meta(&p.station_id) else {
                    return false;
                };
                haversine_km(origin.latitude, origin.longitude, meta.latitude, meta.longitude)
                    <= self.trigger.spatial_km
            })
            .copied()
            .collect();

        loop {
            if members.len() < self.trigger.min_stations {
                return;
            }
            match self.worst_pair(&members) {
                Some((index, distance)) if distance > self.trigger.spatial_km => {
                    members.remove(index);
                }
                _ => break,
            }
        }

        let picks: Vec<Pick> = members.into_iter().cloned().collect();
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        let event = EventState::new(event_id, picks);
        info!(
            event_id,
            stations = event.picks.len(),
            first_pick = event.first_pick_time,
            "Co-pick predicate satisfied, event started"
        );
        self.counters.events_started.fetch_add(1, Ordering::Relaxed);
        self.recent.clear();
        self.state = AggregatorState::Active(event);
    }

    /// Index (into `members`) of the station contributing the largest
    /// pairwise distance, with that distance.
    fn worst_pair(&self, members: &[&Pick]) -> Option<(usize, f64)> {
        let mut worst: Option<(usize, f64)> = None;
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let a = self.catalog.station_meta(&members[i].station_id)?;
                let b = self.catalog.station_meta(&members[j].station_id)?;
                let d = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
                if worst.map_or(true, |(_, w)| d > w) {
                    worst = Some((j, d));
                }
            }
        }
        worst
    }
}
