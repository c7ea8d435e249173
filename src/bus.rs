//! Outward report fan-out.
//!
//! One broadcast channel feeds every subscriber (external publisher bridge,
//! websocket view clients); the latest report is cached for request/response
//! consumers. Publishing is fire-and-forget: a send with no subscribers is
//! not an error and a slow subscriber only loses its own backlog.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::types::Report;

const BUS_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct ReportBus {
    tx: broadcast::Sender<Arc<Report>>,
    latest: Arc<RwLock<Option<Arc<Report>>>>,
}

impl ReportBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Publish to all current subscribers and cache as the latest report.
    pub fn publish(&self, report: Arc<Report>) {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(report.clone());
        }
        // No subscribers is fine.
        let _ = self.tx.send(report);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Report>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<Report>> {
        self.latest.read().ok().and_then(|l| l.clone())
    }
}

impl Default for ReportBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntensityLabel, ReportKind};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn report(event_id: u64) -> Arc<Report> {
        let mut intensities = BTreeMap::new();
        intensities.insert("X".to_string(), IntensityLabel::One);
        Arc::new(Report {
            event_id,
            kind: ReportKind::Report,
            tick_index: 1,
            report_time: Utc::now(),
            wave_start_time: 0.0,
            wave_end_time: 30.0,
            wave_lag_seconds: 0.1,
            compute_time_seconds: 0.1,
            picks_count: 3,
            alarm: Vec::new(),
            alarm_county: Vec::new(),
            intensities,
        })
    }

    #[tokio::test]
    async fn subscribers_receive_published_reports() {
        let bus = ReportBus::new();
        let mut rx = bus.subscribe();
        bus.publish(report(1));
        assert_eq!(rx.recv().await.unwrap().event_id, 1);
        assert_eq!(bus.latest().unwrap().event_id, 1);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = ReportBus::new();
        bus.publish(report(2));
        assert_eq!(bus.latest().unwrap().event_id, 2);
    }
}
