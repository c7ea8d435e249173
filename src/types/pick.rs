//! Phase pick types.

use serde::{Deserialize, Serialize};

/// Seismic phase of a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    P,
    S,
}

/// One P/S arrival pick from the upstream phase picker.
///
/// `pick_time` is absolute unix-epoch seconds. Only `P` picks participate in
/// event triggering; `S` picks are parsed and discarded by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub station_id: String,
    pub phase: Phase,
    pub pick_time: f64,
    pub weight: f64,
    pub amplitude_proxy: f64,
}

impl Pick {
    /// Duplicate-resolution ordering: higher weight wins, equal weights keep
    /// the earlier pick.
    pub fn beats(&self, other: &Pick) -> bool {
        if self.weight != other.weight {
            self.weight > other.weight
        } else {
            self.pick_time < other.pick_time
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick(weight: f64, time: f64) -> Pick {
        Pick {
            station_id: "A".into(),
            phase: Phase::P,
            pick_time: time,
            weight,
            amplitude_proxy: 0.0,
        }
    }

    #[test]
    fn higher_weight_beats() {
        assert!(pick(2.0, 10.0).beats(&pick(1.0, 9.0)));
        assert!(!pick(1.0, 9.0).beats(&pick(2.0, 10.0)));
    }

    #[test]
    fn equal_weight_earlier_beats() {
        assert!(pick(1.0, 9.0).beats(&pick(1.0, 10.0)));
        assert!(!pick(1.0, 10.0).beats(&pick(1.0, 9.0)));
    }
}
