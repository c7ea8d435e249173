//! Intensity labels and the published report record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Intensity Labels
// ============================================================================

/// Taiwan-scale intensity label, ordered from `0` to `7`.
///
/// The derive order gives `Ord` the scale order, so alarm comparisons are
/// plain `>=` on the enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum IntensityLabel {
    #[serde(rename = "0")]
    Zero,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "5-")]
    FiveMinus,
    #[serde(rename = "5+")]
    FivePlus,
    #[serde(rename = "6-")]
    SixMinus,
    #[serde(rename = "6+")]
    SixPlus,
    #[serde(rename = "7")]
    Seven,
}

impl IntensityLabel {
    /// Labels above `Zero`, in ascending order; parallel to the PGA
    /// threshold table.
    pub const SCALE: [IntensityLabel; 9] = [
        IntensityLabel::One,
        IntensityLabel::Two,
        IntensityLabel::Three,
        IntensityLabel::Four,
        IntensityLabel::FiveMinus,
        IntensityLabel::FivePlus,
        IntensityLabel::SixMinus,
        IntensityLabel::SixPlus,
        IntensityLabel::Seven,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntensityLabel::Zero => "0",
            IntensityLabel::One => "1",
            IntensityLabel::Two => "2",
            IntensityLabel::Three => "3",
            IntensityLabel::Four => "4",
            IntensityLabel::FiveMinus => "5-",
            IntensityLabel::FivePlus => "5+",
            IntensityLabel::SixMinus => "6-",
            IntensityLabel::SixPlus => "6+",
            IntensityLabel::Seven => "7",
        }
    }
}

impl std::fmt::Display for IntensityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IntensityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(IntensityLabel::Zero),
            "1" => Ok(IntensityLabel::One),
            "2" => Ok(IntensityLabel::Two),
            "3" => Ok(IntensityLabel::Three),
            "4" => Ok(IntensityLabel::Four),
            "5-" => Ok(IntensityLabel::FiveMinus),
            "5+" => Ok(IntensityLabel::FivePlus),
            "6-" => Ok(IntensityLabel::SixMinus),
            "6+" => Ok(IntensityLabel::SixPlus),
            "7" => Ok(IntensityLabel::Seven),
            other => Err(format!("not an intensity label: {other}")),
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Discriminates normal reports from error/terminal records in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Report,
    PredictFailed,
    PredictTimeout,
    EventEnd,
}

/// One published intensity report (one line of the event log).
///
/// Serialized field names are the outward-bus contract; per-target intensity
/// labels are flattened to top-level `<target_name>: <label>` keys. Consumers
/// must ignore unknown keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub event_id: u64,
    pub kind: ReportKind,
    pub tick_index: u32,
    /// ISO-8601 UTC wall time at report composition.
    pub report_time: DateTime<Utc>,
    /// Window start of the wave snapshot (unix-epoch seconds).
    #[serde(rename = "wave_time")]
    pub wave_start_time: f64,
    /// Window end of the wave snapshot (unix-epoch seconds).
    #[serde(rename = "wave_endt")]
    pub wave_end_time: f64,
    /// now - wave_end_time at composition (seconds, >= 0).
    #[serde(rename = "wave_lag")]
    pub wave_lag_seconds: f64,
    /// Wall time spent in assembly + inference (seconds, > 0).
    #[serde(rename = "run_time")]
    pub compute_time_seconds: f64,
    /// Stations with accepted P picks at tick time.
    #[serde(rename = "picks")]
    pub picks_count: usize,
    /// Alarm target names, descending intensity then name.
    pub alarm: Vec<String>,
    /// Counties of alarm targets, first-appearance order, deduplicated.
    pub alarm_county: Vec<String>,
    /// Per-target labels, flattened into the JSON object.
    #[serde(flatten)]
    pub intensities: BTreeMap<String, IntensityLabel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_ordering_follows_scale() {
        assert!(IntensityLabel::FiveMinus > IntensityLabel::Four);
        assert!(IntensityLabel::FivePlus > IntensityLabel::FiveMinus);
        assert!(IntensityLabel::Seven > IntensityLabel::SixPlus);
        assert_eq!("5-".parse::<IntensityLabel>().unwrap(), IntensityLabel::FiveMinus);
    }

    #[test]
    fn report_json_contract() {
        let mut intensities = BTreeMap::new();
        intensities.insert("Hualien".to_string(), IntensityLabel::FiveMinus);
        intensities.insert("Taipei".to_string(), IntensityLabel::Two);

        let report = Report {
            event_id: 7,
            kind: ReportKind::Report,
            tick_index: 3,
            report_time: Utc::now(),
            wave_start_time: 100.0,
            wave_end_time: 130.0,
            wave_lag_seconds: 1.25,
            compute_time_seconds: 0.31,
            picks_count: 5,
            alarm: vec!["Hualien".to_string()],
            alarm_county: vec!["Hualien".to_string()],
            intensities,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["event_id"], 7);
        assert_eq!(json["wave_endt"], 130.0);
        assert_eq!(json["run_time"], 0.31);
        assert_eq!(json["picks"], 5);
        assert_eq!(json["Hualien"], "5-");
        assert_eq!(json["Taipei"], "2");
        assert_eq!(json["kind"], "report");

        // Round trip preserves the record modulo float tolerance.
        let back: Report = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_id, report.event_id);
        assert_eq!(back.intensities, report.intensities);
        assert!((back.wave_lag_seconds - report.wave_lag_seconds).abs() < 1e-6);
        assert!((back.compute_time_seconds - report.compute_time_seconds).abs() < 1e-6);
    }
}
