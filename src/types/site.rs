//! Static site-catalog records.

use serde::{Deserialize, Serialize};

/// Per-station site metadata, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationMeta {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    /// Shear-wave velocity over the top 30 m (m/s). Falls back to the Vs30
    /// grid when absent.
    pub vs30: Option<f64>,
    pub site_class: Option<String>,
}

/// A geographic point at which intensity is forecast.
///
/// Targets are not necessarily stations; the list and its order are fixed for
/// the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub county: String,
    pub latitude: f64,
    pub longitude: f64,
    pub vs30: f64,
}
