//! Static site catalogs: station table, target list, Vs30 grid.
//!
//! Loaded once at startup and shared immutably for the process lifetime.
//! A load failure is fatal (exit code 1); per-lookup misses at runtime are
//! not: an unknown station is simply treated as absent.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::types::{StationMeta, Target};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to load {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path} contains no rows")]
    Empty { path: String },
}

// ============================================================================
// CSV row shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct StationRow {
    station: String,
    latitude: f64,
    longitude: f64,
    elevation: f64,
    #[serde(default)]
    vs30: Option<f64>,
    #[serde(default)]
    site_class: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetRow {
    target: String,
    county: String,
    latitude: f64,
    longitude: f64,
    vs30: f64,
}

#[derive(Debug, Deserialize)]
struct Vs30Row {
    latitude: f64,
    longitude: f64,
    vs30: f64,
}

// ============================================================================
// Vs30 grid
// ============================================================================

/// Nearest-cell Vs30 lookup over a loaded grid.
#[derive(Debug, Clone)]
pub struct Vs30Grid {
    points: Vec<(f64, f64, f64)>,
}

impl Vs30Grid {
    /// Vs30 of the grid cell nearest to (lat, lon).
    ///
    /// The grid is dense and regional, so squared-degree distance is an
    /// adequate nearest-cell metric.
    pub fn at(&self, latitude: f64, longitude: f64) -> f64 {
        let mut best = self.points[0];
        let mut best_d = f64::INFINITY;
        for &(lat, lon, vs30) in &self.points {
            let d = (lat - latitude).powi(2) + (lon - longitude).powi(2);
            if d < best_d {
                best_d = d;
                best = (lat, lon, vs30);
            }
        }
        best.2
    }
}

// ============================================================================
// Site catalog
// ============================================================================

/// Immutable station/target/Vs30 lookup tables.
pub struct SiteCatalog {
    stations: HashMap<String, StationMeta>,
    targets: Vec<Target>,
    vs30: Vs30Grid,
}

impl SiteCatalog {
    /// Load `stations.csv`, `targets.csv`, and `vs30.csv` from `dir`.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let stations_path = dir.join("stations.csv");
        let targets_path = dir.join("targets.csv");
        let vs30_path = dir.join("vs30.csv");

        let stations: HashMap<String, StationMeta> = read_rows::<StationRow>(&stations_path)?
            .into_iter()
            .map(|row| {
                let meta = StationMeta {
                    station_id: row.station.clone(),
                    latitude: row.latitude,
                    longitude: row.longitude,
                    elevation_m: row.elevation,
                    vs30: row.vs30,
                    site_class: row.site_class,
                };
                (row.station, meta)
            })
            .collect();

        let targets: Vec<Target> = read_rows::<TargetRow>(&targets_path)?
            .into_iter()
            .map(|row| Target {
                name: row.target,
                county: row.county,
                latitude: row.latitude,
                longitude: row.longitude,
                vs30: row.vs30,
            })
            .collect();

        let vs30_points: Vec<(f64, f64, f64)> = read_rows::<Vs30Row>(&vs30_path)?
            .into_iter()
            .map(|row| (row.latitude, row.longitude, row.vs30))
            .collect();

        info!(
            stations = stations.len(),
            targets = targets.len(),
            vs30_cells = vs30_points.len(),
            "Site catalogs loaded"
        );

        Ok(Self {
            stations,
            targets,
            vs30: Vs30Grid { points: vs30_points },
        })
    }

    /// Build a catalog from already-materialised tables (tests, simulators).
    pub fn from_parts(
        stations: Vec<StationMeta>,
        targets: Vec<Target>,
        vs30_points: Vec<(f64, f64, f64)>,
    ) -> Self {
        Self {
            stations: stations
                .into_iter()
                .map(|s| (s.station_id.clone(), s))
                .collect(),
            targets,
            vs30: Vs30Grid { points: vs30_points },
        }
    }

    pub fn station_meta(&self, station_id: &str) -> Option<&StationMeta> {
        self.stations.get(station_id)
    }

    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.stations.keys().map(String::as_str)
    }

    /// The fixed, ordered target list.
    pub fn target_list(&self) -> &[Target] {
        &self.targets
    }

    /// Nearest-grid-cell Vs30; falls back to the station record when set.
    pub fn vs30_at(&self, latitude: f64, longitude: f64) -> f64 {
        self.vs30.at(latitude, longitude)
    }

    /// Effective Vs30 for a station: explicit record value, else grid lookup.
    pub fn station_vs30(&self, meta: &StationMeta) -> f64 {
        meta.vs30
            .unwrap_or_else(|| self.vs30.at(meta.latitude, meta.longitude))
    }
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, CatalogError> {
    let display = path.display().to_string();
    let mut reader = csv::Reader::from_path(path).map_err(|source| CatalogError::Csv {
        path: display.clone(),
        source,
    })?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|source| CatalogError::Csv {
            path: display.clone(),
            source,
        })?);
    }
    if rows.is_empty() {
        return Err(CatalogError::Empty { path: display });
    }
    Ok(rows)
}

// ============================================================================
// Geodesy
// ============================================================================

/// Great-circle distance between two points (haversine, km).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn haversine_known_distance() {
        // Taipei to Hualien, roughly 120 km.
        let d = haversine_km(25.04, 121.51, 23.99, 121.60);
        assert!((d - 117.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn vs30_nearest_cell() {
        let grid = Vs30Grid {
            points: vec![(24.0, 121.0, 400.0), (24.5, 121.5, 700.0)],
        };
        assert_eq!(grid.at(24.1, 121.1), 400.0);
        assert_eq!(grid.at(24.45, 121.45), 700.0);
    }

    #[test]
    fn load_from_csv_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("stations.csv")).unwrap();
        writeln!(f, "station,latitude,longitude,elevation,vs30,site_class").unwrap();
        writeln!(f, "S1,24.0,121.0,10.0,500.0,C").unwrap();
        writeln!(f, "S2,24.1,121.1,20.0,,").unwrap();
        let mut f = std::fs::File::create(dir.path().join("targets.csv")).unwrap();
        writeln!(f, "target,county,latitude,longitude,vs30").unwrap();
        writeln!(f, "Hualien,Hualien,23.99,121.60,450.0").unwrap();
        let mut f = std::fs::File::create(dir.path().join("vs30.csv")).unwrap();
        writeln!(f, "latitude,longitude,vs30").unwrap();
        writeln!(f, "24.0,121.0,520.0").unwrap();
        writeln!(f, "24.1,121.1,610.0").unwrap();

        let catalog = SiteCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.target_list().len(), 1);
        let s1 = catalog.station_meta("S1").unwrap();
        assert_eq!(catalog.station_vs30(s1), 500.0);
        let s2 = catalog.station_meta("S2").unwrap().clone();
        // No record vs30: nearest grid cell.
        assert_eq!(catalog.station_vs30(&s2), 610.0);
        assert!(catalog.station_meta("S3").is_none());
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SiteCatalog::load(dir.path()).is_err());
    }
}
