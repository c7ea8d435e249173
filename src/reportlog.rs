//! Append-only persistence: per-event report logs and the daily pick audit.
//!
//! Reports land in `logs/report/<yyyy-mm-ddTHH:MM:SS_event_id>.log`, one JSON
//! object per line in tick order; readers list events by file name. Accepted
//! picks are appended to `logs/pick/<yyyy-mm-dd>.log` for audit only. Write
//! failures are the caller's to log; they never stop the pipeline.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::types::{Pick, Report, ReportKind};

// ============================================================================
// Event report log
// ============================================================================

struct OpenEvent {
    event_id: u64,
    writer: BufWriter<File>,
}

/// One writer for the report stream; events are strictly serialized upstream,
/// so at most one event file is open at a time.
pub struct ReportLog {
    report_dir: PathBuf,
    open: Option<OpenEvent>,
}

impl ReportLog {
    pub fn new(log_dir: &Path) -> std::io::Result<Self> {
        let report_dir = log_dir.join("report");
        std::fs::create_dir_all(&report_dir)?;
        Ok(Self {
            report_dir,
            open: None,
        })
    }

    /// Append one report line, opening the event file on the first record.
    /// The terminal record closes the file.
    pub fn append(&mut self, report: &Report) -> std::io::Result<()> {
        let rotate = match &self.open {
            Some(open) => open.event_id != report.event_id,
            None => true,
        };
        if rotate {
            let name = format!(
                "{}_{}.log",
                report.report_time.format("%Y-%m-%dT%H:%M:%S"),
                report.event_id
            );
            let path = self.report_dir.join(name);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!(path = %path.display(), event_id = report.event_id, "Event log opened");
            self.open = Some(OpenEvent {
                event_id: report.event_id,
                writer: BufWriter::new(file),
            });
        }

        let Some(open) = self.open.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut open.writer, report)?;
        open.writer.write_all(b"\n")?;
        open.writer.flush()?;

        if report.kind == ReportKind::EventEnd {
            self.open = None;
        }
        Ok(())
    }
}

// ============================================================================
// Pick audit log
// ============================================================================

/// Daily line-delimited log of accepted picks. Audit only; never read back.
pub struct PickLog {
    pick_dir: PathBuf,
    open: Option<(String, BufWriter<File>)>,
}

impl PickLog {
    pub fn new(log_dir: &Path) -> std::io::Result<Self> {
        let pick_dir = log_dir.join("pick");
        std::fs::create_dir_all(&pick_dir)?;
        Ok(Self {
            pick_dir,
            open: None,
        })
    }

    pub fn append(&mut self, pick: &Pick) -> std::io::Result<()> {
        let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let rotate = match &self.open {
            Some((open_day, _)) => *open_day != day,
            None => true,
        };
        if rotate {
            let path = self.pick_dir.join(format!("{day}.log"));
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.open = Some((day, BufWriter::new(file)));
        }
        let Some((_, writer)) = self.open.as_mut() else {
            return Ok(());
        };
        writeln!(
            writer,
            "{} {:?} {:.3} {} {}",
            pick.station_id, pick.phase, pick.pick_time, pick.weight, pick.amplitude_proxy
        )?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntensityLabel;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn report(event_id: u64, tick_index: u32, kind: ReportKind) -> Report {
        let mut intensities = BTreeMap::new();
        intensities.insert("Hualien".to_string(), IntensityLabel::Three);
        Report {
            event_id,
            kind,
            tick_index,
            report_time: Utc::now(),
            wave_start_time: 70.0,
            wave_end_time: 100.0,
            wave_lag_seconds: 0.5,
            compute_time_seconds: 0.1,
            picks_count: 3,
            alarm: Vec::new(),
            alarm_county: Vec::new(),
            intensities,
        }
    }

    #[test]
    fn event_log_lines_in_tick_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReportLog::new(dir.path()).unwrap();
        log.append(&report(1, 1, ReportKind::Report)).unwrap();
        log.append(&report(1, 2, ReportKind::Report)).unwrap();
        log.append(&report(1, 2, ReportKind::EventEnd)).unwrap();

        let report_dir = dir.path().join("report");
        let entries: Vec<_> = std::fs::read_dir(&report_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_1.log"));

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let ticks: Vec<u64> = lines
            .iter()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["tick_index"]
                .as_u64()
                .unwrap())
            .collect();
        assert_eq!(ticks, [1, 2, 2]);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["kind"], "event_end");
    }

    #[test]
    fn new_event_opens_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ReportLog::new(dir.path()).unwrap();
        log.append(&report(1, 1, ReportKind::Report)).unwrap();
        log.append(&report(1, 1, ReportKind::EventEnd)).unwrap();
        log.append(&report(2, 1, ReportKind::Report)).unwrap();

        let count = std::fs::read_dir(dir.path().join("report")).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn pick_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = PickLog::new(dir.path()).unwrap();
        let pick = Pick {
            station_id: "S1".into(),
            phase: crate::types::Phase::P,
            pick_time: 100.25,
            weight: 1.0,
            amplitude_proxy: 2.5,
        };
        log.append(&pick).unwrap();
        log.append(&pick).unwrap();

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let content =
            std::fs::read_to_string(dir.path().join("pick").join(format!("{day}.log"))).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("S1 P 100.250"));
    }
}
