//! Report types for verification runs.
//!
//! Reports serialize to JSON (full detail) and CSV (one row per trial).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, Result};
use crate::stats::AggregateReport;

/// How a single (file, near) trial ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// Round trip succeeded and the error is within bounds.
    Passed,
    /// Only the encode step ran; sizes were recorded without a fidelity check.
    Measured,
    /// The trial failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Error message.
        message: String,
    },
}

impl TrialOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short code used in CSV output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Measured => "measured",
            Self::Failed { kind, .. } => kind.code(),
        }
    }
}

/// Result of one encode/decode/check trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// File identifier (name within the corpus directory).
    pub file: String,

    /// Tolerance parameter given to the encoder.
    pub near: u32,

    /// Encoded artifact size in bytes, if the encoder produced one.
    pub artifact_bytes: Option<u64>,

    /// Uncompressed sample bytes of the canonical raster.
    pub raw_bytes: u64,

    /// Pixel count of the canonical raster.
    pub pixels: u64,

    /// Largest absolute sample error, if a fidelity check ran.
    pub max_error: Option<u32>,

    /// PSNR in dB; `None` when lossless or unchecked.
    pub psnr: Option<f64>,

    /// Encode wall time.
    #[serde(with = "duration_millis_option")]
    pub encode_time: Option<Duration>,

    /// Decode wall time.
    #[serde(with = "duration_millis_option")]
    pub decode_time: Option<Duration>,

    /// How the trial ended.
    pub outcome: TrialOutcome,
}

impl TrialResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.outcome.is_failure()
    }

    /// Bits per pixel of the artifact.
    #[must_use]
    pub fn bits_per_pixel(&self) -> Option<f64> {
        let bytes = self.artifact_bytes?;
        (self.pixels > 0).then(|| (bytes * 8) as f64 / self.pixels as f64)
    }

    /// Compression ratio (raw size / artifact size).
    #[must_use]
    pub fn compression_ratio(&self) -> Option<f64> {
        match self.artifact_bytes {
            Some(bytes) if bytes > 0 => Some(self.raw_bytes as f64 / bytes as f64),
            _ => None,
        }
    }
}

/// A corpus entry that could not be canonicalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    /// File name within the corpus directory.
    pub file: String,
    /// Why the file could not be loaded.
    pub reason: String,
}

/// Everything a verification run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Corpus directory name.
    pub name: String,

    /// Human-readable summary of the configuration.
    pub config_summary: String,

    /// All trials in execution order.
    pub trials: Vec<TrialResult>,

    /// Files skipped as unsupported input.
    pub skipped: Vec<SkippedFile>,

    /// Aggregate size and throughput statistics.
    pub aggregate: AggregateReport,

    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BatchReport {
    /// Trials that failed.
    pub fn failures(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| t.outcome.is_failure())
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Whether every trial passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failure_count() == 0
    }

    /// Write the full report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write one CSV row per trial.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record([
            "file",
            "near",
            "status",
            "artifact_bytes",
            "raw_bytes",
            "bpp",
            "ratio",
            "max_error",
            "psnr",
            "encode_ms",
            "decode_ms",
        ])?;

        for t in &self.trials {
            wtr.write_record([
                t.file.clone(),
                t.near.to_string(),
                t.outcome.code().to_string(),
                t.artifact_bytes.map_or(String::new(), |b| b.to_string()),
                t.raw_bytes.to_string(),
                t.bits_per_pixel().map_or(String::new(), |v| format!("{:.4}", v)),
                t.compression_ratio().map_or(String::new(), |v| format!("{:.4}", v)),
                t.max_error.map_or(String::new(), |e| e.to_string()),
                t.psnr.map_or(String::new(), |p| format!("{:.2}", p)),
                t.encode_time.map_or(String::new(), |d| d.as_millis().to_string()),
                t.decode_time.map_or(String::new(), |d| d.as_millis().to_string()),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// Write `<name>.json` and `<name>.csv` into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.write_json(&dir.join(format!("{}.json", self.name)))?;
        self.write_csv(&dir.join(format!("{}.csv", self.name)))?;
        Ok(())
    }
}

mod duration_millis_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsAggregator;

    fn trial(near: u32, artifact: Option<u64>, outcome: TrialOutcome) -> TrialResult {
        TrialResult {
            file: "a.png".to_string(),
            near,
            artifact_bytes: artifact,
            raw_bytes: 256,
            pixels: 256,
            max_error: Some(near),
            psnr: None,
            encode_time: Some(Duration::from_millis(4)),
            decode_time: None,
            outcome,
        }
    }

    fn report(trials: Vec<TrialResult>) -> BatchReport {
        BatchReport {
            name: "corpus".to_string(),
            config_summary: String::new(),
            trials,
            skipped: Vec::new(),
            aggregate: StatsAggregator::new(&[0, 1]).finalize(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_trial_metrics() {
        let t = trial(0, Some(64), TrialOutcome::Passed);
        assert!((t.bits_per_pixel().unwrap() - 2.0).abs() < 1e-12);
        assert!((t.compression_ratio().unwrap() - 4.0).abs() < 1e-12);

        let failed = trial(
            1,
            None,
            TrialOutcome::Failed {
                kind: FailureKind::EncodeFailed,
                message: "exit status 2".to_string(),
            },
        );
        assert_eq!(failed.bits_per_pixel(), None);
        assert_eq!(failed.outcome.code(), "encode_failed");
    }

    #[test]
    fn test_failure_count() {
        let r = report(vec![
            trial(0, Some(10), TrialOutcome::Passed),
            trial(
                1,
                Some(10),
                TrialOutcome::Failed {
                    kind: FailureKind::ToleranceExceeded,
                    message: String::new(),
                },
            ),
        ]);
        assert_eq!(r.failure_count(), 1);
        assert!(!r.all_passed());
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let r = report(vec![
            trial(0, Some(10), TrialOutcome::Passed),
            trial(1, Some(8), TrialOutcome::Measured),
        ]);
        r.write_to_dir(dir.path()).unwrap();

        let csv = std::fs::read_to_string(dir.path().join("corpus.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("file,near,status"));
        assert!(lines[2].contains("measured"));

        let json = std::fs::read_to_string(dir.path().join("corpus.json")).unwrap();
        let back: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trials.len(), 2);
        assert_eq!(back.trials[0].outcome, TrialOutcome::Passed);
    }
}
