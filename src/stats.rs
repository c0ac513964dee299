//! Size and throughput aggregation across a verification run.
//!
//! [`StatsAggregator`] keeps one bucket per tolerance parameter plus global
//! file and pixel totals. Everything is additive, and per-trial samples are
//! sorted before summarizing, so the final [`AggregateReport`] does not depend
//! on the order in which trials were recorded.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Descriptive statistics for a set of measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of values.
    pub count: usize,
    /// Mean value.
    pub mean: f64,
    /// Median value.
    pub median: f64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// 5th percentile.
    pub p5: f64,
    /// 95th percentile.
    pub p95: f64,
}

impl Summary {
    /// Compute summary statistics for a slice of values.
    ///
    /// Returns `None` if the slice is empty.
    #[must_use]
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let count = sorted.len();
        let mean = sorted.iter().sum::<f64>() / count as f64;

        Some(Self {
            count,
            mean,
            median: percentile_sorted(&sorted, 0.5),
            min: sorted[0],
            max: sorted[count - 1],
            p5: percentile_sorted(&sorted, 0.05),
            p95: percentile_sorted(&sorted, 0.95),
        })
    }
}

/// Percentile (0.0-1.0) of pre-sorted values, R-7 interpolation.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let idx = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let frac = idx - lower as f64;

    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Sizes and timings of one successful trial.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrialSize {
    /// Encoded artifact size in bytes.
    pub artifact_bytes: u64,
    /// Pixels in the canonical raster.
    pub pixels: u64,
    /// Uncompressed sample bytes of the canonical raster.
    pub raw_bytes: u64,
    /// Wall time of the encode call.
    pub encode_time: Duration,
    /// Wall time of the decode call, if one was made.
    pub decode_time: Option<Duration>,
}

/// Running totals for one tolerance parameter.
#[derive(Debug, Clone, Default)]
struct Bucket {
    trials: usize,
    artifact_bytes: u64,
    pixels: u64,
    raw_bytes: u64,
    encode_time: Duration,
    decode_time: Duration,
    decoded_pixels: u64,
    bpp_samples: Vec<f64>,
}

/// Accumulates artifact sizes per tolerance parameter.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    nears: Vec<u32>,
    buckets: Vec<Bucket>,
    files: usize,
    pixels: u64,
    raw_bytes: u64,
    started: Instant,
}

impl StatsAggregator {
    /// Create an aggregator for the ordered tolerance list `nears`.
    #[must_use]
    pub fn new(nears: &[u32]) -> Self {
        Self {
            nears: nears.to_vec(),
            buckets: vec![Bucket::default(); nears.len()],
            files: 0,
            pixels: 0,
            raw_bytes: 0,
            started: Instant::now(),
        }
    }

    /// Count one canonicalized corpus file.
    pub fn record_pixels(&mut self, pixels: u64, raw_bytes: u64) {
        self.files += 1;
        self.pixels += pixels;
        self.raw_bytes += raw_bytes;
    }

    /// Add a successful trial for the tolerance at `tolerance_index`.
    ///
    /// # Panics
    ///
    /// Panics if `tolerance_index` is out of range.
    pub fn record(&mut self, tolerance_index: usize, size: &TrialSize) {
        let bucket = &mut self.buckets[tolerance_index];
        bucket.trials += 1;
        bucket.artifact_bytes += size.artifact_bytes;
        bucket.pixels += size.pixels;
        bucket.raw_bytes += size.raw_bytes;
        bucket.encode_time += size.encode_time;
        if let Some(decode) = size.decode_time {
            bucket.decode_time += decode;
            bucket.decoded_pixels += size.pixels;
        }
        if size.pixels > 0 {
            bucket
                .bpp_samples
                .push(bits_per_pixel(size.artifact_bytes, size.pixels));
        }
    }

    /// Number of files recorded so far.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Derive per-tolerance metrics.
    #[must_use]
    pub fn finalize(&self) -> AggregateReport {
        let per_tolerance = self
            .nears
            .iter()
            .zip(&self.buckets)
            .map(|(&near, b)| ToleranceStats {
                near,
                trials: b.trials,
                artifact_bytes: b.artifact_bytes,
                pixels: b.pixels,
                raw_bytes: b.raw_bytes,
                bits_per_pixel: (b.pixels > 0).then(|| bits_per_pixel(b.artifact_bytes, b.pixels)),
                compression_ratio: (b.artifact_bytes > 0)
                    .then(|| b.raw_bytes as f64 / b.artifact_bytes as f64),
                encode_time: b.encode_time,
                decode_time: b.decode_time,
                encode_mpx_per_sec: megapixels_per_sec(b.pixels, b.encode_time),
                decode_mpx_per_sec: megapixels_per_sec(b.decoded_pixels, b.decode_time),
                bpp_summary: Summary::compute(&b.bpp_samples),
            })
            .collect();

        AggregateReport {
            files: self.files,
            pixels: self.pixels,
            raw_bytes: self.raw_bytes,
            per_tolerance,
            elapsed: self.started.elapsed(),
        }
    }
}

fn bits_per_pixel(bytes: u64, pixels: u64) -> f64 {
    (bytes * 8) as f64 / pixels as f64
}

fn megapixels_per_sec(pixels: u64, time: Duration) -> Option<f64> {
    let secs = time.as_secs_f64();
    (pixels > 0 && secs > 0.0).then(|| pixels as f64 / 1_000_000.0 / secs)
}

/// Final metrics for one tolerance parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToleranceStats {
    /// Tolerance parameter.
    pub near: u32,
    /// Successful trials counted.
    pub trials: usize,
    /// Sum of artifact sizes.
    pub artifact_bytes: u64,
    /// Sum of pixels over counted trials.
    pub pixels: u64,
    /// Sum of uncompressed sample bytes over counted trials.
    pub raw_bytes: u64,
    /// `8 * artifact_bytes / pixels`.
    pub bits_per_pixel: Option<f64>,
    /// `raw_bytes / artifact_bytes`.
    pub compression_ratio: Option<f64>,
    /// Total encoder wall time.
    #[serde(with = "duration_millis")]
    pub encode_time: Duration,
    /// Total decoder wall time; zero when only sizes were measured.
    #[serde(with = "duration_millis")]
    pub decode_time: Duration,
    /// Encoded megapixels per second of encoder time.
    pub encode_mpx_per_sec: Option<f64>,
    /// Decoded megapixels per second of decoder time.
    pub decode_mpx_per_sec: Option<f64>,
    /// Distribution of per-file bits per pixel.
    pub bpp_summary: Option<Summary>,
}

/// Aggregate statistics at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Files successfully canonicalized.
    pub files: usize,
    /// Pixels over those files.
    pub pixels: u64,
    /// Uncompressed sample bytes over those files.
    pub raw_bytes: u64,
    /// One entry per tolerance parameter, in configured order.
    pub per_tolerance: Vec<ToleranceStats>,
    /// Wall time of the run.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(artifact_bytes: u64, pixels: u64) -> TrialSize {
        TrialSize {
            artifact_bytes,
            pixels,
            raw_bytes: pixels,
            encode_time: Duration::from_millis(2),
            decode_time: Some(Duration::from_millis(1)),
        }
    }

    #[test]
    fn test_three_files_three_tolerances() {
        let nears = [0, 1, 2];
        let mut stats = StatsAggregator::new(&nears);
        let files = [(100u64, [50u64, 40, 30]), (200, [80, 60, 50]), (300, [90, 70, 60])];

        for (pixels, sizes) in files {
            stats.record_pixels(pixels, pixels);
            for (i, bytes) in sizes.into_iter().enumerate() {
                stats.record(i, &size(bytes, pixels));
            }
        }

        let report = stats.finalize();
        assert_eq!(report.files, 3);
        assert_eq!(report.pixels, 600);
        assert_eq!(report.per_tolerance.len(), 3);

        let near0 = &report.per_tolerance[0];
        assert_eq!(near0.near, 0);
        assert_eq!(near0.artifact_bytes, 220);
        assert!((near0.bits_per_pixel.unwrap() - 8.0 * 220.0 / 600.0).abs() < 1e-12);
        assert!((near0.compression_ratio.unwrap() - 600.0 / 220.0).abs() < 1e-12);

        let near2 = &report.per_tolerance[2];
        assert_eq!(near2.artifact_bytes, 140);
        assert!((near2.compression_ratio.unwrap() - 600.0 / 140.0).abs() < 1e-12);
        assert_eq!(near2.bpp_summary.as_ref().unwrap().count, 3);
    }

    #[test]
    fn test_finalize_is_order_invariant() {
        let nears = [0, 3];
        let records = [(0, 120, 400), (1, 60, 400), (0, 10, 64), (1, 7, 64), (0, 99, 256)];

        let mut forward = StatsAggregator::new(&nears);
        for &(i, bytes, px) in &records {
            forward.record(i, &size(bytes, px));
        }
        let mut backward = StatsAggregator::new(&nears);
        for &(i, bytes, px) in records.iter().rev() {
            backward.record(i, &size(bytes, px));
        }

        assert_eq!(forward.finalize().per_tolerance, backward.finalize().per_tolerance);
    }

    #[test]
    fn test_bucket_isolation() {
        let mut stats = StatsAggregator::new(&[0, 1]);
        stats.record(1, &size(500, 100));

        let report = stats.finalize();
        assert_eq!(report.per_tolerance[0].trials, 0);
        assert_eq!(report.per_tolerance[0].artifact_bytes, 0);
        assert_eq!(report.per_tolerance[0].bits_per_pixel, None);
        assert_eq!(report.per_tolerance[0].compression_ratio, None);
        assert_eq!(report.per_tolerance[1].artifact_bytes, 500);
    }

    #[test]
    fn test_summary_percentiles() {
        let summary = Summary::compute(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_eq!(summary.count, 5);
        assert!((summary.median - 3.0).abs() < 1e-12);
        assert!((summary.min - 1.0).abs() < 1e-12);
        assert!((summary.max - 5.0).abs() < 1e-12);
        assert!(Summary::compute(&[]).is_none());
    }

    #[test]
    fn test_measure_only_trials_skip_decode_throughput() {
        let mut stats = StatsAggregator::new(&[0]);
        stats.record(
            0,
            &TrialSize {
                decode_time: None,
                ..size(10, 100)
            },
        );
        let report = stats.finalize();
        assert_eq!(report.per_tolerance[0].decode_mpx_per_sec, None);
        assert!(report.per_tolerance[0].encode_mpx_per_sec.is_some());
    }
}
