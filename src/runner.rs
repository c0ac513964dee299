//! Corpus traversal: canonicalize, encode, decode, check, record.
//!
//! [`BatchRunner`] walks the input directory one file at a time. Each file
//! gets a fresh scratch directory holding its canonical raster, the codec
//! artifact and the reconstruction; the directory is removed when the file is
//! done, whether it passed, was skipped, or aborted the run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::codec::{CodecConfig, CodecInvoker, Protocol};
use crate::error::{Error, Result};
use crate::fidelity::{self, ToleranceBound};
use crate::raster::{self, CanonicalImage, ChannelPolicy};
use crate::report::{BatchReport, SkippedFile, TrialOutcome, TrialResult};
use crate::stats::{StatsAggregator, TrialSize};

/// What to do when a trial fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failing (file, near) pair and move on.
    Continue,
    /// Stop the run at the first failure.
    #[default]
    Abort,
}

/// Configuration for a verification run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Codec executable and protocol.
    pub codec: CodecConfig,

    /// Tolerance parameters, tried in this order for every file.
    pub nears: Vec<u32>,

    /// Decode and check fidelity; when false only artifact sizes are measured.
    pub verify: bool,

    /// Error bound used by the fidelity check.
    pub bound: ToleranceBound,

    /// Failure handling.
    pub failure_policy: FailurePolicy,

    /// Channel mode policy for canonical rasters.
    pub channel_policy: ChannelPolicy,

    /// Parent directory for per-file scratch directories.
    pub temp_root: Option<PathBuf>,
}

impl BatchConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// One-line description for reports.
    #[must_use]
    pub fn summary(&self) -> String {
        let protocol = match self.codec.protocol {
            Protocol::Positional => "positional".to_string(),
            Protocol::Flags { effort } => format!("flags(effort={effort})"),
        };
        let nears: Vec<String> = self.nears.iter().map(|n| n.to_string()).collect();
        format!(
            "codec={} protocol={} near=[{}] check={} bound={:?} policy={:?} channels={:?}",
            self.codec.program.display(),
            protocol,
            nears.join(","),
            self.verify,
            self.bound,
            self.failure_policy,
            self.channel_policy,
        )
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug, Default)]
pub struct BatchConfigBuilder {
    codec: Option<CodecConfig>,
    nears: Option<Vec<u32>>,
    verify: Option<bool>,
    bound: Option<ToleranceBound>,
    failure_policy: Option<FailurePolicy>,
    channel_policy: Option<ChannelPolicy>,
    temp_root: Option<PathBuf>,
}

impl BatchConfigBuilder {
    /// Set the codec to verify.
    #[must_use]
    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Set the tolerance parameters. An empty list means `[0]`.
    #[must_use]
    pub fn nears(mut self, nears: Vec<u32>) -> Self {
        self.nears = Some(nears);
        self
    }

    /// Enable or disable the decode and fidelity check.
    #[must_use]
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = Some(verify);
        self
    }

    #[must_use]
    pub fn bound(mut self, bound: ToleranceBound) -> Self {
        self.bound = Some(bound);
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn channel_policy(mut self, policy: ChannelPolicy) -> Self {
        self.channel_policy = Some(policy);
        self
    }

    /// Place scratch directories under `path` instead of the system temp dir.
    #[must_use]
    pub fn temp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(path.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<BatchConfig> {
        let codec = self
            .codec
            .ok_or_else(|| Error::Config("codec is required".to_string()))?;
        if codec.program.as_os_str().is_empty() {
            return Err(Error::Config("codec path is empty".to_string()));
        }

        let nears = match self.nears {
            Some(nears) if !nears.is_empty() => nears,
            _ => vec![0],
        };

        Ok(BatchConfig {
            codec,
            nears,
            verify: self.verify.unwrap_or(true),
            bound: self.bound.unwrap_or_default(),
            failure_policy: self.failure_policy.unwrap_or_default(),
            channel_policy: self.channel_policy.unwrap_or_default(),
            temp_root: self.temp_root,
        })
    }
}

/// Per-file scratch space. Dropping it deletes every artifact.
struct Workspace {
    dir: TempDir,
    source: PathBuf,
    artifact: PathBuf,
    decoded: PathBuf,
}

impl Workspace {
    fn create(root: Option<&Path>, image: &CanonicalImage, invoker: &CodecInvoker) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codec-verify-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let ext = image.mode().extension();
        let source = dir.path().join(format!("source.{ext}"));
        let artifact = dir.path().join(invoker.artifact_name("artifact"));
        let decoded = dir.path().join(format!("decoded.{ext}"));

        Ok(Self {
            dir,
            source,
            artifact,
            decoded,
        })
    }

    /// Remove outputs of the previous trial so a codec that exits 0 without
    /// writing cannot leave an old artifact to be measured or decoded.
    fn clear_outputs(&self) -> Result<()> {
        for path in [&self.artifact, &self.decoded] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Drives the verification pipeline over a corpus directory.
pub struct BatchRunner {
    config: BatchConfig,
    invoker: CodecInvoker,
}

impl BatchRunner {
    #[must_use]
    pub fn new(config: BatchConfig) -> Self {
        let invoker = CodecInvoker::new(config.codec.clone());
        Self { config, invoker }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Validate the codec's invocation protocol with a lossless round trip.
    pub fn probe(&self) -> Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codec-verify-probe-");
        let dir = match &self.config.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        self.invoker.validate_protocol(dir.path())
    }

    /// Run every tolerance parameter against every file in `input_dir`.
    ///
    /// Under [`FailurePolicy::Abort`] the first failing trial ends the run with
    /// [`Error::Aborted`]. Unsupported inputs are always skipped.
    pub fn run(&self, input_dir: &Path) -> Result<BatchReport> {
        let files = list_corpus(input_dir)?;
        let name = input_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("corpus")
            .to_string();

        tracing::info!(
            corpus = %input_dir.display(),
            files = files.len(),
            config = %self.config.summary(),
            "starting verification"
        );

        let mut stats = StatsAggregator::new(&self.config.nears);
        let mut trials = Vec::with_capacity(files.len() * self.config.nears.len());
        let mut skipped = Vec::new();

        for path in &files {
            let file = file_id(path);

            let image = match raster::canonicalize(path, self.config.channel_policy) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(file = %file, "skip: {e}");
                    skipped.push(SkippedFile {
                        file,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            self.run_file(&file, &image, &mut stats, &mut trials)?;
        }

        let aggregate = stats.finalize();
        tracing::info!(
            files = aggregate.files,
            skipped = skipped.len(),
            trials = trials.len(),
            elapsed_ms = aggregate.elapsed.as_millis() as u64,
            "verification finished"
        );

        Ok(BatchReport {
            name,
            config_summary: self.config.summary(),
            trials,
            skipped,
            aggregate,
            timestamp: chrono::Utc::now(),
        })
    }

    /// All tolerance parameters for one canonicalized file.
    fn run_file(
        &self,
        file: &str,
        image: &CanonicalImage,
        stats: &mut StatsAggregator,
        trials: &mut Vec<TrialResult>,
    ) -> Result<()> {
        let work = Workspace::create(self.config.temp_root.as_deref(), image, &self.invoker)?;
        image.save(&work.source)?;
        stats.record_pixels(image.pixel_count(), image.raw_bytes());

        tracing::debug!(file, shape = %image.shape(), scratch = %work.dir.path().display(), "canonicalized");

        for (index, &near) in self.config.nears.iter().enumerate() {
            let mut trial = TrialResult {
                file: file.to_string(),
                near,
                artifact_bytes: None,
                raw_bytes: image.raw_bytes(),
                pixels: image.pixel_count(),
                max_error: None,
                psnr: None,
                encode_time: None,
                decode_time: None,
                outcome: TrialOutcome::Passed,
            };

            match self.run_trial(&work, image, near, &mut trial) {
                Ok(()) => {
                    stats.record(
                        index,
                        &TrialSize {
                            artifact_bytes: trial.artifact_bytes.unwrap_or(0),
                            pixels: trial.pixels,
                            raw_bytes: trial.raw_bytes,
                            encode_time: trial.encode_time.unwrap_or_default(),
                            decode_time: trial.decode_time,
                        },
                    );
                    log_success(&trial);
                    trials.push(trial);
                }
                Err(e) => {
                    let Some(kind) = e.failure_kind() else {
                        // Spawn and I/O problems are not codec verdicts.
                        return Err(e);
                    };
                    tracing::error!(file, near, "verify failed: {e}");
                    trial.outcome = TrialOutcome::Failed {
                        kind,
                        message: e.to_string(),
                    };
                    trials.push(trial);

                    if self.config.failure_policy == FailurePolicy::Abort {
                        return Err(Error::Aborted {
                            file: file.to_string(),
                            near,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Encode, decode and check one (file, near) pair, filling in `trial`.
    fn run_trial(
        &self,
        work: &Workspace,
        original: &CanonicalImage,
        near: u32,
        trial: &mut TrialResult,
    ) -> Result<()> {
        work.clear_outputs()?;

        let encoded = self.invoker.encode(&work.source, &work.artifact, near)?;
        trial.encode_time = Some(encoded.elapsed);
        trial.artifact_bytes = Some(fs::metadata(&work.artifact)?.len());

        if !self.config.verify {
            trial.outcome = TrialOutcome::Measured;
            return Ok(());
        }

        let decoded = self.invoker.decode(&work.artifact, &work.decoded)?;
        trial.decode_time = Some(decoded.elapsed);

        let reconstructed = raster::load_raster(&work.decoded)?;

        let checked = fidelity::check(original, &reconstructed, near, self.config.bound);
        trial.max_error = match &checked {
            Ok(max_error) | Err(Error::ToleranceExceeded { max_error, .. }) => Some(*max_error),
            Err(_) => None,
        };
        trial.psnr = fidelity::psnr(original, &reconstructed);
        checked.map(|_| ())
    }
}

fn log_success(trial: &TrialResult) {
    let bpp = trial.bits_per_pixel().unwrap_or(0.0);
    let ratio = trial.compression_ratio().unwrap_or(0.0);
    match trial.max_error {
        Some(max_error) => tracing::info!(
            file = %trial.file,
            near = trial.near,
            max_error,
            bpp = format_args!("{bpp:.4}"),
            ratio = format_args!("{ratio:.3}"),
            "verify passed"
        ),
        None => tracing::info!(
            file = %trial.file,
            near = trial.near,
            bpp = format_args!("{bpp:.4}"),
            ratio = format_args!("{ratio:.3}"),
            "measured"
        ),
    }
}

/// Regular files of `dir` in directory listing order.
pub fn list_corpus(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::Corpus(format!("Not a directory: {}", dir.display())));
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Corpus(format!("Failed to read directory {}: {e}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| Error::Corpus(format!("Failed to read entry in {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = BatchConfig::builder()
            .codec(CodecConfig::new("/opt/jlsx/JLSx"))
            .build()
            .unwrap();

        assert_eq!(config.nears, vec![0]);
        assert!(config.verify);
        assert_eq!(config.bound, ToleranceBound::Exact);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.channel_policy, ChannelPolicy::Gray);
        assert!(config.temp_root.is_none());
    }

    #[test]
    fn test_builder_empty_nears_defaults_to_zero() {
        let config = BatchConfig::builder()
            .codec(CodecConfig::new("codec"))
            .nears(Vec::new())
            .build()
            .unwrap();
        assert_eq!(config.nears, vec![0]);
    }

    #[test]
    fn test_builder_requires_codec() {
        let err = BatchConfig::builder().nears(vec![1, 2]).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_summary_mentions_settings() {
        let config = BatchConfig::builder()
            .codec(CodecConfig::new("nblic").with_protocol(Protocol::Flags { effort: 2 }))
            .nears(vec![0, 1, 2])
            .verify(false)
            .bound(ToleranceBound::Relaxed)
            .failure_policy(FailurePolicy::Continue)
            .build()
            .unwrap();

        let summary = config.summary();
        assert!(summary.contains("flags(effort=2)"));
        assert!(summary.contains("near=[0,1,2]"));
        assert!(summary.contains("check=false"));
        assert!(summary.contains("Relaxed"));
        assert!(summary.contains("Continue"));
    }

    #[test]
    fn test_list_corpus_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.png"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"y").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let mut names: Vec<String> = list_corpus(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_id(p))
            .collect();
        names.sort();
        assert_eq!(names, ["a.png", "b.txt"]);
    }

    #[test]
    fn test_list_corpus_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_corpus(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::Corpus(_)));
    }
}
