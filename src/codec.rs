//! External codec invocation.
//!
//! The codec is a black-box executable. [`CodecInvoker`] builds the argument
//! vector for the configured [`Protocol`], runs the process to completion and
//! turns the exit status into a [`Result`]. A zero exit status is the only
//! success signal; nothing here inspects the produced file beyond checking
//! that it exists.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fidelity;
use crate::raster::{self, ChannelMode};

/// Argument layout understood by the codec executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// `codec <in> <out> <near>` to encode, `codec <in> <out>` to decode.
    ///
    /// The codec infers the direction from the input file suffix.
    Positional,
    /// `codec -c -t -e<effort> -n<near> <in> <out>` to encode,
    /// `codec -d -t -e0 -n0 <in> <out>` to decode.
    Flags {
        /// Encoder effort (0 = fastest).
        effort: u32,
    },
}

impl Protocol {
    /// Arguments for an encode call.
    #[must_use]
    pub fn encode_args(&self, raster: &Path, artifact: &Path, near: u32) -> Vec<OsString> {
        match self {
            Self::Positional => vec![
                raster.into(),
                artifact.into(),
                near.to_string().into(),
            ],
            Self::Flags { effort } => vec![
                "-c".into(),
                "-t".into(),
                format!("-e{effort}").into(),
                format!("-n{near}").into(),
                raster.into(),
                artifact.into(),
            ],
        }
    }

    /// Arguments for a decode call.
    #[must_use]
    pub fn decode_args(&self, artifact: &Path, raster: &Path) -> Vec<OsString> {
        match self {
            Self::Positional => vec![artifact.into(), raster.into()],
            Self::Flags { .. } => vec![
                "-d".into(),
                "-t".into(),
                "-e0".into(),
                "-n0".into(),
                artifact.into(),
                raster.into(),
            ],
        }
    }
}

/// Where and how to run the codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Codec executable.
    pub program: PathBuf,
    /// Invocation protocol.
    pub protocol: Protocol,
    /// Extension given to encoded artifacts (without the dot).
    pub artifact_extension: String,
    /// Kill the process if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl CodecConfig {
    /// Positional protocol, `jlsx` artifacts, no timeout.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            protocol: Protocol::Positional,
            artifact_extension: "jlsx".to_string(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_artifact_extension(mut self, ext: &str) -> Self {
        self.artifact_extension = ext.trim_start_matches('.').to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one finished codec process.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    /// Whether the watchdog killed the process.
    pub timed_out: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall time from spawn to exit.
    pub elapsed: Duration,
}

impl Invocation {
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// Human-readable exit status.
    #[must_use]
    pub fn status_description(&self) -> String {
        if self.timed_out {
            format!("killed after {:.1}s timeout", self.elapsed.as_secs_f64())
        } else {
            match self.code {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            }
        }
    }

    /// Diagnostic text for error reports; stderr, or stdout if stderr is empty.
    fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

/// Runs encode and decode calls against one codec executable.
#[derive(Debug, Clone)]
pub struct CodecInvoker {
    config: CodecConfig,
}

impl CodecInvoker {
    #[must_use]
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// File name for an artifact with the given stem.
    #[must_use]
    pub fn artifact_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.config.artifact_extension)
    }

    /// Encode `raster` into `artifact` with distortion bound `near`.
    pub fn encode(&self, raster: &Path, artifact: &Path, near: u32) -> Result<Invocation> {
        let args = self.config.protocol.encode_args(raster, artifact, near);
        let inv = self.run(&args)?;

        if !inv.success() {
            return Err(Error::EncodeFailed {
                near,
                status: inv.status_description(),
                stderr: inv.diagnostics(),
            });
        }
        if !artifact.is_file() {
            return Err(Error::EncodeFailed {
                near,
                status: inv.status_description(),
                stderr: format!("no artifact written to {}", artifact.display()),
            });
        }
        Ok(inv)
    }

    /// Decode `artifact` into `raster`.
    pub fn decode(&self, artifact: &Path, raster: &Path) -> Result<Invocation> {
        let args = self.config.protocol.decode_args(artifact, raster);
        let inv = self.run(&args)?;

        if !inv.success() {
            return Err(Error::DecodeFailed {
                status: inv.status_description(),
                stderr: inv.diagnostics(),
            });
        }
        if !raster.is_file() {
            return Err(Error::DecodeFailed {
                status: inv.status_description(),
                stderr: format!("no raster written to {}", raster.display()),
            });
        }
        Ok(inv)
    }

    /// Check once that the codec honors the configured protocol.
    ///
    /// Runs a lossless round trip of a small synthetic gray raster inside
    /// `scratch` and requires an exact reconstruction.
    pub fn validate_protocol(&self, scratch: &Path) -> Result<()> {
        let original = raster::synthetic_gradient(16, 16);
        let source = scratch.join(format!("probe.{}", ChannelMode::Gray.extension()));
        let artifact = scratch.join(self.artifact_name("probe"));
        let decoded = scratch.join(format!("probe-out.{}", ChannelMode::Gray.extension()));

        original.save(&source)?;
        self.encode(&source, &artifact, 0)
            .map_err(|e| Error::Protocol(format!("{}: {e}", self.config.program.display())))?;
        self.decode(&artifact, &decoded)
            .map_err(|e| Error::Protocol(format!("{}: {e}", self.config.program.display())))?;

        let reconstructed =
            raster::load_raster(&decoded).map_err(|e| Error::Protocol(e.to_string()))?;
        let max_error = fidelity::max_abs_error(&original, &reconstructed)
            .map_err(|e| Error::Protocol(format!("probe round trip: {e}")))?;
        if max_error != 0 {
            return Err(Error::Protocol(format!(
                "lossless probe came back with max_abs_err={max_error}"
            )));
        }

        tracing::debug!(program = %self.config.program.display(), "protocol probe passed");
        Ok(())
    }

    fn run(&self, args: &[OsString]) -> Result<Invocation> {
        tracing::debug!(
            program = %self.config.program.display(),
            args = ?args,
            "invoking codec"
        );

        let start = Instant::now();
        let child = Command::new(&self.config.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        let inv = match self.config.timeout {
            None => {
                let output = child.wait_with_output()?;
                finished(output.status, &output.stdout, &output.stderr, start.elapsed(), false)
            }
            Some(limit) => wait_with_deadline(child, start, limit)?,
        };

        tracing::debug!(
            status = %inv.status_description(),
            elapsed_ms = inv.elapsed.as_millis() as u64,
            "codec exited"
        );
        Ok(inv)
    }
}

fn finished(
    status: ExitStatus,
    stdout: &[u8],
    stderr: &[u8],
    elapsed: Duration,
    timed_out: bool,
) -> Invocation {
    Invocation {
        code: status.code(),
        timed_out,
        stdout: String::from_utf8_lossy(stdout).into_owned(),
        stderr: String::from_utf8_lossy(stderr).into_owned(),
        elapsed,
    }
}

/// How long to wait for pipe output after the child is gone.
const PIPE_GRACE: Duration = Duration::from_millis(100);

/// Poll the child until it exits or `limit` passes, then kill it.
///
/// Pipes are drained on helper threads so a chatty codec cannot block on a
/// full pipe while we wait. Processes the codec spawned may keep the pipes
/// open after it dies, so output collection is bounded too.
fn wait_with_deadline(mut child: Child, start: Instant, limit: Duration) -> Result<Invocation> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }
        if start.elapsed() >= limit {
            // The process may exit between try_wait and kill.
            let _ = child.kill();
            timed_out = true;
            break child.wait()?;
        }
        thread::sleep(Duration::from_millis(5));
    };
    let elapsed = start.elapsed();

    let grace = if timed_out {
        PIPE_GRACE
    } else {
        limit.saturating_sub(elapsed).max(PIPE_GRACE)
    };
    let deadline = Instant::now() + grace;
    let collect = |pipe: Option<Receiver<Vec<u8>>>| {
        let wait = deadline.saturating_duration_since(Instant::now());
        pipe.and_then(|rx| rx.recv_timeout(wait).ok()).unwrap_or_default()
    };
    let out = collect(stdout);
    let err = collect(stderr);
    Ok(finished(status, &out, &err, elapsed, timed_out))
}

/// Read `pipe` to the end on a detached thread; the buffer arrives on the
/// returned channel once the write side is closed.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}
