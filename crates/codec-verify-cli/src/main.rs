//! codec-verify CLI - near-lossless codec round-trip verification

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use codec_verify::{
    BatchConfig, BatchRunner, ChannelPolicy, CodecConfig, FailurePolicy, Protocol, ToleranceBound,
};
use tracing_subscriber::EnvFilter;

mod summary;

/// Verify an external near-lossless image codec over a directory of images.
#[derive(Parser, Debug)]
#[command(name = "codec-verify")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory of images to verify
    input_dir: PathBuf,

    /// Tolerance parameters ("near" values) to test, in order [default: 0]
    nears: Vec<u32>,

    /// Only measure artifact sizes; skip decode and fidelity check
    #[arg(long)]
    no_check: bool,

    /// Codec executable
    #[arg(long, env = "CODEC_VERIFY_CODEC", default_value = "./JLSx")]
    codec: PathBuf,

    /// Invocation protocol of the codec
    #[arg(long, value_enum, default_value_t = ProtocolArg::Positional)]
    protocol: ProtocolArg,

    /// Encoder effort for the flags protocol (0 = fastest)
    #[arg(long, default_value_t = 0)]
    effort: u32,

    /// File extension of encoded artifacts
    #[arg(long, default_value = "jlsx")]
    artifact_ext: String,

    /// Error bound: exact (<= near) or relaxed (<= near + 1)
    #[arg(long, value_enum, default_value_t = BoundArg::Exact)]
    bound: BoundArg,

    /// Log failures and continue instead of aborting on the first one
    #[arg(long)]
    keep_going: bool,

    /// Channel policy for canonical rasters
    #[arg(long, value_enum, default_value_t = ChannelsArg::Gray)]
    channels: ChannelsArg,

    /// Parent directory for scratch files
    #[arg(long, env = "CODEC_VERIFY_TMPDIR")]
    temp_dir: Option<PathBuf>,

    /// Kill a codec process after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Skip the codec protocol self-test
    #[arg(long)]
    skip_probe: bool,

    /// Write JSON and CSV reports into this directory
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    /// `codec <in> <out> [near]`
    Positional,
    /// `codec -c|-d -t -e<effort> -n<near> <in> <out>`
    Flags,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BoundArg {
    Exact,
    Relaxed,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChannelsArg {
    /// Convert everything to grayscale
    Gray,
    /// Keep gray sources gray, convert the rest to RGB
    Auto,
}

impl Cli {
    fn batch_config(&self) -> Result<BatchConfig> {
        let protocol = match self.protocol {
            ProtocolArg::Positional => Protocol::Positional,
            ProtocolArg::Flags => Protocol::Flags {
                effort: self.effort,
            },
        };

        let mut codec = CodecConfig::new(&self.codec)
            .with_protocol(protocol)
            .with_artifact_extension(&self.artifact_ext);
        if let Some(secs) = self.timeout {
            codec = codec.with_timeout(Duration::from_secs(secs));
        }

        let mut builder = BatchConfig::builder()
            .codec(codec)
            .nears(self.nears.clone())
            .verify(!self.no_check)
            .bound(match self.bound {
                BoundArg::Exact => ToleranceBound::Exact,
                BoundArg::Relaxed => ToleranceBound::Relaxed,
            })
            .failure_policy(if self.keep_going {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            })
            .channel_policy(match self.channels {
                ChannelsArg::Gray => ChannelPolicy::Gray,
                ChannelsArg::Auto => ChannelPolicy::Auto,
            });
        if let Some(dir) = &self.temp_dir {
            builder = builder.temp_root(dir);
        }

        builder.build().context("Invalid configuration")
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runner = BatchRunner::new(cli.batch_config()?);

    if !cli.skip_probe {
        runner
            .probe()
            .with_context(|| format!("Codec self-test failed for {}", cli.codec.display()))?;
        tracing::info!(codec = %cli.codec.display(), "codec protocol probe passed");
    }

    let report = runner
        .run(&cli.input_dir)
        .with_context(|| format!("Verification of {} stopped", cli.input_dir.display()))?;

    summary::print(&report);

    if let Some(dir) = &cli.report_dir {
        report
            .write_to_dir(dir)
            .with_context(|| format!("Failed to write reports to {}", dir.display()))?;
        println!("Reports written to: {}", dir.display());
    }

    Ok(())
}
