//! # codec-verify
//!
//! Round-trip verification and benchmarking for near-lossless image codecs
//! that run as external processes.
//!
//! Every image in a corpus directory is converted to a canonical 8-bit raster,
//! encoded and decoded by the codec for each tolerance parameter ("near"), and
//! checked pixel by pixel: no reconstructed sample may differ from the
//! original by more than the bound for that `near`. Artifact sizes are
//! aggregated into bits-per-pixel and compression-ratio figures per `near`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codec_verify::{BatchConfig, BatchRunner, CodecConfig, FailurePolicy};
//!
//! let config = BatchConfig::builder()
//!     .codec(CodecConfig::new("./JLSx"))
//!     .nears(vec![0, 1, 2])
//!     .failure_policy(FailurePolicy::Continue)
//!     .build()?;
//!
//! let runner = BatchRunner::new(config);
//! runner.probe()?;
//! let report = runner.run(std::path::Path::new("./images"))?;
//!
//! for t in &report.aggregate.per_tolerance {
//!     println!("near={} bpp={:?}", t.near, t.bits_per_pixel);
//! }
//! # Ok::<(), codec_verify::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`raster`]: Canonical rasters and PGM/PPM interchange
//! - [`codec`]: External codec invocation protocols
//! - [`fidelity`]: Maximum absolute error and tolerance checks
//! - [`stats`]: Size and throughput aggregation
//! - [`runner`]: Corpus traversal and failure policy
//! - [`report`]: Trial results and JSON/CSV output
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod fidelity;
pub mod raster;
pub mod report;
pub mod runner;
pub mod stats;

// Re-export commonly used types
pub use codec::{CodecConfig, CodecInvoker, Invocation, Protocol};
pub use error::{Error, FailureKind, Result};
pub use fidelity::ToleranceBound;
pub use raster::{CanonicalImage, ChannelMode, ChannelPolicy, RasterShape};
pub use report::{BatchReport, TrialOutcome, TrialResult};
pub use runner::{BatchConfig, BatchRunner, FailurePolicy};
pub use stats::{AggregateReport, StatsAggregator, Summary, ToleranceStats};
