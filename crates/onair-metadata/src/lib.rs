//! Now-playing metadata for the OnAir daemon.
//!
//! Three feeds converge on one [`pipeline::MetadataPipeline`] actor:
//!
//! ```text
//!   mpv icy/id3 tags ──── raw ─────┐
//!   MetadataPoller ────── polled ──┼──► Reconciler ──► artwork ──► NowPlaying
//!   RecordingRefiner ──── refined ─┘        │
//!                            ▲              │
//!                            └── lookup ────┘
//! ```

pub mod artwork;
pub mod error;
pub mod pipeline;
pub mod poller;
pub mod providers;
pub mod reconcile;
pub mod refine;
pub mod report;
pub mod transport;

pub use error::{MetadataError, Result};
pub use pipeline::{MetadataPipeline, PipelineHandle};
pub use poller::{MetadataPoller, PolledMetadata};
pub use providers::{MetadataProvider, ProviderRegistry};
pub use reconcile::{Reconciler, Update};
pub use report::{PlaybackReport, PlaybackReporter};
