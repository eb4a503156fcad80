//! Rain core - multi-source system fact collection.
//!
//! Facts are gathered by probes with ordered fallback sources, grouped into
//! sections, and merged into one manifest per pass. Failures degrade
//! individual facts instead of aborting the run.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod probe;
pub mod sections;
pub mod util;

pub use aggregate::{CollectionAggregator, CollectionManifest};
pub use cache::TtlCache;
pub use config::Config;
pub use error::{ErrorKind, RainError};
pub use host::{HostSnapshot, ProbeCtx};
pub use probe::{run_probe, Probe, ProbeResult, Source};
pub use sections::{resolve_sections, SectionId, SectionRecord};
