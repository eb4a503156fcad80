//! The probe abstraction: one fact, an ordered chain of sources, one result.
//!
//! Sources are lazily evaluated futures, so declaring a chain costs nothing
//! until the orchestrator polls it. The first source to produce a usable
//! value wins; when every source fails the probe degrades with the last
//! (most specific) failure instead of raising.

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::Value;
use tracing::debug;

use crate::error::RainError;

type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RainError>> + Send + 'a>>;

/// A single data source for a fact, tried in declaration order.
pub struct Source<'a> {
    name: &'static str,
    fetch: SourceFuture<'a>,
}

impl<'a> Source<'a> {
    pub fn new<F>(name: &'static str, fetch: F) -> Self
    where
        F: Future<Output = Result<Value, RainError>> + Send + 'a,
    {
        Self {
            name,
            fetch: Box::pin(fetch),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// One fact-gathering operation with ordered fallback sources.
pub struct Probe<'a> {
    fact_id: &'static str,
    required: bool,
    cacheable: bool,
    sources: Vec<Source<'a>>,
}

impl<'a> Probe<'a> {
    pub fn new(fact_id: &'static str, sources: Vec<Source<'a>>) -> Self {
        Self {
            fact_id,
            required: false,
            cacheable: false,
            sources,
        }
    }

    /// A degraded required probe marks its whole section as failed.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Allow a TTL cache, when one is supplied, to satisfy this probe.
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    pub fn fact_id(&self) -> &'static str {
        self.fact_id
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Outcome of running one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    /// A source produced a usable value.
    Ok(Value),
    /// Every source failed; carries the last failure.
    Degraded { error: RainError },
}

impl ProbeResult {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ProbeResult::Degraded { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ProbeResult::Ok(value) => Some(value),
            ProbeResult::Degraded { .. } => None,
        }
    }

    pub fn degraded_reason(&self) -> Option<&RainError> {
        match self {
            ProbeResult::Ok(_) => None,
            ProbeResult::Degraded { error } => Some(error),
        }
    }
}

/// A null or blank value never counts as a success; sources with stronger
/// expectations (non-empty lists, parseable tables) enforce them themselves.
fn is_usable(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Try each source in order and settle the probe.
///
/// Never returns an error: exhausting the chain yields `Degraded` with the
/// final source's failure. Every attempt is logged at debug level, which is
/// the execution trace `--verbose` surfaces.
pub async fn run_probe(probe: Probe<'_>) -> ProbeResult {
    let Probe {
        fact_id, sources, ..
    } = probe;

    let mut last_error: Option<RainError> = None;
    for source in sources {
        let name = source.name;
        let started = Instant::now();
        match source.fetch.await {
            Ok(value) if is_usable(&value) => {
                debug!(
                    fact = fact_id,
                    source = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "source succeeded"
                );
                return ProbeResult::Ok(value);
            }
            Ok(_) => {
                debug!(fact = fact_id, source = name, "source returned no data");
                last_error = Some(RainError::Unavailable(format!("{name} returned no data")));
            }
            Err(err) => {
                debug!(
                    fact = fact_id,
                    source = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "source failed"
                );
                last_error = Some(err);
            }
        }
    }

    let error = last_error
        .unwrap_or_else(|| RainError::Unavailable(format!("{fact_id} declares no sources")));
    ProbeResult::Degraded { error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn first_valid_source_wins() {
        let probe = Probe::new(
            "cpu.brand",
            vec![
                Source::new("primary", async { Ok(json!("Ryzen 7")) }),
                Source::new("fallback", async { Ok(json!("should not be used")) }),
            ],
        );
        assert_eq!(run_probe(probe).await, ProbeResult::Ok(json!("Ryzen 7")));
    }

    #[tokio::test]
    async fn later_sources_are_never_polled_after_a_success() {
        let touched = AtomicBool::new(false);
        let probe = Probe::new(
            "hostname",
            vec![
                Source::new("primary", async { Ok(json!("raincloud")) }),
                Source::new("fallback", async {
                    touched.store(true, Ordering::SeqCst);
                    Ok(json!("wrong"))
                }),
            ],
        );
        let result = run_probe(probe).await;
        assert_eq!(result, ProbeResult::Ok(json!("raincloud")));
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn fallback_runs_when_primary_fails() {
        let probe = Probe::new(
            "memory",
            vec![
                Source::new("primary", async {
                    Err(RainError::Unavailable("broken".into()))
                }),
                Source::new("fallback", async { Ok(json!({"total_bytes": 1024})) }),
            ],
        );
        assert_eq!(
            run_probe(probe).await,
            ProbeResult::Ok(json!({"total_bytes": 1024}))
        );
    }

    #[tokio::test]
    async fn exhausted_chain_degrades_with_last_error() {
        let probe = Probe::new(
            "gpu",
            vec![
                Source::new("nvidia-smi", async {
                    Err(RainError::Unavailable("driver mismatch".into()))
                }),
                Source::new("rocm-smi", async {
                    Err(RainError::DependencyMissing("rocm-smi is not installed".into()))
                }),
            ],
        );
        let result = run_probe(probe).await;
        let reason = result.degraded_reason().cloned();
        assert_eq!(
            reason.map(|e| e.kind()),
            Some(ErrorKind::DependencyMissing)
        );
    }

    #[tokio::test]
    async fn blank_values_count_as_failures() {
        let probe = Probe::new(
            "public_ip",
            vec![
                Source::new("empty", async { Ok(json!("   ")) }),
                Source::new("null", async { Ok(Value::Null) }),
            ],
        );
        let result = run_probe(probe).await;
        assert!(result.is_degraded());
        assert_eq!(
            result.degraded_reason().map(RainError::kind),
            Some(ErrorKind::Unavailable)
        );
    }

    #[tokio::test]
    async fn empty_collections_are_valid_values() {
        // "No GPUs" from a working tool is an answer, not a failure.
        let probe = Probe::new("gpu", vec![Source::new("lspci", async { Ok(json!([])) })]);
        assert_eq!(run_probe(probe).await, ProbeResult::Ok(json!([])));
    }

    #[tokio::test]
    async fn probe_without_sources_degrades() {
        let probe = Probe::new("nothing", Vec::new());
        assert!(run_probe(probe).await.is_degraded());
    }

    #[test]
    fn builder_flags_stick() {
        let probe = Probe::new("os", Vec::new()).required().cacheable();
        assert!(probe.is_required());
        assert!(probe.is_cacheable());
        assert_eq!(probe.fact_id(), "os");
    }
}
