//! Section registry and the per-section orchestrator.
//!
//! Each section module declares its probe list; dispatch goes through one
//! static table keyed by [`SectionId`] so nothing else in the codebase
//! branches on section names.

pub mod hardware;
pub mod network;
pub mod processes;
pub mod python;
pub mod security;
pub mod sensors;
pub mod system;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::RainError;
use crate::host::ProbeCtx;
use crate::probe::{run_probe, Probe, ProbeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionId {
    System,
    Hardware,
    Network,
    Processes,
    Security,
    Sensors,
    Python,
}

impl SectionId {
    /// Every known section, in registry (and `all`-expansion) order.
    pub const ALL: [SectionId; 7] = [
        SectionId::System,
        SectionId::Hardware,
        SectionId::Network,
        SectionId::Processes,
        SectionId::Security,
        SectionId::Sensors,
        SectionId::Python,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::System => "system",
            SectionId::Hardware => "hardware",
            SectionId::Network => "network",
            SectionId::Processes => "processes",
            SectionId::Security => "security",
            SectionId::Sensors => "sensors",
            SectionId::Python => "python",
        }
    }

    /// Heading used by the terminal renderer.
    pub fn title(&self) -> &'static str {
        match self {
            SectionId::System => "System",
            SectionId::Hardware => "Hardware",
            SectionId::Network => "Network",
            SectionId::Processes => "Processes",
            SectionId::Security => "Security",
            SectionId::Sensors => "Sensors",
            SectionId::Python => "Python Environment",
        }
    }

    /// Parse a user-supplied section name. `all` is handled one level up,
    /// in [`resolve_sections`].
    pub fn parse(name: &str) -> Result<SectionId, RainError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(SectionId::System),
            "hardware" => Ok(SectionId::Hardware),
            "network" => Ok(SectionId::Network),
            "processes" => Ok(SectionId::Processes),
            "security" => Ok(SectionId::Security),
            "sensors" => Ok(SectionId::Sensors),
            "python" => Ok(SectionId::Python),
            other => Err(RainError::Configuration(format!(
                "unknown section {other:?} (expected one of: system, hardware, network, \
                 processes, security, sensors, python, all)"
            ))),
        }
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ProbeBuilder = for<'a> fn(&'a ProbeCtx) -> Vec<Probe<'a>>;

pub struct SectionSpec {
    pub id: SectionId,
    pub build_probes: ProbeBuilder,
}

/// Indexed by `SectionId as usize`; the consistency test below keeps the
/// two in lockstep.
pub static REGISTRY: [SectionSpec; 7] = [
    SectionSpec {
        id: SectionId::System,
        build_probes: system::probes,
    },
    SectionSpec {
        id: SectionId::Hardware,
        build_probes: hardware::probes,
    },
    SectionSpec {
        id: SectionId::Network,
        build_probes: network::probes,
    },
    SectionSpec {
        id: SectionId::Processes,
        build_probes: processes::probes,
    },
    SectionSpec {
        id: SectionId::Security,
        build_probes: security::probes,
    },
    SectionSpec {
        id: SectionId::Sensors,
        build_probes: sensors::probes,
    },
    SectionSpec {
        id: SectionId::Python,
        build_probes: python::probes,
    },
];

pub fn spec_for(id: SectionId) -> &'static SectionSpec {
    &REGISTRY[id as usize]
}

/// Expand `all`, validate every name and drop duplicates.
///
/// Explicit ids keep request order; `all` contributes the registry order.
pub fn resolve_sections(names: &[String]) -> Result<Vec<SectionId>, RainError> {
    let mut resolved: Vec<SectionId> = Vec::new();
    for name in names {
        if name.trim().eq_ignore_ascii_case("all") {
            for id in SectionId::ALL {
                if !resolved.contains(&id) {
                    resolved.push(id);
                }
            }
        } else {
            let id = SectionId::parse(name)?;
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }
    if resolved.is_empty() {
        return Err(RainError::Configuration("no sections requested".into()));
    }
    Ok(resolved)
}

/// Result of collecting one section: every declared fact exactly once, in
/// declaration order.
#[derive(Debug, Clone)]
pub struct SectionRecord {
    section: SectionId,
    facts: Vec<(String, ProbeResult)>,
    failed: bool,
    collection_duration: Duration,
}

impl SectionRecord {
    pub fn new(
        section: SectionId,
        facts: Vec<(String, ProbeResult)>,
        failed: bool,
        collection_duration: Duration,
    ) -> Self {
        Self {
            section,
            facts,
            failed,
            collection_duration,
        }
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    /// Facts in probe declaration order.
    pub fn facts(&self) -> impl Iterator<Item = (&str, &ProbeResult)> {
        self.facts.iter().map(|(id, result)| (id.as_str(), result))
    }

    pub fn get(&self, fact_id: &str) -> Option<&ProbeResult> {
        self.facts
            .iter()
            .find(|(id, _)| id == fact_id)
            .map(|(_, result)| result)
    }

    pub fn fact_ids(&self) -> Vec<&str> {
        self.facts.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn degraded_facts(&self) -> Vec<&str> {
        self.facts
            .iter()
            .filter(|(_, result)| result.is_degraded())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn ok_count(&self) -> usize {
        self.facts.len() - self.degraded_facts().len()
    }

    /// True when a required probe exhausted all of its sources.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn collection_duration(&self) -> Duration {
        self.collection_duration
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Run one section's probes in declaration order.
///
/// Never fails: a required probe that degrades marks the record as failed
/// but the record is still returned in full. The optional cache is consulted
/// only for probes that opted in.
pub async fn collect_section(
    id: SectionId,
    ctx: ProbeCtx,
    cache: Option<Arc<TtlCache>>,
) -> SectionRecord {
    let started = Instant::now();
    let probes = (spec_for(id).build_probes)(&ctx);
    let mut facts = Vec::with_capacity(probes.len());
    let mut failed = false;

    for probe in probes {
        let fact_id = probe.fact_id();
        let required = probe.is_required();
        let cache_key = format!("{id}.{fact_id}");
        let cached = probe
            .is_cacheable()
            .then(|| cache.as_deref().and_then(|cache| cache.get(&cache_key)))
            .flatten();

        let result = match cached {
            Some(value) => {
                debug!(fact = %cache_key, "served from cache");
                ProbeResult::Ok(value)
            }
            None => {
                let cacheable = probe.is_cacheable();
                let result = run_probe(probe).await;
                if cacheable {
                    if let (Some(cache), ProbeResult::Ok(value)) = (cache.as_deref(), &result) {
                        cache.put(&cache_key, value.clone());
                    }
                }
                result
            }
        };

        if required && result.is_degraded() {
            warn!(section = %id, fact = fact_id, "required fact degraded, section marked failed");
            failed = true;
        }
        facts.push((fact_id.to_string(), result));
    }

    let record = SectionRecord::new(id, facts, failed, started.elapsed());
    debug!(
        section = %id,
        facts = record.len(),
        degraded = record.degraded_facts().len(),
        elapsed_ms = record.collection_duration().as_millis() as u64,
        "section collected"
    );
    record
}

/// Record for a section that never got to run (timeout, task failure):
/// every declared fact carries the same degraded reason.
pub fn degraded_record(
    id: SectionId,
    ctx: &ProbeCtx,
    error: &RainError,
    duration: Duration,
) -> SectionRecord {
    let facts = (spec_for(id).build_probes)(ctx)
        .into_iter()
        .map(|probe| {
            (
                probe.fact_id().to_string(),
                ProbeResult::Degraded {
                    error: error.clone(),
                },
            )
        })
        .collect();
    SectionRecord::new(id, facts, true, duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::HostSnapshot;
    use crate::error::ErrorKind;

    async fn test_ctx() -> ProbeCtx {
        let mut config = Config::default();
        // Keep CI runs quick; collection tests tolerate degraded facts.
        config.collector.network_timeout_secs = 1;
        ProbeCtx::new(Arc::new(config), HostSnapshot::capture().await)
    }

    #[test]
    fn registry_is_total_and_in_order() {
        assert_eq!(REGISTRY.len(), SectionId::ALL.len());
        for (index, spec) in REGISTRY.iter().enumerate() {
            assert_eq!(spec.id as usize, index);
            assert_eq!(spec_for(spec.id).id, spec.id);
        }
    }

    #[test]
    fn parse_accepts_known_names_case_insensitively() {
        assert_eq!(SectionId::parse("system").unwrap(), SectionId::System);
        assert_eq!(SectionId::parse("  Python ").unwrap(), SectionId::Python);
        let err = SectionId::parse("bogus_section").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn resolve_expands_all_in_registry_order() {
        let resolved = resolve_sections(&["all".to_string()]).unwrap();
        assert_eq!(resolved, SectionId::ALL.to_vec());
    }

    #[test]
    fn resolve_keeps_request_order_and_dedupes() {
        let names = vec![
            "python".to_string(),
            "system".to_string(),
            "python".to_string(),
        ];
        let resolved = resolve_sections(&names).unwrap();
        assert_eq!(resolved, vec![SectionId::Python, SectionId::System]);

        let mixed = vec!["sensors".to_string(), "all".to_string()];
        let resolved = resolve_sections(&mixed).unwrap();
        assert_eq!(resolved[0], SectionId::Sensors);
        assert_eq!(resolved.len(), SectionId::ALL.len());
    }

    #[test]
    fn resolve_rejects_unknown_and_empty() {
        assert!(resolve_sections(&["gpu".to_string()]).is_err());
        assert!(resolve_sections(&[]).is_err());
    }

    #[tokio::test]
    async fn declared_fact_order_is_stable_per_section() {
        let ctx = test_ctx().await;
        let expected: [(SectionId, &[&str]); 7] = [
            (
                SectionId::System,
                &[
                    "os",
                    "kernel",
                    "architecture",
                    "hostname",
                    "distribution",
                    "uptime",
                    "boot_time",
                    "load_average",
                ],
            ),
            (SectionId::Hardware, &["cpu", "memory", "disks", "gpu"]),
            (
                SectionId::Network,
                &["interfaces", "primary_interface", "public_ip", "dns_servers"],
            ),
            (SectionId::Processes, &["summary", "top"]),
            (
                SectionId::Security,
                &["firewall", "sudo_access", "open_ports", "logged_in_users"],
            ),
            (SectionId::Sensors, &["temperatures", "fans", "battery"]),
            (
                SectionId::Python,
                &["version", "executable", "implementation", "packages"],
            ),
        ];

        for (id, fact_ids) in expected {
            let probes = (spec_for(id).build_probes)(&ctx);
            let declared: Vec<&str> = probes.iter().map(|p| p.fact_id()).collect();
            assert_eq!(declared, fact_ids, "section {id}");
        }
    }

    #[tokio::test]
    async fn record_contains_every_declared_fact_even_when_degraded() {
        let ctx = test_ctx().await;
        let record = collect_section(SectionId::System, ctx.clone(), None).await;
        assert_eq!(record.section(), SectionId::System);
        assert_eq!(record.len(), 8);
        assert_eq!(record.fact_ids()[0], "os");
        // Whatever the environment, no fact may be missing.
        assert!(record.get("load_average").is_some());
    }

    #[tokio::test]
    async fn degraded_record_covers_all_facts_with_one_reason() {
        let ctx = test_ctx().await;
        let error = RainError::Timeout("section hardware exceeded 10s".into());
        let record = degraded_record(SectionId::Hardware, &ctx, &error, Duration::from_secs(10));
        assert!(record.failed());
        assert_eq!(record.len(), 4);
        assert!(record
            .facts()
            .all(|(_, result)| result.degraded_reason().map(RainError::kind)
                == Some(ErrorKind::Timeout)));
    }

    #[tokio::test]
    async fn cacheable_probes_reuse_cached_values() {
        let ctx = test_ctx().await;
        let cache = Arc::new(TtlCache::new(Duration::from_secs(300)));
        cache.put("system.distribution", serde_json::json!({"name": "Testix"}));
        let record = collect_section(SectionId::System, ctx, Some(cache)).await;
        assert_eq!(
            record.get("distribution").and_then(|r| r.value()),
            Some(&serde_json::json!({"name": "Testix"}))
        );
    }
}
