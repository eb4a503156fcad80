//! Scatter-gather collection across sections and the resulting manifest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::RainError;
use crate::host::{HostSnapshot, ProbeCtx};
use crate::probe::ProbeResult;
use crate::sections::{collect_section, degraded_record, resolve_sections, SectionId, SectionRecord};

/// One full collection pass over the requested sections.
#[derive(Debug, Clone)]
pub struct CollectionManifest {
    timestamp: DateTime<Utc>,
    requested: Vec<SectionId>,
    sections: Vec<SectionRecord>,
}

impl CollectionManifest {
    pub fn new(
        timestamp: DateTime<Utc>,
        requested: Vec<SectionId>,
        sections: Vec<SectionRecord>,
    ) -> Self {
        Self {
            timestamp,
            requested,
            sections,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn requested_sections(&self) -> &[SectionId] {
        &self.requested
    }

    /// Records in request order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionRecord> {
        self.sections.iter()
    }

    pub fn get(&self, id: SectionId) -> Option<&SectionRecord> {
        self.sections.iter().find(|record| record.section() == id)
    }

    pub fn ok_fact_count(&self) -> usize {
        self.sections.iter().map(SectionRecord::ok_count).sum()
    }

    pub fn degraded_fact_count(&self) -> usize {
        self.sections
            .iter()
            .map(|record| record.degraded_facts().len())
            .sum()
    }

    /// Export shape: degraded facts appear as `null` under `sections` and
    /// their reasons under `degraded`; `degraded` is omitted when clean.
    pub fn to_json(&self) -> Value {
        let mut sections = Map::new();
        let mut degraded = Map::new();
        for record in &self.sections {
            let mut facts = Map::new();
            let mut reasons = Map::new();
            for (fact_id, result) in record.facts() {
                match result {
                    ProbeResult::Ok(value) => {
                        facts.insert(fact_id.to_string(), value.clone());
                    }
                    ProbeResult::Degraded { error } => {
                        facts.insert(fact_id.to_string(), Value::Null);
                        reasons.insert(fact_id.to_string(), json!(error.to_string()));
                    }
                }
            }
            sections.insert(record.section().to_string(), Value::Object(facts));
            if !reasons.is_empty() {
                degraded.insert(record.section().to_string(), Value::Object(reasons));
            }
        }
        let mut manifest = Map::new();
        manifest.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        manifest.insert("sections".into(), Value::Object(sections));
        if !degraded.is_empty() {
            manifest.insert("degraded".into(), Value::Object(degraded));
        }
        Value::Object(manifest)
    }
}

/// Drives one collection pass: validate ids, snapshot the host once, run
/// every requested section concurrently under its time budget.
pub struct CollectionAggregator {
    config: Arc<Config>,
}

impl CollectionAggregator {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Collect the named sections (the `all` sentinel expands).
    ///
    /// Unknown names fail with `Configuration` before any probe runs. A
    /// section that overruns its budget or panics contributes an
    /// all-degraded record; the pass itself only fails when not a single
    /// fact was collected.
    pub async fn collect(
        &self,
        names: &[String],
        cache: Option<Arc<TtlCache>>,
    ) -> Result<CollectionManifest, RainError> {
        let requested = resolve_sections(names)?;
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.collector.section_timeout_secs);

        let host = HostSnapshot::capture().await;
        let ctx = ProbeCtx::new(Arc::clone(&self.config), host);

        let handles: Vec<_> = requested
            .iter()
            .map(|&id| {
                let ctx = ctx.clone();
                let cache = cache.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(budget, collect_section(id, ctx, cache)).await
                });
                (id, handle)
            })
            .collect();

        let mut sections = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let record = match handle.await {
                Ok(Ok(record)) => record,
                Ok(Err(_)) => {
                    warn!(section = %id, budget_secs = budget.as_secs(), "section timed out");
                    let reason = RainError::Timeout(format!(
                        "section {id} did not finish within {}s",
                        budget.as_secs()
                    ));
                    degraded_record(id, &ctx, &reason, budget)
                }
                Err(join_err) => {
                    warn!(section = %id, error = %join_err, "section task failed");
                    let reason =
                        RainError::Unavailable(format!("section {id} collection failed"));
                    degraded_record(id, &ctx, &reason, started.elapsed())
                }
            };
            sections.push(record);
        }

        let manifest = CollectionManifest {
            timestamp: Utc::now(),
            requested,
            sections,
        };
        debug!(
            sections = manifest.sections.len(),
            ok_facts = manifest.ok_fact_count(),
            degraded_facts = manifest.degraded_fact_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection pass finished"
        );

        if manifest.ok_fact_count() == 0 {
            return Err(RainError::Unavailable(
                "no requested section produced any data".into(),
            ));
        }
        Ok(manifest)
    }
}
