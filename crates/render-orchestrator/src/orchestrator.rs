//! Job orchestration: submit, wait, collect.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use medley_common::{MedleyError, MedleyResult};
use medley_graph_model::{AssetBundle, AssetUri, MediaKind};
use medley_template_engine::Template;

use crate::client::{Completion, ExecutionRecord, RenderClient};

/// Drives one render job (or a batch of them) through a [`RenderClient`],
/// strictly sequentially: submit, wait, fetch, collect.
pub struct RenderOrchestrator<C: RenderClient> {
    pub(crate) client: C,
}

impl<C: RenderClient> RenderOrchestrator<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Run a fully-bound template to completion and collect its outputs.
    pub fn execute(&mut self, template: &Template) -> MedleyResult<AssetBundle> {
        let job_id = self.client.submit(template.graph())?;
        match self.client.await_completion(&job_id)? {
            Completion::Finished => {}
            Completion::Inconclusive => {
                // The job may still have finished; the history is the
                // source of truth.
                tracing::warn!(%job_id, "Completion wait inconclusive, fetching history anyway");
            }
        }
        let record = self.client.fetch_history(&job_id)?;
        Ok(collect_assets(&record))
    }

    /// Run `cycles` independent jobs from the same template, re-seeding
    /// each cycle. A cycle's failure never rolls back earlier successes;
    /// every outcome is recorded in the report.
    pub fn execute_batch(
        &mut self,
        template: &Template,
        cycles: u32,
        mut seed_for: impl FnMut(u32) -> i64,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for cycle in 0..cycles {
            let seed = seed_for(cycle);
            let mut bound = template.clone();
            bound.bind("seed", seed.into());
            let outcome = self.execute(&bound);
            if let Err(e) = &outcome {
                tracing::warn!(cycle, seed, error = %e, "Batch cycle failed");
            }
            report.cycles.push(CycleReport { seed, outcome });
        }
        report
    }
}

/// Per-cycle accounting of a batch run.
#[derive(Debug)]
pub struct CycleReport {
    pub seed: i64,
    pub outcome: MedleyResult<AssetBundle>,
}

/// Outcome of [`RenderOrchestrator::execute_batch`]. Partial failure is
/// distinguishable from total failure.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub cycles: Vec<CycleReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.cycles.iter().filter(|c| c.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.cycles.len() - self.succeeded()
    }

    pub fn is_total_failure(&self) -> bool {
        !self.cycles.is_empty() && self.succeeded() == 0
    }

    /// Per-kind concatenation of every successful cycle's outputs, in
    /// cycle order.
    pub fn combined_assets(&self) -> AssetBundle {
        let mut outputs: BTreeMap<MediaKind, Vec<AssetUri>> = BTreeMap::new();
        for cycle in &self.cycles {
            if let Ok(bundle) = &cycle.outcome {
                for (kind, uris) in &bundle.output {
                    outputs.entry(*kind).or_default().extend(uris.iter().cloned());
                }
            }
        }
        AssetBundle::from_outputs(outputs)
    }

    /// Message describing a batch where no cycle produced anything.
    pub fn total_failure_error(&self) -> MedleyError {
        MedleyError::upstream(format!(
            "all {} batch cycle(s) failed",
            self.cycles.len()
        ))
    }
}

/// Turn an execution record into addressable output assets, grouped by
/// kind, with a fresh cache token per collection.
pub fn collect_assets(record: &ExecutionRecord) -> AssetBundle {
    let token = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut outputs: BTreeMap<MediaKind, Vec<AssetUri>> = BTreeMap::new();
    for step in record.steps.values() {
        let groups = [
            (MediaKind::Image, &step.images),
            (MediaKind::Video, &step.videos),
            (MediaKind::Audio, &step.audio),
        ];
        for (kind, files) in groups {
            for file in files.iter().filter(|f| f.is_persistent()) {
                outputs
                    .entry(kind)
                    .or_default()
                    .push(AssetUri::output(&file.filename, &file.subfolder, token));
            }
        }
    }
    AssetBundle::from_outputs(outputs)
}
