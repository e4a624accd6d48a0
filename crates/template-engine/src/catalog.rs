//! Template catalog: named template JSON files on disk.

use serde_json::Value;

use medley_common::{EngineConfig, MedleyError, MedleyResult};

use crate::template::Template;

/// Template id of the dedicated two-image merge job used when a pair of
/// parents feeds a single-input template.
pub const MERGE_TEMPLATE_ID: &str = "ImageMerging";

/// Loads templates from `<templates_dir>/<template_id>.json`.
#[derive(Debug)]
pub struct TemplateCatalog<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> TemplateCatalog<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Load and index a template. Absent file is `NotFound`; malformed
    /// JSON is `Parse`.
    pub fn load(&self, template_id: &str) -> MedleyResult<Template> {
        let path = self.cfg.templates_dir.join(format!("{template_id}.json"));
        if !path.exists() {
            return Err(MedleyError::not_found(format!("template '{template_id}'")));
        }
        let raw = std::fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| MedleyError::parse(format!("template '{template_id}': {e}")))?;
        let graph = value
            .as_object()
            .cloned()
            .ok_or_else(|| {
                MedleyError::parse(format!("template '{template_id}' is not a JSON object"))
            })?;
        Ok(Template::from_graph(template_id, graph))
    }

    /// Ids of every template present in the catalog directory.
    pub fn available(&self) -> MedleyResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.cfg.templates_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
