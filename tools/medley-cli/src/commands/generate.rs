//! Run a template through the render engine and persist the node.

use std::collections::BTreeMap;

use serde_json::Value;

use medley_common::EngineConfig;
use medley_render_orchestrator::{GenerateRequest, GenerationPipeline, HttpRenderClient};
use medley_tree_store::TreeStore;

#[allow(clippy::too_many_arguments)]
pub fn run(
    cfg: &EngineConfig,
    tree_id: i64,
    template: String,
    title: Option<String>,
    node_id: Option<String>,
    parents: Vec<String>,
    params: Vec<String>,
    batch: Option<u32>,
) -> anyhow::Result<()> {
    let parameters = parse_params(&params)?;
    let store = TreeStore::open(&cfg.database_path)?;
    let client = HttpRenderClient::new(cfg);
    let mut pipeline = GenerationPipeline::new(cfg, store, client);

    let snapshot = pipeline.generate(&GenerateRequest {
        tree_id,
        node_id,
        template_id: template,
        title,
        parameters,
        parent_ids: parents,
        batch_cycles: batch,
    })?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// `key=value` pairs; values are taken as JSON when they parse, plain
/// strings otherwise (so `--param seed=42` and `--param positive_prompt=a
/// calm lake` both work).
fn parse_params(params: &[String]) -> anyhow::Result<BTreeMap<String, Value>> {
    let mut parsed = BTreeMap::new();
    for raw in params {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("parameter '{raw}' is not key=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params_json_and_plain() {
        let parsed = parse_params(&[
            "seed=42".to_string(),
            "positive_prompt=a calm lake".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed["seed"], Value::from(42));
        assert_eq!(parsed["positive_prompt"], Value::from("a calm lake"));
    }

    #[test]
    fn test_parse_params_rejects_bare_key() {
        assert!(parse_params(&["seed".to_string()]).is_err());
    }
}
