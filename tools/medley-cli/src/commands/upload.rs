//! Register a local file as an upload node.

use std::path::PathBuf;

use medley_common::EngineConfig;
use medley_render_orchestrator::{GenerationPipeline, HttpRenderClient};
use medley_tree_store::TreeStore;

pub fn run(
    cfg: &EngineConfig,
    tree_id: i64,
    file: PathBuf,
    title: Option<String>,
    parents: Vec<String>,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("file '{}' does not exist", file.display());
    }
    let store = TreeStore::open(&cfg.database_path)?;
    let client = HttpRenderClient::new(cfg);
    let mut pipeline = GenerationPipeline::new(cfg, store, client);

    let snapshot = pipeline.upload(tree_id, &file, title, parents)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
