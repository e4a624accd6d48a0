//! Print a tree snapshot.

use medley_common::EngineConfig;
use medley_tree_store::TreeStore;

pub fn run(cfg: &EngineConfig, tree_id: i64) -> anyhow::Result<()> {
    let store = TreeStore::open(&cfg.database_path)?;
    let snapshot = store
        .tree_snapshot(tree_id)?
        .ok_or_else(|| anyhow::anyhow!("tree {tree_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
