//! Delete a node and its descendants.

use medley_common::EngineConfig;
use medley_tree_store::TreeStore;

pub fn run(cfg: &EngineConfig, node_id: String) -> anyhow::Result<()> {
    let mut store = TreeStore::open(&cfg.database_path)?;
    let removed = store.delete_subtree(&node_id)?;
    println!("Deleted {removed} node(s)");
    Ok(())
}
