//! Create a new generation tree.

use std::collections::BTreeMap;

use medley_common::EngineConfig;
use medley_graph_model::{AssetBundle, NewNode, NodeStatus};
use medley_tree_store::TreeStore;

pub fn run(cfg: &EngineConfig, name: String, root_template: String) -> anyhow::Result<()> {
    if let Some(parent) = cfg.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut store = TreeStore::open(&cfg.database_path)?;
    let tree_id = store.create_tree(&name)?;

    let root_id = store.add_node(&NewNode {
        node_id: uuid_string(),
        tree_id,
        parent_ids: Vec::new(),
        template_id: root_template.clone(),
        title: "Root".to_string(),
        parameters: BTreeMap::new(),
        assets: AssetBundle::default(),
        status: NodeStatus::Pending,
    })?;

    println!("Created tree '{name}' (id {tree_id})");
    println!("  Root node: {root_id} ({root_template}, pending)");
    println!("  Database:  {}", cfg.database_path.display());
    Ok(())
}

fn uuid_string() -> String {
    uuid::Uuid::new_v4().to_string()
}
