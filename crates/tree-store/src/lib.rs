//! Medley Tree Store
//!
//! SQLite persistence for generation trees. Three relations:
//!
//! - `Trees(tree_id, name, created_at)`
//! - `Nodes(node_id, tree_id, template_id, parameters, title, assets, status, created_at)`
//! - `node_parents(child_node_id, parent_node_id)` — unique pair, cascade
//!   on node deletion
//!
//! The node graph is a DAG: a node may have several parents. Every parent
//! referenced by an edge must already exist at edge-insertion time, so the
//! graph is created-before-referenced and cannot contain forward
//! references.
//!
//! Subtree deletion is **unconditional**: every node reachable from the
//! deleted node by following child edges is removed, even when it stays
//! reachable through another surviving parent (diamond case). Callers that
//! want retain-on-alternate-ancestor semantics must not use this store's
//! delete.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use medley_common::{MedleyError, MedleyResult};
use medley_graph_model::{
    AssetBundle, NewNode, Node, NodeStatus, NodeUpdate, Tree, TreeSnapshot,
};

/// Connection-owning store. One store per logical worker; concurrent
/// workers rely on SQLite's own locking, nothing extra is serialized here.
#[derive(Debug)]
pub struct TreeStore {
    conn: Connection,
}

fn to_storage(err: rusqlite::Error) -> MedleyError {
    MedleyError::storage(err.to_string())
}

impl TreeStore {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> MedleyResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path.as_ref()).map_err(to_storage)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests and the pipeline's dry runs.
    pub fn open_in_memory() -> MedleyResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_storage)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> MedleyResult<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS Trees (
                  tree_id INTEGER PRIMARY KEY AUTOINCREMENT,
                  name TEXT NOT NULL,
                  created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS Nodes (
                  node_id TEXT PRIMARY KEY,
                  tree_id INTEGER NOT NULL,
                  template_id TEXT NOT NULL,
                  parameters TEXT,
                  title TEXT NOT NULL,
                  assets TEXT,
                  status TEXT NOT NULL DEFAULT 'pending',
                  created_at TEXT NOT NULL,
                  FOREIGN KEY (tree_id) REFERENCES Trees (tree_id)
                );

                CREATE TABLE IF NOT EXISTS node_parents (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  child_node_id TEXT NOT NULL,
                  parent_node_id TEXT NOT NULL,
                  FOREIGN KEY (child_node_id) REFERENCES Nodes (node_id) ON DELETE CASCADE,
                  FOREIGN KEY (parent_node_id) REFERENCES Nodes (node_id) ON DELETE CASCADE,
                  UNIQUE(child_node_id, parent_node_id)
                );

                CREATE INDEX IF NOT EXISTS idx_child_node ON node_parents (child_node_id);
                CREATE INDEX IF NOT EXISTS idx_parent_node ON node_parents (parent_node_id);
                "#,
            )
            .map_err(to_storage)
    }

    /// Create a new project tree and return its id.
    pub fn create_tree(&self, name: &str) -> MedleyResult<i64> {
        self.conn
            .execute(
                "INSERT INTO Trees (name, created_at) VALUES (?1, ?2)",
                params![name, Utc::now().to_rfc3339()],
            )
            .map_err(to_storage)?;
        let tree_id = self.conn.last_insert_rowid();
        tracing::info!(tree_id, name, "Created tree");
        Ok(tree_id)
    }

    /// Insert a node row plus one edge row per parent, all-or-nothing.
    ///
    /// Any invalid parent (unknown id, self-loop) fails the whole insert;
    /// the transaction rolls back and nothing becomes visible.
    pub fn add_node(&mut self, node: &NewNode) -> MedleyResult<String> {
        let tx = self.conn.transaction().map_err(to_storage)?;

        let parameters_json = serde_json::to_string(&node.parameters)?;
        let assets_json = serde_json::to_string(&node.assets)?;
        tx.execute(
            "INSERT INTO Nodes (node_id, tree_id, template_id, parameters, title, assets, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.node_id,
                node.tree_id,
                node.template_id,
                parameters_json,
                node.title,
                assets_json,
                node.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(to_storage)?;

        for parent_id in node.parent_ids.iter().filter(|p| !p.is_empty()) {
            if *parent_id == node.node_id {
                return Err(MedleyError::validation(format!(
                    "node '{}' cannot be its own parent",
                    node.node_id
                )));
            }
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM Nodes WHERE node_id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(to_storage)?;
            if exists.is_none() {
                return Err(MedleyError::validation(format!(
                    "parent node '{parent_id}' does not exist"
                )));
            }
            tx.execute(
                "INSERT INTO node_parents (child_node_id, parent_node_id) VALUES (?1, ?2)",
                params![node.node_id, parent_id],
            )
            .map_err(to_storage)?;
        }

        tx.commit().map_err(to_storage)?;
        tracing::info!(
            node_id = %node.node_id,
            tree_id = node.tree_id,
            template_id = %node.template_id,
            parents = node.parent_ids.len(),
            "Added node"
        );
        Ok(node.node_id.clone())
    }

    /// Fetch a single node with its parent ids. Absent id is `None`, not
    /// an error.
    pub fn get_node(&self, node_id: &str) -> MedleyResult<Option<Node>> {
        let row = self
            .conn
            .query_row(
                "SELECT node_id, tree_id, template_id, parameters, title, assets, status, created_at
                 FROM Nodes WHERE node_id = ?1",
                params![node_id],
                map_node_row,
            )
            .optional()
            .map_err(to_storage)?;

        let Some(mut node) = row else {
            return Ok(None);
        };
        node.parent_ids = self.parent_ids_of(node_id)?;
        Ok(Some(node))
    }

    /// Full-tree snapshot: every node with parent ids attached, creation
    /// order ascending. Absent tree is `None`.
    pub fn tree_snapshot(&self, tree_id: i64) -> MedleyResult<Option<TreeSnapshot>> {
        let tree: Option<Tree> = self
            .conn
            .query_row(
                "SELECT tree_id, name, created_at FROM Trees WHERE tree_id = ?1",
                params![tree_id],
                |row| {
                    Ok(Tree {
                        tree_id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: parse_timestamp(&row.get::<_, String>(2)?),
                    })
                },
            )
            .optional()
            .map_err(to_storage)?;

        let Some(tree) = tree else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT node_id, tree_id, template_id, parameters, title, assets, status, created_at
                 FROM Nodes WHERE tree_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(to_storage)?;
        let rows = stmt
            .query_map(params![tree_id], map_node_row)
            .map_err(to_storage)?;

        let mut nodes = Vec::new();
        for row in rows {
            let mut node = row.map_err(to_storage)?;
            node.parent_ids = self.parent_ids_of(&node.node_id)?;
            nodes.push(node);
        }

        Ok(Some(TreeSnapshot {
            tree_id: tree.tree_id,
            name: tree.name,
            nodes,
        }))
    }

    /// Partial update. `parameters` and `assets` are rewritten whole when
    /// supplied; the other fields only when present.
    pub fn update_node(&self, node_id: &str, update: &NodeUpdate) -> MedleyResult<()> {
        let mut fields: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(parameters) = &update.parameters {
            fields.push("parameters = ?");
            values.push(Box::new(serde_json::to_string(parameters)?));
        }
        if let Some(assets) = &update.assets {
            fields.push("assets = ?");
            values.push(Box::new(serde_json::to_string(assets)?));
        }
        if let Some(template_id) = &update.template_id {
            fields.push("template_id = ?");
            values.push(Box::new(template_id.clone()));
        }
        if let Some(title) = &update.title {
            fields.push("title = ?");
            values.push(Box::new(title.clone()));
        }
        if let Some(status) = update.status {
            fields.push("status = ?");
            values.push(Box::new(status.as_str().to_string()));
        }

        if fields.is_empty() {
            return Ok(());
        }

        let sql = format!("UPDATE Nodes SET {} WHERE node_id = ?", fields.join(", "));
        values.push(Box::new(node_id.to_string()));
        let changed = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(to_storage)?;
        if changed == 0 {
            return Err(MedleyError::not_found(format!("node '{node_id}'")));
        }
        tracing::info!(node_id, "Updated node");
        Ok(())
    }

    /// Delete the set of nodes reachable from `node_id` by following child
    /// edges, including the node itself, in one batch. Returns the number
    /// of node rows removed.
    ///
    /// Reachability is the only criterion: a descendant is deleted even
    /// when it has another, surviving parent.
    pub fn delete_subtree(&mut self, node_id: &str) -> MedleyResult<usize> {
        let mut to_delete: Vec<String> = vec![node_id.to_string()];
        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([node_id.to_string()]);

        {
            let mut stmt = self
                .conn
                .prepare("SELECT child_node_id FROM node_parents WHERE parent_node_id = ?1")
                .map_err(to_storage)?;
            while let Some(current) = queue.pop_front() {
                let children = stmt
                    .query_map(params![current], |row| row.get::<_, String>(0))
                    .map_err(to_storage)?;
                for child in children {
                    let child = child.map_err(to_storage)?;
                    if visited.insert(child.clone()) {
                        to_delete.push(child.clone());
                        queue.push_back(child);
                    }
                }
            }
        }

        let tx = self.conn.transaction().map_err(to_storage)?;
        let placeholders = vec!["?"; to_delete.len()].join(", ");
        // node_parents rows go with the nodes via ON DELETE CASCADE.
        let deleted = tx
            .execute(
                &format!("DELETE FROM Nodes WHERE node_id IN ({placeholders})"),
                rusqlite::params_from_iter(to_delete.iter()),
            )
            .map_err(to_storage)?;
        tx.commit().map_err(to_storage)?;

        tracing::info!(node_id, deleted, "Deleted subtree");
        Ok(deleted)
    }

    fn parent_ids_of(&self, node_id: &str) -> MedleyResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT parent_node_id FROM node_parents WHERE child_node_id = ?1 ORDER BY id ASC")
            .map_err(to_storage)?;
        let rows = stmt
            .query_map(params![node_id], |row| row.get::<_, String>(0))
            .map_err(to_storage)?;
        let mut parents = Vec::new();
        for row in rows {
            parents.push(row.map_err(to_storage)?);
        }
        Ok(parents)
    }
}

fn map_node_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let node_id: String = row.get(0)?;
    let parameters_json: Option<String> = row.get(3)?;
    let assets_json: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(Node {
        node_id: node_id.clone(),
        tree_id: row.get(1)?,
        template_id: row.get(2)?,
        parameters: parse_json_column(&node_id, "parameters", parameters_json),
        title: row.get(4)?,
        assets: parse_json_column(&node_id, "assets", assets_json),
        status: if status == "completed" {
            NodeStatus::Completed
        } else {
            NodeStatus::Pending
        },
        created_at: parse_timestamp(&created_at),
        parent_ids: Vec::new(),
    })
}

/// Malformed stored JSON degrades to the type's default with a warning
/// instead of failing the read.
fn parse_json_column<T: serde::de::DeserializeOwned + Default>(
    node_id: &str,
    column: &str,
    raw: Option<String>,
) -> T {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        return T::default();
    };
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(node_id, column, error = %e, "Malformed stored JSON, using default");
            T::default()
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
