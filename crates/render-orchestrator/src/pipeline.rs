//! The generation pipeline: template to persisted node to snapshot.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use medley_common::{EngineConfig, MedleyError, MedleyResult};
use medley_graph_model::{
    AssetBundle, AssetUri, MediaKind, NewNode, Node, NodeStatus, NodeUpdate, TreeSnapshot,
    UPLOAD_TEMPLATE_ID,
};
use medley_template_engine::{
    InputResolver, MergeExecutor, TemplateCatalog, MERGE_TEMPLATE_ID,
};
use medley_tree_store::TreeStore;

use crate::client::RenderClient;
use crate::orchestrator::RenderOrchestrator;

/// One generation request, either creating a fresh node or re-running an
/// existing one in place.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub tree_id: i64,
    /// `Some` re-runs an existing node, overwriting it in place.
    pub node_id: Option<String>,
    pub template_id: String,
    pub title: Option<String>,
    pub parameters: BTreeMap<String, Value>,
    pub parent_ids: Vec<String>,
    /// More than one cycle turns the request into a batch run.
    pub batch_cycles: Option<u32>,
}

/// End-to-end flow for one request: load template, bind, resolve parents,
/// execute, persist, snapshot. Strictly sequential and blocking.
pub struct GenerationPipeline<'a, C: RenderClient> {
    cfg: &'a EngineConfig,
    store: TreeStore,
    orchestrator: RenderOrchestrator<C>,
}

impl<'a, C: RenderClient> GenerationPipeline<'a, C> {
    pub fn new(cfg: &'a EngineConfig, store: TreeStore, client: C) -> Self {
        Self {
            cfg,
            store,
            orchestrator: RenderOrchestrator::new(client),
        }
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut TreeStore {
        &mut self.store
    }

    /// Run a generation request to completion and return the full tree.
    pub fn generate(&mut self, request: &GenerateRequest) -> MedleyResult<TreeSnapshot> {
        let catalog = TemplateCatalog::new(self.cfg);
        let mut template = catalog.load(&request.template_id)?;
        template.bind_parameters(&request.parameters);

        let parents = self.load_parents(&request.parent_ids)?;
        {
            let resolver = InputResolver::new(self.cfg);
            let mut merge = EngineMerge {
                cfg: self.cfg,
                orchestrator: &mut self.orchestrator,
            };
            resolver.resolve(&mut template, &parents, &mut merge)?;
        }

        let assets = match request.batch_cycles {
            Some(cycles) if cycles > 1 => {
                let base_seed = base_seed(&request.parameters);
                let report = self.orchestrator.execute_batch(&template, cycles, |cycle| {
                    base_seed.wrapping_add(cycle as i64)
                });
                if report.is_total_failure() {
                    return Err(report.total_failure_error());
                }
                if report.failed() > 0 {
                    tracing::warn!(
                        succeeded = report.succeeded(),
                        failed = report.failed(),
                        "Batch finished with partial failures"
                    );
                }
                report.combined_assets()
            }
            _ => self.orchestrator.execute(&template)?,
        };

        let node_id = self.persist(request, assets)?;
        tracing::info!(%node_id, tree_id = request.tree_id, "Generation complete");

        self.snapshot(request.tree_id)
    }

    /// Register a local file as an upload node: stage it into the engine
    /// input area under a fresh name and persist the node.
    pub fn upload(
        &mut self,
        tree_id: i64,
        source: &Path,
        title: Option<String>,
        parent_ids: Vec<String>,
    ) -> MedleyResult<TreeSnapshot> {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                MedleyError::validation(format!(
                    "upload '{}' has no file extension",
                    source.display()
                ))
            })?;
        let kind = media_kind_for_extension(&extension).ok_or_else(|| {
            MedleyError::validation(format!("unsupported upload extension '{extension}'"))
        })?;

        let staged_name = format!("{}.{extension}", uuid::Uuid::new_v4());
        let destination = self.cfg.input_dir.join(&staged_name);
        std::fs::create_dir_all(&self.cfg.input_dir)
            .map_err(|e| MedleyError::staging(&self.cfg.input_dir, e.to_string()))?;
        std::fs::copy(source, &destination)
            .map_err(|e| MedleyError::staging(&destination, e.to_string()))?;
        tracing::info!(source = %source.display(), staged = %staged_name, "Upload staged");

        let assets = AssetBundle::from_input(kind, AssetUri::input(&staged_name, unix_token()));
        let title = title.unwrap_or_else(|| {
            source
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("upload")
                .to_string()
        });
        self.store.add_node(&NewNode {
            node_id: uuid::Uuid::new_v4().to_string(),
            tree_id,
            parent_ids,
            template_id: UPLOAD_TEMPLATE_ID.to_string(),
            title,
            parameters: BTreeMap::new(),
            assets,
            status: NodeStatus::Completed,
        })?;

        self.snapshot(tree_id)
    }

    fn load_parents(&self, parent_ids: &[String]) -> MedleyResult<Vec<Node>> {
        parent_ids
            .iter()
            .map(|id| {
                self.store
                    .get_node(id)?
                    .ok_or_else(|| MedleyError::not_found(format!("parent node '{id}'")))
            })
            .collect()
    }

    fn persist(&mut self, request: &GenerateRequest, assets: AssetBundle) -> MedleyResult<String> {
        if let Some(node_id) = &request.node_id {
            if self.store.get_node(node_id)?.is_some() {
                self.store.update_node(
                    node_id,
                    &NodeUpdate {
                        template_id: Some(request.template_id.clone()),
                        title: request.title.clone(),
                        parameters: Some(request.parameters.clone()),
                        assets: Some(assets),
                        status: Some(NodeStatus::Completed),
                    },
                )?;
                return Ok(node_id.clone());
            }
        }

        let node_id = request
            .node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.store.add_node(&NewNode {
            node_id: node_id.clone(),
            tree_id: request.tree_id,
            parent_ids: request.parent_ids.clone(),
            template_id: request.template_id.clone(),
            title: request
                .title
                .clone()
                .unwrap_or_else(|| request.template_id.clone()),
            parameters: request.parameters.clone(),
            assets,
            status: NodeStatus::Completed,
        })?;
        Ok(node_id)
    }

    fn snapshot(&self, tree_id: i64) -> MedleyResult<TreeSnapshot> {
        self.store
            .tree_snapshot(tree_id)?
            .ok_or_else(|| MedleyError::not_found(format!("tree {tree_id}")))
    }
}

/// Merge executor that runs the dedicated merge template through the
/// engine and returns its single image output.
struct EngineMerge<'a, C: RenderClient> {
    cfg: &'a EngineConfig,
    orchestrator: &'a mut RenderOrchestrator<C>,
}

impl<C: RenderClient> MergeExecutor for EngineMerge<'_, C> {
    fn merge(&mut self, a: &AssetUri, b: &AssetUri) -> MedleyResult<AssetUri> {
        let catalog = TemplateCatalog::new(self.cfg);
        let mut template = catalog.load(MERGE_TEMPLATE_ID)?;
        let resolver = InputResolver::new(self.cfg);
        template.bind("merge-input-a", resolver.local_reference(a)?.into());
        template.bind("merge-input-b", resolver.local_reference(b)?.into());

        tracing::info!(a = %a.filename, b = %b.filename, "Merging parent pair");
        let bundle = self.orchestrator.execute(&template)?;
        bundle
            .latest_output(MediaKind::Image)
            .cloned()
            .ok_or_else(|| MedleyError::upstream("merge job produced no image output"))
    }
}

fn media_kind_for_extension(extension: &str) -> Option<MediaKind> {
    match extension {
        "png" | "jpg" | "jpeg" | "webp" | "bmp" | "gif" => Some(MediaKind::Image),
        "mp4" | "webm" | "mov" | "mkv" | "avi" => Some(MediaKind::Video),
        "mp3" | "wav" | "flac" | "ogg" | "m4a" => Some(MediaKind::Audio),
        _ => None,
    }
}

fn base_seed(parameters: &BTreeMap<String, Value>) -> i64 {
    parameters
        .get("seed")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| unix_token() as i64)
}

fn unix_token() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Completion;
    use crate::orchestrator::tests::{record_with_images, MockClient};
    use medley_graph_model::StorageClass;

    fn write_template(dir: &Path, id: &str, graph: serde_json::Value) {
        std::fs::write(
            dir.join(format!("{id}.json")),
            serde_json::to_string(&graph).unwrap(),
        )
        .unwrap();
    }

    fn text_to_image() -> serde_json::Value {
        serde_json::json!({
            "3": {
                "class_type": "KSampler",
                "inputs": { "seed": 0, "cfg": 7.0, "steps": 20, "denoise": 1.0 },
                "_meta": { "title": "KSampler" }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "" },
                "_meta": { "title": "CLIP Text Encode (Positive Prompt)" }
            }
        })
    }

    fn image_to_image() -> serde_json::Value {
        serde_json::json!({
            "3": {
                "class_type": "KSampler",
                "inputs": { "seed": 0 },
                "_meta": { "title": "KSampler" }
            },
            "10": {
                "class_type": "LoadImage",
                "inputs": { "image": "" },
                "_meta": { "title": "LoadImage" }
            }
        })
    }

    fn merge_template() -> serde_json::Value {
        serde_json::json!({
            "1": {
                "class_type": "LoadImage",
                "inputs": { "image": "" },
                "_meta": { "title": "LoadImage(A)" }
            },
            "2": {
                "class_type": "LoadImage",
                "inputs": { "image": "" },
                "_meta": { "title": "LoadImage(B)" }
            }
        })
    }

    fn test_config(dir: &Path) -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.templates_dir = dir.join("templates");
        cfg.input_dir = dir.join("input");
        cfg.output_dir = dir.join("output");
        std::fs::create_dir_all(&cfg.templates_dir).unwrap();
        std::fs::create_dir_all(&cfg.input_dir).unwrap();
        std::fs::create_dir_all(&cfg.output_dir).unwrap();
        cfg
    }

    fn request(tree_id: i64, template_id: &str) -> GenerateRequest {
        GenerateRequest {
            tree_id,
            node_id: None,
            template_id: template_id.to_string(),
            title: None,
            parameters: BTreeMap::new(),
            parent_ids: Vec::new(),
            batch_cycles: None,
        }
    }

    #[test]
    fn test_generate_persists_node_and_returns_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_template(&cfg.templates_dir, "TextGenerateImage", text_to_image());

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient::with_images(&["fresh.png"]);
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let mut req = request(tree_id, "TextGenerateImage");
        req.parameters
            .insert("positive_prompt".to_string(), "a calm lake".into());
        let snapshot = pipeline.generate(&req).unwrap();

        assert_eq!(snapshot.nodes.len(), 1);
        let node = &snapshot.nodes[0];
        assert_eq!(node.template_id, "TextGenerateImage");
        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(
            node.assets.latest_output(MediaKind::Image).unwrap().filename,
            "fresh.png"
        );
    }

    #[test]
    fn test_rerun_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_template(&cfg.templates_dir, "TextGenerateImage", text_to_image());

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient {
            submissions: Vec::new(),
            records: vec![
                Ok(record_with_images(&["first.png"])),
                Ok(record_with_images(&["second.png"])),
            ],
            completion: Completion::Finished,
        };
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let first = pipeline.generate(&request(tree_id, "TextGenerateImage")).unwrap();
        let node_id = first.nodes[0].node_id.clone();

        let mut rerun = request(tree_id, "TextGenerateImage");
        rerun.node_id = Some(node_id.clone());
        let second = pipeline.generate(&rerun).unwrap();

        assert_eq!(second.nodes.len(), 1);
        assert_eq!(second.nodes[0].node_id, node_id);
        assert_eq!(
            second.nodes[0]
                .assets
                .latest_output(MediaKind::Image)
                .unwrap()
                .filename,
            "second.png"
        );
    }

    #[test]
    fn test_generate_with_unknown_parent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_template(&cfg.templates_dir, "TextGenerateImage", text_to_image());

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient::with_images(&["x.png"]);
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let mut req = request(tree_id, "TextGenerateImage");
        req.parent_ids.push("ghost".to_string());
        assert!(matches!(
            pipeline.generate(&req),
            Err(MedleyError::NotFound { .. })
        ));
    }

    #[test]
    fn test_two_parents_one_slot_runs_merge_job_first() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_template(&cfg.templates_dir, "ImageGenerateImage", image_to_image());
        write_template(&cfg.templates_dir, MERGE_TEMPLATE_ID, merge_template());

        std::fs::write(cfg.output_dir.join("left.png"), b"l").unwrap();
        std::fs::write(cfg.output_dir.join("right.png"), b"r").unwrap();
        std::fs::write(cfg.output_dir.join("merged.png"), b"m").unwrap();

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient {
            submissions: Vec::new(),
            // First record answers the merge job, second the main job.
            records: vec![
                Ok(record_with_images(&["merged.png"])),
                Ok(record_with_images(&["final.png"])),
            ],
            completion: Completion::Finished,
        };
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let mut parents = Vec::new();
        for name in ["left.png", "right.png"] {
            let mut outputs = BTreeMap::new();
            outputs.insert(MediaKind::Image, vec![AssetUri::output(name, "", 1)]);
            let id = pipeline
                .store_mut()
                .add_node(&NewNode {
                    node_id: uuid::Uuid::new_v4().to_string(),
                    tree_id,
                    parent_ids: Vec::new(),
                    template_id: "TextGenerateImage".to_string(),
                    title: name.to_string(),
                    parameters: BTreeMap::new(),
                    assets: AssetBundle::from_outputs(outputs),
                    status: NodeStatus::Completed,
                })
                .unwrap();
            parents.push(id);
        }

        let mut req = request(tree_id, "ImageGenerateImage");
        req.parent_ids = parents;
        let snapshot = pipeline.generate(&req).unwrap();

        assert_eq!(snapshot.nodes.len(), 3);
        let new_node = snapshot
            .nodes
            .iter()
            .find(|n| n.template_id == "ImageGenerateImage")
            .unwrap();
        assert_eq!(
            new_node.assets.latest_output(MediaKind::Image).unwrap().filename,
            "final.png"
        );
        // Merge job was submitted before the main job, fed by the pair.
        let submissions = &pipeline.orchestrator.client.submissions;
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0]["1"]["inputs"]["image"], "left.png");
        assert_eq!(submissions[0]["2"]["inputs"]["image"], "right.png");
        assert_eq!(submissions[1]["10"]["inputs"]["image"], "merged.png");
        assert!(cfg.input_dir.join("merged.png").exists());
    }

    #[test]
    fn test_batch_request_combines_cycle_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        write_template(&cfg.templates_dir, "TextGenerateImage", text_to_image());

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient {
            submissions: Vec::new(),
            records: vec![
                Ok(record_with_images(&["1.png"])),
                Ok(record_with_images(&["2.png"])),
                Ok(record_with_images(&["3.png"])),
            ],
            completion: Completion::Finished,
        };
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let mut req = request(tree_id, "TextGenerateImage");
        req.parameters.insert("seed".to_string(), 7.into());
        req.batch_cycles = Some(3);
        let snapshot = pipeline.generate(&req).unwrap();

        let node = &snapshot.nodes[0];
        assert_eq!(node.assets.output[&MediaKind::Image].len(), 3);
    }

    #[test]
    fn test_upload_stages_file_and_records_input_asset() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());

        let source = dir.path().join("photo.png");
        std::fs::write(&source, b"pixels").unwrap();

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient::with_images(&[]);
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        let snapshot = pipeline.upload(tree_id, &source, None, Vec::new()).unwrap();

        assert_eq!(snapshot.nodes.len(), 1);
        let node = &snapshot.nodes[0];
        assert_eq!(node.template_id, UPLOAD_TEMPLATE_ID);
        assert_eq!(node.title, "photo.png");
        let asset = node.assets.latest_input(MediaKind::Image).unwrap();
        assert_eq!(asset.class, StorageClass::Input);
        assert!(asset.filename.ends_with(".png"));
        assert!(cfg.input_dir.join(&asset.filename).exists());
    }

    #[test]
    fn test_upload_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"hello").unwrap();

        let store = TreeStore::open_in_memory().unwrap();
        let tree_id = store.create_tree("demo").unwrap();
        let client = MockClient::with_images(&[]);
        let mut pipeline = GenerationPipeline::new(&cfg, store, client);

        assert!(matches!(
            pipeline.upload(tree_id, &source, None, Vec::new()),
            Err(MedleyError::Validation { .. })
        ));
    }
}
