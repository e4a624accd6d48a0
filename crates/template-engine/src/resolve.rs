//! Parent-asset resolution and staging.
//!
//! Staging copies a rendered output file into the engine's input area so a
//! subsequent job can reference it by filename. Staged files keep their
//! original name; concurrent requests staging the same filename race on
//! the same destination path, last writer wins, no locking.

use std::path::PathBuf;

use medley_common::{EngineConfig, MedleyError, MedleyResult};
use medley_graph_model::{AssetUri, Node, StorageClass};

use crate::template::{InputSlot, Template};

/// Runs the dedicated merge template over two parent assets. Implemented
/// by the render orchestrator; kept as a trait so resolution is testable
/// without an engine.
pub trait MergeExecutor {
    /// Returns the merged job's single output asset.
    fn merge(&mut self, a: &AssetUri, b: &AssetUri) -> MedleyResult<AssetUri>;
}

/// Resolves a node's parent set into bound template input slots.
#[derive(Debug)]
pub struct InputResolver<'a> {
    cfg: &'a EngineConfig,
}

impl<'a> InputResolver<'a> {
    pub fn new(cfg: &'a EngineConfig) -> Self {
        Self { cfg }
    }

    /// Bind every declared input slot of `template` from `parents`.
    ///
    /// - 0 parents: the template must be self-sufficient.
    /// - 1 parent: its most recent asset of the slot's kind is staged (if
    ///   a rendered output) or bound directly (if already staged input).
    /// - 2 parents, one slot: the pair is merged through `merge` first.
    /// - 2 parents, two slots: each parent binds to its slot in order.
    pub fn resolve(
        &self,
        template: &mut Template,
        parents: &[Node],
        merge: &mut dyn MergeExecutor,
    ) -> MedleyResult<()> {
        let input_slots = template.descriptor().input_slots.clone();

        match (parents.len(), input_slots.len()) {
            (_, 0) => Ok(()),
            (0, _) => Err(MedleyError::validation(format!(
                "template '{}' requires a {} input but no parent was given",
                template.id(),
                input_slots[0].kind
            ))),
            (1, 1) => self.bind_parent(template, &input_slots[0], &parents[0]),
            (2, 1) => {
                let slot = &input_slots[0];
                let a = parent_asset(slot, &parents[0])?.clone();
                let b = parent_asset(slot, &parents[1])?.clone();
                let merged = merge.merge(&a, &b)?;
                let reference = self.local_reference(&merged)?;
                template.bind(&slot.name, reference.into());
                Ok(())
            }
            (2, 2) => {
                self.bind_parent(template, &input_slots[0], &parents[0])?;
                self.bind_parent(template, &input_slots[1], &parents[1])
            }
            (parents_given, slots_declared) => Err(MedleyError::validation(format!(
                "template '{}' declares {slots_declared} input slot(s) but {parents_given} parent(s) were given",
                template.id()
            ))),
        }
    }

    fn bind_parent(
        &self,
        template: &mut Template,
        slot: &InputSlot,
        parent: &Node,
    ) -> MedleyResult<()> {
        let asset = parent_asset(slot, parent)?.clone();
        let reference = self.local_reference(&asset)?;
        template.bind(&slot.name, reference.into());
        Ok(())
    }

    /// A filename the engine can load as a job input: staged outputs are
    /// copied into the input area, staged inputs are referenced as-is.
    pub fn local_reference(&self, asset: &AssetUri) -> MedleyResult<String> {
        match asset.class {
            StorageClass::Input => Ok(asset.filename.clone()),
            StorageClass::Output => self.stage_into_input(asset),
        }
    }

    /// Copy a rendered output into the engine input area under its
    /// original filename. Re-staging an already-present filename is a
    /// no-op success.
    pub fn stage_into_input(&self, asset: &AssetUri) -> MedleyResult<String> {
        let destination = self.cfg.input_dir.join(&asset.filename);
        if destination.exists() {
            tracing::debug!(filename = %asset.filename, "Already staged, skipping copy");
            return Ok(asset.filename.clone());
        }

        let source = self.locate_output(asset)?;
        std::fs::create_dir_all(&self.cfg.input_dir)
            .map_err(|e| MedleyError::staging(&self.cfg.input_dir, e.to_string()))?;
        std::fs::copy(&source, &destination)
            .map_err(|e| MedleyError::staging(&destination, e.to_string()))?;
        tracing::info!(
            filename = %asset.filename,
            from = %source.display(),
            "Staged output into engine input area"
        );
        Ok(asset.filename.clone())
    }

    fn locate_output(&self, asset: &AssetUri) -> MedleyResult<PathBuf> {
        let direct = self
            .cfg
            .output_dir
            .join(&asset.subfolder)
            .join(&asset.filename);
        if direct.exists() {
            return Ok(direct);
        }
        // Rendered videos land in a nested subfolder of the output area.
        let nested = self
            .cfg
            .output_dir
            .join(&self.cfg.video_subfolder)
            .join(&asset.filename);
        if nested.exists() {
            return Ok(nested);
        }
        Err(MedleyError::staging(
            direct,
            "source file not found in engine output area",
        ))
    }
}

fn parent_asset<'n>(slot: &InputSlot, parent: &'n Node) -> MedleyResult<&'n AssetUri> {
    parent.assets.latest(slot.kind).ok_or_else(|| {
        MedleyError::validation(format!(
            "parent node '{}' has no {} asset for slot '{}'",
            parent.node_id, slot.kind, slot.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use medley_graph_model::{AssetBundle, MediaKind, NodeStatus};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct NoMerge;
    impl MergeExecutor for NoMerge {
        fn merge(&mut self, _: &AssetUri, _: &AssetUri) -> MedleyResult<AssetUri> {
            panic!("merge must not be called for this case");
        }
    }

    struct FakeMerge {
        output_dir: PathBuf,
        calls: usize,
    }
    impl MergeExecutor for FakeMerge {
        fn merge(&mut self, _a: &AssetUri, _b: &AssetUri) -> MedleyResult<AssetUri> {
            self.calls += 1;
            let merged = AssetUri::output("merged.png", "", 5);
            std::fs::write(self.output_dir.join("merged.png"), b"merged").unwrap();
            Ok(merged)
        }
    }

    fn test_config() -> (tempfile::TempDir, EngineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.input_dir = dir.path().join("input");
        cfg.output_dir = dir.path().join("output");
        std::fs::create_dir_all(&cfg.input_dir).unwrap();
        std::fs::create_dir_all(cfg.output_dir.join("video")).unwrap();
        (dir, cfg)
    }

    fn parent_with_output(id: &str, filename: &str, cfg: &EngineConfig) -> Node {
        std::fs::write(cfg.output_dir.join(filename), b"pixels").unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert(MediaKind::Image, vec![AssetUri::output(filename, "", 1)]);
        node(id, AssetBundle::from_outputs(outputs))
    }

    fn node(id: &str, assets: AssetBundle) -> Node {
        Node {
            node_id: id.to_string(),
            tree_id: 1,
            template_id: "TextGenerateImage".to_string(),
            title: id.to_string(),
            parameters: BTreeMap::new(),
            assets,
            status: NodeStatus::Completed,
            created_at: chrono::Utc::now(),
            parent_ids: Vec::new(),
        }
    }

    fn single_input_template() -> Template {
        Template::from_graph(
            "ImageGenerateImage_Basic",
            crate::template::tests::image_to_image_graph(),
        )
    }

    #[test]
    fn test_staging_is_idempotent() {
        let (_dir, cfg) = test_config();
        std::fs::write(cfg.output_dir.join("cat.png"), b"v1").unwrap();
        let resolver = InputResolver::new(&cfg);
        let asset = AssetUri::output("cat.png", "", 1);

        let first = resolver.stage_into_input(&asset).unwrap();
        let second = resolver.stage_into_input(&asset).unwrap();
        assert_eq!(first, "cat.png");
        assert_eq!(first, second);
        assert!(cfg.input_dir.join("cat.png").exists());
    }

    #[test]
    fn test_staging_missing_source_is_staging_error() {
        let (_dir, cfg) = test_config();
        let resolver = InputResolver::new(&cfg);
        let asset = AssetUri::output("ghost.png", "", 1);
        assert!(matches!(
            resolver.stage_into_input(&asset),
            Err(MedleyError::StagingIo { .. })
        ));
    }

    #[test]
    fn test_staging_finds_nested_video_output() {
        let (_dir, cfg) = test_config();
        std::fs::write(cfg.output_dir.join("video").join("clip.mp4"), b"v").unwrap();
        let resolver = InputResolver::new(&cfg);
        let asset = AssetUri::output("clip.mp4", "", 2);
        assert_eq!(resolver.stage_into_input(&asset).unwrap(), "clip.mp4");
    }

    #[test]
    fn test_single_parent_output_is_staged_and_bound() {
        let (_dir, cfg) = test_config();
        let parent = parent_with_output("p", "base.png", &cfg);
        let mut template = single_input_template();

        InputResolver::new(&cfg)
            .resolve(&mut template, &[parent], &mut NoMerge)
            .unwrap();

        assert_eq!(
            template.slot_value("primary-image-input"),
            Some(&json!("base.png"))
        );
        assert!(cfg.input_dir.join("base.png").exists());
    }

    #[test]
    fn test_single_parent_upload_binds_without_copy() {
        let (_dir, cfg) = test_config();
        let parent = node(
            "u",
            AssetBundle::from_input(MediaKind::Image, AssetUri::input("upload.png", 1)),
        );
        let mut template = single_input_template();

        InputResolver::new(&cfg)
            .resolve(&mut template, &[parent], &mut NoMerge)
            .unwrap();

        assert_eq!(
            template.slot_value("primary-image-input"),
            Some(&json!("upload.png"))
        );
        // Already in the input area; nothing staged.
        assert!(!cfg.input_dir.join("upload.png").exists());
    }

    #[test]
    fn test_zero_parents_with_required_input_fails() {
        let (_dir, cfg) = test_config();
        let mut template = single_input_template();
        let err = InputResolver::new(&cfg)
            .resolve(&mut template, &[], &mut NoMerge)
            .unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_zero_parents_self_sufficient_ok() {
        let (_dir, cfg) = test_config();
        let mut template = Template::from_graph(
            "TextGenerateImage",
            crate::template::tests::text_to_image_graph(),
        );
        InputResolver::new(&cfg)
            .resolve(&mut template, &[], &mut NoMerge)
            .unwrap();
    }

    #[test]
    fn test_parent_without_matching_asset_fails() {
        let (_dir, cfg) = test_config();
        let parent = node("empty", AssetBundle::default());
        let mut template = single_input_template();
        let err = InputResolver::new(&cfg)
            .resolve(&mut template, &[parent], &mut NoMerge)
            .unwrap_err();
        assert!(matches!(err, MedleyError::Validation { .. }));
    }

    #[test]
    fn test_two_parents_single_slot_runs_merge() {
        let (_dir, cfg) = test_config();
        let a = parent_with_output("a", "left.png", &cfg);
        let b = parent_with_output("b", "right.png", &cfg);
        let mut template = single_input_template();
        let mut merge = FakeMerge {
            output_dir: cfg.output_dir.clone(),
            calls: 0,
        };

        InputResolver::new(&cfg)
            .resolve(&mut template, &[a, b], &mut merge)
            .unwrap();

        assert_eq!(merge.calls, 1);
        assert_eq!(
            template.slot_value("primary-image-input"),
            Some(&json!("merged.png"))
        );
        assert!(cfg.input_dir.join("merged.png").exists());
    }

    #[test]
    fn test_two_parents_two_slots_bind_directly() {
        let (_dir, cfg) = test_config();
        let a = parent_with_output("a", "start.png", &cfg);
        let b = parent_with_output("b", "end.png", &cfg);
        let mut template = Template::from_graph(
            "FLFrameToVideo",
            crate::template::tests::frame_pair_graph(),
        );

        InputResolver::new(&cfg)
            .resolve(&mut template, &[a, b], &mut NoMerge)
            .unwrap();

        assert_eq!(
            template.slot_value("start-frame-input"),
            Some(&json!("start.png"))
        );
        assert_eq!(
            template.slot_value("end-frame-input"),
            Some(&json!("end.png"))
        );
    }

    #[test]
    fn test_three_parents_is_arity_error() {
        let (_dir, cfg) = test_config();
        let parents = vec![
            parent_with_output("a", "1.png", &cfg),
            parent_with_output("b", "2.png", &cfg),
            parent_with_output("c", "3.png", &cfg),
        ];
        let mut template = single_input_template();
        assert!(InputResolver::new(&cfg)
            .resolve(&mut template, &parents, &mut NoMerge)
            .is_err());
    }
}
