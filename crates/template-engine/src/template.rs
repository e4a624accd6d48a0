//! Templates, slot tables, and capability descriptors.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use medley_graph_model::MediaKind;

/// Static mapping from a sub-step's display title to the slots it exposes.
///
/// Each entry is `(step title, [(slot name, input key, expected kind)])`
/// where the kind is `Some` only for parent-asset input slots.
const SLOT_BINDINGS: &[(&str, &[(&str, &str, Option<MediaKind>)])] = &[
    (
        "CLIP Text Encode (Positive Prompt)",
        &[("positive-text", "text", None)],
    ),
    (
        "CLIP Text Encode (Negative Prompt)",
        &[("negative-text", "text", None)],
    ),
    (
        "Size_Setting",
        &[
            ("width", "width", None),
            ("height", "height", None),
            ("length", "length", None),
            ("batch-size", "batch_size", None),
            ("speed", "speed", None),
        ],
    ),
    (
        "KSampler",
        &[
            ("seed", "seed", None),
            ("cfg", "cfg", None),
            ("steps", "steps", None),
            ("denoise", "denoise", None),
        ],
    ),
    ("FluxGuidance", &[("guidance", "guidance", None)]),
    (
        "LoadImage",
        &[("primary-image-input", "image", Some(MediaKind::Image))],
    ),
    (
        "LoadVideo",
        &[("primary-video-input", "video", Some(MediaKind::Video))],
    ),
    (
        "LoadAudio",
        &[("primary-audio-input", "audio", Some(MediaKind::Audio))],
    ),
    (
        "LoadImage(Start)",
        &[("start-frame-input", "image", Some(MediaKind::Image))],
    ),
    (
        "LoadImage(End)",
        &[("end-frame-input", "image", Some(MediaKind::Image))],
    ),
    (
        "LoadImage(A)",
        &[("merge-input-a", "image", Some(MediaKind::Image))],
    ),
    (
        "LoadImage(B)",
        &[("merge-input-b", "image", Some(MediaKind::Image))],
    ),
];

/// Well-known request parameter names and the slots they bind to.
const PARAMETER_SLOTS: &[(&str, &str)] = &[
    ("positive_prompt", "positive-text"),
    ("negative_prompt", "negative-text"),
    ("width", "width"),
    ("height", "height"),
    ("length", "length"),
    ("batch_size", "batch-size"),
    ("speed", "speed"),
    ("seed", "seed"),
    ("cfg", "cfg"),
    ("steps", "steps"),
    ("denoise", "denoise"),
    ("guidance", "guidance"),
];

/// Where a slot lives inside the template graph.
#[derive(Debug, Clone)]
pub struct SlotTarget {
    pub step_id: String,
    pub input_key: &'static str,
    pub kind: Option<MediaKind>,
}

/// A parent-asset input slot the template declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSlot {
    pub name: String,
    pub kind: MediaKind,
}

/// Capability descriptor derived once at load time. Replaces per-call
/// branching on template id strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDescriptor {
    /// Declared parent-asset slots, in declaration order (primary before
    /// start/end before merge pairs).
    pub input_slots: Vec<InputSlot>,
}

impl TemplateDescriptor {
    /// A template with no input slots is self-sufficient (pure
    /// text-to-media) and accepts zero parents.
    pub fn is_self_sufficient(&self) -> bool {
        self.input_slots.is_empty()
    }
}

/// A loaded, bindable job template.
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    graph: Map<String, Value>,
    slots: BTreeMap<String, SlotTarget>,
    descriptor: TemplateDescriptor,
}

impl Template {
    /// Build a template from its parsed JSON graph, computing the slot
    /// table and descriptor.
    pub fn from_graph(id: impl Into<String>, graph: Map<String, Value>) -> Self {
        let mut slots = BTreeMap::new();
        let mut input_slots = Vec::new();

        for (title, bindings) in SLOT_BINDINGS {
            let Some(step_id) = find_step_by_title(&graph, title) else {
                continue;
            };
            for (slot_name, input_key, kind) in *bindings {
                slots.insert(
                    (*slot_name).to_string(),
                    SlotTarget {
                        step_id: step_id.clone(),
                        input_key,
                        kind: *kind,
                    },
                );
                if let Some(kind) = kind {
                    input_slots.push(InputSlot {
                        name: (*slot_name).to_string(),
                        kind: *kind,
                    });
                }
            }
        }

        Self {
            id: id.into(),
            graph,
            slots,
            descriptor: TemplateDescriptor { input_slots },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &TemplateDescriptor {
        &self.descriptor
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Bind a value to a named slot. Templates legitimately omit slots
    /// (a text-only template has no image slot), so an unknown slot is a
    /// successful no-op; the return value reports whether anything was
    /// written.
    pub fn bind(&mut self, slot: &str, value: Value) -> bool {
        let Some(target) = self.slots.get(slot) else {
            tracing::debug!(template = %self.id, slot, "Template has no such slot, skipping");
            return false;
        };
        if let Some(inputs) = self
            .graph
            .get_mut(&target.step_id)
            .and_then(|step| step.get_mut("inputs"))
            .and_then(|inputs| inputs.as_object_mut())
        {
            inputs.insert(target.input_key.to_string(), value);
            return true;
        }
        false
    }

    /// Bind every well-known request parameter onto its slot, skipping
    /// parameters the template does not expose.
    pub fn bind_parameters(&mut self, parameters: &BTreeMap<String, Value>) {
        for (param, slot) in PARAMETER_SLOTS {
            if let Some(value) = parameters.get(*param) {
                self.bind(slot, value.clone());
            }
        }
    }

    /// Current value bound at a slot, if the slot exists.
    pub fn slot_value(&self, slot: &str) -> Option<&Value> {
        let target = self.slots.get(slot)?;
        self.graph
            .get(&target.step_id)?
            .get("inputs")?
            .get(target.input_key)
    }

    /// The fully-bound graph, ready for submission.
    pub fn graph(&self) -> &Map<String, Value> {
        &self.graph
    }
}

fn find_step_by_title(graph: &Map<String, Value>, title: &str) -> Option<String> {
    graph.iter().find_map(|(step_id, step)| {
        let step_title = step.get("_meta")?.get("title")?.as_str()?;
        (step_title == title).then(|| step_id.clone())
    })
}
