//! Operational defaults for the ComfyUI node types the pipeline knows.
//!
//! UI exports store widget values positionally, so normalizing them needs
//! the widget order for each class type. Known types also get a complete
//! default input set so a sparse template still produces a runnable node.

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Class types
// ---------------------------------------------------------------------------

pub const KSAMPLER_CLASS: &str = "KSampler";
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";
pub const SAVE_IMAGE_CLASS: &str = "SaveImage";
pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
pub const LOAD_CHECKPOINT_CLASS: &str = "CheckpointLoaderSimple";

/// Custom node that builds a mask for one facial region.
pub const FACE_REGION_MASK_CLASS: &str = "FaceRegionMask";

/// Pass-through node used only to tidy wires in the editor.
pub const REROUTE_CLASS: &str = "Reroute";

/// Node types that carry no executable work and never reach a backend.
/// Group and frame containers only arrange other nodes in the editor.
pub const ANNOTATION_CLASSES: &[&str] = &[
    "Note",
    "MarkdownNote",
    "PrimitiveNode",
    REROUTE_CLASS,
    "GroupNode",
    "Frame",
    "Label (rgthree)",
];

/// Whether `class_type` is editor-only and must be dropped from the graph.
pub fn is_annotation(class_type: &str) -> bool {
    ANNOTATION_CLASSES.contains(&class_type)
}

// ---------------------------------------------------------------------------
// Widget specs
// ---------------------------------------------------------------------------

/// Default value for one positional widget.
#[derive(Debug, Clone, Copy)]
pub enum WidgetDefault {
    Int(i64),
    Float(f64),
    Str(&'static str),
    Bool(bool),
    /// Editor-only widget; occupies a position in `widgets_values` but is
    /// not a real input.
    EditorOnly,
}

impl WidgetDefault {
    fn to_value(self) -> Option<Value> {
        match self {
            WidgetDefault::Int(v) => Some(Value::from(v)),
            WidgetDefault::Float(v) => Some(Value::from(v)),
            WidgetDefault::Str(v) => Some(Value::from(v)),
            WidgetDefault::Bool(v) => Some(Value::from(v)),
            WidgetDefault::EditorOnly => None,
        }
    }
}

/// Widget layout of a known node type, in `widgets_values` order.
#[derive(Debug)]
pub struct NodeSpec {
    pub class_type: &'static str,
    pub widgets: &'static [(&'static str, WidgetDefault)],
}

impl NodeSpec {
    /// Full default input set for this node type (linked inputs excluded).
    pub fn default_inputs(&self) -> Map<String, Value> {
        self.widgets
            .iter()
            .filter_map(|(name, default)| default.to_value().map(|v| (name.to_string(), v)))
            .collect()
    }

    /// Map positional widget values onto input names, skipping editor-only
    /// widgets. Extra trailing values are ignored.
    pub fn named_widgets(&self, values: &[Value]) -> Map<String, Value> {
        self.widgets
            .iter()
            .zip(values)
            .filter(|((_, default), _)| !matches!(default, WidgetDefault::EditorOnly))
            .map(|((name, _), value)| (name.to_string(), value.clone()))
            .collect()
    }
}

const KNOWN_NODES: &[NodeSpec] = &[
    NodeSpec {
        class_type: KSAMPLER_CLASS,
        widgets: &[
            ("seed", WidgetDefault::Int(0)),
            ("control_after_generate", WidgetDefault::EditorOnly),
            ("steps", WidgetDefault::Int(20)),
            ("cfg", WidgetDefault::Float(8.0)),
            ("sampler_name", WidgetDefault::Str("euler")),
            ("scheduler", WidgetDefault::Str("normal")),
            ("denoise", WidgetDefault::Float(1.0)),
        ],
    },
    NodeSpec {
        class_type: LOAD_IMAGE_CLASS,
        widgets: &[
            ("image", WidgetDefault::Str("")),
            ("upload", WidgetDefault::EditorOnly),
        ],
    },
    NodeSpec {
        class_type: SAVE_IMAGE_CLASS,
        widgets: &[("filename_prefix", WidgetDefault::Str("ComfyUI"))],
    },
    NodeSpec {
        class_type: LOAD_CHECKPOINT_CLASS,
        widgets: &[("ckpt_name", WidgetDefault::Str(""))],
    },
    NodeSpec {
        class_type: CLIP_TEXT_ENCODE_CLASS,
        widgets: &[("text", WidgetDefault::Str(""))],
    },
    NodeSpec {
        class_type: "VAEEncode",
        widgets: &[],
    },
    NodeSpec {
        class_type: "VAEDecode",
        widgets: &[],
    },
    NodeSpec {
        class_type: "SetLatentNoiseMask",
        widgets: &[],
    },
    NodeSpec {
        class_type: "GrowMask",
        widgets: &[
            ("expand", WidgetDefault::Int(0)),
            ("tapered_corners", WidgetDefault::Bool(true)),
        ],
    },
    NodeSpec {
        class_type: FACE_REGION_MASK_CLASS,
        widgets: &[
            ("area", WidgetDefault::Str("face")),
            ("grow", WidgetDefault::Int(0)),
            ("blur", WidgetDefault::Int(0)),
        ],
    },
];

/// Look up the widget layout for a class type.
pub fn lookup(class_type: &str) -> Option<&'static NodeSpec> {
    KNOWN_NODES.iter().find(|spec| spec.class_type == class_type)
}
