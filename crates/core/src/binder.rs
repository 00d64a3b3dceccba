//! Graph parameter binding.
//!
//! [`bind`] normalizes a template's graph into a fresh canonical copy and
//! writes the request parameters into the role-mapped nodes. The stored
//! template is never touched.

use rand::Rng;
use serde::Serialize;
use serde_json::Value;

use crate::error::GenerationError;
use crate::feature::FeatureDescriptor;
use crate::graph::{normalize_graph, CanonicalGraph, CanonicalNode};
use crate::node_catalog::CLIP_TEXT_ENCODE_CLASS;
use crate::template::WorkflowTemplate;

/// Stable prefix of every output filename.
pub const OUTPUT_PREFIX: &str = "photoforge";

/// Seeds stay below 2^53 so they survive JSON round trips through
/// JavaScript-based tooling.
const MAX_SEED: u64 = 1 << 53;

/// Runtime parameters for one generation request.
#[derive(Debug, Clone, Default)]
pub struct BindParams {
    /// Backend-side reference of the uploaded input image.
    pub asset: String,
    /// Requested strength (sampler denoise), 0.0..=1.0.
    pub strength: Option<f64>,
    /// Pin the sampler seed instead of drawing a fresh one.
    pub seed: Option<u64>,
    /// Replacement for the positive prompt text.
    pub prompt: Option<String>,
    /// Selected facial regions.
    pub features: Vec<FeatureDescriptor>,
}

/// A fully parameterized graph, owned by the request that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct BoundGraph {
    pub template_id: String,
    pub graph: CanonicalGraph,
    pub seed: u64,
    pub asset: String,
    /// `filename_prefix` written into the output node.
    pub output_prefix: String,
    /// Sampler strength actually applied, if any was set.
    pub strength: Option<f64>,
    /// Positive prompt text, if the sampler's conditioning resolved to a
    /// text encoder.
    pub prompt: Option<String>,
}

/// Bind `params` into a fresh canonical copy of `template`'s graph.
pub fn bind(template: &WorkflowTemplate, params: &BindParams) -> Result<BoundGraph, GenerationError> {
    let mut graph = normalize_graph(template.graph())?.graph;
    let roles = template.roles();
    let template_id = template.id();

    let missing = |role: &str, id: &str| {
        GenerationError::InvalidTemplate(format!(
            "Template '{template_id}': {role} node '{id}' not found"
        ))
    };

    // -- image input --
    node_mut(&mut graph, &roles.image_input)
        .ok_or_else(|| missing("image input", &roles.image_input))?
        .inputs
        .insert("image".into(), Value::from(params.asset.clone()));

    // -- sampler --
    let seed = params
        .seed
        .unwrap_or_else(|| rand::rng().random_range(0..MAX_SEED));
    let strength = effective_strength(params);
    {
        let sampler = node_mut(&mut graph, &roles.sampler)
            .ok_or_else(|| missing("sampler", &roles.sampler))?;
        sampler.inputs.insert("seed".into(), Value::from(seed));
        if let Some(strength) = strength {
            sampler.inputs.insert("denoise".into(), Value::from(strength));
        }
    }

    // -- region selector --
    if let Some(region_id) = &roles.region_selector {
        let region = node_mut(&mut graph, region_id)
            .ok_or_else(|| missing("region selector", region_id))?;
        apply_features(region, &params.features);
    }

    // -- prompt --
    let prompt = bind_prompt(&mut graph, &roles.sampler, params.prompt.as_deref());

    // -- output --
    let output_prefix = format!(
        "{OUTPUT_PREFIX}_{template_id}_{}",
        chrono::Utc::now().timestamp_millis()
    );
    node_mut(&mut graph, &roles.output)
        .ok_or_else(|| missing("output", &roles.output))?
        .inputs
        .insert("filename_prefix".into(), Value::from(output_prefix.clone()));

    Ok(BoundGraph {
        template_id: template_id.to_string(),
        graph,
        seed,
        asset: params.asset.clone(),
        output_prefix,
        strength,
        prompt,
    })
}

/// A single feature's fixed override always beats the caller's strength.
pub fn effective_strength(params: &BindParams) -> Option<f64> {
    let override_strength = match params.features.as_slice() {
        [feature] => feature.strength_override,
        _ => None,
    };
    override_strength
        .or(params.strength)
        .map(|s| s.clamp(0.0, 1.0))
}

fn node_mut<'a>(graph: &'a mut CanonicalGraph, id: &str) -> Option<&'a mut CanonicalNode> {
    graph.get_mut(id)
}

fn apply_features(region: &mut CanonicalNode, features: &[FeatureDescriptor]) {
    match features {
        [] => {}
        [feature] => {
            region.inputs.insert("area".into(), Value::from(feature.region.clone()));
            region.inputs.insert("grow".into(), Value::from(feature.grow));
            region.inputs.insert("blur".into(), Value::from(feature.blur));
        }
        many => {
            let areas = many
                .iter()
                .map(|f| f.region.as_str())
                .collect::<Vec<_>>()
                .join(",");
            region.inputs.insert("area".into(), Value::from(areas));
        }
    }
}

/// Overwrite the positive prompt when the sampler's `positive` input is
/// wired to a text encoder. Returns the prompt text now in the graph.
fn bind_prompt(graph: &mut CanonicalGraph, sampler_id: &str, prompt: Option<&str>) -> Option<String> {
    let encoder_id = graph.linked_source(sampler_id, "positive")?.to_string();
    let encoder = graph
        .get_mut(&encoder_id)
        .filter(|node| node.class_type == CLIP_TEXT_ENCODE_CLASS)?;
    if let Some(text) = prompt {
        encoder.inputs.insert("text".into(), Value::from(text));
    }
    encoder
        .inputs
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::feature::FeatureCatalog;
    use crate::template::RoleMap;

    fn face_region_template() -> WorkflowTemplate {
        let graph = json!({
            "1": { "class_type": "LoadImage", "inputs": { "image": "placeholder.png" } },
            "2": { "class_type": "CheckpointLoaderSimple", "inputs": { "ckpt_name": "base.safetensors" } },
            "3": { "class_type": "CLIPTextEncode", "inputs": { "text": "natural skin", "clip": ["2", 1] } },
            "4": { "class_type": "FaceRegionMask", "inputs": { "image": ["1", 0], "area": "face" } },
            "5": { "class_type": "VAEEncode", "inputs": { "pixels": ["1", 0], "vae": ["2", 2] } },
            "6": { "class_type": "SetLatentNoiseMask", "inputs": { "samples": ["5", 0], "mask": ["4", 0] } },
            "7": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 1, "denoise": 0.3,
                    "model": ["2", 0], "positive": ["3", 0], "latent_image": ["6", 0]
                }
            },
            "8": { "class_type": "VAEDecode", "inputs": { "samples": ["7", 0], "vae": ["2", 2] } },
            "9": { "class_type": "SaveImage", "inputs": { "images": ["8", 0] } },
            "10": { "class_type": "Note", "inputs": { "text": "eyes need grow 8" } }
        });
        WorkflowTemplate::new(
            "faceRegion",
            graph,
            RoleMap {
                image_input: "1".into(),
                sampler: "7".into(),
                region_selector: Some("4".into()),
                output: "9".into(),
            },
        )
    }

    fn params() -> BindParams {
        BindParams {
            asset: "upload_abc.png".into(),
            strength: Some(0.8),
            ..Default::default()
        }
    }

    #[test]
    fn image_input_equals_supplied_asset() {
        let bound = bind(&face_region_template(), &params()).unwrap();
        assert_eq!(
            bound.graph.get("1").unwrap().inputs["image"],
            json!("upload_abc.png")
        );
        assert_eq!(bound.asset, "upload_abc.png");
    }

    #[test]
    fn rebinding_differs_only_in_seed_and_output_name() {
        let template = face_region_template();
        let mut a = bind(&template, &params()).unwrap().graph;
        let mut b = bind(&template, &params()).unwrap().graph;

        for graph in [&mut a, &mut b] {
            graph.get_mut("7").unwrap().inputs.remove("seed");
            graph.get_mut("9").unwrap().inputs.remove("filename_prefix");
        }
        assert_eq!(a, b);
    }

    #[test]
    fn pinned_seed_is_used() {
        let bound = bind(
            &face_region_template(),
            &BindParams {
                seed: Some(1234),
                ..params()
            },
        )
        .unwrap();
        assert_eq!(bound.seed, 1234);
        assert_eq!(bound.graph.get("7").unwrap().inputs["seed"], json!(1234));
    }

    #[test]
    fn eyes_feature_sets_region_and_forces_override_strength() {
        let catalog = FeatureCatalog::default();
        let eyes = catalog.get("eyes").unwrap().clone();
        let override_strength = eyes.strength_override.unwrap();

        for caller_strength in [Some(0.1), Some(0.95), None] {
            let bound = bind(
                &face_region_template(),
                &BindParams {
                    strength: caller_strength,
                    features: vec![eyes.clone()],
                    ..params()
                },
            )
            .unwrap();

            let region = &bound.graph.get("4").unwrap().inputs;
            assert_eq!(region["area"], json!("eyes"));
            assert_eq!(region["grow"], json!(8));
            assert_eq!(region["blur"], json!(4));
            assert_eq!(
                bound.graph.get("7").unwrap().inputs["denoise"],
                json!(override_strength)
            );
            assert_eq!(bound.strength, Some(override_strength));
        }
    }

    #[test]
    fn caller_strength_used_without_override() {
        let nose = FeatureCatalog::default().get("nose").unwrap().clone();
        let bound = bind(
            &face_region_template(),
            &BindParams {
                strength: Some(0.7),
                features: vec![nose],
                ..params()
            },
        )
        .unwrap();
        assert_eq!(bound.graph.get("7").unwrap().inputs["denoise"], json!(0.7));
    }

    #[test]
    fn strength_is_clamped() {
        let bound = bind(
            &face_region_template(),
            &BindParams {
                strength: Some(3.0),
                ..params()
            },
        )
        .unwrap();
        assert_eq!(bound.strength, Some(1.0));
    }

    #[test]
    fn template_strength_kept_when_none_given() {
        let bound = bind(
            &face_region_template(),
            &BindParams {
                strength: None,
                ..params()
            },
        )
        .unwrap();
        assert_eq!(bound.graph.get("7").unwrap().inputs["denoise"], json!(0.3));
        assert_eq!(bound.strength, None);
    }

    #[test]
    fn multiple_features_join_areas_and_ignore_overrides() {
        let catalog = FeatureCatalog::default();
        let features = catalog
            .resolve(&["eyes".to_string(), "lips".to_string()])
            .unwrap();
        let bound = bind(
            &face_region_template(),
            &BindParams {
                features,
                ..params()
            },
        )
        .unwrap();
        let region = &bound.graph.get("4").unwrap().inputs;
        assert_eq!(region["area"], json!("eyes,lips"));
        assert_eq!(region["grow"], json!(0));
        assert_eq!(bound.graph.get("7").unwrap().inputs["denoise"], json!(0.8));
    }

    #[test]
    fn no_features_leave_region_untouched() {
        let bound = bind(&face_region_template(), &params()).unwrap();
        assert_eq!(bound.graph.get("4").unwrap().inputs["area"], json!("face"));
    }

    #[test]
    fn output_prefix_is_stable_plus_timestamp() {
        let bound = bind(&face_region_template(), &params()).unwrap();
        assert!(bound.output_prefix.starts_with("photoforge_faceRegion_"));
        assert_eq!(
            bound.graph.get("9").unwrap().inputs["filename_prefix"],
            json!(bound.output_prefix)
        );
    }

    #[test]
    fn prompt_replaces_positive_text() {
        let bound = bind(
            &face_region_template(),
            &BindParams {
                prompt: Some("brighter eyes".into()),
                ..params()
            },
        )
        .unwrap();
        assert_eq!(bound.graph.get("3").unwrap().inputs["text"], json!("brighter eyes"));
        assert_eq!(bound.prompt.as_deref(), Some("brighter eyes"));
    }

    #[test]
    fn template_prompt_reported_when_not_overridden() {
        let bound = bind(&face_region_template(), &params()).unwrap();
        assert_eq!(bound.prompt.as_deref(), Some("natural skin"));
    }

    #[test]
    fn binding_never_mutates_stored_template() {
        let template = face_region_template();
        let before = template.graph().clone();
        let _ = bind(&template, &params()).unwrap();
        assert_eq!(template.graph(), &before);
    }

    #[test]
    fn annotation_node_absent_from_bound_graph() {
        let bound = bind(&face_region_template(), &params()).unwrap();
        assert!(!bound.graph.contains("10"));
    }

    #[test]
    fn missing_role_node_is_invalid_template() {
        let template = WorkflowTemplate::new(
            "broken",
            json!({ "1": { "class_type": "LoadImage", "inputs": {} } }),
            RoleMap {
                image_input: "1".into(),
                sampler: "7".into(),
                region_selector: None,
                output: "9".into(),
            },
        );
        assert_matches!(
            bind(&template, &params()),
            Err(GenerationError::InvalidTemplate(msg)) if msg.contains("sampler")
        );
    }

    #[test]
    fn role_node_that_is_an_annotation_is_invalid() {
        let template = WorkflowTemplate::new(
            "noted",
            json!({
                "1": { "class_type": "Note", "inputs": {} },
                "7": { "class_type": "KSampler", "inputs": {} },
                "9": { "class_type": "SaveImage", "inputs": {} }
            }),
            RoleMap {
                image_input: "1".into(),
                sampler: "7".into(),
                region_selector: None,
                output: "9".into(),
            },
        );
        assert_matches!(
            bind(&template, &params()),
            Err(GenerationError::InvalidTemplate(_))
        );
    }
}
