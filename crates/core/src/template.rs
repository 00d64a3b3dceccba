//! Workflow templates and the store that loads them.
//!
//! A template directory holds one `<name>.json` graph per template, in
//! either graph encoding. An optional `<name>.roles.json` sidecar names the
//! nodes the binder writes into; without one the roles are inferred from
//! node class types.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::graph::{canonical_id, normalize_graph, CanonicalGraph};
use crate::node_catalog::{
    FACE_REGION_MASK_CLASS, KSAMPLER_CLASS, LOAD_IMAGE_CLASS, SAVE_IMAGE_CLASS,
};

/// Suffix of the optional role-map sidecar file.
const ROLES_SUFFIX: &str = ".roles.json";

/// Node IDs the binder injects runtime parameters into.
///
/// IDs read from a sidecar may be numbers or strings; both are coerced to
/// the canonical form used by [`CanonicalGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    #[serde(deserialize_with = "node_id")]
    pub image_input: String,
    #[serde(deserialize_with = "node_id")]
    pub sampler: String,
    #[serde(default, deserialize_with = "optional_node_id")]
    pub region_selector: Option<String>,
    #[serde(deserialize_with = "node_id")]
    pub output: String,
}

fn node_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    canonical_id(&value).ok_or_else(|| D::Error::custom(format!("invalid node id {value}")))
}

fn optional_node_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => canonical_id(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid node id {value}"))),
    }
}

/// A named, parameterized job graph. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    id: String,
    graph: Value,
    roles: RoleMap,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, graph: Value, roles: RoleMap) -> Self {
        Self {
            id: id.into(),
            graph,
            roles,
        }
    }

    /// Build a template whose role map is inferred from its class types.
    pub fn with_inferred_roles(id: impl Into<String>, graph: Value) -> Result<Self, CoreError> {
        let id = id.into();
        let normalized = normalize_graph(&graph)
            .map_err(|e| CoreError::Validation(format!("Template '{id}': {e}")))?;
        let roles = infer_roles(&normalized.graph)
            .map_err(|e| CoreError::Validation(format!("Template '{id}': {e}")))?;
        Ok(Self { id, graph, roles })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The graph exactly as stored, in its original encoding.
    pub fn graph(&self) -> &Value {
        &self.graph
    }

    pub fn roles(&self) -> &RoleMap {
        &self.roles
    }
}

/// Infer the role map from class types, lowest node ID first.
pub fn infer_roles(graph: &CanonicalGraph) -> Result<RoleMap, CoreError> {
    let first = |class_type: &str| {
        let mut ids = graph.ids_of_class(class_type);
        ids.sort_by(|a, b| node_id_order(a).cmp(&node_id_order(b)));
        ids.into_iter().next()
    };
    let required = |class_type: &str| {
        first(class_type).ok_or_else(|| {
            CoreError::Validation(format!("No '{class_type}' node to bind parameters into"))
        })
    };

    Ok(RoleMap {
        image_input: required(LOAD_IMAGE_CLASS)?,
        sampler: required(KSAMPLER_CLASS)?,
        region_selector: first(FACE_REGION_MASK_CLASS),
        output: required(SAVE_IMAGE_CLASS)?,
    })
}

/// Numeric IDs sort numerically and before textual ones.
fn node_id_order(id: &str) -> (u64, &str) {
    (id.parse::<u64>().unwrap_or(u64::MAX), id)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Read-only collection of templates, shared across requests.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, Arc<WorkflowTemplate>>,
}

impl TemplateStore {
    pub fn new(templates: impl IntoIterator<Item = WorkflowTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.id.clone(), Arc::new(t)))
                .collect(),
        }
    }

    /// Load every `<name>.json` template in `dir`.
    ///
    /// Files that fail to parse or lack a bindable node are logged and
    /// skipped; only an unreadable directory is an error.
    pub fn load_dir(dir: &Path) -> Result<Self, CoreError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CoreError::Internal(format!(
                "Failed to read template directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut templates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".json") || file_name.ends_with(ROLES_SUFFIX) {
                continue;
            }
            let name = file_name.trim_end_matches(".json").to_string();

            match load_template(dir, &name, &path) {
                Ok(template) => {
                    tracing::info!(template = %name, roles = ?template.roles, "Loaded template");
                    templates.push(template);
                }
                Err(e) => {
                    tracing::warn!(template = %name, error = %e, "Skipping template");
                }
            }
        }

        Ok(Self::new(templates))
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowTemplate>> {
        self.templates.get(name).cloned()
    }

    /// Template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn read_json(path: &Path) -> Result<Value, CoreError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Internal(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| CoreError::Validation(format!("Invalid JSON in {}: {e}", path.display())))
}

fn load_template(dir: &Path, name: &str, path: &Path) -> Result<WorkflowTemplate, CoreError> {
    let graph = read_json(path)?;
    let roles_path = dir.join(format!("{name}{ROLES_SUFFIX}"));
    if !roles_path.exists() {
        return WorkflowTemplate::with_inferred_roles(name, graph);
    }

    let roles: RoleMap = serde_json::from_value(read_json(&roles_path)?).map_err(|e| {
        CoreError::Validation(format!("Invalid role map {}: {e}", roles_path.display()))
    })?;
    let normalized = normalize_graph(&graph)
        .map_err(|e| CoreError::Validation(format!("Template '{name}': {e}")))?;
    for id in [&roles.image_input, &roles.sampler, &roles.output]
        .into_iter()
        .chain(roles.region_selector.as_ref())
    {
        if !normalized.graph.contains(id) {
            return Err(CoreError::Validation(format!(
                "Template '{name}': role node '{id}' not in graph"
            )));
        }
    }
    Ok(WorkflowTemplate::new(name, graph, roles))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn face_graph() -> Value {
        json!({
            "10": { "class_type": "LoadImage", "inputs": { "image": "x.png" } },
            "2": { "class_type": "LoadImage", "inputs": { "image": "y.png" } },
            "3": { "class_type": "KSampler", "inputs": {} },
            "4": { "class_type": "FaceRegionMask", "inputs": {} },
            "9": { "class_type": "SaveImage", "inputs": {} }
        })
    }

    #[test]
    fn infers_roles_with_numeric_ordering() {
        let template = WorkflowTemplate::with_inferred_roles("face", face_graph()).unwrap();
        assert_eq!(
            template.roles(),
            &RoleMap {
                image_input: "2".into(),
                sampler: "3".into(),
                region_selector: Some("4".into()),
                output: "9".into(),
            }
        );
    }

    #[test]
    fn inference_fails_without_sampler() {
        let graph = json!({
            "1": { "class_type": "LoadImage", "inputs": {} },
            "2": { "class_type": "SaveImage", "inputs": {} }
        });
        assert_matches!(
            WorkflowTemplate::with_inferred_roles("bad", graph),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn load_dir_reads_templates_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("faceRegion.json"),
            serde_json::to_string(&face_graph()).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("faceRegion.roles.json"),
            r#"{"image_input":"10","sampler":"3","region_selector":"4","output":"9"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let store = TemplateStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.names(), vec!["faceRegion"]);
        let template = store.get("faceRegion").unwrap();
        assert_eq!(template.roles().image_input, "10");
    }

    #[test]
    fn sidecar_ids_are_canonicalized() {
        let graph = json!({
            "nodes": [
                { "id": 1, "type": "LoadImage", "widgets_values": ["a.png", "image"] },
                { "id": 3, "type": "KSampler", "widgets_values": [5, "fixed", 20, 7.0, "euler", "normal", 0.6] },
                { "id": 9, "type": "SaveImage", "widgets_values": ["out"] }
            ],
            "links": []
        });
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("arr.json"), graph.to_string()).unwrap();
        std::fs::write(
            dir.path().join("arr.roles.json"),
            r#"{"image_input": 1, "sampler": "3.0", "region_selector": null, "output": 9.0}"#,
        )
        .unwrap();

        let store = TemplateStore::load_dir(dir.path()).unwrap();
        let template = store.get("arr").unwrap();
        assert_eq!(
            template.roles(),
            &RoleMap {
                image_input: "1".into(),
                sampler: "3".into(),
                region_selector: None,
                output: "9".into(),
            }
        );
    }

    #[test]
    fn sidecar_with_non_scalar_id_is_rejected() {
        let roles: Result<RoleMap, _> = serde_json::from_value(json!({
            "image_input": ["1"], "sampler": "3", "output": "9"
        }));
        assert!(roles.is_err());
    }

    #[test]
    fn sidecar_with_unknown_node_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("t.json"),
            serde_json::to_string(&face_graph()).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("t.roles.json"),
            r#"{"image_input":"77","sampler":"3","output":"9"}"#,
        )
        .unwrap();

        let store = TemplateStore::load_dir(dir.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert_matches!(
            TemplateStore::load_dir(Path::new("/definitely/not/here")),
            Err(CoreError::Internal(_))
        );
    }

    #[test]
    fn get_returns_shared_instance() {
        let store = TemplateStore::new([WorkflowTemplate::with_inferred_roles(
            "face",
            face_graph(),
        )
        .unwrap()]);
        let a = store.get("face").unwrap();
        let b = store.get("face").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.get("other").is_none());
    }
}
