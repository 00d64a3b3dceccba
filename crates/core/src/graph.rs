//! Canonical job graph and normalization of the two ComfyUI encodings.
//!
//! Templates arrive either as a UI export (an ordered node array with
//! positional widget values and a separate link table) or in API format (a
//! map keyed by node ID with named inputs). [`normalize_graph`] turns both
//! into a [`CanonicalGraph`] so nothing downstream has to care which one a
//! template used.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GenerationError;
use crate::node_catalog::{self, REROUTE_CLASS};

/// Editor mode values for muted and bypassed nodes.
const MODE_NEVER: u64 = 2;
const MODE_BYPASS: u64 = 4;

/// Upper bound on reroute hops followed while resolving a link.
const MAX_REROUTE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Canonical graph
// ---------------------------------------------------------------------------

/// One executable node in API shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNode {
    pub class_type: String,
    pub inputs: Map<String, Value>,
}

/// Node map keyed by canonical node ID.
///
/// Serializes to exactly the ComfyUI API prompt format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalGraph {
    nodes: BTreeMap<String, CanonicalNode>,
}

impl CanonicalGraph {
    pub fn get(&self, id: &str) -> Option<&CanonicalNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CanonicalNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CanonicalNode)> {
        self.nodes.iter()
    }

    /// IDs of every node with the given class type, in ID order.
    pub fn ids_of_class(&self, class_type: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.class_type == class_type)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Follow a link-valued input (`[node_id, slot]`) to its source node ID.
    pub fn linked_source(&self, node_id: &str, input: &str) -> Option<&str> {
        let value = self.nodes.get(node_id)?.inputs.get(input)?;
        match value.as_array()?.as_slice() {
            [Value::String(source), slot] if slot.is_u64() => Some(source.as_str()),
            _ => None,
        }
    }

    /// Insert a node unless the ID is taken. Returns whether it was inserted.
    fn insert_first(&mut self, id: String, node: CanonicalNode) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(id, node);
        true
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Which encoding a raw template graph used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphEncoding {
    NodeArray,
    NodeMap,
}

/// Outcome of normalizing a raw graph.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub graph: CanonicalGraph,
    pub encoding: GraphEncoding,
    /// Entries skipped for a missing ID or type tag, a malformed input set,
    /// or an ID collision.
    pub invalid_nodes: usize,
    /// Editor-only nodes (notes, primitives, reroutes, groups) that were dropped.
    pub skipped_annotations: usize,
}

/// Normalize a raw template graph into canonical form.
///
/// Fails only when the value is neither encoding or when no executable node
/// survives; individual malformed entries are skipped and counted.
pub fn normalize_graph(raw: &Value) -> Result<Normalized, GenerationError> {
    let normalized = match raw {
        Value::Array(nodes) => normalize_node_array(nodes, None),
        Value::Object(obj) => match obj.get("nodes") {
            Some(Value::Array(nodes)) => {
                let links = obj.get("links").and_then(Value::as_array);
                normalize_node_array(nodes, links)
            }
            _ => normalize_node_map(obj),
        },
        _ => {
            return Err(GenerationError::InvalidTemplate(
                "Graph must be a node array or a node map".to_string(),
            ))
        }
    };

    if normalized.invalid_nodes > 0 {
        tracing::warn!(
            invalid_nodes = normalized.invalid_nodes,
            encoding = ?normalized.encoding,
            "Skipped malformed nodes while normalizing graph",
        );
    }

    if normalized.graph.is_empty() {
        return Err(GenerationError::InvalidTemplate(
            "Graph contains no executable nodes".to_string(),
        ));
    }

    Ok(normalized)
}

/// Coerce a node ID to its canonical textual form.
///
/// Integers and integer-valued floats become plain decimal digits; strings
/// are trimmed (and collapsed the same way when they spell an integral
/// number). Anything else has no canonical form.
pub fn canonical_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed.contains('.') {
                if let Ok(f) = trimmed.parse::<f64>() {
                    if let Some(id) = integral_float(f) {
                        return Some(id);
                    }
                }
            }
            Some(trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().and_then(integral_float)
            }
        }
        _ => None,
    }
}

fn integral_float(f: f64) -> Option<String> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        Some(format!("{}", f as i64))
    } else {
        None
    }
}

/// Start an input set from the type's defaults, if the type is known.
fn base_inputs(class_type: &str) -> Map<String, Value> {
    node_catalog::lookup(class_type)
        .map(|spec| spec.default_inputs())
        .unwrap_or_default()
}

/// Rewrite `[source, slot]` link values so the source uses the canonical ID.
fn canonicalize_links(inputs: &mut Map<String, Value>) {
    for value in inputs.values_mut() {
        if let Value::Array(arr) = value {
            if arr.len() == 2 && arr[1].is_u64() {
                if let Some(source) = canonical_id(&arr[0]) {
                    arr[0] = Value::String(source);
                }
            }
        }
    }
}

fn class_type_of<'a>(node: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| node.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---- node map (API format) ----

fn normalize_node_map(obj: &Map<String, Value>) -> Normalized {
    let mut graph = CanonicalGraph::default();
    let mut invalid_nodes = 0;
    let mut skipped_annotations = 0;

    for (key, node) in obj {
        let Some(id) = canonical_id(&Value::String(key.clone())) else {
            invalid_nodes += 1;
            continue;
        };
        let Some(class_type) = class_type_of(node, &["class_type"]) else {
            invalid_nodes += 1;
            continue;
        };
        if node_catalog::is_annotation(class_type) {
            skipped_annotations += 1;
            continue;
        }

        let mut inputs = base_inputs(class_type);
        match node.get("inputs") {
            None | Some(Value::Null) => {}
            Some(Value::Object(explicit)) => {
                inputs.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(_) => {
                invalid_nodes += 1;
                continue;
            }
        }
        canonicalize_links(&mut inputs);

        let node = CanonicalNode {
            class_type: class_type.to_string(),
            inputs,
        };
        if !graph.insert_first(id, node) {
            invalid_nodes += 1;
        }
    }

    Normalized {
        graph,
        encoding: GraphEncoding::NodeMap,
        invalid_nodes,
        skipped_annotations,
    }
}

// ---- node array (UI export) ----

/// Source end of one entry in the UI link table.
#[derive(Debug, Clone)]
struct LinkSource {
    node: String,
    slot: u64,
}

/// Parse the UI link table. Entries are either
/// `[id, origin_id, origin_slot, target_id, target_slot, type]` or objects
/// with `id`, `origin_id` and `origin_slot`.
fn parse_links(links: &[Value]) -> HashMap<String, LinkSource> {
    let mut table = HashMap::new();
    for link in links {
        let parts = match link {
            Value::Array(arr) if arr.len() >= 3 => Some((&arr[0], &arr[1], &arr[2])),
            Value::Object(obj) => match (obj.get("id"), obj.get("origin_id"), obj.get("origin_slot")) {
                (Some(id), Some(origin), Some(slot)) => Some((id, origin, slot)),
                _ => None,
            },
            _ => None,
        };
        let Some((id, origin, slot)) = parts else {
            continue;
        };
        if let (Some(id), Some(node), Some(slot)) =
            (canonical_id(id), canonical_id(origin), slot.as_u64())
        {
            table.insert(id, LinkSource { node, slot });
        }
    }
    table
}

/// Everything needed to resolve a link through editor-only nodes.
struct LinkResolver<'a> {
    links: HashMap<String, LinkSource>,
    /// Class type of every node in the array, by canonical ID.
    classes: HashMap<String, &'a str>,
    /// Incoming link of each reroute node.
    reroute_inputs: HashMap<String, String>,
}

impl<'a> LinkResolver<'a> {
    fn new(nodes: &'a [Value], links: Option<&Vec<Value>>) -> Self {
        let links = links.map(|l| parse_links(l)).unwrap_or_default();
        let mut classes = HashMap::new();
        let mut reroute_inputs = HashMap::new();

        for node in nodes {
            let (Some(id), Some(class_type)) = (
                node.get("id").and_then(canonical_id),
                class_type_of(node, &["type", "class_type"]),
            ) else {
                continue;
            };
            if class_type == REROUTE_CLASS {
                let incoming = node
                    .get("inputs")
                    .and_then(Value::as_array)
                    .and_then(|inputs| inputs.first())
                    .and_then(|input| input.get("link"))
                    .and_then(canonical_id);
                if let Some(link_id) = incoming {
                    reroute_inputs.insert(id.clone(), link_id);
                }
            }
            classes.entry(id).or_insert(class_type);
        }

        Self {
            links,
            classes,
            reroute_inputs,
        }
    }

    /// Resolve a link ID to an executable source, walking through reroutes.
    /// Links fed by primitives resolve to `None`: the target keeps the
    /// widget value the primitive wrote into it.
    fn resolve(&self, link_id: &str) -> Option<Value> {
        let mut source = self.links.get(link_id)?.clone();
        for _ in 0..MAX_REROUTE_DEPTH {
            match self.classes.get(&source.node).copied() {
                Some(REROUTE_CLASS) => {
                    let upstream = self.reroute_inputs.get(&source.node)?;
                    source = self.links.get(upstream)?.clone();
                }
                Some(class_type) if node_catalog::is_annotation(class_type) => return None,
                _ => return Some(Value::Array(vec![Value::String(source.node), source.slot.into()])),
            }
        }
        None
    }
}

fn normalize_node_array(nodes: &[Value], links: Option<&Vec<Value>>) -> Normalized {
    let resolver = LinkResolver::new(nodes, links);
    let mut graph = CanonicalGraph::default();
    let mut invalid_nodes = 0;
    let mut skipped_annotations = 0;

    for node in nodes {
        let (Some(id), Some(class_type)) = (
            node.get("id").and_then(canonical_id),
            class_type_of(node, &["type", "class_type"]),
        ) else {
            invalid_nodes += 1;
            continue;
        };
        if node_catalog::is_annotation(class_type) {
            skipped_annotations += 1;
            continue;
        }
        if matches!(
            node.get("mode").and_then(Value::as_u64),
            Some(MODE_NEVER | MODE_BYPASS)
        ) {
            continue;
        }

        let mut inputs = base_inputs(class_type);

        match node.get("widgets_values") {
            Some(Value::Array(values)) => {
                if let Some(spec) = node_catalog::lookup(class_type) {
                    inputs.extend(spec.named_widgets(values));
                }
            }
            Some(Value::Object(named)) => {
                inputs.extend(named.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            _ => {}
        }

        match node.get("inputs") {
            None | Some(Value::Null) => {}
            Some(Value::Array(slots)) => {
                for slot in slots {
                    let (Some(name), Some(link_id)) = (
                        slot.get("name").and_then(Value::as_str),
                        slot.get("link").and_then(canonical_id),
                    ) else {
                        continue;
                    };
                    if let Some(source) = resolver.resolve(&link_id) {
                        inputs.insert(name.to_string(), source);
                    }
                }
            }
            Some(Value::Object(named)) => {
                inputs.extend(named.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(_) => {
                invalid_nodes += 1;
                continue;
            }
        }
        canonicalize_links(&mut inputs);

        let node = CanonicalNode {
            class_type: class_type.to_string(),
            inputs,
        };
        if !graph.insert_first(id, node) {
            invalid_nodes += 1;
        }
    }

    Normalized {
        graph,
        encoding: GraphEncoding::NodeArray,
        invalid_nodes,
        skipped_annotations,
    }
}
