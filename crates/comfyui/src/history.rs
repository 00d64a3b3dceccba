//! Typed view of ComfyUI's `/history/{prompt_id}` payload.

use std::collections::BTreeMap;

use serde::Deserialize;

/// One prompt's record in the history map.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Outputs produced by a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputImage>,
}

/// A file reference usable with `/view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

impl HistoryEntry {
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str == "error")
    }

    pub fn is_success(&self) -> bool {
        match &self.status {
            Some(s) => s.status_str == "success" || (s.completed && s.status_str != "error"),
            // Older servers omit `status`; outputs alone mean it finished.
            None => !self.outputs.is_empty(),
        }
    }

    /// Human-readable reason from the `execution_error` message, if any.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status
            .messages
            .iter()
            .find(|(event, _)| event == "execution_error")
            .map(|(_, payload)| {
                let node_type = payload
                    .get("node_type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown node");
                let message = payload
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("execution error");
                format!("{node_type}: {}", message.trim())
            })
    }

    /// First saved image in node ID order. Preview images (`type: temp`)
    /// are only used when nothing was saved.
    pub fn first_image(&self) -> Option<&OutputImage> {
        let mut images = self.outputs.values().flat_map(|out| out.images.iter());
        let fallback = images.clone().next();
        images.find(|img| img.kind == "output").or(fallback)
    }
}
