use serde::{Deserialize, Serialize};

/// A tool advertised by a server through `tools/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Wire shape of a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default)]
    pub structured_content: Option<serde_json::Value>,
}

impl CallToolResult {
    /// Split into the payload handed downstream, or the server's error text.
    pub fn into_payload(self) -> Result<ToolPayload, String> {
        let payload = ToolPayload {
            content: self.content,
            structured: self.structured_content,
        };
        if self.is_error {
            let text = payload.text();
            return Err(if text.is_empty() {
                "tool reported an error without details".to_string()
            } else {
                text
            });
        }
        Ok(payload)
    }
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    ResourceLink {
        uri: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Raw successful output of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl ToolPayload {
    /// Payload made of a single text block.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            structured: None,
        }
    }

    /// Payload carrying only structured content.
    pub fn from_structured(value: serde_json::Value) -> Self {
        Self {
            content: Vec::new(),
            structured: Some(value),
        }
    }

    /// Flatten all blocks to text; non-text blocks become bracketed markers.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::Image { mime_type } => Some(format!("[Image: {mime_type}]")),
                ContentBlock::Resource { resource } => Some(
                    resource
                        .text
                        .clone()
                        .unwrap_or_else(|| format!("[Resource: {}]", resource.uri)),
                ),
                ContentBlock::ResourceLink { uri } => Some(format!("[Resource: {uri}]")),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
