//! Tool catalog and tool result types.

use serde::{Deserialize, Serialize};

/// A tool advertised by a provider session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Descriptor with an empty object schema.
    pub fn without_parameters(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({ "type": "object", "properties": {} }),
        )
    }

    /// OpenAI-style `{"type": "function", "function": {...}}` definition.
    pub fn to_function_definition(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// One typed content block returned by a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        mime_type: String,
    },
    Resource {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(untagged)]
    Other(serde_json::Value),
}

/// Result of executing a tool on a provider session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    /// Output consisting of a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// First text-bearing content block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Resource {
                text: Some(text), ..
            } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Text to place in the tool message: the first text block, or the
    /// serialized content when the tool returned no text at all.
    pub fn into_message_content(self) -> String {
        if let Some(text) = self.first_text() {
            return text.to_owned();
        }
        serde_json::to_string(&self.content).unwrap_or_default()
    }
}
