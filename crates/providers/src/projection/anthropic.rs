//! Messages API wire format (content blocks).
//!
//! Outbound: tool-role messages become a user message wrapping one
//! `tool_result` block; assistant block lists pass through in order (text
//! first, then one `tool_use` per call as the loop builds them); images and
//! documents become base64 `source` objects. Inbound reverses the mapping.

use localforge_core::message::{Content, ContentBlock, Message, Role};
use localforge_core::provider::ToolSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Image {
        source: MediaSource,
    },
    Document {
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl MediaSource {
    fn base64(mime: &str, data: &str) -> Self {
        Self {
            kind: "base64".into(),
            media_type: mime.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Project internal history onto the Messages API shape.
pub fn to_wire(messages: &[Message]) -> Vec<AnthropicMessage> {
    messages.iter().map(message_to_wire).collect()
}

fn message_to_wire(msg: &Message) -> AnthropicMessage {
    match msg.role {
        Role::Tool => AnthropicMessage {
            role: "user".into(),
            content: AnthropicContent::Blocks(vec![AnthropicBlock::ToolResult {
                tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                content: msg.content.text(),
            }]),
        },
        Role::User | Role::Assistant => AnthropicMessage {
            role: msg.role.as_str().into(),
            content: match &msg.content {
                Content::Text(text) => AnthropicContent::Text(text.clone()),
                Content::Blocks(blocks) => {
                    let wire: Vec<AnthropicBlock> =
                        blocks.iter().filter_map(block_to_wire).collect();
                    if wire.is_empty() {
                        AnthropicContent::Text(String::new())
                    } else {
                        AnthropicContent::Blocks(wire)
                    }
                }
            },
        },
    }
}

fn block_to_wire(block: &ContentBlock) -> Option<AnthropicBlock> {
    Some(match block {
        // The API rejects empty text blocks.
        ContentBlock::Text { text } if text.is_empty() => return None,
        ContentBlock::Text { text } => AnthropicBlock::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, input } => AnthropicBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => AnthropicBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
        },
        ContentBlock::Image { mime, data } => AnthropicBlock::Image {
            source: MediaSource::base64(mime, data),
        },
        ContentBlock::Document { mime, data, name } => AnthropicBlock::Document {
            source: MediaSource::base64(mime, data),
            title: name.clone(),
        },
    })
}

/// Rebuild internal messages from the Messages API shape.
pub fn from_wire(messages: &[AnthropicMessage]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| {
            let role = if m.role == "assistant" {
                Role::Assistant
            } else {
                Role::User
            };
            let content = match &m.content {
                AnthropicContent::Text(text) => Content::Text(text.clone()),
                AnthropicContent::Blocks(blocks) => {
                    Content::Blocks(blocks.iter().map(block_from_wire).collect())
                }
            };
            Message::new(role, content)
        })
        .collect()
}

fn block_from_wire(block: &AnthropicBlock) -> ContentBlock {
    match block {
        AnthropicBlock::Text { text } => ContentBlock::text(text.clone()),
        AnthropicBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        AnthropicBlock::ToolResult {
            tool_use_id,
            content,
        } => ContentBlock::tool_result(tool_use_id.clone(), content.clone()),
        AnthropicBlock::Image { source } => ContentBlock::Image {
            mime: source.media_type.clone(),
            data: source.data.clone(),
        },
        AnthropicBlock::Document { source, title } => ContentBlock::Document {
            mime: source.media_type.clone(),
            data: source.data.clone(),
            name: title.clone(),
        },
    }
}

pub fn tools_to_wire(tools: &[ToolSpec]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}
