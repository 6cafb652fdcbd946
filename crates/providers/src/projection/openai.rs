//! Chat Completions wire format (OpenAI-compatible).
//!
//! Outbound rules:
//! - the system prompt is always the first message;
//! - tool-role messages carry `tool_call_id`;
//! - assistant `tool_use` blocks become the `tool_calls` array, with
//!   arguments serialized to a JSON string;
//! - `tool_result` blocks in a user message become tool-role messages;
//! - other blocks flatten per part: text passes through, images become data
//!   URIs, documents become extracted text or a placeholder;
//! - one text part collapses to a plain string, no parts to `""`.

use localforge_core::message::{Content, ContentBlock, Message, Role};
use localforge_core::provider::ToolSpec;
use serde::{Deserialize, Serialize};

use super::document;
use crate::tool_input::parse_tool_input;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: Option<ApiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(ApiContent::Text(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiContent {
    Text(String),
    Parts(Vec<ApiContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ApiFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ApiFunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Project internal history onto the Chat Completions shape.
pub fn to_wire(system: &str, messages: &[Message]) -> Vec<ApiMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ApiMessage::text("system", system));

    for msg in messages {
        match (msg.role, &msg.content) {
            (Role::Tool, content) => out.push(ApiMessage {
                role: "tool".into(),
                content: Some(ApiContent::Text(content.text())),
                tool_calls: None,
                tool_call_id: msg.tool_call_id.clone(),
            }),
            (role, Content::Text(text)) => out.push(ApiMessage::text(role.as_str(), text.clone())),
            (Role::Assistant, Content::Blocks(blocks)) => out.push(assistant_to_wire(blocks)),
            (Role::User, Content::Blocks(blocks)) => user_to_wire(blocks, &mut out),
        }
    }

    out
}

fn assistant_to_wire(blocks: &[ContentBlock]) -> ApiMessage {
    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolUse { id, name, input } => calls.push(ApiToolCall {
                id: id.clone(),
                kind: "function".into(),
                function: ApiFunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            other => {
                if let Some(ApiContentPart::Text { text: t }) = part_to_wire(other) {
                    text.push_str(&t);
                }
            }
        }
    }

    if calls.is_empty() {
        return ApiMessage::text("assistant", text);
    }
    ApiMessage {
        role: "assistant".into(),
        content: if text.is_empty() {
            None
        } else {
            Some(ApiContent::Text(text))
        },
        tool_calls: Some(calls),
        tool_call_id: None,
    }
}

fn user_to_wire(blocks: &[ContentBlock], out: &mut Vec<ApiMessage>) {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } => out.push(ApiMessage {
                role: "tool".into(),
                content: Some(ApiContent::Text(content.clone())),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
            }),
            other => parts.extend(part_to_wire(other)),
        }
    }

    let only_tool_results = parts.is_empty() && !blocks.is_empty();
    if !only_tool_results {
        out.push(ApiMessage {
            role: "user".into(),
            content: Some(collapse(parts)),
            tool_calls: None,
            tool_call_id: None,
        });
    }
}

fn part_to_wire(block: &ContentBlock) -> Option<ApiContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ApiContentPart::Text { text: text.clone() }),
        ContentBlock::Image { mime, data } => Some(ApiContentPart::ImageUrl {
            image_url: ImageUrl {
                url: document::data_uri(mime, data),
            },
        }),
        ContentBlock::Document { mime, data, name } => Some(ApiContentPart::Text {
            text: document::extract_text(mime, data, name.as_deref()),
        }),
        ContentBlock::ToolResult { content, .. } => Some(ApiContentPart::Text {
            text: content.clone(),
        }),
        ContentBlock::ToolUse { .. } => None,
    }
}

fn collapse(parts: Vec<ApiContentPart>) -> ApiContent {
    match parts.as_slice() {
        [] => ApiContent::Text(String::new()),
        [ApiContentPart::Text { text }] => ApiContent::Text(text.clone()),
        _ => ApiContent::Parts(parts),
    }
}

/// Rebuild internal messages from the Chat Completions shape. The system
/// message, if present, is returned separately.
pub fn from_wire(messages: &[ApiMessage]) -> (Option<String>, Vec<Message>) {
    let mut system = None;
    let mut out = Vec::new();

    for msg in messages {
        match msg.role.as_str() {
            "system" => system = msg.content.as_ref().map(content_text),
            "tool" => out.push(Message::tool(
                msg.tool_call_id.clone().unwrap_or_default(),
                msg.content.as_ref().map(content_text).unwrap_or_default(),
            )),
            "assistant" => out.push(assistant_from_wire(msg)),
            _ => out.push(Message::user(match &msg.content {
                Some(ApiContent::Parts(parts)) => {
                    Content::Blocks(parts.iter().map(part_from_wire).collect())
                }
                Some(ApiContent::Text(text)) => Content::Text(text.clone()),
                None => Content::Text(String::new()),
            })),
        }
    }

    (system, out)
}

fn assistant_from_wire(msg: &ApiMessage) -> Message {
    let text = msg.content.as_ref().map(content_text).unwrap_or_default();
    let Some(calls) = msg.tool_calls.as_ref().filter(|c| !c.is_empty()) else {
        return Message::assistant(text);
    };

    let mut blocks = Vec::with_capacity(calls.len() + 1);
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    for call in calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_tool_input(&call.function.arguments),
        });
    }
    Message::assistant(blocks)
}

fn part_from_wire(part: &ApiContentPart) -> ContentBlock {
    match part {
        ApiContentPart::Text { text } => ContentBlock::text(text.clone()),
        ApiContentPart::ImageUrl { image_url } => match document::parse_data_uri(&image_url.url) {
            Some((mime, data)) => ContentBlock::Image { mime, data },
            None => ContentBlock::text(image_url.url.clone()),
        },
    }
}

fn content_text(content: &ApiContent) -> String {
    match content {
        ApiContent::Text(text) => text.clone(),
        ApiContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ApiContentPart::Text { text } => Some(text.as_str()),
                ApiContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

pub fn tools_to_wire(tools: &[ToolSpec]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            kind: "function".into(),
            function: ApiFunctionDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}
