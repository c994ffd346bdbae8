// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Replays an event log into provider-shaped input.
//!
//! Two shapes, identical signatures: [`rebuild_messages`] (legacy chat-turns)
//! and [`rebuild_responses_input`] (responses-style items). Both walk the
//! log from the tail, accumulating a byte budget, stopping at either the
//! event-count cap or the byte cap, then reverse for chronological order.
//! Both substitute [`COMPACTED_PLACEHOLDER`] for any tool result whose
//! `tool_use_id` has a later `tool.output.compacted` marker.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentrt_model::{FunctionCall, Message, MessageContent, Role};

use crate::event_log::{Event, StoredEvent, COMPACTED_PLACEHOLDER};

/// One legacy chat-turn message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Plain {
        role: String,
        content: String,
    },
    AssistantToolCalls {
        role: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        tool_calls: Vec<ChatToolCall>,
    },
    ToolResult {
        role: String,
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One responses-protocol item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesItem {
    Message {
        role: String,
        content: String,
    },
    FunctionCall {
        #[serde(rename = "type")]
        kind: String,
        call_id: String,
        name: String,
        arguments: Value,
    },
    FunctionCallOutput {
        #[serde(rename = "type")]
        kind: String,
        call_id: String,
        output: String,
    },
}

impl ResponsesItem {
    pub fn function_call(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ResponsesItem::FunctionCall {
            kind: "function_call".to_string(),
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ResponsesItem::FunctionCallOutput {
            kind: "function_call_output".to_string(),
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

/// The set of `tool_use_id`s that have a `tool.output.compacted` marker
/// anywhere later in the full (untruncated) log — computed once up front so
/// the tail-walk below doesn't need to look ahead.
fn compacted_ids(events: &[StoredEvent]) -> HashSet<&str> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            Event::ToolOutputCompacted { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect()
}

/// A window of events selected from the tail, within `max_events` and
/// `max_bytes`, returned in chronological order. Byte size is measured on
/// each event's JSON-encoded form, which is a stable, cheap-to-compute proxy
/// for what actually gets sent over the wire.
fn select_window(events: &[StoredEvent], max_events: usize, max_bytes: usize) -> Vec<&StoredEvent> {
    let mut selected = Vec::new();
    let mut bytes = 0usize;
    for event in events.iter().rev() {
        if selected.len() >= max_events {
            break;
        }
        let encoded_len = serde_json::to_string(event).map(|s| s.len()).unwrap_or(0);
        if bytes + encoded_len > max_bytes && !selected.is_empty() {
            break;
        }
        bytes += encoded_len;
        selected.push(event);
    }
    selected.reverse();
    selected
}

fn tool_output_text(output: &Value, tool_use_id: &str, compacted: &HashSet<&str>) -> String {
    if compacted.contains(tool_use_id) {
        COMPACTED_PLACEHOLDER.to_string()
    } else {
        match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Produce legacy chat-turns: `[ {role, content} | {role, tool_calls} | {role, tool_call_id, content} ]`.
///
/// Per the invariant that each assistant turn producing tool calls emits
/// exactly one assistant placeholder carrying all of that turn's tool calls
/// followed by their results, consecutive `tool.use` events (i.e. not
/// separated by an `assistant.message`/`assistant.delta`) are grouped into a
/// single `AssistantToolCalls` message.
pub fn rebuild_messages(events: &[StoredEvent], max_events: usize, max_bytes: usize) -> Vec<ChatMessage> {
    let compacted = compacted_ids(events);
    let window = select_window(events, max_events, max_bytes);

    let mut out = Vec::new();
    let mut pending_calls: Vec<ChatToolCall> = Vec::new();

    let flush_pending = |out: &mut Vec<ChatMessage>, pending: &mut Vec<ChatToolCall>| {
        if !pending.is_empty() {
            out.push(ChatMessage::AssistantToolCalls {
                role: "assistant".to_string(),
                content: None,
                tool_calls: std::mem::take(pending),
            });
        }
    };

    for stored in &window {
        match &stored.event {
            Event::UserMessage { text } => {
                flush_pending(&mut out, &mut pending_calls);
                out.push(ChatMessage::Plain {
                    role: "user".to_string(),
                    content: text.clone(),
                });
            }
            Event::AssistantMessage { text, .. } => {
                flush_pending(&mut out, &mut pending_calls);
                out.push(ChatMessage::Plain {
                    role: "assistant".to_string(),
                    content: text.clone(),
                });
            }
            Event::ToolUse { tool_use_id, name, input } => {
                pending_calls.push(ChatToolCall {
                    id: tool_use_id.clone(),
                    name: name.clone(),
                    arguments: input.clone(),
                });
            }
            Event::ToolResult {
                tool_use_id, output, ..
            } => {
                flush_pending(&mut out, &mut pending_calls);
                out.push(ChatMessage::ToolResult {
                    role: "tool".to_string(),
                    tool_call_id: tool_use_id.clone(),
                    content: tool_output_text(output, tool_use_id, &compacted),
                });
            }
            _ => {}
        }
    }
    flush_pending(&mut out, &mut pending_calls);
    out
}

/// Produce responses-style items, emitting `function_call` +
/// `function_call_output` items around each `tool.use`/`tool.result` pair.
pub fn rebuild_responses_input(
    events: &[StoredEvent],
    max_events: usize,
    max_bytes: usize,
) -> Vec<ResponsesItem> {
    let compacted = compacted_ids(events);
    let window = select_window(events, max_events, max_bytes);

    let mut out = Vec::new();
    for stored in &window {
        match &stored.event {
            Event::UserMessage { text } => out.push(ResponsesItem::Message {
                role: "user".to_string(),
                content: text.clone(),
            }),
            Event::AssistantMessage { text, .. } => out.push(ResponsesItem::Message {
                role: "assistant".to_string(),
                content: text.clone(),
            }),
            Event::ToolUse { tool_use_id, name, input } => {
                out.push(ResponsesItem::function_call(tool_use_id.clone(), name.clone(), input.clone()));
            }
            Event::ToolResult { tool_use_id, output, .. } => {
                out.push(ResponsesItem::function_call_output(
                    tool_use_id.clone(),
                    tool_output_text(output, tool_use_id, &compacted),
                ));
            }
            _ => {}
        }
    }
    out
}

/// Replay a session's event log into `agentrt_model::Message`s, suitable for
/// seeding a resumed [`crate::session::Session`]. One `Message` per tool call
/// (mirroring how the agent loop pushes them live, never grouped), so a
/// resumed session's history is indistinguishable from one built turn by turn.
pub fn rebuild_session_messages(
    events: &[StoredEvent],
    max_events: usize,
    max_bytes: usize,
) -> Vec<Message> {
    rebuild_messages(events, max_events, max_bytes)
        .into_iter()
        .flat_map(|m| -> Vec<Message> {
            match m {
                ChatMessage::Plain { role, content } => vec![Message {
                    role: role_from_str(&role),
                    content: MessageContent::Text(content),
                }],
                ChatMessage::ToolResult { tool_call_id, content, .. } => {
                    vec![Message::tool_result(tool_call_id, content)]
                }
                ChatMessage::AssistantToolCalls { tool_calls, .. } => tool_calls
                    .into_iter()
                    .map(|tc| Message {
                        role: Role::Assistant,
                        content: MessageContent::ToolCall {
                            tool_call_id: tc.id,
                            function: FunctionCall {
                                name: tc.name,
                                arguments: tc.arguments.to_string(),
                            },
                        },
                    })
                    .collect(),
            }
        })
        .collect()
}

fn role_from_str(role: &str) -> Role {
    match role {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::System,
    }
}
