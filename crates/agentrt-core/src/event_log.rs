// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The persisted, tagged event union.
//!
//! Every event written to a session's `events.jsonl` is one of these
//! variants. `seq`/`ts` are stamped by the session store on append, not by
//! the caller, so they live in [`StoredEvent`] rather than [`Event`] itself.
//! Unlike [`crate::AgentEvent`] (live per-turn UI deltas), these are durable:
//! replaying them reconstructs the full transcript.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Fixed placeholder substituted for any tool output whose `tool_use_id` has
/// a later `tool.output.compacted` marker.
pub const COMPACTED_PLACEHOLDER: &str = "[tool output pruned to save context]";

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    #[error("malformed event record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One event in a session's append-only log, tagged by `type`.
///
/// Readers must reject unknown tags — see [`StoredEvent::decode_line`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "system.init")]
    SystemInit {
        session_id: String,
        cwd: String,
        sdk_version: String,
        enabled_tools: Vec<String>,
        enabled_providers: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    #[serde(rename = "user.message")]
    UserMessage { text: String },
    #[serde(rename = "user.question")]
    UserQuestion {
        question_id: String,
        prompt: String,
        choices: Vec<String>,
    },
    #[serde(rename = "assistant.delta")]
    AssistantDelta { text_delta: String },
    #[serde(rename = "assistant.message")]
    AssistantMessage {
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_summary: bool,
    },
    #[serde(rename = "tool.use")]
    ToolUse {
        tool_use_id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool.result")]
    ToolResult {
        tool_use_id: String,
        output: Value,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    #[serde(rename = "tool.output.compacted")]
    ToolOutputCompacted {
        tool_use_id: String,
        compacted_ts: u64,
    },
    #[serde(rename = "hook.event")]
    HookEvent {
        hook_point: String,
        name: String,
        matched: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    #[serde(rename = "skill.activated")]
    SkillActivated { name: String },
    #[serde(rename = "user.compaction")]
    UserCompaction { auto: bool, reason: String },
    #[serde(rename = "session.checkpoint")]
    SessionCheckpoint { label: String },
    #[serde(rename = "session.set_head")]
    SessionSetHead {
        head_seq: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "session.undo")]
    SessionUndo,
    #[serde(rename = "session.redo")]
    SessionRedo,
    #[serde(rename = "result")]
    Result {
        final_text: String,
        stop_reason: String,
        steps: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<ResultUsage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<ProviderMetadata>,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResultUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderMetadata {
    pub protocol: String,
    pub supports_previous_response_id: bool,
}

impl Event {
    /// The `tool_use_id` this event carries, for events where that makes
    /// sense (used by the store's invariant checks and by the rebuilder).
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Event::ToolUse { tool_use_id, .. }
            | Event::ToolResult { tool_use_id, .. }
            | Event::ToolOutputCompacted { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }

    /// True for the control-plane events that `fork_session` must skip when
    /// copying a parent's log (system.init, result, and session.* events).
    pub fn is_control_or_boundary(&self) -> bool {
        matches!(
            self,
            Event::SystemInit { .. }
                | Event::Result { .. }
                | Event::SessionCheckpoint { .. }
                | Event::SessionSetHead { .. }
                | Event::SessionUndo
                | Event::SessionRedo
        )
    }
}

/// An [`Event`] with the `seq`/`ts` envelope the store assigns on append.
///
/// `parent_tool_use_id`/`agent_name` carry subagent provenance onto any
/// event kind, so a consumer can demultiplex a child agent's events out of
/// the parent session's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub seq: u64,
    pub ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(flatten)]
    pub event: Event,
}

impl StoredEvent {
    /// Decode one `events.jsonl` line, rejecting unknown `type` tags
    /// explicitly rather than silently dropping the record.
    pub fn decode_line(line: &str) -> Result<Self, EventDecodeError> {
        let value: Value = serde_json::from_str(line)?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if !KNOWN_TYPES.contains(&tag.as_str()) {
            return Err(EventDecodeError::UnknownEventType(tag));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

const KNOWN_TYPES: &[&str] = &[
    "system.init",
    "user.message",
    "user.question",
    "assistant.delta",
    "assistant.message",
    "tool.use",
    "tool.result",
    "tool.output.compacted",
    "hook.event",
    "skill.activated",
    "user.compaction",
    "session.checkpoint",
    "session.set_head",
    "session.undo",
    "session.redo",
    "result",
];
