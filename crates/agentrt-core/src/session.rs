// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use agentrt_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Reserved headroom for the model's own completion, subtracted from
    /// `max_tokens` by [`Session::input_budget`].
    pub max_output_tokens: usize,
    /// Token overhead of things sent with every request but not stored in
    /// `messages` (tool schemas, dynamic context). Recomputed once per loop
    /// iteration by the agent via `estimate_schema_overhead`.
    pub schema_overhead: usize,
    /// Running correction factor applied to the chars/4 token estimate,
    /// calibrated against the provider's actual reported `input_tokens`.
    pub calibration_factor: f32,
    /// Cumulative prompt-cache tokens read/written this session, for UI display.
    pub cache_read_total: u32,
    pub cache_write_total: u32,
    /// Input/output token counts the provider reported for the most recently
    /// completed turn (not cumulative), surfaced on the terminal `result` event.
    pub last_input_tokens: u32,
    pub last_output_tokens: u32,
    /// The server-threaded `response_id` of the most recent completed turn,
    /// for providers speaking the responses protocol. `None` for legacy
    /// providers, or before the first turn completes.
    pub previous_response_id: Option<String>,
    /// Whether the provider still accepts `previous_response_id`. Cleared
    /// the first time the provider rejects it (spec recovery rule); once
    /// false it stays false for the rest of the session.
    pub supports_previous_response_id: bool,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            calibration_factor: 1.0,
            cache_read_total: 0,
            cache_write_total: 0,
            last_input_tokens: 0,
            last_output_tokens: 0,
            previous_response_id: None,
            supports_previous_response_id: true,
        }
    }

    /// Usable input budget: the context window minus the headroom reserved
    /// for the model's own completion. Zero when no output budget has been
    /// configured yet (callers treat that as "unknown, skip the check").
    pub fn input_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.max_output_tokens)
    }

    /// Add one turn's prompt-cache usage to the running totals.
    pub fn add_cache_usage(&mut self, cache_read: u32, cache_write: u32) {
        self.cache_read_total = self.cache_read_total.saturating_add(cache_read);
        self.cache_write_total = self.cache_write_total.saturating_add(cache_write);
    }

    /// Nudge `calibration_factor` towards `actual_input / estimated` using an
    /// exponential moving average, so a single noisy turn can't swing the
    /// estimate wildly. Ratios are clamped to a sane range before blending.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let ratio = (actual_input as f32 / estimated as f32).clamp(0.25, 4.0);
        self.calibration_factor = self.calibration_factor * 0.7 + ratio * 0.3;
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
