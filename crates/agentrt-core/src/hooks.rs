// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The hook engine: ordered matchers for seven interception points.
//!
//! Each [`HookPoint`] owns its own list of [`HookMatcher`]s, run in
//! registration order. A matcher may block the iteration, rewrite the tool
//! input/output or the message window, or simply observe. Every invocation —
//! matched or not — produces one [`HookInvocationRecord`] so the runtime can
//! append a `hook.event` for it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// The seven named positions in the loop where matchers may observe,
/// rewrite, or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    UserPromptSubmit,
    SessionStart,
    SessionEnd,
    BeforeModelCall,
    AfterModelCall,
    PreToolUse,
    PostToolUse,
    Stop,
}

impl HookPoint {
    /// The string used in `hook.event.hook_point` and in `blocked:<point>:<reason>`
    /// stop reasons — snake_case, matching the event log wire format.
    pub fn wire_name(self) -> &'static str {
        match self {
            HookPoint::UserPromptSubmit => "user_prompt_submit",
            HookPoint::SessionStart => "session_start",
            HookPoint::SessionEnd => "session_end",
            HookPoint::BeforeModelCall => "before_model_call",
            HookPoint::AfterModelCall => "after_model_call",
            HookPoint::PreToolUse => "pre_tool_use",
            HookPoint::PostToolUse => "post_tool_use",
            HookPoint::Stop => "stop",
        }
    }
}

/// Payload handed to a hook callback. Fields are point-specific; callbacks
/// should only read the fields relevant to the point they were registered
/// for.
#[derive(Debug, Clone, Default)]
pub struct HookPayload {
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<Value>,
    pub messages: Option<Value>,
    pub output: Option<Value>,
    pub final_text: Option<String>,
    pub prompt: Option<String>,
    pub context: Option<Value>,
    pub model_name: Option<String>,
}

/// What a hook callback asked the engine to do.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub block: bool,
    pub block_reason: Option<String>,
    pub override_tool_input: Option<Value>,
    pub override_tool_output: Option<Value>,
    pub override_messages: Option<Value>,
    pub action: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            block: true,
            block_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// A registered hook callback. Boxed so matchers can be closures, function
/// pointers, or adapters around an external process/IPC hook.
pub type HookCallback = Arc<dyn Fn(&HookPayload) -> Decision + Send + Sync>;

/// One matcher entry: a name (for `hook.event.name`), a glob-style pattern
/// (matched against the tool name for tool hooks, the model name for model
/// hooks, or ignored otherwise), and the callback itself.
#[derive(Clone)]
pub struct HookMatcher {
    pub name: String,
    pub tool_name_pattern: String,
    pub callback: HookCallback,
}

impl HookMatcher {
    pub fn new(
        name: impl Into<String>,
        tool_name_pattern: impl Into<String>,
        callback: HookCallback,
    ) -> Self {
        Self {
            name: name.into(),
            tool_name_pattern: tool_name_pattern.into(),
            callback,
        }
    }

    /// `*` matches everything; `a|b|c` matches any alternative exactly.
    fn matches(&self, subject: Option<&str>) -> bool {
        if self.tool_name_pattern == "*" {
            return true;
        }
        let Some(subject) = subject else { return true };
        self.tool_name_pattern.split('|').any(|alt| alt == subject)
    }
}

/// Result of running one hook point to completion.
pub struct HookRunOutcome {
    /// The accumulated decision after composing every matcher's rewrites.
    /// `block`/`block_reason` reflect the first matcher that blocked, if any
    /// (iteration stops there).
    pub decision: Decision,
    /// One record per matcher invocation, in registration order, whether or
    /// not it matched. The runtime appends a `hook.event` for each.
    pub invocations: Vec<HookInvocationRecord>,
}

#[derive(Debug, Clone)]
pub struct HookInvocationRecord {
    pub hook_point: HookPoint,
    pub name: String,
    pub matched: bool,
    pub duration_ms: u64,
    pub action: Option<String>,
}

/// Ordered matcher lists for the seven hook points.
///
/// `enable_message_rewrite_hooks` gates `override_messages` at
/// `BeforeModelCall`: when false (the default), a matcher's message rewrite
/// is recorded as `ignored_override_messages` and dropped — a guardrail
/// against accidental transcript corruption.
pub struct HookEngine {
    points: HashMap<HookPoint, Vec<HookMatcher>>,
    enable_message_rewrite_hooks: bool,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HookEngine {
    pub fn new() -> Self {
        Self {
            points: HashMap::new(),
            enable_message_rewrite_hooks: false,
        }
    }

    pub fn with_message_rewrite_hooks(mut self, enabled: bool) -> Self {
        self.enable_message_rewrite_hooks = enabled;
        self
    }

    pub fn register(&mut self, point: HookPoint, matcher: HookMatcher) {
        self.points.entry(point).or_default().push(matcher);
    }

    pub fn is_empty_at(&self, point: HookPoint) -> bool {
        self.points.get(&point).map(|m| m.is_empty()).unwrap_or(true)
    }

    /// Run every matcher registered for `point` in order, composing rewrites
    /// and stopping at the first block. `now_ms` is a caller-supplied
    /// monotonic-ish clock sample (injected so the engine has no direct
    /// dependency on wall-clock time, keeping it trivially testable).
    pub fn run<F>(&self, point: HookPoint, mut payload: HookPayload, mut now_ms: F) -> HookRunOutcome
    where
        F: FnMut() -> u64,
    {
        let mut decision = Decision::allow();
        let mut invocations = Vec::new();

        let Some(matchers) = self.points.get(&point) else {
            return HookRunOutcome { decision, invocations };
        };

        let subject = match point {
            HookPoint::PreToolUse | HookPoint::PostToolUse => payload.tool_name.clone(),
            HookPoint::BeforeModelCall | HookPoint::AfterModelCall => payload.model_name.clone(),
            _ => None,
        };

        for matcher in matchers {
            let matched = matcher.matches(subject.as_deref());
            let start = now_ms();
            let mut action = None;
            if matched {
                let result = (matcher.callback)(&payload);
                let end = now_ms();
                let duration_ms = end.saturating_sub(start);

                if let Some(input) = result.override_tool_input.clone() {
                    payload.tool_input = Some(input.clone());
                    decision.override_tool_input = Some(input);
                }
                if let Some(output) = result.override_tool_output.clone() {
                    payload.tool_output = Some(output.clone());
                    decision.override_tool_output = Some(output);
                }
                if let Some(messages) = result.override_messages.clone() {
                    if point == HookPoint::BeforeModelCall && self.enable_message_rewrite_hooks {
                        payload.messages = Some(messages.clone());
                        decision.override_messages = Some(messages);
                    } else {
                        action = Some("ignored_override_messages".to_string());
                    }
                }
                if let Some(a) = result.action.clone() {
                    action = Some(a);
                }

                invocations.push(HookInvocationRecord {
                    hook_point: point,
                    name: matcher.name.clone(),
                    matched: true,
                    duration_ms,
                    action,
                });

                if result.block {
                    decision.block = true;
                    decision.block_reason = result.block_reason;
                    break;
                }
            } else {
                invocations.push(HookInvocationRecord {
                    hook_point: point,
                    name: matcher.name.clone(),
                    matched: false,
                    duration_ms: 0,
                    action: None,
                });
            }
        }

        HookRunOutcome { decision, invocations }
    }
}
