// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The permission gate: decides allow/deny/rewrite for each tool call.
//!
//! Modes are a closed set: `default | prompt | bypass | deny | callback |
//! acceptEdits`. The gate never invokes tools itself — it only produces an
//! [`Approval`] that the runtime acts on.

use std::sync::Arc;

use serde_json::Value;

/// A tool's read/write classification, used by `acceptEdits` mode to decide
/// whether a call needs a prompt. Tools provide this via
/// [`ToolKindClassifier`]; the default classifier treats nothing as
/// destructive so `acceptEdits` degrades gracefully when unconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Pure reads: Read, Grep, Glob, ListDir, WebFetch without side effects.
    ReadLike,
    /// File edits: Write, Edit, NotebookEdit.
    Edit,
    /// Everything else: Bash, deletion, network calls with side effects.
    Destructive,
}

pub trait ToolKindClassifier: Send + Sync {
    fn classify(&self, tool_name: &str) -> ToolKind;
}

/// Classifier that treats every tool as destructive — the conservative
/// default when no classifier is supplied.
pub struct AlwaysDestructive;
impl ToolKindClassifier for AlwaysDestructive {
    fn classify(&self, _tool_name: &str) -> ToolKind {
        ToolKind::Destructive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Consult the callback if one is configured, else allow.
    Default,
    /// Prompt the user via `user_answerer` if no callback is configured.
    Prompt,
    /// Always allow, no questions asked.
    Bypass,
    /// Always deny.
    Deny,
    /// Require a callback; fail closed if none is configured.
    Callback,
    /// Allow read-like and edit tools without prompting; prompt for
    /// destructive ones.
    AcceptEdits,
}

/// What a permission callback decided.
pub enum CallbackDecision {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
}

pub type ApprovalCallback =
    Arc<dyn Fn(&str, &Value) -> CallbackDecision + Send + Sync>;

/// A question the gate could not answer itself and must surface to the
/// user for an interactive decision (spec: `user.question`).
#[derive(Debug, Clone)]
pub struct UserQuestion {
    pub question_id: String,
    pub prompt: String,
    pub choices: Vec<String>,
}

pub type UserAnswerer = Arc<dyn Fn(&UserQuestion) -> Option<String> + Send + Sync>;

/// Outcome of [`PermissionGate::approve`].
pub enum Approval {
    Allow { updated_input: Option<Value> },
    Deny { message: String },
}

pub struct PermissionGate {
    mode: PermissionMode,
    callback: Option<ApprovalCallback>,
    user_answerer: Option<UserAnswerer>,
    classifier: Arc<dyn ToolKindClassifier>,
}

impl PermissionGate {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            callback: None,
            user_answerer: None,
            classifier: Arc::new(AlwaysDestructive),
        }
    }

    pub fn with_callback(mut self, callback: ApprovalCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_user_answerer(mut self, answerer: UserAnswerer) -> Self {
        self.user_answerer = Some(answerer);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ToolKindClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Decide whether `tool_name(tool_input)` may run.
    ///
    /// `question_id` is supplied by the caller (the runtime allocates it,
    /// typically a fresh uuid) so the gate stays free of id-generation
    /// policy; it is only used if a `user.question` must be raised.
    pub fn approve(&self, tool_name: &str, tool_input: &Value, question_id: &str) -> Approval {
        match self.mode {
            PermissionMode::Bypass => Approval::Allow { updated_input: None },
            PermissionMode::Deny => Approval::Deny {
                message: "denied by permission gate (mode=deny)".to_string(),
            },
            PermissionMode::Callback => match &self.callback {
                Some(cb) => from_callback(cb(tool_name, tool_input)),
                None => Approval::Deny {
                    message: "permission mode=callback but no callback configured".to_string(),
                },
            },
            PermissionMode::Default => match &self.callback {
                Some(cb) => from_callback(cb(tool_name, tool_input)),
                None => Approval::Allow { updated_input: None },
            },
            PermissionMode::Prompt => {
                if let Some(cb) = &self.callback {
                    return from_callback(cb(tool_name, tool_input));
                }
                self.ask_user(tool_name, tool_input, question_id)
            }
            PermissionMode::AcceptEdits => {
                if let Some(cb) = &self.callback {
                    return from_callback(cb(tool_name, tool_input));
                }
                match self.classifier.classify(tool_name) {
                    ToolKind::ReadLike | ToolKind::Edit => {
                        Approval::Allow { updated_input: None }
                    }
                    ToolKind::Destructive => self.ask_user(tool_name, tool_input, question_id),
                }
            }
        }
    }

    fn ask_user(&self, tool_name: &str, tool_input: &Value, question_id: &str) -> Approval {
        let Some(answerer) = &self.user_answerer else {
            return Approval::Deny {
                message: "PermissionDenied: no user_answerer configured for prompt mode"
                    .to_string(),
            };
        };
        let question = UserQuestion {
            question_id: question_id.to_string(),
            prompt: format!("Allow {tool_name}({tool_input}) ?"),
            choices: vec!["yes".to_string(), "no".to_string()],
        };
        match answerer(&question) {
            Some(answer) if answer.eq_ignore_ascii_case("yes") => {
                Approval::Allow { updated_input: None }
            }
            _ => Approval::Deny {
                message: "PermissionDenied: user declined".to_string(),
            },
        }
    }
}

fn from_callback(decision: CallbackDecision) -> Approval {
    match decision {
        CallbackDecision::Allow { updated_input } => Approval::Allow { updated_input },
        CallbackDecision::Deny { message } => Approval::Deny { message },
    }
}
