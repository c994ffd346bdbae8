use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use agentrt_config::{AgentConfig, AgentDefinition, AgentMode, Config};
use agentrt_tools::{
    events::{TodoItem, ToolEvent},
    policy::ApprovalPolicy,
    tool::{Tool, ToolCall, ToolOutput},
    AskQuestionTool, ApplyPatchTool, DeleteFileTool, EditFileTool,
    GlobFileSearchTool, GrepTool, ListDirTool, ReadFileTool, ReadLintsTool,
    RunTerminalCommandTool, SearchCodebaseTool, SlashCommandTool, SwitchModeTool, TodoWriteTool,
    UpdateMemoryTool, WebFetchTool, WebSearchTool, WriteTool,
    ToolRegistry,
};

use crate::agent::Agent;
use crate::events::AgentEvent;
use crate::runtime_context::AgentRuntimeContext;
use crate::store::{SessionMetadata, SessionStore};

const MAX_DEPTH: usize = 3;

pub struct TaskTool {
    model: Arc<dyn agentrt_model::ModelProvider>,
    config: Arc<Config>,
    agent_config: Arc<AgentConfig>,
    depth: Arc<AtomicUsize>,
    /// Parent session's store/id, so every sub-agent turn gets its own
    /// durable event log (`parent_session_id`/`parent_tool_use_id` linking
    /// it back to the `task` call that spawned it). `None` when the parent
    /// agent itself has no store attached (e.g. a one-shot CLI run with no
    /// `--sessions-root`).
    store: Option<Arc<SessionStore>>,
    parent_session_id: Option<String>,
}

impl TaskTool {
    pub fn new(
        model: Arc<dyn agentrt_model::ModelProvider>,
        config: Arc<Config>,
        agent_config: Arc<AgentConfig>,
        depth: Arc<AtomicUsize>,
    ) -> Self {
        Self { model, config, agent_config, depth, store: None, parent_session_id: None }
    }

    /// Attach the parent session's store, so spawned sub-agents get their
    /// own linked session instead of running as an untracked in-memory loop.
    pub fn with_store(mut self, store: Arc<SessionStore>, parent_session_id: impl Into<String>) -> Self {
        self.store = Some(store);
        self.parent_session_id = Some(parent_session_id.into());
        self
    }

    fn build_sub_registry(&self) -> ToolRegistry {
        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));
        let mode: Arc<Mutex<AgentMode>> = Arc::new(Mutex::new(AgentMode::Agent));
        let (tx, _rx) = mpsc::channel::<ToolEvent>(64);

        let mut reg = ToolRegistry::new();
        reg.register(ReadFileTool);
        reg.register(ListDirTool);
        reg.register(GlobFileSearchTool);
        reg.register(GrepTool);
        reg.register(SearchCodebaseTool);
        reg.register(ReadLintsTool);
        reg.register(SlashCommandTool);
        reg.register(AskQuestionTool::new());
        reg.register(WebFetchTool);
        reg.register(WebSearchTool {
            api_key: self.config.tools.web.search.api_key.clone(),
        });
        reg.register(UpdateMemoryTool {
            memory_file: self.config.tools.memory.memory_file.clone(),
        });
        reg.register(TodoWriteTool::new(todos, tx.clone()));
        reg.register(SwitchModeTool::new(mode, tx.clone()));
        reg.register(WriteTool);
        reg.register(EditFileTool);
        reg.register(DeleteFileTool);
        reg.register(ApplyPatchTool);
        reg.register(RunTerminalCommandTool {
            timeout_secs: self.config.tools.timeout_secs,
        });
        // Note: TaskTool is intentionally NOT registered here to limit nesting
        reg
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str { "task" }

    fn description(&self) -> &str {
        "Spawn a named sub-agent to complete a focused task and return its final text \
         output. Useful for delegating isolated sub-tasks. `agent` selects a sub-agent \
         definition from config (its tool whitelist and model override, if any, apply to \
         the spawned agent); an undefined name runs with the parent's own tools and model. \
         Maximum nesting depth is 3."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the sub-agent definition to delegate to (see config's `agents` map)"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task description for the sub-agent"
                },
                "mode": {
                    "type": "string",
                    "enum": ["research", "plan", "agent"],
                    "description": "Operating mode for the sub-agent (default: agent, or the named agent's configured default)"
                },
                "max_rounds": {
                    "type": "integer",
                    "description": "Maximum tool-call rounds (default: from config)"
                }
            },
            "required": ["agent", "prompt"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Ask }

    fn modes(&self) -> &[AgentMode] { &[AgentMode::Agent] }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let agent_key = match call.args.get("agent").and_then(|v| v.as_str()) {
            Some(a) => a.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'agent'"),
        };
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };

        // `None` when `agent_key` names no configured definition — the task
        // still runs, inheriting the parent's tools/model unrestricted, same
        // as calling `task` used to behave before named agents existed.
        let definition: Option<&AgentDefinition> = self.config.agents.get(&agent_key);

        let mode_str = call
            .args
            .get("mode")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| definition.and_then(|d| d.mode).map(|m| agent_mode_key(m).to_string()))
            .unwrap_or_else(|| "agent".to_string());
        let mode = match mode_str.as_str() {
            "research" => AgentMode::Research,
            "plan" => AgentMode::Plan,
            "agent" => AgentMode::Agent,
            other => return ToolOutput::err(&call.id, format!("unknown mode: {other}")),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(
            agent = %agent_key,
            prompt = %prompt,
            mode = %mode,
            depth = current_depth + 1,
            "task: spawning sub-agent"
        );

        // Tool/model/allowed_tools inherit the parent's settings unless the
        // named agent definition overrides them.
        let mut sub_config = (*self.agent_config).clone();
        if let Some(d) = definition {
            if d.allowed_tools.is_some() {
                sub_config.allowed_tools = d.allowed_tools.clone();
            }
        }
        if let Some(max_rounds) = call.args.get("max_rounds").and_then(|v| v.as_u64()) {
            sub_config.max_tool_rounds = max_rounds as u32;
        }

        let sub_model: Arc<dyn agentrt_model::ModelProvider> =
            match definition.and_then(|d| d.model.as_deref()) {
                Some(model_key) => {
                    let model_cfg = agentrt_model::resolve_model_from_config(&self.config, model_key);
                    match agentrt_model::from_config(&model_cfg) {
                        Ok(provider) => Arc::from(provider),
                        Err(e) => {
                            self.depth.fetch_sub(1, Ordering::Relaxed);
                            return ToolOutput::err(
                                &call.id,
                                format!("failed to build model '{model_key}' for agent '{agent_key}': {e}"),
                            );
                        }
                    }
                }
                None => self.model.clone(),
            };

        let tools = Arc::new(self.build_sub_registry());
        let mode_lock = Arc::new(Mutex::new(mode));
        let (_discard_tx, sub_tool_event_rx) = mpsc::channel::<ToolEvent>(64);
        let max_context_tokens = sub_model
            .catalog_context_window()
            .unwrap_or(128_000) as usize;
        let agent_name = format!("task-{agent_key}");

        let mut agent = Agent::new(
            sub_model,
            tools,
            Arc::new(sub_config),
            AgentRuntimeContext::default(),
            mode_lock,
            sub_tool_event_rx,
            max_context_tokens,
        )
        .with_agent_name(agent_name.clone());

        // Give the sub-agent its own durable session, linked back to this
        // tool call, when the parent agent has a store attached.
        let child_session_id = if let Some(store) = &self.store {
            match store.create_session(SessionMetadata {
                parent_session_id: self.parent_session_id.clone(),
                parent_tool_use_id: Some(call.id.clone()),
                agent_name: Some(agent_name.clone()),
                ..Default::default()
            }) {
                Ok(id) => {
                    agent = agent.with_store(store.clone(), id.clone());
                    Some(id)
                }
                Err(e) => {
                    debug!(error = %e, "task: failed to create sub-agent session, continuing untracked");
                    None
                }
            }
        } else {
            None
        };

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);

        let submit_result = agent.submit(&prompt, tx).await;

        let mut final_text = String::new();
        while let Some(event) = rx.recv().await {
            if let AgentEvent::TextComplete(text) = event {
                final_text = text;
            }
        }

        self.depth.fetch_sub(1, Ordering::Relaxed);

        // Replay every durable event the child produced into the parent's
        // own log, tagged with this call's id, so the parent session is a
        // complete (if redundant) transcript of its own subagents — the
        // child session remains the authoritative log for replay/resume of
        // that subagent on its own.
        if let (Some(store), Some(parent_id), Some(child_id)) =
            (&self.store, &self.parent_session_id, &child_session_id)
        {
            match store.read_events(child_id) {
                Ok(child_events) => {
                    for stored in child_events {
                        if let Err(e) = store.append_event(
                            parent_id,
                            stored.event,
                            Some(call.id.clone()),
                            Some(agent_name.clone()),
                        ) {
                            debug!(error = %e, "task: failed to replay child event into parent log");
                        }
                    }
                }
                Err(e) => debug!(error = %e, "task: failed to read back child session for replay"),
            }
        }

        match submit_result {
            Ok(_) => {
                let body = json!({
                    "child_session_id": child_session_id,
                    "final_text": if final_text.is_empty() {
                        "(sub-agent produced no text output)".to_string()
                    } else {
                        final_text
                    },
                });
                ToolOutput::ok(&call.id, body.to_string())
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}

/// The `mode` argument string a given [`AgentMode`] round-trips to, for
/// threading an agent definition's configured default mode through the same
/// string-keyed match `execute` uses for the `mode` call argument.
fn agent_mode_key(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Research => "research",
        AgentMode::Plan => "plan",
        AgentMode::Agent => "agent",
    }
}
