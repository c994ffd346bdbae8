// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands, OutputFormatArg, SessionCommands};
use agentrt_core::{
    AgentRuntimeContext, Event, PermissionGate, PermissionMode, SessionMetadata, SessionStore,
    TaskTool,
};
use agentrt_model::catalog::ModelCatalogEntry;
use agentrt_tools::{
    events::{TodoItem, ToolEvent},
    ApplyPatchTool, DeleteFileTool, EditFileTool, GlobFileSearchTool, GrepTool, ListDirTool,
    ReadFileTool, ReadLintsTool, RunTerminalCommandTool, SlashCommandTool, SwitchModeTool,
    TodoWriteTool, ToolRegistry, UpdateMemoryTool, WebFetchTool, WebSearchTool, WriteTool,
};
use tokio::sync::{mpsc, Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                Ok(())
            }
            Commands::ShowConfig => {
                let config = agentrt_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                Ok(())
            }
            Commands::ListModels {
                provider,
                refresh,
                json,
            } => {
                let config = agentrt_config::load(cli.config.as_deref())?;
                list_models_cmd(&config, provider.as_deref(), *refresh, *json).await
            }
            Commands::ListProviders { verbose, json } => list_providers_cmd(*verbose, *json),
            Commands::Sessions { command } => sessions_cmd(&cli, command),
        };
    }

    let config = Arc::new(agentrt_config::load(cli.config.as_deref())?);
    run_headless(cli, config).await
}

/// Build a registry with the standard builtin tools, plus `task` wired to
/// the current session store so sub-agents it spawns get their own linked
/// session, minus anything requiring interactive UI wiring.
fn build_registry(
    config: &Arc<agentrt_config::Config>,
    tool_tx: mpsc::Sender<ToolEvent>,
    model: Arc<dyn agentrt_model::ModelProvider>,
    agent_config: Arc<agentrt_config::AgentConfig>,
    store: Arc<SessionStore>,
    session_id: String,
) -> ToolRegistry {
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));
    let mode = Arc::new(Mutex::new(config.agent.default_mode));

    let mut registry = ToolRegistry::new();
    registry.register(RunTerminalCommandTool {
        timeout_secs: config.tools.timeout_secs,
    });
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(EditFileTool);
    registry.register(GlobFileSearchTool);
    registry.register(GrepTool);
    registry.register(ListDirTool);
    registry.register(DeleteFileTool);
    registry.register(WebFetchTool);
    registry.register(WebSearchTool {
        api_key: config.tools.web.search.api_key.clone(),
    });
    registry.register(ApplyPatchTool);
    registry.register(ReadLintsTool);
    registry.register(SlashCommandTool);
    registry.register(UpdateMemoryTool {
        memory_file: config.tools.memory.memory_file.clone(),
    });
    registry.register(TodoWriteTool::new(todos, tool_tx.clone()));
    registry.register(SwitchModeTool::new(mode, tool_tx));
    registry.register(
        TaskTool::new(
            model,
            config.clone(),
            agent_config,
            Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        )
        .with_store(store, session_id),
    );
    registry
}

/// Run a single headless turn: build an agent, attach the durable session
/// store, submit the prompt, stream text deltas to stdout, and print the
/// final `result` once the turn ends.
async fn run_headless(cli: Cli, config: Arc<agentrt_config::Config>) -> anyhow::Result<()> {
    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            if is_stdin_tty() {
                anyhow::bail!("no PROMPT given and stdin is a tty; pass a prompt or pipe one in");
            }
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf.trim().to_string()
        }
    };
    if prompt.is_empty() {
        anyhow::bail!("empty prompt");
    }

    let model_cfg = if let Some(m) = &cli.model {
        agentrt_model::resolve_model_from_config(&config, m)
    } else {
        config.model.clone()
    };
    let model: Arc<dyn agentrt_model::ModelProvider> = Arc::from(agentrt_model::from_config(&model_cfg)?);
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

    let mut agent_config = config.agent.clone();
    agent_config.default_mode = cli.mode;
    let agent_config = Arc::new(agent_config);

    let mode_lock = Arc::new(Mutex::new(cli.mode));
    let runtime = AgentRuntimeContext::default();

    let store = Arc::new(SessionStore::new(cli.sessions_root()));
    let session_id = match &cli.resume {
        Some(id) => {
            store
                .read_meta(id)
                .with_context(|| format!("resuming session {id}"))?;
            id.clone()
        }
        None => {
            let cwd = std::env::current_dir().ok().map(|p| p.display().to_string());
            store.create_session(SessionMetadata {
                cwd,
                provider: Some(model_cfg.provider.clone()),
                model: Some(model_cfg.name.clone()),
                allowed_tools: agent_config.allowed_tools.clone(),
                ..Default::default()
            })?
        }
    };

    let (tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);
    let registry = Arc::new(build_registry(
        &config,
        tool_tx,
        model.clone(),
        agent_config.clone(),
        store.clone(),
        session_id.clone(),
    ));

    let gate = Arc::new(PermissionGate::new(PermissionMode::Bypass));

    let mut agent = agentrt_core::Agent::new(
        model,
        registry,
        agent_config,
        runtime,
        mode_lock,
        tool_rx,
        max_ctx,
    )
    .with_store(store.clone(), session_id.clone())
    .with_permission_gate(gate);

    if cli.resume.is_some() {
        let events = store
            .read_events(&session_id)
            .with_context(|| format!("reading event log for session {session_id}"))?;
        let messages = agentrt_core::rebuild_session_messages(&events, usize::MAX, 64 * 1024 * 1024);
        agent.session_mut().replace_messages(messages);
        if let Some(stored) = store.last_result(&session_id)? {
            if let Event::Result {
                response_id,
                provider_metadata,
                ..
            } = stored.event
            {
                agent.session_mut().previous_response_id = response_id;
                if let Some(meta) = provider_metadata {
                    agent.session_mut().supports_previous_response_id =
                        meta.supports_previous_response_id;
                }
            }
        }
    }

    let (tx, mut rx) = mpsc::channel::<agentrt_core::AgentEvent>(256);
    let submit = tokio::spawn(async move { agent.submit(&prompt, tx).await });

    let mut final_text = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            agentrt_core::AgentEvent::TextDelta(delta) => {
                print!("{delta}");
                use std::io::Write as _;
                let _ = io::stdout().flush();
            }
            agentrt_core::AgentEvent::TextComplete(text) => final_text = text,
            agentrt_core::AgentEvent::Error(msg) => {
                eprintln!("\n[agentrt:error] {msg}");
            }
            _ => {}
        }
    }
    submit.await.context("agent task panicked")??;
    println!();

    if matches!(cli.output_format, OutputFormatArg::Json) {
        let store = SessionStore::new(cli.sessions_root());
        if let Some(stored) = store.last_result(&session_id)? {
            if let Event::Result {
                final_text,
                stop_reason,
                steps,
                ..
            } = stored.event
            {
                println!(
                    "{}",
                    serde_json::json!({
                        "session_id": session_id,
                        "final_text": final_text,
                        "stop_reason": stop_reason,
                        "steps": steps,
                    })
                );
            }
        }
    } else {
        let _ = final_text;
    }

    Ok(())
}

fn sessions_cmd(cli: &Cli, command: &SessionCommands) -> anyhow::Result<()> {
    let store = SessionStore::new(cli.sessions_root());
    match command {
        SessionCommands::List => {
            let root = store.root().join("sessions");
            if !root.exists() {
                println!("No sessions found under {}", root.display());
                return Ok(());
            }
            let mut ids: Vec<String> = std::fs::read_dir(&root)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            ids.sort();
            for id in &ids {
                let meta = store.read_meta(id);
                match meta {
                    Ok(m) => println!("{id}  created_at={}", m.created_at),
                    Err(_) => println!("{id}  (no meta.json)"),
                }
            }
            println!("\nTotal: {} session(s)", ids.len());
        }
        SessionCommands::Show { session_id, json } => {
            let events = store.read_events(session_id)?;
            for stored in &events {
                if *json {
                    println!("{}", serde_json::to_string(stored)?);
                } else {
                    println!("[{:>4}] {}", stored.seq, summarize_event(&stored.event));
                }
            }
        }
    }
    Ok(())
}

fn summarize_event(event: &Event) -> String {
    match event {
        Event::SystemInit { session_id, .. } => format!("system.init session={session_id}"),
        Event::UserMessage { text } => format!("user.message {text:?}"),
        Event::UserQuestion { prompt, .. } => format!("user.question {prompt:?}"),
        Event::AssistantDelta { .. } => "assistant.delta".to_string(),
        Event::AssistantMessage { text, .. } => format!("assistant.message {text:?}"),
        Event::ToolUse { name, .. } => format!("tool.use {name}"),
        Event::ToolResult { is_error, .. } => format!("tool.result is_error={is_error}"),
        Event::ToolOutputCompacted { tool_use_id, .. } => {
            format!("tool.output.compacted {tool_use_id}")
        }
        Event::HookEvent { hook_point, name, matched, .. } => {
            format!("hook.event {hook_point} {name} matched={matched}")
        }
        Event::SkillActivated { name } => format!("skill.activated {name}"),
        Event::UserCompaction { auto, reason } => format!("user.compaction auto={auto} reason={reason}"),
        Event::SessionCheckpoint { label } => format!("session.checkpoint {label}"),
        Event::SessionSetHead { head_seq, .. } => format!("session.set_head {head_seq}"),
        Event::SessionUndo => "session.undo".to_string(),
        Event::SessionRedo => "session.redo".to_string(),
        Event::Result { stop_reason, steps, .. } => format!("result stop_reason={stop_reason} steps={steps}"),
    }
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &agentrt_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if agentrt_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `agentrt list-providers` for details):");
            for d in agentrt_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = agentrt_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = agentrt_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries.iter().map(|e| e.provider.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id, e.provider, ctx, max_out, e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = agentrt_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers.iter().map(|d| d.name.len()).max().unwrap_or(8).max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `agentrt list-providers --verbose` for API key and URL details.");
        println!("Use `agentrt list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
