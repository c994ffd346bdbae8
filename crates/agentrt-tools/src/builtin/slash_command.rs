// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_POSITIONAL_ARGS: usize = 20;
const COMMAND_TIMEOUT_SECS: u64 = 30;

/// Loads and renders `.md` command templates (`/name arg1 arg2 ...`),
/// expanding `$ARGUMENTS`/`$1..$20` placeholders, `@path` file references and
/// leading `!cmd` shell references.
pub struct SlashCommandTool;

#[async_trait]
impl Tool for SlashCommandTool {
    fn name(&self) -> &str { "slash_command" }

    fn description(&self) -> &str {
        "Loads a custom slash-command template by name and renders it with the given \
         arguments. Templates are looked up first under .opencode/commands/<name>.md, \
         then .claude/commands/<name>.md, then ~/.config/opencode/commands/<name>.md. \
         $ARGUMENTS expands to the full argument string, $1..$20 to positional args. \
         @path tokens are replaced with the referenced file's contents; a line \
         starting with !cmd is replaced with that shell command's output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Command name, without the leading slash"
                },
                "args": {
                    "type": "string",
                    "description": "Raw argument string following the command name"
                }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = match call.args.get("name").and_then(|v| v.as_str()) {
            Some(n) => n.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'name'"),
        };
        let args = call.args.get("args").and_then(|v| v.as_str()).unwrap_or("").to_string();

        debug!(name = %name, "slash_command tool");

        let (template, source) = match find_template(&name).await {
            Some(found) => found,
            None => {
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "no command template found for '{name}' (looked under \
                         .opencode/commands, .claude/commands, ~/.config/opencode/commands)"
                    ),
                )
            }
        };

        let expanded = expand_arguments(&template, &args);
        let rendered = match render_tokens(&expanded).await {
            Ok(text) => text,
            Err(e) => return ToolOutput::err(&call.id, format!("failed to render template: {e}")),
        };

        let body = json!({
            "name": name,
            "args": args,
            "sources": [source],
            "content": rendered,
        });
        ToolOutput::ok(&call.id, body.to_string())
    }
}

/// Lookup precedence: project-local opencode commands, then project-local
/// claude commands, then the user's global opencode commands directory.
async fn find_template(name: &str) -> Option<(String, String)> {
    let candidates = [
        format!(".opencode/commands/{name}.md"),
        format!(".claude/commands/{name}.md"),
        home_config_path(&format!("opencode/commands/{name}.md")),
    ];
    for path in candidates {
        if path.is_empty() {
            continue;
        }
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            return Some((content, path));
        }
    }
    None
}

fn home_config_path(rel: &str) -> String {
    match std::env::var("HOME") {
        Ok(home) => format!("{home}/.config/{rel}"),
        Err(_) => String::new(),
    }
}

/// Replace `$ARGUMENTS` with the full argument string and `$1..$20` with
/// whitespace-split positional arguments. Unmatched positionals expand to "".
fn expand_arguments(template: &str, args: &str) -> String {
    let positional: Vec<&str> = args.split_whitespace().collect();
    let mut out = template.replace("$ARGUMENTS", args);
    for i in 1..=MAX_POSITIONAL_ARGS {
        let token = format!("${i}");
        let value = positional.get(i - 1).copied().unwrap_or("");
        out = out.replace(&token, value);
    }
    out
}

/// Walks the rendered template line by line, substituting `@path` tokens with
/// file contents and a leading `!cmd` with that command's stdout.
async fn render_tokens(text: &str) -> anyhow::Result<String> {
    let mut out_lines = Vec::with_capacity(text.lines().count());
    for line in text.lines() {
        if let Some(cmd) = line.trim_start().strip_prefix('!') {
            out_lines.push(run_inline_command(cmd).await);
            continue;
        }
        out_lines.push(substitute_file_refs(line).await);
    }
    Ok(out_lines.join("\n"))
}

async fn substitute_file_refs(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(at_pos) = rest.find('@') {
        result.push_str(&rest[..at_pos]);
        let after = &rest[at_pos + 1..];
        let end = after
            .find(|c: char| c.is_whitespace())
            .unwrap_or(after.len());
        let path = &after[..end];
        if path.is_empty() {
            result.push('@');
            rest = after;
            continue;
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) => result.push_str(content.trim_end()),
            Err(_) => {
                result.push('@');
                result.push_str(path);
            }
        }
        rest = &after[end..];
    }
    result.push_str(rest);
    result
}

async fn run_inline_command(cmd: &str) -> String {
    let cmd = cmd.trim();
    let mut command = Command::new("sh");
    command.arg("-c").arg(cmd);
    match tokio::time::timeout(
        std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS),
        command.output(),
    )
    .await
    {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        Ok(Err(e)) => format!("[slash_command: spawn error: {e}]"),
        Err(_) => format!("[slash_command: timeout after {COMMAND_TIMEOUT_SECS}s]"),
    }
}
