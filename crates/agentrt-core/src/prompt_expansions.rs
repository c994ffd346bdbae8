// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Best-effort prompt rewrites applied to the raw user prompt before it is
//! pushed into the session and persisted as a `user.message` event.
//!
//! Two forms are recognised, each matched case-insensitively against the
//! whole (trimmed) prompt text:
//!
//! - "execute skill NAME" / "执行技能 NAME" — when `NAME` names a discovered
//!   skill, the prompt is replaced with an instruction telling the model to
//!   call `load_skill` for that skill and follow its checklist.
//! - "what skills are available" / "list skills" / "有哪些技能" — replaced
//!   with an instruction to enumerate the skills already listed in
//!   `load_skill`'s own description.
//!
//! Neither rewrite fires if no skills are discovered, or if the text doesn't
//! match; in that case the prompt is returned unchanged.

use agentrt_runtime::SkillInfo;
use regex::Regex;

fn rewrite_execute_skill(text: &str, skills: &[SkillInfo]) -> Option<String> {
    let re = Regex::new(r"(?i)^(?:execute skill|执行技能)\s+(\S+)$").unwrap();
    let caps = re.captures(text.trim())?;
    let requested = caps.get(1)?.as_str();
    let skill = skills
        .iter()
        .find(|s| s.command.eq_ignore_ascii_case(requested) || s.name.eq_ignore_ascii_case(requested))?;
    Some(format!(
        "Call `load_skill` with `{{\"name\": \"{command}\"}}` to load the \"{name}\" skill's \
         full instructions, then follow its checklist (if it has one) to complete the \
         original request.",
        command = skill.command,
        name = skill.name,
    ))
}

fn rewrite_list_skills(text: &str, skills: &[SkillInfo]) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    let re =
        Regex::new(r"(?i)^(?:what skills are available|list skills|有哪些技能)[?？]?$").unwrap();
    if !re.is_match(text.trim()) {
        return None;
    }
    Some(
        "List the skills currently available, using the descriptions already listed in \
         the `load_skill` tool's description as the source — enumerate each skill's \
         command and description from there without calling any tool."
            .to_string(),
    )
}

/// Apply the `execute skill` rewrite, then the `list skills` rewrite, to
/// `text`. Returns `text` unchanged if neither matches.
pub fn apply_prompt_expansions(text: &str, skills: &[SkillInfo]) -> String {
    rewrite_execute_skill(text, skills)
        .or_else(|| rewrite_list_skills(text, skills))
        .unwrap_or_else(|| text.to_string())
}
