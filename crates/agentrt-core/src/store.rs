// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable, append-only per-session event log.
//!
//! Layout on disk, under a configurable session root:
//!
//! ```text
//! <root>/sessions/<session_id>/meta.json
//! <root>/sessions/<session_id>/events.jsonl
//! <root>/sessions/<session_id>/todos.json      (written by TodoWrite, not here)
//! ```
//!
//! All operations are synchronous — the store is the only writer for a given
//! session, and writes are fatal on failure (propagated to the caller, never
//! swallowed), matching the "Store fatal" failure category in the design.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::event_log::{Event, EventDecodeError, StoredEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("decode error: {0}")]
    Decode(#[from] EventDecodeError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub created_at: u64,
    pub metadata: Value,
}

/// Metadata the runtime supplies when creating (or forking into) a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub cwd: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub setting_sources: Vec<String>,
    pub parent_session_id: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub agent_name: Option<String>,
}

pub struct SessionStore {
    root: PathBuf,
    /// Cached next-`seq` per session, so `append_event` doesn't need to
    /// reread the whole log on every call once a session has been touched
    /// in this process.
    seq_cache: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq_cache: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(session_id)
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("meta.json")
    }

    fn events_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("events.jsonl")
    }

    pub fn todos_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("todos.json")
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Allocate a fresh opaque session id and write `meta.json`. Refuses to
    /// overwrite an existing session directory.
    pub fn create_session(&self, metadata: SessionMetadata) -> Result<String, StoreError> {
        let session_id = Uuid::new_v4().to_string();
        let dir = self.session_dir(&session_id);
        if dir.exists() {
            return Err(StoreError::AlreadyExists(session_id));
        }
        fs::create_dir_all(&dir)?;
        let meta = SessionMeta {
            session_id: session_id.clone(),
            created_at: Self::now_secs(),
            metadata: serde_json::to_value(&metadata)?,
        };
        fs::write(self.meta_path(&session_id), serde_json::to_string_pretty(&meta)?)?;
        File::create(self.events_path(&session_id))?;
        Ok(session_id)
    }

    pub fn read_meta(&self, session_id: &str) -> Result<SessionMeta, StoreError> {
        let path = self.meta_path(session_id);
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Append one event, assigning the next monotonic `seq` and stamping
    /// `ts`. Infers the next `seq` from the log tail the first time a
    /// session is touched in this process, then caches it.
    pub fn append_event(
        &self,
        session_id: &str,
        event: Event,
        parent_tool_use_id: Option<String>,
        agent_name: Option<String>,
    ) -> Result<StoredEvent, StoreError> {
        let path = self.events_path(session_id);
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }

        let next_seq = {
            let mut cache = self.seq_cache.lock().unwrap();
            let seq = match cache.get(session_id) {
                Some(s) => *s,
                None => {
                    let existing = self.read_events(session_id)?;
                    existing.last().map(|e| e.seq + 1).unwrap_or(1)
                }
            };
            cache.insert(session_id.to_string(), seq + 1);
            seq
        };

        let stored = StoredEvent {
            seq: next_seq,
            ts: Self::now_secs(),
            parent_tool_use_id,
            agent_name,
            event,
        };

        let line = stored.encode_line()?;
        let mut file = OpenOptions::new().append(true).open(&path)?;
        writeln!(file, "{line}")?;
        file.flush()?;

        Ok(stored)
    }

    /// Returns events in written order. Malformed lines and unknown event
    /// kinds are hard errors, never silently skipped.
    pub fn read_events(&self, session_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let path = self.events_path(session_id);
        if !path.exists() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(StoredEvent::decode_line(&line)?);
        }
        Ok(events)
    }

    /// Copy all of `parent_session_id`'s events with `seq <= head_seq` into a
    /// freshly created session, skipping `system.init`, `result`, and any
    /// `session.*` control events. The caller (runtime) writes a new
    /// `system.init` on first use of the forked session.
    pub fn fork_session(
        &self,
        parent_session_id: &str,
        head_seq: Option<u64>,
        metadata: SessionMetadata,
    ) -> Result<String, StoreError> {
        let parent_events = self.read_events(parent_session_id)?;
        let cutoff = head_seq.unwrap_or(u64::MAX);

        let mut metadata = metadata;
        metadata.parent_session_id = Some(parent_session_id.to_string());

        let new_id = self.create_session(metadata)?;
        for stored in parent_events.into_iter().filter(|e| e.seq <= cutoff) {
            if stored.event.is_control_or_boundary() {
                continue;
            }
            self.append_event(
                &new_id,
                stored.event,
                stored.parent_tool_use_id,
                stored.agent_name,
            )?;
        }
        Ok(new_id)
    }

    pub fn checkpoint(&self, session_id: &str, label: impl Into<String>) -> Result<StoredEvent, StoreError> {
        self.append_event(
            session_id,
            Event::SessionCheckpoint { label: label.into() },
            None,
            None,
        )
    }

    pub fn set_head(
        &self,
        session_id: &str,
        head_seq: u64,
        reason: Option<String>,
    ) -> Result<StoredEvent, StoreError> {
        self.append_event(
            session_id,
            Event::SessionSetHead { head_seq, reason },
            None,
            None,
        )
    }

    pub fn undo(&self, session_id: &str) -> Result<StoredEvent, StoreError> {
        self.append_event(session_id, Event::SessionUndo, None, None)
    }

    pub fn redo(&self, session_id: &str) -> Result<StoredEvent, StoreError> {
        self.append_event(session_id, Event::SessionRedo, None, None)
    }

    /// The most recent `result` event in the log, if any — used on resume to
    /// reconstruct `previous_response_id`/`supports_previous_response_id`.
    pub fn last_result(&self, session_id: &str) -> Result<Option<StoredEvent>, StoreError> {
        let events = self.read_events(session_id)?;
        Ok(events
            .into_iter()
            .rev()
            .find(|e| matches!(e.event, Event::Result { .. })))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
