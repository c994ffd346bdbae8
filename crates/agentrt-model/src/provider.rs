// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{
    catalog::{InputModality, ModelCatalogEntry},
    CompletionRequest, ResponseEvent,
};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The wire shape a provider speaks.
///
/// `Legacy`: the caller resends the full transcript every turn; tool calls
/// live in an assistant message's `tool_calls` array.
/// `Responses`: the server threads the conversation by `response_id`; the
/// caller may send only the new input items plus `previous_response_id`.
///
/// Real reflection-based detection (inspecting a callable's accepted
/// parameter names, as a dynamically-typed host would) has no equivalent in
/// a statically-typed trait — this is declared explicitly per provider
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderProtocol {
    Legacy,
    Responses,
}

/// One of the two known-recoverable failure modes for the responses
/// protocol. Both indicate the server no longer recognizes the thread the
/// caller tried to continue, and are handled by the agent loop by falling
/// back to `Legacy`-style behavior for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableProviderError {
    /// The server rejected the `previous_response_id` parameter outright
    /// (e.g. a proxy in front of a provider that dropped responses-API
    /// support, or a model swap mid-session).
    UnsupportedPreviousResponseId,
    /// The server accepted the request but could not find the function
    /// call whose output the caller just sent — the threaded state it
    /// expected no longer exists server-side (expired, evicted, or from a
    /// different `response_id` chain than the one just sent).
    ToolCallNotFound,
}

/// Classify a completion error against the two recoverable conditions named
/// for the responses protocol. Returns `None` for anything else (including
/// the unrelated `extract_n_ctx_from_error` context-overflow condition),
/// which callers must continue to propagate as a hard failure.
pub fn classify_recoverable_error(err: &anyhow::Error) -> Option<RecoverableProviderError> {
    let msg = err.to_string();
    if msg.contains("Unsupported parameter") && msg.contains("previous_response_id") {
        return Some(RecoverableProviderError::UnsupportedPreviousResponseId);
    }
    if msg.contains("No tool call found for function call output") {
        return Some(RecoverableProviderError::ToolCallNotFound);
    }
    None
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Wire protocol this provider speaks. Defaults to `Legacy`, matching
    /// every built-in chat-completions-style driver.
    fn protocol(&self) -> ProviderProtocol {
        ProviderProtocol::Legacy
    }

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// List all models available from this provider.
    ///
    /// The default implementation returns only the static catalog entries for
    /// this provider.  Override to perform a live API query (and then merge
    /// with the catalog for metadata enrichment).
    async fn list_models(&self) -> anyhow::Result<Vec<ModelCatalogEntry>> {
        let provider = self.name();
        let entries = crate::catalog::static_catalog()
            .into_iter()
            .filter(|e| e.provider == provider)
            .collect();
        Ok(entries)
    }

    /// Maximum output tokens for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_max_output_tokens(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.max_output_tokens)
    }

    /// Context window size for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn catalog_context_window(&self) -> Option<u32> {
        crate::catalog::lookup(self.name(), self.model_name()).map(|e| e.context_window)
    }

    /// Query the live API for the actual context window in use.
    ///
    /// Default implementation returns `None` (no live probe available).
    /// Override in providers that expose a properties or info endpoint —
    /// e.g. llama.cpp-compatible servers expose `GET /props` which includes
    /// the loaded `n_ctx` value.
    ///
    /// Returns `Some(n_ctx)` when the probe succeeds, `None` otherwise.
    /// A `Some(0)` result is treated as "unknown" by callers.
    async fn probe_context_window(&self) -> Option<u32> {
        None
    }

    /// Input modalities supported by this provider/model combination.
    ///
    /// Reads from the static catalog.  Returns `[Text]` when the model is not
    /// found, to be conservative (avoid sending images to unknown models).
    fn input_modalities(&self) -> Vec<InputModality> {
        crate::catalog::lookup(self.name(), self.model_name())
            .map(|e| e.input_modalities)
            .unwrap_or_else(|| vec![InputModality::Text])
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}
