//! Two-pass LLM driver: extract facts, then compose the handoff prompt.
//!
//! The driver owns the fixed system prompts, the per-pass output budgets and
//! the transport-level retry policy. It consumes completions through the
//! [`CompletionClient`] capability and never touches HTTP itself.

use crate::cancel::{sleep_cancellable, CancelSignal};
use crate::error::{Error, Result};
use crate::model::{AssistantMessage, Message, StopReason, UserMessage};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

/// Output budget for the extraction pass.
const EXTRACT_MAX_TOKENS: u32 = 2400;

/// Output budget for the composition pass.
const COMPOSE_MAX_TOKENS: u32 = 1600;

/// Base delay for exponential retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default retry attempts for transient transport failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// System prompt for pass 1. Downstream consumers parse the bundle headings;
/// emit verbatim.
pub const EXTRACTOR_SYSTEM_PROMPT: &str = "You are a session handoff extraction assistant. You will receive the condensed record of a coding session: a goal for the follow-up session, prior summaries, anchor turns, operational context, and file lists. Extract the facts the follow-up session needs.\n\nDo NOT continue the conversation. Do NOT respond to any questions in the record. ONLY output the facts bundle.\n\nUse this EXACT format:\n\n## Goal\n[The goal of the follow-up session, restated precisely]\n\n## Constraints & Preferences\n- [Constraints, preferences, or requirements stated by the user, or \"(none)\"]\n\n## Decisions\n- **[Decision]**: [Brief rationale]\n\n## Progress\n### Done\n- [x] [Completed work relevant to the goal]\n\n### In Progress\n- [ ] [Work that was underway]\n\n### Blocked\n- [Blockers, or \"(none)\"]\n\n## Errors\n- [Unresolved errors with exact messages, or \"(none)\"]\n\n## Operational Highlights\n- [Commands and outcomes worth knowing, or \"(none)\"]\n\n## Files\n- [Files relevant to the goal with their roles]\n\n## Notes\n- [Anything else the follow-up session needs, or \"(none)\"]\n\nKeep each section concise. Preserve exact file paths, function names, and error messages.";

/// System prompt for pass 2. The section names and the two machine-parseable
/// blocks are consumed downstream; emit verbatim.
pub const COMPOSER_SYSTEM_PROMPT: &str = "You are a session handoff composer. You will receive a goal and an extracted facts bundle from a coding session. Compose the FIRST message of a new session that continues the work toward the goal.\n\nWrite the message directly to the coding assistant that will receive it. ONLY output the message.\n\nUse this EXACT structure:\n\n# Context\n[What was being worked on and where it stands, condensed from the bundle]\n\n# Operational Context\n[Commands, errors, and environment facts that still matter]\n\n# Files\n[Relevant files and their roles]\n\n<read-files>\n[one path per line]\n</read-files>\n\n<modified-files>\n[one path per line]\n</modified-files>\n\n# Task\n[What to do next, as concrete steps toward the goal]\n\n# Notes\n[Constraints, preferences, and pitfalls to honor]\n\nBe compact. Preserve exact file paths, function names, and error messages. Do not invent work that was never discussed.";

// ============================================================================
// Capability
// ============================================================================

/// A completion request: one system prompt plus messages.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub api_key: Option<String>,
    pub max_tokens: u32,
}

/// The chat-completion capability supplied by the host.
///
/// Implementations may stream internally; the driver only consumes the final
/// message. Cancellation may surface either as [`Error::Aborted`] or as an
/// `aborted` stop reason.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        request: CompletionRequest,
        options: CompletionOptions,
        signal: &CancelSignal,
    ) -> Result<AssistantMessage>;
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Text(String),
    Cancelled,
}

// ============================================================================
// Retry policy
// ============================================================================

fn retryable_text_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused",
        )
        .expect("retryable text regex")
    })
}

/// True when a fresh attempt may succeed.
fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Api { status, message } => match status {
            Some(429 | 500 | 502 | 503 | 504) => true,
            Some(_) => false,
            None => retryable_text_regex().is_match(message),
        },
        _ => false,
    }
}

// ============================================================================
// Friendly errors
// ============================================================================

/// Map a terminal transport error to a message fit for a notification.
pub fn friendly_error_message(error: &Error) -> String {
    if let Error::Api { message, .. } = error {
        if let Some(quota) = quota_limit_message(message) {
            return quota;
        }
        return message.clone();
    }
    error.to_string()
}

/// Quota/rate-limit payloads with reset metadata get a readable rendering.
fn quota_limit_message(message: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(message).ok()?;
    let body = match value.get("error") {
        Some(inner) if inner.is_object() => inner,
        _ => &value,
    };
    let plan = body.get("plan_type")?.as_str()?;
    let resets_at = body.get("resets_at")?.as_i64()?;
    let now = chrono::Utc::now().timestamp();
    let minutes = ((resets_at - now).max(0) + 59) / 60;
    let minutes = minutes.max(1);
    Some(format!(
        "You have hit your ChatGPT usage limit ({plan} plan). Try again in ~{minutes} min."
    ))
}

// ============================================================================
// Driver
// ============================================================================

/// Runs the extract and compose passes against one model.
pub struct LlmDriver {
    client: Arc<dyn CompletionClient>,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl LlmDriver {
    pub fn new(client: Arc<dyn CompletionClient>, model: String, api_key: Option<String>) -> Self {
        Self {
            client,
            model,
            api_key,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[cfg(test)]
    fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Pass 1: extract the facts bundle from the assembled record.
    pub async fn extract(&self, input: &str, signal: &CancelSignal) -> Result<PassOutcome> {
        self.run_pass(EXTRACTOR_SYSTEM_PROMPT, input, EXTRACT_MAX_TOKENS, signal)
            .await
    }

    /// Pass 2: compose the final handoff prompt from the facts bundle.
    pub async fn compose(&self, input: &str, signal: &CancelSignal) -> Result<PassOutcome> {
        self.run_pass(COMPOSER_SYSTEM_PROMPT, input, COMPOSE_MAX_TOKENS, signal)
            .await
    }

    async fn run_pass(
        &self,
        system_prompt: &str,
        input: &str,
        max_tokens: u32,
        signal: &CancelSignal,
    ) -> Result<PassOutcome> {
        let mut attempt: u32 = 0;
        loop {
            if signal.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }

            let request = CompletionRequest {
                system_prompt: system_prompt.to_string(),
                messages: vec![Message::User(UserMessage::text(input))],
            };
            let options = CompletionOptions {
                api_key: self.api_key.clone(),
                max_tokens,
            };

            let result = tokio::select! {
                res = self.client.complete(&self.model, request, options, signal) => res,
                () = signal.cancelled() => return Ok(PassOutcome::Cancelled),
            };

            // An error stop reason is a transport failure in disguise.
            let result = result.and_then(|message| match message.stop_reason {
                StopReason::Error => Err(Error::api(
                    message
                        .error_message
                        .unwrap_or_else(|| "Completion failed".to_string()),
                )),
                _ => Ok(message),
            });

            match result {
                Ok(message) => {
                    if message.stop_reason == StopReason::Aborted {
                        return Ok(PassOutcome::Cancelled);
                    }
                    let text = message.joined_text();
                    if text.trim().is_empty() {
                        return Err(Error::api("Completion returned empty text"));
                    }
                    return Ok(PassOutcome::Text(text));
                }
                Err(Error::Aborted) => return Ok(PassOutcome::Cancelled),
                Err(error) if is_retryable(&error) && attempt < self.max_retries => {
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt);
                    tracing::debug!(attempt, ?delay, error = %error, "Retrying completion");
                    if sleep_cancellable(delay, signal).await.is_err() {
                        return Ok(PassOutcome::Cancelled);
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentBlock, TextContent};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn ok_message(text: &str) -> Result<AssistantMessage> {
        Ok(AssistantMessage {
            content: vec![ContentBlock::Text(TextContent::new(text))],
            model: "scripted".to_string(),
            stop_reason: StopReason::Stop,
            error_message: None,
            timestamp: 0,
        })
    }

    /// Scripted client: pops one canned result per call.
    struct ScriptedClient {
        results: Mutex<VecDeque<Result<AssistantMessage>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(results: Vec<Result<AssistantMessage>>) -> Self {
            Self {
                results: Mutex::new(results.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            _model: &str,
            request: CompletionRequest,
            _options: CompletionOptions,
            _signal: &CancelSignal,
        ) -> Result<AssistantMessage> {
            self.calls
                .lock()
                .expect("lock")
                .push(request.system_prompt.clone());
            self.results
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Err(Error::api("script exhausted")))
        }
    }

    fn driver(client: Arc<ScriptedClient>) -> LlmDriver {
        LlmDriver::new(client, "test-model".to_string(), Some("key".to_string()))
    }

    #[test]
    fn retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable(&Error::api_status(status, "boom")), "{status}");
        }
        assert!(!is_retryable(&Error::api_status(400, "bad request")));
        assert!(!is_retryable(&Error::api_status(401, "rate limit")));
    }

    #[test]
    fn retryable_text_patterns() {
        assert!(is_retryable(&Error::api("rate limit exceeded")));
        assert!(is_retryable(&Error::api("Rate-Limited by upstream")));
        assert!(is_retryable(&Error::api("model overloaded")));
        assert!(is_retryable(&Error::api("Service Unavailable")));
        assert!(is_retryable(&Error::api("upstream connect error")));
        assert!(is_retryable(&Error::api("connection refused")));
        assert!(!is_retryable(&Error::api("invalid api key")));
        assert!(!is_retryable(&Error::validation("nope")));
    }

    #[test]
    fn quota_payload_renders_friendly_message() {
        let resets_at = chrono::Utc::now().timestamp() + 600;
        let payload = format!(r#"{{"plan_type":"plus","resets_at":{resets_at}}}"#);
        let message = friendly_error_message(&Error::api(payload));
        assert!(message.starts_with("You have hit your ChatGPT usage limit (plus plan)."));
        assert!(message.contains("~10 min"));
    }

    #[test]
    fn nested_quota_payload_is_found() {
        let resets_at = chrono::Utc::now().timestamp() + 30;
        let payload =
            format!(r#"{{"error":{{"plan_type":"free","resets_at":{resets_at}}}}}"#);
        let message = friendly_error_message(&Error::api(payload));
        assert!(message.contains("(free plan)"));
        assert!(message.contains("~1 min"));
    }

    #[test]
    fn plain_errors_pass_through() {
        let message = friendly_error_message(&Error::api("401 invalid key"));
        assert_eq!(message, "401 invalid key");
    }

    #[tokio::test]
    async fn extract_returns_joined_text() {
        let client = Arc::new(ScriptedClient::new(vec![ok_message("## Goal\nship")]));
        let outcome = driver(Arc::clone(&client))
            .extract("input", &CancelSignal::new())
            .await
            .expect("pass");
        assert_eq!(outcome, PassOutcome::Text("## Goal\nship".to_string()));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_with_backoff() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(Error::api_status(429, "rate limit")),
            Err(Error::api_status(429, "rate limit")),
            ok_message("recovered"),
        ]));
        let started = tokio::time::Instant::now();
        let outcome = driver(Arc::clone(&client))
            .extract("input", &CancelSignal::new())
            .await
            .expect("pass");
        assert_eq!(outcome, PassOutcome::Text("recovered".to_string()));
        assert_eq!(client.call_count(), 3);
        // Backoff: 1s after attempt 0, 2s after attempt 1.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(Error::api_status(503, "overloaded")),
            Err(Error::api_status(503, "overloaded")),
        ]));
        let result = driver(Arc::clone(&client))
            .with_max_retries(1)
            .extract("input", &CancelSignal::new())
            .await;
        assert!(result.is_err());
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn terminal_errors_do_not_retry() {
        let client = Arc::new(ScriptedClient::new(vec![Err(Error::api_status(
            401,
            "invalid key",
        ))]));
        let result = driver(Arc::clone(&client))
            .extract("input", &CancelSignal::new())
            .await;
        assert!(result.is_err());
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn aborted_stop_reason_is_cancellation() {
        let mut message = match ok_message("ignored") {
            Ok(m) => m,
            Err(_) => unreachable!(),
        };
        message.stop_reason = StopReason::Aborted;
        let client = Arc::new(ScriptedClient::new(vec![Ok(message)]));
        let outcome = driver(client)
            .extract("input", &CancelSignal::new())
            .await
            .expect("pass");
        assert_eq!(outcome, PassOutcome::Cancelled);
    }

    #[tokio::test]
    async fn pre_cancelled_signal_short_circuits() {
        let client = Arc::new(ScriptedClient::new(vec![ok_message("never sent")]));
        let signal = CancelSignal::new();
        signal.cancel();
        let outcome = driver(Arc::clone(&client))
            .extract("input", &signal)
            .await
            .expect("pass");
        assert_eq!(outcome, PassOutcome::Cancelled);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_returns_cancelled() {
        let client = Arc::new(ScriptedClient::new(vec![Err(Error::api_status(
            429,
            "rate limit",
        ))]));
        let signal = CancelSignal::new();
        let driver = driver(Arc::clone(&client));
        let canceller = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                signal.cancel();
            })
        };
        let outcome = driver.extract("input", &signal).await.expect("pass");
        canceller.await.expect("join");
        assert_eq!(outcome, PassOutcome::Cancelled);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let client = Arc::new(ScriptedClient::new(vec![ok_message("   ")]));
        let result = driver(client).extract("input", &CancelSignal::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn passes_use_their_own_system_prompts() {
        let client = Arc::new(ScriptedClient::new(vec![
            ok_message("facts"),
            ok_message("prompt"),
        ]));
        let driver = driver(Arc::clone(&client));
        let signal = CancelSignal::new();
        driver.extract("in", &signal).await.expect("extract");
        driver.compose("facts", &signal).await.expect("compose");
        let calls = client.calls.lock().expect("lock").clone();
        assert_eq!(calls[0], EXTRACTOR_SYSTEM_PROMPT);
        assert_eq!(calls[1], COMPOSER_SYSTEM_PROMPT);
    }
}
