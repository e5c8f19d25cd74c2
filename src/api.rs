//! LLM API interaction with rate-limit-aware retry logic.
//!
//! This module provides the single seam between the pipeline and an
//! OpenAI-compatible LLM endpoint.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`AwfulAsk`]: Wraps the `awful_aj` library's `ask` function around an
//!   explicit [`LlmConfig`]
//! - [`RetryAsk`]: Decorator that retries rate-limited calls
//! - [`Agent`]: A persona (role, goal, backstory) rendered into each prompt
//! - [`ask_typed`] / [`ask_text`]: typed operations on top of any `AskAsync`
//!
//! # Retry Strategy
//!
//! Only rate-limit-class failures (HTTP 429, "rate limit") are retried, at
//! most `max_retries` times, sleeping `base_delay * attempt` in between. Every
//! other failure is returned immediately.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use awful_aj::api::ask;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LlmConfig;
use crate::decode::{self, Schema};
use crate::error::{PipelineError, Result};
use crate::utils::truncate_for_log;

/// Failure of a single LLM exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// The endpoint asked us to slow down.
    #[error("LLM rate limited: {0}")]
    RateLimited(String),
    /// Any other transport or API failure.
    #[error("LLM request failed: {0}")]
    Request(String),
}

impl LlmError {
    /// Classify an error message coming back from the client library.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("ratelimit") {
            Self::RateLimited(message)
        } else {
            Self::Request(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Trait for async LLM interaction.
///
/// Implementors send one user message to the model and return its text
/// reply. Decorators such as [`RetryAsk`] implement it too.
pub trait AskAsync {
    async fn ask(&self, text: &str) -> std::result::Result<String, LlmError>;
}

impl<T: AskAsync> AskAsync for &T {
    async fn ask(&self, text: &str) -> std::result::Result<String, LlmError> {
        (**self).ask(text).await
    }
}

impl<T: AskAsync> AskAsync for Arc<T> {
    async fn ask(&self, text: &str) -> std::result::Result<String, LlmError> {
        (**self).ask(text).await
    }
}

/// Wrapper that retries rate-limited calls of any [`AskAsync`] implementation.
///
/// # Backoff Strategy
///
/// ```text
/// delay = base_delay * attempt        (attempt = 1, 2, ..., max_retries)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Delay unit multiplied by the attempt number.
    base_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = AwfulAsk::new(llm_config);
    /// let retry_client = RetryAsk::new(client, 2, Duration::from_secs(30));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> StdDuration {
        self.base_delay.saturating_mul(attempt as u32)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> std::result::Result<String, LlmError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                        elapsed_ms_total = total_t0.elapsed().as_millis(),
                        ?delay,
                        error = %e,
                        "ask() rate limited; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        attempt,
                        elapsed_ms_total = total_t0.elapsed().as_millis(),
                        error = %e,
                        "ask() failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// [`AskAsync`] over `awful_aj::api::ask` with an owned configuration.
pub struct AwfulAsk {
    llm: LlmConfig,
}

impl AwfulAsk {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm }
    }
}

impl AskAsync for AwfulAsk {
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> std::result::Result<String, LlmError> {
        let t0 = Instant::now();
        let res = ask(
            &self.llm.config,
            text.to_string(),
            &self.llm.template,
            None,
            None,
        )
        .await
        .map_err(|e| LlmError::from_message(e.to_string()));
        let dt = t0.elapsed();

        match &res {
            Ok(r) => debug!(elapsed_ms = dt.as_millis(), bytes = r.len(), "API call succeeded"),
            Err(e) => warn!(elapsed_ms = dt.as_millis(), error = %e, "API call failed"),
        }
        res
    }
}

/// A role-played persona the model is asked to adopt for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    pub role: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
}

impl Agent {
    /// Render the persona header and the task instructions into one message.
    ///
    /// The `## Task:` line names the task so transcripts (and test doubles)
    /// can tell the steps apart.
    pub fn prompt(&self, task: &str, instructions: &str) -> String {
        format!(
            "You are acting as: {}\nGoal: {}\nBackground: {}\n\n## Task: {}\n\n{}",
            self.role,
            self.goal,
            self.backstory,
            task,
            instructions.trim()
        )
    }
}

/// Ask for free text; an empty reply is treated as a failure.
#[instrument(level = "info", skip_all, fields(task = %task))]
pub async fn ask_text<A: AskAsync>(
    asker: &A,
    agent: &Agent,
    task: &str,
    instructions: &str,
) -> Result<String> {
    let reply = asker.ask(&agent.prompt(task, instructions)).await?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(PipelineError::schema("text", format!("{task}: empty reply")));
    }
    Ok(reply.to_string())
}

/// Ask for output of schema `T` and decode it.
///
/// When the reply fails to parse because the JSON was cut off, the question
/// is asked once more before giving up with [`PipelineError::SchemaViolation`].
#[instrument(level = "info", skip_all, fields(task = %task, schema = T::NAME))]
pub async fn ask_typed<A: AskAsync, T: Schema>(
    asker: &A,
    agent: &Agent,
    task: &str,
    instructions: &str,
) -> Result<T> {
    let prompt = agent.prompt(task, instructions);
    let t0 = Instant::now();
    let reply = asker.ask(&prompt).await?;

    let decoded = match decode::decode::<T>(&reply) {
        Err(e) if e.is_truncated() => {
            warn!(error = %e, "EOF while parsing; re-asking once");
            let second = asker.ask(&prompt).await?;
            decode::decode::<T>(&second).map_err(|e2| (e2, second))
        }
        other => other.map_err(|e| (e, reply)),
    };

    match decoded {
        Ok(value) => {
            info!(elapsed_ms = t0.elapsed().as_millis(), "Decoded LLM output");
            Ok(value)
        }
        Err((e, raw)) => {
            warn!(
                error = %e,
                response_preview = %truncate_for_log(&raw, 300),
                "Model returned non-conforming output"
            );
            Err(PipelineError::schema(T::NAME, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        failures: Vec<LlmError>,
    }

    impl AskAsync for Flaky {
        async fn ask(&self, _text: &str) -> std::result::Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.failures.get(n) {
                Some(e) => Err(e.clone()),
                None => Ok("ok".to_string()),
            }
        }
    }

    fn rate_limited() -> LlmError {
        LlmError::from_message("HTTP 429 Too Many Requests")
    }

    #[test]
    fn classifies_rate_limit_messages() {
        assert!(rate_limited().is_rate_limited());
        assert!(LlmError::from_message("RateLimitError: slow down").is_rate_limited());
        assert!(!LlmError::from_message("connection reset").is_rate_limited());
    }

    #[test]
    fn delay_grows_linearly_with_attempt() {
        let retry = RetryAsk::new(
            Flaky { calls: AtomicUsize::new(0), failures: vec![] },
            2,
            StdDuration::from_secs(30),
        );
        assert_eq!(retry.delay_for(1), StdDuration::from_secs(30));
        assert_eq!(retry.delay_for(2), StdDuration::from_secs(60));
    }

    #[tokio::test]
    async fn retries_rate_limits_then_succeeds() {
        let inner = Flaky {
            calls: AtomicUsize::new(0),
            failures: vec![rate_limited(), rate_limited()],
        };
        let retry = RetryAsk::new(inner, 2, StdDuration::from_millis(1));
        assert_eq!(retry.ask("hi").await.unwrap(), "ok");
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Flaky {
            calls: AtomicUsize::new(0),
            failures: vec![rate_limited(), rate_limited(), rate_limited()],
        };
        let retry = RetryAsk::new(inner, 2, StdDuration::from_millis(1));
        assert!(retry.ask("hi").await.unwrap_err().is_rate_limited());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let inner = Flaky {
            calls: AtomicUsize::new(0),
            failures: vec![LlmError::from_message("invalid api key")],
        };
        let retry = RetryAsk::new(inner, 2, StdDuration::from_millis(1));
        assert!(retry.ask("hi").await.is_err());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn agent_prompt_names_the_task() {
        let agent = Agent {
            role: "Tester",
            goal: "test",
            backstory: "tests things",
        };
        let p = agent.prompt("identify_claims", "  do it  ");
        assert!(p.starts_with("You are acting as: Tester"));
        assert!(p.contains("## Task: identify_claims\n\ndo it"));
    }

    struct Replies(Mutex<Vec<String>>);

    impl AskAsync for Replies {
        async fn ask(&self, _text: &str) -> std::result::Result<String, LlmError> {
            Ok(self.0.lock().unwrap().remove(0))
        }
    }

    #[tokio::test]
    async fn typed_call_reasks_once_on_truncated_json() {
        let asker = Replies(Mutex::new(vec![
            r#"{"interests": ["ai", "#.to_string(),
            r#"{"interests": ["ai", "chips"]}"#.to_string(),
        ]));
        let agent = Agent { role: "r", goal: "g", backstory: "b" };
        let profile: crate::models::InterestProfile =
            ask_typed(&asker, &agent, "interest_extract", "x").await.unwrap();
        assert_eq!(profile.tags(), ["ai", "chips"]);
    }

    #[tokio::test]
    async fn typed_call_reports_schema_violation() {
        let asker = Replies(Mutex::new(vec!["no json here".to_string()]));
        let agent = Agent { role: "r", goal: "g", backstory: "b" };
        let err = ask_typed::<_, crate::models::InterestProfile>(&asker, &agent, "t", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SchemaViolation { .. }));
    }
}
