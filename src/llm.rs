use std::thread;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{PilotError, jitter_ratio, parse_retry_after};

/// The two supported request shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderKind {
    /// `POST {base}/api/generate` with `{model, prompt, stream:false}`.
    Ollama,
    /// `POST {base}/chat/completions` with `{model, messages}`.
    OpenAi,
}

impl ProviderKind {
    pub(crate) fn parse(value: &str) -> Result<Self, PilotError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            "openai" | "openai-compatible" | "chat" => Ok(ProviderKind::OpenAi),
            other => Err(PilotError::Config(format!("unknown provider '{other}'"))),
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: usize,
    pub(crate) base_secs: f64,
    pub(crate) max_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_secs: 0.5,
            max_secs: 4.0,
        }
    }
}

impl RetryPolicy {
    /// Capped exponential delay before retry number `attempt + 1`, stretched
    /// to honour a server `Retry-After`, plus up to 20% jitter.
    pub(crate) fn delay(&self, attempt: usize, retry_after: Option<f64>, jitter: f64) -> Duration {
        let mut delay = (self.base_secs * 2.0_f64.powi(attempt as i32)).min(self.max_secs);
        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after);
        }
        delay *= 1.0 + jitter.clamp(0.0, 1.0) * 0.2;
        Duration::from_secs_f64(delay.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RequestFailure {
    Status {
        code: u16,
        body: String,
        retry_after: Option<f64>,
    },
    Transport(String),
}

impl RequestFailure {
    fn retry_after(&self) -> Option<f64> {
        match self {
            RequestFailure::Status { retry_after, .. } => *retry_after,
            RequestFailure::Transport(_) => None,
        }
    }
}

impl From<RequestFailure> for PilotError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Status { code, body, .. } => PilotError::ProviderError { status: code, body },
            RequestFailure::Transport(message) => PilotError::ProviderUnavailable(message),
        }
    }
}

/// Transport failures, 429 and 5xx are worth another attempt; other 4xx are not.
pub(crate) fn is_transient(failure: &RequestFailure) -> bool {
    match failure {
        RequestFailure::Transport(_) => true,
        RequestFailure::Status { code, .. } => *code == 429 || (500..600).contains(code),
    }
}

/// Run `attempt` until it succeeds, the classifier rejects the failure, or
/// the retry budget is spent. `sleep` is injected so tests run instantly.
pub(crate) fn with_retries<T>(
    policy: &RetryPolicy,
    classify: impl Fn(&RequestFailure) -> bool,
    mut attempt: impl FnMut(usize) -> Result<T, RequestFailure>,
    mut sleep: impl FnMut(Duration),
) -> Result<T, RequestFailure> {
    let mut n = 0;
    loop {
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if n >= policy.max_retries || !classify(&failure) {
                    return Err(failure);
                }
                let delay = policy.delay(n, failure.retry_after(), jitter_ratio());
                tracing::warn!(attempt = n + 1, delay_ms = delay.as_millis() as u64, failure = ?failure, "retrying provider request");
                sleep(delay);
                n += 1;
            }
        }
    }
}

/// Text-completion seam used by the planner and the builder.
pub(crate) trait LlmClient {
    fn complete(&self, prompt: &str) -> Result<String, PilotError>;
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    fn base_url(&self) -> &str;
}

#[derive(Debug, Clone)]
pub(crate) struct LlmSettings {
    pub(crate) provider: ProviderKind,
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) timeout_secs: u64,
    pub(crate) retry: RetryPolicy,
}

/// Parse and canonicalise a provider base URL (no trailing slash).
pub(crate) fn normalize_base_url(raw: &str) -> Result<String, PilotError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|err| PilotError::Config(format!("invalid base URL '{raw}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PilotError::Config(format!(
            "base URL must be http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub(crate) fn extract_completion(kind: ProviderKind, body: &str) -> Result<String, PilotError> {
    let text = match kind {
        ProviderKind::Ollama => serde_json::from_str::<GenerateResponse>(body)
            .ok()
            .and_then(|r| r.response),
        ProviderKind::OpenAi => serde_json::from_str::<ChatResponse>(body)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content),
    };
    text.ok_or_else(|| {
        PilotError::MalformedResponse(format!(
            "{} response had no completion text",
            kind.as_str()
        ))
    })
}

/// Blocking HTTP provider over `ureq`.
pub(crate) struct HttpLlm {
    settings: LlmSettings,
    agent: ureq::Agent,
}

impl HttpLlm {
    pub(crate) fn new(mut settings: LlmSettings) -> Result<Self, PilotError> {
        settings.base_url = normalize_base_url(&settings.base_url)?;
        let timeout = Duration::from_secs(settings.timeout_secs.max(1));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Ok(Self { settings, agent })
    }

    fn endpoint(&self) -> String {
        match self.settings.provider {
            ProviderKind::Ollama => format!("{}/api/generate", self.settings.base_url),
            ProviderKind::OpenAi => format!("{}/chat/completions", self.settings.base_url),
        }
    }

    fn payload(&self, prompt: &str) -> serde_json::Value {
        match self.settings.provider {
            ProviderKind::Ollama => serde_json::json!({
                "model": self.settings.model,
                "prompt": prompt,
                "stream": false,
            }),
            ProviderKind::OpenAi => serde_json::json!({
                "model": self.settings.model,
                "messages": [{"role": "user", "content": prompt}],
            }),
        }
    }

    fn send_once(&self, url: &str, payload: &serde_json::Value) -> Result<String, RequestFailure> {
        let mut request = self
            .agent
            .post(url)
            .set("content-type", "application/json");
        if let Some(key) = self.settings.api_key.as_deref() {
            request = request.set("authorization", &format!("Bearer {key}"));
        }
        match request.send_json(payload.clone()) {
            Ok(resp) => resp
                .into_string()
                .map_err(|err| RequestFailure::Transport(format!("read body: {err}"))),
            Err(ureq::Error::Status(code, resp)) => {
                let retry_after = parse_retry_after(&resp);
                let body = resp.into_string().unwrap_or_default();
                Err(RequestFailure::Status {
                    code,
                    body,
                    retry_after,
                })
            }
            Err(ureq::Error::Transport(err)) => Err(RequestFailure::Transport(err.to_string())),
        }
    }
}

impl LlmClient for HttpLlm {
    fn complete(&self, prompt: &str) -> Result<String, PilotError> {
        let url = self.endpoint();
        let payload = self.payload(prompt);
        tracing::debug!(
            provider = self.settings.provider.as_str(),
            model = %self.settings.model,
            prompt_chars = prompt.len(),
            "calling provider"
        );
        let body = with_retries(
            &self.settings.retry,
            is_transient,
            |_| self.send_once(&url, &payload),
            thread::sleep,
        )?;
        extract_completion(self.settings.provider, &body)
    }

    fn provider(&self) -> &str {
        self.settings.provider.as_str()
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn base_url(&self) -> &str {
        &self.settings.base_url
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::LlmClient;
    use crate::PilotError;

    /// Replays canned completions in order and records every prompt.
    pub(crate) struct ScriptedLlm {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        pub(crate) fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl LlmClient for ScriptedLlm {
        fn complete(&self, prompt: &str) -> Result<String, PilotError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| PilotError::ProviderUnavailable("script exhausted".to_string()))
        }

        fn provider(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "scripted"
        }

        fn base_url(&self) -> &str {
            "http://mock.invalid"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> RequestFailure {
        RequestFailure::Status {
            code,
            body: format!("status {code}"),
            retry_after: None,
        }
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let policy = RetryPolicy::default();
        let mut sleeps = Vec::new();
        let result = with_retries(
            &policy,
            is_transient,
            |n| match n {
                0 => Err(RequestFailure::Transport("connection refused".into())),
                1 => Err(status(503)),
                _ => Ok("done"),
            },
            |d| sleeps.push(d),
        );
        assert_eq!(result, Ok("done"));
        assert_eq!(sleeps.len(), 2);
    }

    #[test]
    fn client_errors_fail_immediately() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result: Result<(), _> = with_retries(
            &policy,
            is_transient,
            |_| {
                attempts += 1;
                Err(status(401))
            },
            |_| panic!("must not sleep"),
        );
        assert_eq!(attempts, 1);
        assert_eq!(result, Err(status(401)));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_secs: 0.0,
            max_secs: 0.0,
        };
        let mut attempts = 0;
        let result: Result<(), _> = with_retries(
            &policy,
            is_transient,
            |_| {
                attempts += 1;
                Err(status(429))
            },
            |_| {},
        );
        assert_eq!(attempts, 3);
        assert!(matches!(result, Err(RequestFailure::Status { code: 429, .. })));
    }

    #[test]
    fn delay_is_capped_and_honours_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0, None, 0.0), Duration::from_millis(500));
        assert_eq!(policy.delay(1, None, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay(10, None, 0.0), Duration::from_secs(4));
        assert_eq!(policy.delay(0, Some(7.0), 0.0), Duration::from_secs(7));
        assert!(policy.delay(0, None, 1.0) <= Duration::from_millis(600));
    }

    #[test]
    fn failures_map_to_provider_errors() {
        let err: PilotError = status(500).into();
        assert!(matches!(err, PilotError::ProviderError { status: 500, .. }));
        let err: PilotError = RequestFailure::Transport("dns".into()).into();
        assert!(matches!(err, PilotError::ProviderUnavailable(_)));
    }

    #[test]
    fn completion_text_per_provider_shape() {
        assert_eq!(
            extract_completion(ProviderKind::Ollama, r#"{"response":"hi","done":true}"#).unwrap(),
            "hi"
        );
        assert_eq!(
            extract_completion(
                ProviderKind::OpenAi,
                r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#
            )
            .unwrap(),
            "hello"
        );
        assert!(matches!(
            extract_completion(ProviderKind::OpenAi, r#"{"choices":[]}"#),
            Err(PilotError::MalformedResponse(_))
        ));
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            normalize_base_url(" http://localhost:11434/ ").unwrap(),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/").unwrap(),
            "https://api.openai.com/v1"
        );
        assert!(normalize_base_url("ftp://x").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!(ProviderKind::parse("OpenAI").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("ollama").unwrap(), ProviderKind::Ollama);
        assert!(ProviderKind::parse("bard").is_err());
    }
}
