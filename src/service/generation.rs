use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no API key configured for the generation service")]
    MissingApiKey,
    #[error("request to generation service failed: {0}")]
    Transport(String),
    #[error("generation service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse generation response: {0}")]
    Decode(String),
    #[error("generation service returned no choices")]
    EmptyResponse,
    #[error("generation service did not answer within {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    /// Transport faults, rate limiting and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Transport(_) => true,
            GenerationError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A chat-completion style text generator.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Sends the ordered messages and returns the content of the reply message.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Calls `client` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. Backoff doubles after each failure.
pub async fn complete_with_retry<C: GenerationClient + ?Sized>(
    client: &C,
    messages: &[ChatMessage],
    policy: RetryPolicy,
) -> Result<String, GenerationError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.complete(messages).await {
            Ok(content) => return Ok(content),
            Err(err) if attempt < attempts && err.is_retryable() => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, error = %err, ?delay, "generation attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClient {
        replies: Mutex<Vec<Result<String, GenerationError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedClient {
        fn new(mut replies: Vec<Result<String, GenerationError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(GenerationError::EmptyResponse))
        }
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let client = ScriptedClient::new(vec![
            Err(GenerationError::Status {
                status: 503,
                body: "busy".to_string(),
            }),
            Err(GenerationError::Transport("reset".to_string())),
            Ok("[]".to_string()),
        ]);
        let reply = complete_with_retry(&client, &[], quick(3)).await.unwrap();
        assert_eq!(reply, "[]");
        assert_eq!(*client.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let client = ScriptedClient::new(vec![Err(GenerationError::Status {
            status: 401,
            body: "bad key".to_string(),
        })]);
        let err = complete_with_retry(&client, &[], quick(3)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status: 401, .. }));
        assert_eq!(*client.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = ScriptedClient::new(vec![
            Err(GenerationError::Transport("a".to_string())),
            Err(GenerationError::Transport("b".to_string())),
            Ok("late".to_string()),
        ]);
        let err = complete_with_retry(&client, &[], quick(2)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(ref m) if m == "b"));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
