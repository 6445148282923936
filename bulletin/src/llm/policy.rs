//! Retry + fallback policy for model calls.

use std::time::Duration;

use tracing::{info, warn};

use super::{LlmProvider, LlmRequest};
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct CallPolicy {
    pub primary_model: String,
    /// Attempts against the primary model, at least 1
    pub primary_attempts: u32,
    /// Delay before primary attempt n+2 is `delays[n]`; the last entry repeats
    pub delays: Vec<Duration>,
    /// Tried exactly once, immediately after the primary attempts are exhausted
    pub fallback_model: Option<String>,
    /// Applied to every single attempt
    pub timeout: Duration,
    /// Output cap sent with each request; `None` leaves the provider default
    pub max_tokens: Option<usize>,
}

impl CallPolicy {
    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 || self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt as usize - 2).min(self.delays.len() - 1);
        self.delays[idx]
    }
}

#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub content: String,
    pub model: String,
    /// Total calls made, fallback included
    pub attempts: u32,
    pub used_fallback: bool,
}

async fn attempt(
    provider: &dyn LlmProvider,
    policy: &CallPolicy,
    model: &str,
    system: &str,
    prompt: &str,
) -> Result<String, PipelineError> {
    let timeout = policy.timeout;
    let request = LlmRequest {
        model: model.to_string(),
        system: Some(system.to_string()),
        prompt: prompt.to_string(),
        max_tokens: policy.max_tokens,
        temperature: None,
        timeout_seconds: Some(timeout.as_secs().max(1)),
    };

    let response = tokio::time::timeout(timeout, provider.generate(request))
        .await
        .map_err(|_| PipelineError::ModelTimeout {
            model: model.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| PipelineError::Model {
            model: model.to_string(),
            message: e.to_string(),
        })?;

    if response.content.trim().is_empty() {
        return Err(PipelineError::Model {
            model: model.to_string(),
            message: "empty completion".to_string(),
        });
    }
    Ok(response.content)
}

/// Run `prompt` through the primary model (with retries) and then the fallback model.
pub async fn call_with_policy(
    provider: &dyn LlmProvider,
    policy: &CallPolicy,
    system: &str,
    prompt: &str,
) -> Result<PolicyOutcome, PipelineError> {
    let max_attempts = policy.primary_attempts.max(1);
    let mut calls = 0;
    let mut last_error = None;

    for n in 1..=max_attempts {
        let backoff = policy.delay_before(n);
        if !backoff.is_zero() {
            info!(
                "Retrying {} (attempt {}/{}) after {:?}...",
                policy.primary_model, n, max_attempts, backoff
            );
            tokio::time::sleep(backoff).await;
        }

        calls += 1;
        match attempt(provider, policy, &policy.primary_model, system, prompt).await {
            Ok(content) => {
                return Ok(PolicyOutcome {
                    content,
                    model: policy.primary_model.clone(),
                    attempts: calls,
                    used_fallback: false,
                })
            }
            Err(e) => {
                warn!(model = %policy.primary_model, attempt = n, "model call failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    if let Some(fallback) = &policy.fallback_model {
        info!(from = %policy.primary_model, to = %fallback, "switching to fallback model");
        calls += 1;
        match attempt(provider, policy, fallback, system, prompt).await {
            Ok(content) => {
                return Ok(PolicyOutcome {
                    content,
                    model: fallback.clone(),
                    attempts: calls,
                    used_fallback: true,
                })
            }
            Err(e) => {
                warn!(model = %fallback, "fallback model failed: {}", e);
                last_error = Some(e);
            }
        }
    }

    Err(PipelineError::AllModelsFailed(
        last_error.map(|e| e.to_string()).unwrap_or_else(|| "no attempts made".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use std::sync::Mutex;

    /// Scripted provider: replies per model, records every model it was asked for.
    struct Scripted {
        calls: Mutex<Vec<String>>,
        caps: Mutex<Vec<Option<usize>>>,
        fail_models: Vec<&'static str>,
        slow_models: Vec<&'static str>,
    }

    impl Scripted {
        fn new(fail_models: Vec<&'static str>, slow_models: Vec<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                caps: Mutex::new(Vec::new()),
                fail_models,
                slow_models,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, request: LlmRequest) -> anyhow::Result<LlmResponse> {
            self.calls.lock().unwrap().push(request.model.clone());
            self.caps.lock().unwrap().push(request.max_tokens);
            if self.slow_models.iter().any(|m| *m == request.model) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            if self.fail_models.iter().any(|m| *m == request.model) {
                anyhow::bail!("LLM API error 500: boom");
            }
            Ok(LlmResponse {
                content: format!("ok from {}", request.model),
                usage: UsageMetadata::default(),
                model: request.model,
            })
        }
    }

    fn policy(fallback: Option<&str>) -> CallPolicy {
        CallPolicy {
            primary_model: "primary".into(),
            primary_attempts: 2,
            delays: vec![Duration::ZERO],
            fallback_model: fallback.map(String::from),
            timeout: Duration::from_millis(100),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let provider = Scripted::new(vec![], vec![]);
        let out = call_with_policy(&provider, &policy(Some("backup")), "sys", "hola").await.unwrap();
        assert_eq!(out.model, "primary");
        assert_eq!(out.attempts, 1);
        assert!(!out.used_fallback);
        assert_eq!(provider.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn primary_failures_then_fallback() {
        let provider = Scripted::new(vec!["primary"], vec![]);
        let out = call_with_policy(&provider, &policy(Some("backup")), "sys", "hola").await.unwrap();
        assert!(out.used_fallback);
        assert_eq!(out.content, "ok from backup");
        assert_eq!(provider.calls(), vec!["primary", "primary", "backup"]);
    }

    #[tokio::test]
    async fn timeouts_then_fallback_once_then_all_failed() {
        let provider = Scripted::new(vec!["backup"], vec!["primary"]);
        let err = call_with_policy(&provider, &policy(Some("backup")), "sys", "hola")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AllModelsFailed(_)));
        assert_eq!(provider.calls(), vec!["primary", "primary", "backup"]);
    }

    #[tokio::test]
    async fn output_cap_follows_policy_on_every_attempt() {
        let provider = Scripted::new(vec!["primary"], vec![]);
        call_with_policy(&provider, &policy(Some("backup")), "sys", "hola").await.unwrap();
        assert_eq!(*provider.caps.lock().unwrap(), vec![None, None, None]);

        let provider = Scripted::new(vec![], vec![]);
        let capped = CallPolicy {
            max_tokens: Some(600),
            ..policy(None)
        };
        call_with_policy(&provider, &capped, "sys", "hola").await.unwrap();
        assert_eq!(*provider.caps.lock().unwrap(), vec![Some(600)]);
    }

    #[tokio::test]
    async fn no_fallback_configured() {
        let provider = Scripted::new(vec!["primary"], vec![]);
        let err = call_with_policy(&provider, &policy(None), "sys", "hola").await.unwrap_err();
        assert!(matches!(err, PipelineError::AllModelsFailed(_)));
        assert_eq!(provider.calls().len(), 2);
    }

    #[test]
    fn delay_schedule_repeats_last_entry() {
        let p = CallPolicy {
            primary_model: "m".into(),
            primary_attempts: 4,
            delays: vec![Duration::from_secs(3), Duration::from_secs(6)],
            fallback_model: None,
            timeout: Duration::from_secs(1),
            max_tokens: None,
        };
        assert_eq!(p.delay_before(1), Duration::ZERO);
        assert_eq!(p.delay_before(2), Duration::from_secs(3));
        assert_eq!(p.delay_before(3), Duration::from_secs(6));
        assert_eq!(p.delay_before(4), Duration::from_secs(6));
    }
}
