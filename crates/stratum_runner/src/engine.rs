//! Retrying execution engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::classify::{Classifier, FailureClass};
use crate::config::CommandInvocation;
use crate::error::RunnerResult;
use crate::retry::RetryPolicy;
use crate::runner::{CommandResult, CommandRunner};

/// Number of stderr lines kept in failure messages.
pub const STDERR_TAIL_LINES: usize = 20;

/// A failed attempt, as recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub exit_code: i32,
    pub class: FailureClass,
    pub duration_ms: u64,
    /// Back-off slept after this attempt, zero if none followed
    pub backoff_ms: u64,
}

/// Final outcome of an invocation across all of its attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Operation that was run, e.g. `destroy` for `apply -destroy`
    pub command: String,
    /// Result of the last attempt
    pub result: CommandResult,
    /// Number of launches made
    pub attempts: u32,
    /// Classification of the last failure, `None` on success
    pub failure: Option<FailureClass>,
    /// Every failed attempt in order
    pub history: Vec<AttemptRecord>,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.failure.is_none() && self.result.success()
    }

    /// Diagnostic line for a failed outcome: classification, attempt count
    /// and the tail of stderr.
    pub fn failure_message(&self) -> Option<String> {
        let class = self.failure?;
        let mut message = format!(
            "terraform {} failed ({}) after {} attempt{}, exit code {}",
            self.command,
            class,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.result.exit_code
        );
        let tail = self.result.stderr_tail(STDERR_TAIL_LINES);
        if !tail.is_empty() {
            message.push_str(":\n");
            message.push_str(&tail);
        }
        Some(message)
    }

    pub fn total_backoff_ms(&self) -> u64 {
        self.history.iter().map(|r| r.backoff_ms).sum()
    }
}

/// Runs invocations with classification-driven retries.
#[derive(Clone)]
pub struct ExecutionEngine {
    runner: Arc<dyn CommandRunner>,
    policy: RetryPolicy,
    classifier: Classifier,
}

impl ExecutionEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            policy: RetryPolicy::default(),
            classifier: Classifier::standard(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Execute `invocation`, retrying transient failures and timeouts.
    ///
    /// Returns `Err` only when an attempt cannot be started; those errors are
    /// never retried. A subprocess that keeps failing yields `Ok` with
    /// `failure` set.
    pub async fn execute(&self, invocation: &CommandInvocation) -> RunnerResult<ExecutionOutcome> {
        let command = invocation.operation_name().to_string();
        let max_attempts = invocation.max_attempts();
        let mut history = Vec::new();
        let mut attempt = 1;

        loop {
            let result = self.runner.run(invocation, attempt).await?;

            if result.success() {
                if attempt > 1 {
                    info!("terraform {} succeeded on attempt {}", command, attempt);
                }
                return Ok(ExecutionOutcome {
                    command,
                    result,
                    attempts: attempt,
                    failure: None,
                    history,
                });
            }

            let class = self.classifier.classify(&result);
            if let Some(rule) = self.classifier.rule_for(&result) {
                debug!(rule = %rule.id, "Failure matched classification rule");
            }

            let retry = class.is_retryable() && attempt < max_attempts;
            let backoff = if retry {
                self.policy.delay_after(attempt)
            } else {
                std::time::Duration::ZERO
            };

            history.push(AttemptRecord {
                attempt,
                exit_code: result.exit_code,
                class,
                duration_ms: result.duration_ms,
                backoff_ms: backoff.as_millis() as u64,
            });

            if !retry {
                if class.is_retryable() {
                    error!(
                        "terraform {} failed ({}), retries exhausted after {} attempts",
                        command, class, attempt
                    );
                } else {
                    error!(
                        "terraform {} failed ({}) on attempt {}, not retrying",
                        command, class, attempt
                    );
                }
                return Ok(ExecutionOutcome {
                    command,
                    result,
                    attempts: attempt,
                    failure: Some(class),
                    history,
                });
            }

            warn!(
                "terraform {} failed ({}) on attempt {}/{}, retrying in {:?}",
                command, class, attempt, max_attempts, backoff
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockRunner};
    use std::time::Duration;

    fn engine(runner: &MockRunner) -> ExecutionEngine {
        ExecutionEngine::new(Arc::new(runner.clone())).with_policy(RetryPolicy::immediate())
    }

    fn invocation(max_retries: u32) -> CommandInvocation {
        CommandInvocation::new("/work").arg("plan").max_retries(max_retries)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt_runs_once() {
        let runner = MockRunner::new().add_response(
            MockResponse::success("No changes.").with_stderr("Warning: lock timeout deprecated"),
        );
        let outcome = engine(&runner).execute(&invocation(5)).await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(runner.call_count(), 1);
        assert!(outcome.history.is_empty());
        assert!(outcome.failure_message().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_until_exhausted() {
        let runner = MockRunner::new()
            .add_response(MockResponse::failure(1, "Error: Error acquiring the state lock"));
        let outcome = engine(&runner).execute(&invocation(3)).await.unwrap();

        assert!(!outcome.success());
        assert_eq!(runner.call_count(), 4);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.failure, Some(FailureClass::Transient));
        assert_eq!(outcome.history.len(), 4);
        assert_eq!(outcome.result.attempt, 4);
    }

    #[tokio::test]
    async fn test_failure_message_names_operation() {
        let runner = MockRunner::new()
            .add_response(MockResponse::failure(1, "Error: Invalid configuration"));
        let destroy = CommandInvocation::new("/work")
            .args(["apply", "-destroy"])
            .operation("destroy")
            .max_retries(0);
        let outcome = engine(&runner).execute(&destroy).await.unwrap();

        assert_eq!(outcome.command, "destroy");
        let message = outcome.failure_message().unwrap();
        assert!(message.starts_with("terraform destroy failed (permanent) after 1 attempt"));
        assert_eq!(runner.get_calls()[0].arguments, vec!["apply", "-destroy"]);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let runner = MockRunner::new()
            .add_response(MockResponse::failure(1, "Error: Invalid configuration"));
        let outcome = engine(&runner).execute(&invocation(3)).await.unwrap();

        assert_eq!(runner.call_count(), 1);
        assert_eq!(outcome.failure, Some(FailureClass::Permanent));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let runner = MockRunner::new().with_responses(vec![
            MockResponse::failure(1, "dial tcp: i/o timeout"),
            MockResponse::failure(1, "429 Too Many Requests"),
            MockResponse::success("Plan: 1 to add, 0 to change, 0 to destroy."),
        ]);
        let outcome = engine(&runner).execute(&invocation(3)).await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(runner.call_count(), 3);
        let attempts: Vec<u32> = runner.get_calls().iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_transient_then_permanent_stops() {
        let runner = MockRunner::new().with_responses(vec![
            MockResponse::failure(1, "connection reset by peer"),
            MockResponse::failure(1, "Error: No valid credential sources found"),
            MockResponse::success(""),
        ]);
        let outcome = engine(&runner).execute(&invocation(5)).await.unwrap();

        assert_eq!(runner.call_count(), 2);
        assert_eq!(outcome.failure, Some(FailureClass::Permanent));
        assert_eq!(
            outcome.history.iter().map(|r| r.class).collect::<Vec<_>>(),
            vec![FailureClass::Transient, FailureClass::Permanent]
        );
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let runner = MockRunner::new().with_responses(vec![
            MockResponse::timeout(),
            MockResponse::success("done"),
        ]);
        let outcome = engine(&runner).execute(&invocation(1)).await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.history[0].class, FailureClass::Timeout);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let runner = MockRunner::new().add_response(MockResponse::failure(1, "rate limit"));
        let outcome = engine(&runner).execute(&invocation(0)).await.unwrap();

        assert_eq!(runner.call_count(), 1);
        assert_eq!(outcome.failure, Some(FailureClass::Transient));
    }

    #[tokio::test]
    async fn test_one_backoff_between_consecutive_attempts() {
        let runner = MockRunner::new().add_response(MockResponse::failure(1, "state lock"));
        let engine = ExecutionEngine::new(Arc::new(runner.clone()))
            .with_policy(RetryPolicy::new(Duration::from_millis(2), Duration::from_millis(5)));
        let outcome = engine.execute(&invocation(3)).await.unwrap();

        let backoffs: Vec<u64> = outcome.history.iter().map(|r| r.backoff_ms).collect();
        assert_eq!(backoffs, vec![2, 4, 5, 0]);
        assert_eq!(outcome.total_backoff_ms(), 11);
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_retried() {
        let runner = MockRunner::new().simulate_failure("terraform");
        let result = engine(&runner).execute(&invocation(3)).await;

        assert!(result.is_err());
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_message_contents() {
        let runner = MockRunner::new().add_response(MockResponse::failure(
            1,
            "line one\nError: Error acquiring the state lock\nLock Info: ID 1234",
        ));
        let outcome = engine(&runner).execute(&invocation(1)).await.unwrap();
        let message = outcome.failure_message().unwrap();

        assert!(message.contains("terraform plan failed (transient)"));
        assert!(message.contains("after 2 attempts"));
        assert!(message.contains("Lock Info: ID 1234"));
    }
}
