//! Bounded check-fix-recheck loop.
//!
//! The loop drives a [`RetryTarget`] through
//! `Checking -> {Clean, NeedsFix -> Fixing -> Checking, Exhausted}`. Only a
//! check returning zero issues of any severity ends the loop as Clean; the
//! remediation step's own report never does.
//!
//! ## Example
//!
//! ```
//! use anvil::issues::{Issue, IssueOrigin};
//! use anvil::retry::{RetryLoop, RetryOutcome, RetryPolicy, RetryTarget};
//! use async_trait::async_trait;
//!
//! struct Flaky { remaining: u32 }
//!
//! #[async_trait]
//! impl RetryTarget for Flaky {
//!     async fn check(&mut self, _attempt: u32) -> Vec<Issue> {
//!         if self.remaining == 0 { vec![] } else { vec![Issue::critical(IssueOrigin::Test, "red")] }
//!     }
//!     async fn fix(&mut self, _issues: &[Issue], _attempt: u32) -> Vec<Issue> {
//!         self.remaining -= 1;
//!         vec![]
//!     }
//! }
//!
//! # tokio_test_block(async {
//! let mut target = Flaky { remaining: 2 };
//! let outcome = RetryLoop::new(RetryPolicy::default()).run(&mut target).await;
//! assert!(matches!(outcome, RetryOutcome::Clean { attempts: 2, .. }));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::issues::{Issue, IssueCounts};

/// Default number of remediation attempts before a loop gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The check and remediation halves of a retry loop.
#[async_trait]
pub trait RetryTarget: Send {
    /// Run the full check. `attempt` is the number of fixes applied so far.
    async fn check(&mut self, attempt: u32) -> Vec<Issue>;

    /// Attempt to fix `issues`. Returns any issues the remediation itself hit.
    async fn fix(&mut self, issues: &[Issue], attempt: u32) -> Vec<Issue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// State of a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Checking,
    NeedsFix,
    Fixing,
    Clean,
    Exhausted,
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Checking => "checking",
            Self::NeedsFix => "needs_fix",
            Self::Fixing => "fixing",
            Self::Clean => "clean",
            Self::Exhausted => "exhausted",
        };
        write!(f, "{}", s)
    }
}

/// What the check that followed an attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Clean,
    Retry,
    Exhausted,
}

/// One remediation iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based remediation attempt number
    pub attempt: u32,
    /// Issues the preceding check found
    pub issues: Vec<Issue>,
    pub counts: IssueCounts,
    pub action: String,
    /// Issues the remediation step reported
    #[serde(default)]
    pub fix_issues: Vec<Issue>,
    pub outcome: AttemptOutcome,
}

/// Terminal result of a loop.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Clean {
        attempts: u32,
        history: Vec<RetryAttempt>,
    },
    Exhausted {
        final_issues: Vec<Issue>,
        attempts: u32,
        history: Vec<RetryAttempt>,
    },
    Cancelled {
        attempts: u32,
        history: Vec<RetryAttempt>,
    },
}

impl RetryOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Clean { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn history(&self) -> &[RetryAttempt] {
        match self {
            Self::Clean { history, .. }
            | Self::Exhausted { history, .. }
            | Self::Cancelled { history, .. } => history,
        }
    }

    /// Every issue seen by the loop's checks, by severity.
    pub fn issue_counts(&self) -> IssueCounts {
        let mut counts = IssueCounts::default();
        for attempt in self.history() {
            counts.merge(&attempt.counts);
        }
        if let Self::Exhausted { final_issues, .. } = self {
            counts.merge(&IssueCounts::from_issues(final_issues));
        }
        counts
    }
}

/// Runs a [`RetryTarget`] to a terminal outcome.
#[derive(Debug, Clone)]
pub struct RetryLoop {
    policy: RetryPolicy,
    name: String,
    cancel: Option<CancellationToken>,
}

impl RetryLoop {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            name: "retry".to_string(),
            cancel: None,
        }
    }

    /// Name used in log lines.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Stop between steps once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    pub async fn run<T: RetryTarget + ?Sized>(&self, target: &mut T) -> RetryOutcome {
        let max = self.policy.max_attempts.max(1);
        let mut history: Vec<RetryAttempt> = Vec::new();
        let mut attempts: u32 = 0;
        let mut state = RetryState::Checking;
        let mut issues: Vec<Issue> = Vec::new();

        loop {
            // A finished check stands even if cancellation arrived during it
            let settled = matches!(state, RetryState::Clean | RetryState::Exhausted);
            if !settled && self.cancelled() {
                info!(loop_name = %self.name, attempts, "retry loop cancelled");
                return RetryOutcome::Cancelled { attempts, history };
            }

            debug!(loop_name = %self.name, state = %state, attempts, "retry step");
            state = match state {
                RetryState::Checking => {
                    issues = target.check(attempts).await;
                    if let Some(last) = history.last_mut() {
                        last.outcome = if issues.is_empty() {
                            AttemptOutcome::Clean
                        } else if attempts >= max {
                            AttemptOutcome::Exhausted
                        } else {
                            AttemptOutcome::Retry
                        };
                    }
                    if issues.is_empty() {
                        RetryState::Clean
                    } else if attempts >= max {
                        RetryState::Exhausted
                    } else {
                        RetryState::NeedsFix
                    }
                }
                RetryState::NeedsFix => {
                    let counts = IssueCounts::from_issues(&issues);
                    info!(
                        loop_name = %self.name,
                        attempt = attempts + 1,
                        critical = counts.critical,
                        important = counts.important,
                        minor = counts.minor,
                        "issues found, attempting fix"
                    );
                    RetryState::Fixing
                }
                RetryState::Fixing => {
                    attempts += 1;
                    let fix_issues = target.fix(&issues, attempts).await;
                    if !fix_issues.is_empty() {
                        warn!(
                            loop_name = %self.name,
                            attempt = attempts,
                            count = fix_issues.len(),
                            "remediation reported issues"
                        );
                    }
                    history.push(RetryAttempt {
                        attempt: attempts,
                        counts: IssueCounts::from_issues(&issues),
                        issues: std::mem::take(&mut issues),
                        action: format!("{} fix attempt {}", self.name, attempts),
                        fix_issues,
                        outcome: AttemptOutcome::Retry,
                    });
                    RetryState::Checking
                }
                RetryState::Clean => {
                    info!(loop_name = %self.name, attempts, "retry loop clean");
                    return RetryOutcome::Clean { attempts, history };
                }
                RetryState::Exhausted => {
                    warn!(
                        loop_name = %self.name,
                        attempts,
                        remaining = issues.len(),
                        "retry loop exhausted"
                    );
                    return RetryOutcome::Exhausted {
                        final_issues: issues,
                        attempts,
                        history,
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issues::{IssueOrigin, Severity};

    /// Reports `failing_checks` dirty checks, then clean ones.
    struct Scripted {
        failing_checks: u32,
        severity: Severity,
        checks: u32,
        fixes: u32,
        fix_report: Vec<Issue>,
    }

    impl Scripted {
        fn new(failing_checks: u32) -> Self {
            Self {
                failing_checks,
                severity: Severity::Critical,
                checks: 0,
                fixes: 0,
                fix_report: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl RetryTarget for Scripted {
        async fn check(&mut self, _attempt: u32) -> Vec<Issue> {
            self.checks += 1;
            if self.checks <= self.failing_checks {
                vec![Issue::new(self.severity, IssueOrigin::StaticCheck, "broken")]
            } else {
                vec![]
            }
        }

        async fn fix(&mut self, _issues: &[Issue], _attempt: u32) -> Vec<Issue> {
            self.fixes += 1;
            self.fix_report.clone()
        }
    }

    #[tokio::test]
    async fn test_clean_first_check_has_no_history() {
        let mut target = Scripted::new(0);
        let outcome = RetryLoop::new(RetryPolicy::default()).run(&mut target).await;
        assert_eq!(
            outcome,
            RetryOutcome::Clean {
                attempts: 0,
                history: vec![]
            }
        );
        assert_eq!(target.fixes, 0);
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_after_max_fixes() {
        let mut target = Scripted::new(u32::MAX);
        let outcome = RetryLoop::new(RetryPolicy::new(3)).run(&mut target).await;

        match outcome {
            RetryOutcome::Exhausted {
                final_issues,
                attempts,
                history,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(history.len(), 3);
                assert_eq!(final_issues.len(), 1);
                assert_eq!(history[0].outcome, AttemptOutcome::Retry);
                assert_eq!(history[2].outcome, AttemptOutcome::Exhausted);
                assert_eq!(history[2].attempt, 3);
            }
            other => panic!("Expected Exhausted, got {:?}", other),
        }
        assert_eq!(target.fixes, 3);
        // Initial check plus one re-check per fix
        assert_eq!(target.checks, 4);
    }

    #[tokio::test]
    async fn test_minor_issues_still_block_clean() {
        let mut target = Scripted::new(1);
        target.severity = Severity::Minor;
        let outcome = RetryLoop::new(RetryPolicy::default()).run(&mut target).await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(outcome.history()[0].outcome, AttemptOutcome::Clean);
    }

    #[tokio::test]
    async fn test_fix_report_does_not_end_loop() {
        let mut target = Scripted::new(2);
        target.fix_report = vec![Issue::critical(IssueOrigin::Worker, "worker crashed")];
        let outcome = RetryLoop::new(RetryPolicy::new(3)).run(&mut target).await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.history()[0].fix_issues.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut target = Scripted::new(5);
        let outcome = RetryLoop::new(RetryPolicy::default())
            .with_cancellation(token)
            .run(&mut target)
            .await;
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 0, .. }));
        assert_eq!(target.checks, 0);
    }

    /// Cancels the loop's token from inside a clean check.
    struct CancelsDuringCheck(CancellationToken);

    #[async_trait]
    impl RetryTarget for CancelsDuringCheck {
        async fn check(&mut self, _attempt: u32) -> Vec<Issue> {
            self.0.cancel();
            Vec::new()
        }

        async fn fix(&mut self, _issues: &[Issue], _attempt: u32) -> Vec<Issue> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_clean_check_wins_over_late_cancellation() {
        let token = CancellationToken::new();
        let mut target = CancelsDuringCheck(token.clone());
        let outcome = RetryLoop::new(RetryPolicy::default())
            .with_cancellation(token)
            .run(&mut target)
            .await;
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn test_issue_counts_roll_up() {
        let mut target = Scripted::new(u32::MAX);
        let outcome = RetryLoop::new(RetryPolicy::new(2)).run(&mut target).await;
        assert_eq!(outcome.issue_counts().critical, 3);
    }

    #[test]
    fn test_policy_clamps_zero() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }
}
