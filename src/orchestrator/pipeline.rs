//! The per-component unit of work.
//!
//! implement -> validation loop -> write tests -> test loop
//!
//! A unit never writes to the store. It reports back to the runner, which
//! commits results in order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::component::{Component, Complexity, SpecMetadata};
use crate::issues::{Issue, IssueCounts, IssueOrigin, Severity};
use crate::retry::{RetryAttempt, RetryLoop, RetryOutcome, RetryPolicy, RetryTarget};
use crate::store::PhaseResult;
use crate::worker::{TaskKind, TaskSpec, TestReport, Worker, WorkerOutput};
use crate::worktree::VariantMetrics;

use super::escalation::EscalationStage;

/// Quality gate parameters shared by every unit of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    pub max_attempts: u32,
    /// Minimum line coverage in percent; `None` disables the gate
    pub coverage_target: Option<f64>,
    pub reviewer_count: u32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            max_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            coverage_target: None,
            reviewer_count: 1,
        }
    }
}

impl GateSettings {
    /// Spec metadata wins over configured defaults.
    pub fn with_metadata(self, metadata: &SpecMetadata) -> Self {
        Self {
            max_attempts: metadata.max_attempts.unwrap_or(self.max_attempts),
            coverage_target: metadata.coverage_target.or(self.coverage_target),
            reviewer_count: metadata.reviewer_count.unwrap_or(self.reviewer_count),
        }
    }
}

/// Where and how a unit runs.
#[derive(Debug, Clone)]
pub struct UnitContext {
    pub task_id: String,
    /// Base working directory or the unit's worktree
    pub working_dir: PathBuf,
    pub variant: Option<String>,
    pub gates: GateSettings,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitStatus {
    Passed,
    Blocked {
        stage: EscalationStage,
        issues: Vec<Issue>,
        attempts: Vec<RetryAttempt>,
    },
    Cancelled,
}

/// What a unit hands back to the runner.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub component_id: String,
    pub variant: Option<String>,
    pub working_dir: PathBuf,
    pub result: PhaseResult,
    pub metrics: VariantMetrics,
    pub status: UnitStatus,
}

impl UnitReport {
    pub fn passed(&self) -> bool {
        matches!(self.status, UnitStatus::Passed)
    }
}

/// Outputs gathered from every worker call of one unit.
#[derive(Debug, Default)]
struct Collected {
    files_touched: Vec<PathBuf>,
    discoveries: Vec<String>,
    artifact_ref: Option<String>,
    metrics: Option<VariantMetrics>,
    last_report: Option<TestReport>,
    issues: IssueCounts,
}

impl Collected {
    fn absorb(&mut self, output: &WorkerOutput) {
        for file in &output.files_touched {
            if !self.files_touched.contains(file) {
                self.files_touched.push(file.clone());
            }
        }
        self.discoveries.extend(output.discoveries.iter().cloned());
        if output.artifact_ref.is_some() {
            self.artifact_ref = output.artifact_ref.clone();
        }
        if output.metrics.is_some() {
            self.metrics = output.metrics;
        }
    }
}

/// Shared plumbing for the retry targets of one unit.
struct UnitWorker {
    worker: Arc<dyn Worker>,
    component: Component,
    ctx: UnitContext,
    collected: Collected,
}

impl UnitWorker {
    fn spec(&self, kind: TaskKind, attempt: u32) -> TaskSpec {
        TaskSpec::for_component(kind, &self.component, self.ctx.working_dir.clone())
            .with_attempt(attempt)
            .with_variant(self.ctx.variant.clone())
    }

    /// Invoke the worker; a failed call becomes a critical issue.
    async fn dispatch(&mut self, spec: TaskSpec) -> Result<WorkerOutput, Issue> {
        match self.worker.invoke(spec).await {
            Ok(output) => {
                self.collected.absorb(&output);
                Ok(output)
            }
            Err(e) => Err(Issue::from_worker_error(&e).with_file(self.component.file.clone())),
        }
    }

    /// Issues from a call whose outcome the next check reports.
    async fn carry(&mut self, spec: TaskSpec) -> Vec<Issue> {
        match self.dispatch(spec).await {
            Ok(output) => output.issues,
            Err(issue) => vec![issue],
        }
    }

    async fn fix(&mut self, kind: TaskKind, issues: &[Issue], attempt: u32) -> Vec<Issue> {
        let spec = self.spec(kind, attempt).with_issues(issues);
        self.carry(spec).await
    }
}

/// Static check plus `reviewer_count` reviews.
struct ValidationGate<'a> {
    unit: &'a mut UnitWorker,
    /// Issues from the implement call, reported by the first check
    carried: Vec<Issue>,
}

#[async_trait]
impl RetryTarget for ValidationGate<'_> {
    async fn check(&mut self, attempt: u32) -> Vec<Issue> {
        let mut issues = std::mem::take(&mut self.carried);

        let spec = self.unit.spec(TaskKind::StaticCheck, attempt);
        match self.unit.dispatch(spec).await {
            Ok(output) => issues.extend(output.issues),
            Err(issue) => issues.push(issue),
        }

        for reviewer in 1..=self.unit.ctx.gates.reviewer_count {
            let spec = self.unit.spec(TaskKind::Review { reviewer }, attempt);
            match self.unit.dispatch(spec).await {
                Ok(output) => issues.extend(output.issues.into_iter().map(|mut i| {
                    i.origin = IssueOrigin::Review;
                    i
                })),
                Err(issue) => issues.push(issue),
            }
        }

        self.unit.collected.issues.merge(&IssueCounts::from_issues(&issues));
        issues
    }

    async fn fix(&mut self, issues: &[Issue], attempt: u32) -> Vec<Issue> {
        self.unit.fix(TaskKind::Fix, issues, attempt).await
    }
}

/// Test run with failure and coverage checks.
struct TestGate<'a> {
    unit: &'a mut UnitWorker,
    carried: Vec<Issue>,
}

fn report_issues(report: Option<&TestReport>, coverage_target: Option<f64>) -> Vec<Issue> {
    let mut issues = Vec::new();
    if let Some(report) = report {
        if report.failed > 0 {
            issues.push(Issue::critical(
                IssueOrigin::Test,
                format!("{} of {} tests failing", report.failed, report.passed + report.failed),
            ));
        }
        for failure in &report.failures {
            issues.push(Issue::new(Severity::Important, IssueOrigin::Test, failure.clone()));
        }
    }
    if let Some(target) = coverage_target {
        match report.and_then(|r| r.coverage) {
            Some(coverage) if coverage + f64::EPSILON < target => issues.push(Issue::new(
                Severity::Important,
                IssueOrigin::Coverage,
                format!("coverage {:.1}% is below target {:.1}%", coverage, target),
            )),
            Some(_) => {}
            None if target > 0.0 => issues.push(Issue::new(
                Severity::Important,
                IssueOrigin::Coverage,
                format!("no coverage reported, target is {:.1}%", target),
            )),
            None => {}
        }
    }
    issues
}

#[async_trait]
impl RetryTarget for TestGate<'_> {
    async fn check(&mut self, attempt: u32) -> Vec<Issue> {
        let mut issues = std::mem::take(&mut self.carried);

        let spec = self.unit.spec(TaskKind::RunTests, attempt);
        match self.unit.dispatch(spec).await {
            Ok(output) => {
                issues.extend(report_issues(
                    output.test_report.as_ref(),
                    self.unit.ctx.gates.coverage_target,
                ));
                issues.extend(output.issues);
                self.unit.collected.last_report = output.test_report;
            }
            Err(issue) => issues.push(issue),
        }

        self.unit.collected.issues.merge(&IssueCounts::from_issues(&issues));
        issues
    }

    async fn fix(&mut self, issues: &[Issue], attempt: u32) -> Vec<Issue> {
        self.unit.fix(TaskKind::FixTests, issues, attempt).await
    }
}

fn complexity_score(complexity: Complexity) -> u32 {
    match complexity {
        Complexity::Low => 1,
        Complexity::Medium => 2,
        Complexity::High => 3,
    }
}

/// Run one component through every gate.
pub async fn run_component(
    worker: Arc<dyn Worker>,
    component: Component,
    ctx: UnitContext,
) -> UnitReport {
    let start = Instant::now();
    let cancel = ctx.cancel.clone();
    let policy = RetryPolicy::new(ctx.gates.max_attempts);
    let mut unit = UnitWorker {
        worker,
        component,
        ctx,
        collected: Collected::default(),
    };
    let id = unit.component.id.clone();
    let variant = unit.ctx.variant.clone();
    info!(component = %id, variant = variant.as_deref().unwrap_or("-"), "component started");

    let mut result = PhaseResult::new(&id);
    result.variant = variant.clone();

    let status = 'gates: {
        if cancel.is_cancelled() {
            break 'gates UnitStatus::Cancelled;
        }

        let spec = unit.spec(TaskKind::Implement, 0);
        let carried = unit.carry(spec).await;

        let validation = RetryLoop::new(policy)
            .named(format!("{} validation", id))
            .with_cancellation(cancel.clone())
            .run(&mut ValidationGate {
                unit: &mut unit,
                carried,
            })
            .await;
        result.validation_attempts = validation.attempts();
        match validation {
            RetryOutcome::Clean { .. } => result.validation_passed = true,
            RetryOutcome::Exhausted {
                final_issues,
                history,
                ..
            } => {
                break 'gates UnitStatus::Blocked {
                    stage: EscalationStage::Validation,
                    issues: final_issues,
                    attempts: history,
                };
            }
            RetryOutcome::Cancelled { .. } => break 'gates UnitStatus::Cancelled,
        }

        if cancel.is_cancelled() {
            break 'gates UnitStatus::Cancelled;
        }
        let spec = unit.spec(TaskKind::WriteTests, 0);
        let carried = unit.carry(spec).await;

        let tests = RetryLoop::new(policy)
            .named(format!("{} tests", id))
            .with_cancellation(cancel.clone())
            .run(&mut TestGate {
                unit: &mut unit,
                carried,
            })
            .await;
        result.test_attempts = tests.attempts();
        match tests {
            RetryOutcome::Clean { .. } => {
                result.tests_passed = true;
                UnitStatus::Passed
            }
            RetryOutcome::Exhausted {
                final_issues,
                history,
                ..
            } => UnitStatus::Blocked {
                stage: EscalationStage::Tests,
                issues: final_issues,
                attempts: history,
            },
            RetryOutcome::Cancelled { .. } => UnitStatus::Cancelled,
        }
    };

    let collected = unit.collected;
    result.duration = start.elapsed();
    result.files_touched = collected.files_touched;
    result.discoveries = collected.discoveries;
    result.artifact_ref = collected.artifact_ref;
    result.issues = collected.issues;
    result.coverage = collected.last_report.as_ref().and_then(|r| r.coverage);
    result.error = match &status {
        UnitStatus::Passed => None,
        UnitStatus::Blocked { stage, issues, .. } => Some(format!(
            "{} gate exhausted with {} open issue(s)",
            stage,
            issues.len()
        )),
        UnitStatus::Cancelled => Some("cancelled".to_string()),
    };

    let metrics = collected.metrics.unwrap_or_else(|| {
        let correctness = match &collected.last_report {
            Some(r) if r.passed + r.failed > 0 => r.passed as f64 / (r.passed + r.failed) as f64,
            _ if matches!(status, UnitStatus::Passed) => 1.0,
            _ => 0.0,
        };
        VariantMetrics::new(
            correctness,
            complexity_score(unit.component.complexity),
            unit.component.depends_on.len() as u32,
        )
    });

    debug!(
        component = %id,
        passed = matches!(status, UnitStatus::Passed),
        validation_attempts = result.validation_attempts,
        test_attempts = result.test_attempts,
        "component finished"
    );
    UnitReport {
        component_id: id,
        variant,
        working_dir: unit.ctx.working_dir,
        result,
        metrics,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkerError;
    use crate::orchestrator::testing::ScriptedWorker;

    fn ctx(gates: GateSettings) -> UnitContext {
        UnitContext {
            task_id: "t".into(),
            working_dir: std::env::temp_dir(),
            variant: None,
            gates,
            cancel: CancellationToken::new(),
        }
    }

    fn component() -> Component {
        Component::new("api", "src/api.rs", vec![])
    }

    #[tokio::test]
    async fn test_clean_worker_passes_every_gate() {
        let worker = Arc::new(ScriptedWorker::clean());
        let report = run_component(worker.clone(), component(), ctx(GateSettings::default())).await;

        assert!(report.passed());
        assert!(report.result.is_success());
        assert_eq!(report.result.validation_attempts, 0);
        assert_eq!(worker.count("implement"), 1);
        assert_eq!(worker.count("static_check"), 1);
        assert_eq!(worker.count("review#1"), 1);
        assert_eq!(worker.count("write_tests"), 1);
        assert_eq!(worker.count("run_tests"), 1);
        assert_eq!(worker.count("fix"), 0);
    }

    #[tokio::test]
    async fn test_reviewer_count_controls_review_passes() {
        let worker = Arc::new(ScriptedWorker::clean());
        let gates = GateSettings {
            reviewer_count: 3,
            ..GateSettings::default()
        };
        run_component(worker.clone(), component(), ctx(gates)).await;
        assert_eq!(worker.count("review#3"), 1);
        assert_eq!(worker.count("review#4"), 0);
    }

    #[tokio::test]
    async fn test_persistent_static_issue_blocks_validation() {
        let worker = Arc::new(ScriptedWorker::clean().on("static_check", |_| {
            Ok(WorkerOutput {
                issues: vec![Issue::critical(IssueOrigin::StaticCheck, "type error")],
                ..WorkerOutput::default()
            })
        }));
        let report = run_component(worker.clone(), component(), ctx(GateSettings::default())).await;

        match &report.status {
            UnitStatus::Blocked {
                stage,
                issues,
                attempts,
            } => {
                assert_eq!(*stage, EscalationStage::Validation);
                assert_eq!(issues.len(), 1);
                assert_eq!(attempts.len(), 3);
            }
            other => panic!("Expected Blocked, got {:?}", other),
        }
        assert!(!report.result.validation_passed);
        assert_eq!(worker.count("fix"), 3);
        assert_eq!(worker.count("write_tests"), 0);
    }

    #[tokio::test]
    async fn test_implement_failure_feeds_first_check() {
        let worker = Arc::new(ScriptedWorker::clean().on("implement", |_| {
            Err(WorkerError::Unavailable("offline".into()))
        }));
        let report = run_component(worker.clone(), component(), ctx(GateSettings::default())).await;

        assert!(report.passed());
        assert_eq!(report.result.validation_attempts, 1);
        assert_eq!(worker.count("fix"), 1);
    }

    #[tokio::test]
    async fn test_issues_reported_by_implement_reach_the_first_check() {
        let worker = Arc::new(ScriptedWorker::clean().on("implement", |_| {
            Ok(WorkerOutput {
                issues: vec![Issue::new(
                    Severity::Important,
                    IssueOrigin::Worker,
                    "left a stub in place",
                )],
                ..WorkerOutput::default()
            })
        }));
        let report = run_component(worker.clone(), component(), ctx(GateSettings::default())).await;

        assert!(report.passed());
        assert_eq!(report.result.validation_attempts, 1);
        assert_eq!(report.result.issues.important, 1);
        assert_eq!(worker.count("fix"), 1);
    }

    #[tokio::test]
    async fn test_issues_reported_by_write_tests_reach_the_test_gate() {
        let worker = Arc::new(ScriptedWorker::clean().on("write_tests", |_| {
            Ok(WorkerOutput {
                issues: vec![Issue::new(
                    Severity::Minor,
                    IssueOrigin::Test,
                    "no test for the error path",
                )],
                ..WorkerOutput::default()
            })
        }));
        let report = run_component(worker.clone(), component(), ctx(GateSettings::default())).await;

        assert!(report.passed());
        assert_eq!(report.result.test_attempts, 1);
        assert_eq!(worker.count("fix_tests"), 1);
    }

    #[tokio::test]
    async fn test_low_coverage_blocks_tests() {
        let worker = Arc::new(ScriptedWorker::clean().with_coverage(40.0));
        let gates = GateSettings {
            coverage_target: Some(80.0),
            max_attempts: 2,
            ..GateSettings::default()
        };
        let report = run_component(worker.clone(), component(), ctx(gates)).await;

        match &report.status {
            UnitStatus::Blocked { stage, issues, .. } => {
                assert_eq!(*stage, EscalationStage::Tests);
                assert_eq!(issues[0].origin, IssueOrigin::Coverage);
            }
            other => panic!("Expected Blocked, got {:?}", other),
        }
        assert!(report.result.validation_passed);
        assert!(!report.result.tests_passed);
        assert_eq!(report.result.coverage, Some(40.0));
        assert_eq!(worker.count("fix_tests"), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let worker = Arc::new(ScriptedWorker::clean());
        let context = ctx(GateSettings::default());
        context.cancel.cancel();
        let report = run_component(worker.clone(), component(), context).await;
        assert_eq!(report.status, UnitStatus::Cancelled);
        assert_eq!(worker.total(), 0);
    }

    #[test]
    fn test_report_issues() {
        let report = TestReport {
            passed: 3,
            failed: 1,
            coverage: Some(90.0),
            failures: vec!["test_login".into()],
        };
        let issues = report_issues(Some(&report), Some(80.0));
        assert_eq!(issues.len(), 2);
        assert!(issues[0].severity.is_critical());

        assert!(report_issues(None, None).is_empty());
        assert_eq!(report_issues(None, Some(80.0))[0].origin, IssueOrigin::Coverage);
        assert!(report_issues(None, Some(0.0)).is_empty());
    }

    #[test]
    fn test_metadata_overrides_defaults() {
        let metadata = SpecMetadata {
            coverage_target: Some(95.0),
            max_attempts: None,
            reviewer_count: Some(2),
        };
        let gates = GateSettings::default().with_metadata(&metadata);
        assert_eq!(gates.coverage_target, Some(95.0));
        assert_eq!(gates.max_attempts, 3);
        assert_eq!(gates.reviewer_count, 2);
    }
}
