//! The level-by-level driver.
//!
//! The runner is the only writer of the store. Units run as tokio tasks and
//! report back; nothing they produce is committed until the runner has it in
//! hand (and, for worktree units, merged into the base tree).

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::component::{Component, hash_text};
use crate::dag::{self, DependencyGraph, ExecutionPlan};
use crate::errors::{OrchestratorError, StoreError, WorktreeError};
use crate::issues::{Issue, IssueOrigin};
use crate::retry::{RetryLoop, RetryOutcome, RetryPolicy, RetryTarget};
use crate::store::StateStore;
use crate::tracker::GitTracker;
use crate::util::ensure_state_dir;
use crate::worker::{TaskKind, TaskSpec, Worker};
use crate::worktree::{MergeStrategy, WorktreeManager, clamp_variant_count, select_best};

use super::escalation::{Escalation, EscalationStage};
use super::pipeline::{GateSettings, UnitContext, UnitReport, UnitStatus, run_component};
use super::state::{RunPhase, RunState};

/// Component id recorded on escalations raised by the integration gate.
pub const INTEGRATION_SCOPE: &str = "integration";

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub gates: GateSettings,
    /// Run independent components of a level in worktrees
    pub parallel: bool,
    pub max_parallel: usize,
    /// How long in-flight units may finish after cancellation
    pub cancel_grace: Duration,
    /// Components to explore with alternative implementations, by count
    pub variants: BTreeMap<String, usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            gates: GateSettings::default(),
            parallel: true,
            max_parallel: 4,
            cancel_grace: Duration::from_secs(30),
            variants: BTreeMap::new(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub task_id: String,
    pub phase: RunPhase,
    pub completed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.phase {
            RunPhase::Complete => 0,
            RunPhase::Blocked => 1,
            RunPhase::Cancelled => 130,
            _ => 2,
        }
    }
}

/// Result of handling one batch of units.
enum Step {
    Continue,
    Blocked(Escalation),
    Cancelled,
}

/// Integration check and fix, run once every component is committed.
struct IntegrationGate {
    worker: Arc<dyn Worker>,
    working_dir: PathBuf,
}

#[async_trait]
impl RetryTarget for IntegrationGate {
    async fn check(&mut self, attempt: u32) -> Vec<Issue> {
        let spec = TaskSpec::for_task(TaskKind::Integrate, self.working_dir.clone())
            .with_attempt(attempt);
        match self.worker.invoke(spec).await {
            Ok(output) => {
                let mut issues = output.issues;
                if let Some(report) = output.test_report
                    && report.failed > 0
                {
                    issues.push(Issue::critical(
                        IssueOrigin::Integration,
                        format!("{} integration test(s) failing", report.failed),
                    ));
                }
                issues
            }
            Err(e) => vec![Issue::from_worker_error(&e)],
        }
    }

    async fn fix(&mut self, issues: &[Issue], attempt: u32) -> Vec<Issue> {
        let spec = TaskSpec::for_task(TaskKind::FixIntegration, self.working_dir.clone())
            .with_attempt(attempt)
            .with_issues(issues);
        match self.worker.invoke(spec).await {
            Ok(output) => output.issues,
            Err(e) => vec![Issue::from_worker_error(&e)],
        }
    }
}

/// Per-run context shared by the level handlers.
struct Run<'a> {
    task_id: &'a str,
    working_dir: PathBuf,
    graph: &'a DependencyGraph,
    gates: GateSettings,
    git: Option<GitTracker>,
    worktrees: Option<WorktreeManager>,
    state: RunState,
}

/// Drives a task from its spec to Complete, Blocked or Cancelled.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    worker: Arc<dyn Worker>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn StateStore>, worker: Arc<dyn Worker>, options: RunOptions) -> Self {
        Self {
            store,
            worker,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Create a task for `spec_text` and run it.
    pub async fn start(
        &self,
        spec_text: &str,
        description: &str,
        working_dir: &Path,
    ) -> Result<RunOutcome, OrchestratorError> {
        let (graph, plan) = dag::plan(spec_text)?;
        let task_id = self.store.create_task(description, working_dir)?;
        self.store.bind_spec(&task_id, &hash_text(spec_text))?;
        info!(task_id = %task_id, components = graph.len(), levels = plan.len(), "task created");
        self.drive(&task_id, &graph, &plan).await
    }

    /// Continue an existing task. Completed components are never re-run.
    pub async fn resume(
        &self,
        task_id: &str,
        spec_text: &str,
    ) -> Result<RunOutcome, OrchestratorError> {
        let (graph, plan) = dag::plan(spec_text)?;
        let state = self.store.get_state(task_id)?;
        let hash = hash_text(spec_text);
        match state.spec_hash {
            Some(expected) if expected != hash => {
                return Err(OrchestratorError::SpecChanged {
                    task_id: task_id.to_string(),
                    expected,
                    actual: hash,
                });
            }
            Some(_) => {}
            None => self.store.bind_spec(task_id, &hash)?,
        }
        info!(task_id, completed = state.completed.len(), "resuming task");
        self.drive(task_id, &graph, &plan).await
    }

    fn outcome(
        &self,
        run: &Run<'_>,
        escalation: Option<Escalation>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let state = self.store.get_state(run.task_id)?;
        Ok(RunOutcome {
            task_id: run.task_id.to_string(),
            phase: run.state.phase().clone(),
            completed: state.completed,
            escalation,
        })
    }

    async fn drive(
        &self,
        task_id: &str,
        graph: &DependencyGraph,
        plan: &ExecutionPlan,
    ) -> Result<RunOutcome, OrchestratorError> {
        let state = self.store.get_state(task_id)?;
        let working_dir = state.working_dir.clone();
        ensure_state_dir(&working_dir).map_err(|source| StoreError::Write {
            path: working_dir.join(".anvil"),
            source,
        })?;

        let git = GitTracker::discover(&working_dir);
        let wants_worktrees = self.options.parallel || !self.options.variants.is_empty();
        if git.is_none() && wants_worktrees {
            warn!(
                working_dir = %working_dir.display(),
                "not a git repository; levels run sequentially and variants are disabled"
            );
        }
        let worktrees = match git {
            Some(_) if wants_worktrees => Some(WorktreeManager::new(&working_dir)?),
            _ => None,
        };
        if let Some(manager) = &worktrees {
            let stale = manager.cleanup(task_id)?;
            if stale > 0 {
                info!(task_id, stale, "removed worktrees left by an interrupted run");
            }
        }

        let mut run = Run {
            task_id,
            working_dir,
            graph,
            gates: self.options.gates.with_metadata(graph.metadata()),
            git,
            worktrees,
            state: RunState::new(),
        };

        if state.finished_at.is_some() {
            info!(task_id, "task already complete");
            run.state.transition(RunPhase::Integrating)?;
            run.state.transition(RunPhase::Complete)?;
            return self.outcome(&run, None);
        }

        for (level, ids) in plan.iter() {
            if self.cancel.is_cancelled() {
                run.state.transition(RunPhase::Cancelled)?;
                return self.outcome(&run, None);
            }
            run.state.transition(RunPhase::Executing { level })?;

            let completed = self.store.get_state(task_id)?.completed;
            let pending: Vec<&Component> = ids
                .iter()
                .filter(|id| !completed.contains(id))
                .filter_map(|id| graph.get_by_id(id))
                .collect();
            if pending.is_empty() {
                debug!(task_id, level, "level already committed");
                continue;
            }
            info!(task_id, level, pending = pending.len(), "entering level");

            let has_worktrees = run.worktrees.is_some();
            let (explored, plain): (Vec<&Component>, Vec<&Component>) = pending
                .into_iter()
                .partition(|c| has_worktrees && self.options.variants.contains_key(&c.id));

            let fan_out = plain.len() > 1 && self.options.parallel && has_worktrees;
            let step = if fan_out && !shares_file(&plain) {
                self.run_parallel(&mut run, level, &plain).await?
            } else {
                if fan_out {
                    debug!(task_id, level, "components share a file; running level sequentially");
                }
                self.run_sequential(&mut run, level, &plain).await?
            };
            if let Some(outcome) = self.settle(&mut run, step)? {
                return Ok(outcome);
            }

            for component in explored {
                let step = self.run_variants(&mut run, level, component).await?;
                if let Some(outcome) = self.settle(&mut run, step)? {
                    return Ok(outcome);
                }
            }
        }

        self.integrate(&mut run).await
    }

    /// Turn a terminal step into an outcome.
    fn settle(
        &self,
        run: &mut Run<'_>,
        step: Step,
    ) -> Result<Option<RunOutcome>, OrchestratorError> {
        match step {
            Step::Continue => Ok(None),
            Step::Blocked(escalation) => {
                self.store.record_escalation(run.task_id, &escalation)?;
                warn!(
                    task_id = run.task_id,
                    component = %escalation.component_id,
                    stage = %escalation.stage,
                    issues = escalation.issue_count(),
                    "run blocked"
                );
                run.state.transition(RunPhase::Blocked)?;
                self.outcome(run, Some(escalation)).map(Some)
            }
            Step::Cancelled => {
                info!(task_id = run.task_id, "run cancelled");
                run.state.transition(RunPhase::Cancelled)?;
                self.outcome(run, None).map(Some)
            }
        }
    }

    fn snapshot(&self, run: &Run<'_>, label: &str) -> Result<Option<String>, OrchestratorError> {
        match &run.git {
            Some(git) => git
                .snapshot(label)
                .map(Some)
                .map_err(|e| OrchestratorError::GitTracker(format!("{:#}", e))),
            None => Ok(None),
        }
    }

    /// Save a passed result and checkpoint it.
    fn commit(
        &self,
        run: &Run<'_>,
        report: &UnitReport,
        snapshot: Option<String>,
    ) -> Result<(), OrchestratorError> {
        self.store
            .save_phase_result(run.task_id, &report.component_id, &report.result)?;
        let label = match &report.variant {
            Some(variant) => format!("{} ({})", report.component_id, variant),
            None => report.component_id.clone(),
        };
        let checkpoint = self.store.create_checkpoint(run.task_id, &label, snapshot)?;
        info!(
            task_id = run.task_id,
            component = %report.component_id,
            checkpoint = %checkpoint,
            "component committed"
        );
        Ok(())
    }

    fn block(&self, run: &Run<'_>, report: UnitReport) -> Result<Step, OrchestratorError> {
        self.store
            .save_phase_result(run.task_id, &report.component_id, &report.result)?;
        match report.status {
            UnitStatus::Blocked {
                stage,
                issues,
                attempts,
            } => Ok(Step::Blocked(Escalation::new(
                run.task_id,
                &report.component_id,
                stage,
                issues,
                attempts,
            ))),
            UnitStatus::Cancelled => Ok(Step::Cancelled),
            UnitStatus::Passed => Ok(Step::Continue),
        }
    }

    /// Persist results that will not be committed.
    fn save_results(&self, run: &Run<'_>, reports: &[UnitReport]) -> Result<(), OrchestratorError> {
        for report in reports {
            self.store
                .save_phase_result(run.task_id, &report.component_id, &report.result)?;
        }
        Ok(())
    }

    /// Persist passed results whose merge failed, marked as errored.
    fn save_unmerged(&self, run: &Run<'_>, reports: &[UnitReport]) -> Result<(), OrchestratorError> {
        for report in reports {
            let mut result = report.result.clone();
            result.error = Some("merge into the base tree failed".to_string());
            self.store
                .save_phase_result(run.task_id, &report.component_id, &result)?;
        }
        Ok(())
    }

    fn context(&self, run: &Run<'_>, working_dir: PathBuf, variant: Option<String>) -> UnitContext {
        UnitContext {
            task_id: run.task_id.to_string(),
            working_dir,
            variant,
            gates: run.gates,
            cancel: self.cancel.clone(),
        }
    }

    async fn run_sequential(
        &self,
        run: &mut Run<'_>,
        level: usize,
        components: &[&Component],
    ) -> Result<Step, OrchestratorError> {
        if components.is_empty() {
            return Ok(Step::Continue);
        }
        for component in components {
            if self.cancel.is_cancelled() {
                return Ok(Step::Cancelled);
            }
            run.state.transition(RunPhase::Validating {
                component: component.id.clone(),
            })?;
            self.store.mark_started(run.task_id, &component.id, level)?;

            let ctx = self.context(run, run.working_dir.clone(), None);
            let report = run_component(self.worker.clone(), (*component).clone(), ctx).await;
            match report.status {
                UnitStatus::Passed => {
                    let snapshot = self.snapshot(run, &format!("component {}", report.component_id))?;
                    self.commit(run, &report, snapshot)?;
                }
                UnitStatus::Cancelled | UnitStatus::Blocked { .. } => {
                    return self.block(run, report);
                }
            }
        }
        run.state.transition(RunPhase::Executing { level })?;
        Ok(Step::Continue)
    }

    /// Spawn one unit per (component, worktree) and wait for all of them.
    async fn fan_out(
        &self,
        run: &Run<'_>,
        units: Vec<(Component, PathBuf, Option<String>)>,
    ) -> Result<(Vec<UnitReport>, bool), OrchestratorError> {
        let permits = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for (component, path, variant) in units {
            let ctx = self.context(run, path, variant);
            let worker = self.worker.clone();
            let permits = permits.clone();
            let id = component.id.clone();
            let handle = set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                run_component(worker, component, ctx).await
            });
            names.insert(handle.id(), id);
        }

        let mut reports = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                joined = set.join_next_with_id() => match joined {
                    None => break,
                    Some(Ok((_, report))) => reports.push(report),
                    Some(Err(e)) => {
                        let component = names.get(&e.id()).cloned().unwrap_or_default();
                        set.abort_all();
                        return Err(OrchestratorError::UnitJoin {
                            component,
                            message: e.to_string(),
                        });
                    }
                },
                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    info!(
                        in_flight = set.len(),
                        grace_secs = self.options.cancel_grace.as_secs(),
                        "cancellation requested; waiting for in-flight units"
                    );
                    let deadline = tokio::time::Instant::now() + self.options.cancel_grace;
                    while let Ok(Some(joined)) = tokio::time::timeout_at(deadline, set.join_next()).await {
                        if let Ok(report) = joined {
                            reports.push(report);
                        }
                    }
                    if !set.is_empty() {
                        warn!(aborted = set.len(), "aborting units past the grace period");
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                    }
                }
            }
        }

        // Commit order follows declaration order, not finishing order
        reports.sort_by_key(|r| (run.graph.index_of(&r.component_id), r.variant.clone()));
        Ok((reports, cancelled))
    }

    /// Escalate a failed merge against the unit whose worktree conflicted.
    fn merge_conflict_step(
        run: &Run<'_>,
        candidates: &[UnitReport],
        err: WorktreeError,
    ) -> Result<Step, OrchestratorError> {
        match err {
            WorktreeError::Conflict { conflicts } => {
                let component_id = conflicts
                    .first()
                    .and_then(|conflict| {
                        candidates.iter().find(|r| {
                            r.working_dir
                                .file_name()
                                .is_some_and(|name| name == conflict.worktree.as_str())
                        })
                    })
                    .or(candidates.first())
                    .map(|r| r.component_id.clone())
                    .unwrap_or_default();
                let issues = conflicts
                    .iter()
                    .flat_map(|conflict| {
                        conflict.files.iter().map(move |file| {
                            Issue::critical(
                                IssueOrigin::Merge,
                                format!("conflicting edits from worktree '{}'", conflict.worktree),
                            )
                            .with_file(file.to_string_lossy())
                        })
                    })
                    .collect();
                Ok(Step::Blocked(Escalation::new(
                    run.task_id,
                    &component_id,
                    EscalationStage::Merge,
                    issues,
                    Vec::new(),
                )))
            }
            other => Err(other.into()),
        }
    }

    async fn run_parallel(
        &self,
        run: &mut Run<'_>,
        level: usize,
        components: &[&Component],
    ) -> Result<Step, OrchestratorError> {
        if run.worktrees.is_none() {
            return self.run_sequential(run, level, components).await;
        }
        self.snapshot(run, &format!("level {} start", level))?;

        let mut units = Vec::with_capacity(components.len());
        if let Some(manager) = run.worktrees.as_ref() {
            for component in components {
                self.store.mark_started(run.task_id, &component.id, level)?;
                let path = manager.create(run.task_id, &component.id)?;
                units.push(((*component).clone(), path, None));
            }
        }
        info!(task_id = run.task_id, level, units = units.len(), "running level in worktrees");

        let result = self.fan_out(run, units).await;
        let step = match result {
            Ok((reports, cancelled)) => self.settle_parallel(run, reports, cancelled),
            Err(e) => Err(e),
        };
        if let Some(manager) = run.worktrees.as_ref()
            && let Err(e) = manager.cleanup(run.task_id)
        {
            warn!(task_id = run.task_id, error = %e, "worktree cleanup failed");
        }
        step
    }

    fn settle_parallel(
        &self,
        run: &Run<'_>,
        reports: Vec<UnitReport>,
        cancelled: bool,
    ) -> Result<Step, OrchestratorError> {
        let (passed, failed): (Vec<UnitReport>, Vec<UnitReport>) =
            reports.into_iter().partition(UnitReport::passed);

        if !passed.is_empty() {
            let Some(manager) = run.worktrees.as_ref() else {
                return Ok(Step::Cancelled);
            };
            let paths: Vec<PathBuf> = passed.iter().map(|r| r.working_dir.clone()).collect();
            match manager.merge(&paths, MergeStrategy::Combine) {
                Ok(merge) => {
                    let snapshot = match merge.commit {
                        Some(commit) => Some(commit),
                        None => self.snapshot(run, "merge")?,
                    };
                    for report in &passed {
                        self.commit(run, report, snapshot.clone())?;
                    }
                }
                Err(e) => {
                    self.save_unmerged(run, &passed)?;
                    if cancelled {
                        warn!(error = %e, "could not merge finished units after cancellation");
                        self.save_results(run, &failed)?;
                        return Ok(Step::Cancelled);
                    }
                    return Self::merge_conflict_step(run, &passed, e);
                }
            }
        }

        if cancelled {
            self.save_results(run, &failed)?;
            return Ok(Step::Cancelled);
        }
        // First blocked unit in declaration order is the one escalated
        let mut step = Step::Continue;
        for report in failed {
            let next = self.block(run, report)?;
            if matches!(step, Step::Continue) {
                step = next;
            }
        }
        Ok(step)
    }

    async fn run_variants(
        &self,
        run: &mut Run<'_>,
        level: usize,
        component: &Component,
    ) -> Result<Step, OrchestratorError> {
        if run.worktrees.is_none() {
            return self.run_sequential(run, level, &[component]).await;
        }
        let requested = self.options.variants.get(&component.id).copied().unwrap_or(0);
        let count = clamp_variant_count(requested);
        self.snapshot(run, &format!("{} variants start", component.id))?;
        run.state.transition(RunPhase::Validating {
            component: component.id.clone(),
        })?;
        self.store.mark_started(run.task_id, &component.id, level)?;

        let mut units = Vec::with_capacity(count);
        if let Some(manager) = run.worktrees.as_ref() {
            for n in 1..=count {
                let name = format!("{}-v{}", component.id, n);
                let path = manager.create(run.task_id, &name)?;
                units.push((component.clone(), path, Some(name)));
            }
        }
        info!(task_id = run.task_id, component = %component.id, variants = count, "exploring variants");

        let result = self.fan_out(run, units).await;
        let step = match result {
            Ok((reports, cancelled)) => self.settle_variants(run, component, reports, cancelled),
            Err(e) => Err(e),
        };
        if let Some(manager) = run.worktrees.as_ref()
            && let Err(e) = manager.cleanup(run.task_id)
        {
            warn!(task_id = run.task_id, error = %e, "worktree cleanup failed");
        }
        run.state.transition(RunPhase::Executing { level })?;
        step
    }

    fn settle_variants(
        &self,
        run: &Run<'_>,
        component: &Component,
        reports: Vec<UnitReport>,
        cancelled: bool,
    ) -> Result<Step, OrchestratorError> {
        let (passed, failed): (Vec<UnitReport>, Vec<UnitReport>) =
            reports.into_iter().partition(UnitReport::passed);

        let metrics: Vec<_> = passed.iter().map(|r| r.metrics).collect();
        let Some(best) = select_best(&metrics) else {
            if cancelled {
                self.save_results(run, &failed)?;
                return Ok(Step::Cancelled);
            }
            return match failed.into_iter().next() {
                Some(report) => self.block(run, report),
                None => Ok(Step::Cancelled),
            };
        };
        let winner = &passed[best];
        info!(
            component = %component.id,
            variant = winner.variant.as_deref().unwrap_or("-"),
            correctness = winner.metrics.correctness,
            "variant selected"
        );

        let Some(manager) = run.worktrees.as_ref() else {
            return Ok(Step::Cancelled);
        };
        let paths: Vec<PathBuf> = passed.iter().map(|r| r.working_dir.clone()).collect();
        match manager.merge(&paths, MergeStrategy::Select(winner.working_dir.clone())) {
            Ok(merge) => {
                let snapshot = match merge.commit {
                    Some(commit) => Some(commit),
                    None => self.snapshot(run, "variant")?,
                };
                self.commit(run, winner, snapshot)?;
                if cancelled {
                    return Ok(Step::Cancelled);
                }
                Ok(Step::Continue)
            }
            Err(e) => {
                self.save_unmerged(run, std::slice::from_ref(winner))?;
                if cancelled {
                    warn!(error = %e, "could not merge the selected variant after cancellation");
                    return Ok(Step::Cancelled);
                }
                Self::merge_conflict_step(run, std::slice::from_ref(winner), e)
            }
        }
    }

    async fn integrate(&self, run: &mut Run<'_>) -> Result<RunOutcome, OrchestratorError> {
        if self.cancel.is_cancelled() {
            run.state.transition(RunPhase::Cancelled)?;
            return self.outcome(run, None);
        }
        run.state.transition(RunPhase::Integrating)?;
        info!(task_id = run.task_id, "running integration validation");

        let mut gate = IntegrationGate {
            worker: self.worker.clone(),
            working_dir: run.working_dir.clone(),
        };
        let outcome = RetryLoop::new(RetryPolicy::new(run.gates.max_attempts))
            .named("integration")
            .with_cancellation(self.cancel.clone())
            .run(&mut gate)
            .await;

        let step = match outcome {
            RetryOutcome::Clean { .. } => {
                let snapshot = self.snapshot(run, "integration complete")?;
                self.store.create_checkpoint(run.task_id, "complete", snapshot)?;
                self.store.mark_finished(run.task_id)?;
                run.state.transition(RunPhase::Complete)?;
                info!(task_id = run.task_id, "run complete");
                return self.outcome(run, None);
            }
            RetryOutcome::Exhausted {
                final_issues,
                history,
                ..
            } => Step::Blocked(Escalation::new(
                run.task_id,
                INTEGRATION_SCOPE,
                EscalationStage::Integration,
                final_issues,
                history,
            )),
            RetryOutcome::Cancelled { .. } => Step::Cancelled,
        };
        match self.settle(run, step)? {
            Some(outcome) => Ok(outcome),
            None => self.outcome(run, None),
        }
    }
}

/// Whether two components of a batch write the same file.
fn shares_file(components: &[&Component]) -> bool {
    let mut seen = HashSet::new();
    components.iter().any(|c| !seen.insert(c.file.as_str()))
}
