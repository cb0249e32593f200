//! In-process worker double for orchestrator tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::WorkerError;
use crate::worker::{TaskKind, TaskSpec, TestReport, Worker, WorkerOutput};

type Handler = Box<dyn Fn(&TaskSpec) -> Result<WorkerOutput, WorkerError> + Send + Sync>;

/// Answers every request cleanly unless a handler is registered for its kind.
pub(crate) struct ScriptedWorker {
    handlers: HashMap<String, Handler>,
    coverage: f64,
    write_files: bool,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedWorker {
    pub(crate) fn clean() -> Self {
        Self {
            handlers: HashMap::new(),
            coverage: 100.0,
            write_files: false,
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Handle requests whose kind renders as `kind` (e.g. `"review#1"`).
    pub(crate) fn on(
        mut self,
        kind: &str,
        handler: impl Fn(&TaskSpec) -> Result<WorkerOutput, WorkerError> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(kind.to_string(), Box::new(handler));
        self
    }

    pub(crate) fn with_coverage(mut self, coverage: f64) -> Self {
        self.coverage = coverage;
        self
    }

    /// Write each component's file on implement, content naming the variant.
    pub(crate) fn writing_files(mut self) -> Self {
        self.write_files = true;
        self
    }

    /// Hold implement calls for a component or variant before answering.
    pub(crate) fn delaying(mut self, target: &str, delay: Duration) -> Self {
        self.delays.insert(target.to_string(), delay);
        self
    }

    pub(crate) fn count(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }

    pub(crate) fn count_for(&self, kind: &str, component: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, c)| k == kind && c.as_deref() == Some(component))
            .count()
    }

    pub(crate) fn total(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn default_output(&self, task: &TaskSpec) -> WorkerOutput {
        match task.kind {
            TaskKind::RunTests => WorkerOutput {
                test_report: Some(TestReport {
                    passed: 1,
                    failed: 0,
                    coverage: Some(self.coverage),
                    failures: Vec::new(),
                }),
                ..WorkerOutput::default()
            },
            TaskKind::Implement => WorkerOutput {
                files_touched: task
                    .component
                    .iter()
                    .map(|c| c.file.clone().into())
                    .collect(),
                ..WorkerOutput::default()
            },
            _ => WorkerOutput::default(),
        }
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, task: TaskSpec) -> Result<WorkerOutput, WorkerError> {
        let kind = task.kind.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((kind.clone(), task.component_id().map(String::from)));

        if self.write_files
            && task.kind == TaskKind::Implement
            && let Some(component) = &task.component
        {
            let path = task.working_dir.join(&component.file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = format!(
                "// {} {}\n",
                component.id,
                task.variant.as_deref().unwrap_or("main")
            );
            std::fs::write(&path, content)?;
        }

        let response = match self.handlers.get(&kind) {
            Some(handler) => handler(&task),
            None => Ok(self.default_output(&task)),
        };

        let target = task.variant.as_deref().or(task.component_id());
        if task.kind == TaskKind::Implement
            && let Some(delay) = target.and_then(|t| self.delays.get(t))
        {
            tokio::time::sleep(*delay).await;
        }
        response
    }
}
