//! Append-only JSON-lines implementation of the state store.
//!
//! Layout: `<root>/tasks/<task_id>/log.jsonl`, one entry per line. Appends
//! take an exclusive lock and are fsynced before returning. Rollback appends
//! a marker; replay hides every entry between the checkpoint and the marker.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::StateStore;
use super::types::{Checkpoint, PhaseResult, Position, TaskState};
use crate::errors::StoreError;
use crate::orchestrator::Escalation;

const LOG_FILE: &str = "log.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogEntry {
    TaskCreated {
        task_id: String,
        description: String,
        working_dir: PathBuf,
        created_at: DateTime<Utc>,
    },
    SpecBound {
        spec_hash: String,
    },
    Started {
        component_id: String,
        level: usize,
    },
    PhaseResult {
        result: PhaseResult,
    },
    Checkpoint {
        checkpoint: Checkpoint,
    },
    Rollback {
        checkpoint_id: String,
        at: DateTime<Utc>,
    },
    Escalated {
        escalation: Box<Escalation>,
    },
    Finished {
        at: DateTime<Utc>,
    },
}

/// File-backed state store.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    fn log_path(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        // Task ids become path components; anything that could escape is unknown
        if task_id.is_empty()
            || task_id.contains(['/', '\\'])
            || task_id == "."
            || task_id == ".."
        {
            return Err(StoreError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        Ok(self.tasks_dir().join(task_id).join(LOG_FILE))
    }

    fn open_log(&self, task_id: &str) -> Result<(File, PathBuf), StoreError> {
        let path = self.log_path(task_id)?;
        if !path.exists() {
            return Err(StoreError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        Ok((file, path))
    }

    /// Append one entry under an exclusive lock. Returns the entry's line number.
    fn append(&self, task_id: &str, entry: LogEntry) -> Result<u64, StoreError> {
        self.append_with(task_id, |_| entry)
    }

    /// Append an entry built from the line number it will occupy.
    fn append_with(
        &self,
        task_id: &str,
        build: impl FnOnce(u64) -> LogEntry,
    ) -> Result<u64, StoreError> {
        let (mut file, path) = self.open_log(task_id)?;
        let write_err = |source| StoreError::Write {
            path: path.clone(),
            source,
        };

        file.lock_exclusive().map_err(write_err)?;
        let result = Self::append_locked(&mut file, build).map_err(write_err);
        let unlock = FileExt::unlock(&file).map_err(write_err);

        let sequence = result?;
        unlock?;
        debug!(task_id, sequence, "state entry appended");
        Ok(sequence)
    }

    fn append_locked(
        file: &mut File,
        build: impl FnOnce(u64) -> LogEntry,
    ) -> std::io::Result<u64> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut content)?;

        // A torn tail was never acknowledged; drop it before appending
        if !content.is_empty() && !content.ends_with('\n') {
            let keep = content.rfind('\n').map_or(0, |i| i + 1);
            file.set_len(keep as u64)?;
            content.truncate(keep);
        }

        let sequence = content.lines().count() as u64 + 1;
        let line = serde_json::to_string(&build(sequence)).map_err(std::io::Error::other)?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_data()?;

        Ok(sequence)
    }

    /// Read the log and apply rollback markers, yielding the visible entries.
    fn effective_entries(&self, task_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        let path = self.log_path(task_id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::TaskNotFound {
                    task_id: task_id.to_string(),
                });
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        let torn_tail = !content.is_empty() && !content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        let mut entries: Vec<LogEntry> = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(_) if torn_tail && i + 1 == lines.len() => break,
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path: path.clone(),
                        line: i + 1,
                        message: e.to_string(),
                    });
                }
            };

            match entry {
                LogEntry::Rollback {
                    ref checkpoint_id, ..
                } => {
                    let Some(keep) = entries.iter().position(|e| {
                        matches!(e, LogEntry::Checkpoint { checkpoint } if &checkpoint.id == checkpoint_id)
                    }) else {
                        return Err(StoreError::Corrupt {
                            path: path.clone(),
                            line: i + 1,
                            message: format!("rollback to unknown checkpoint {}", checkpoint_id),
                        });
                    };
                    entries.truncate(keep + 1);
                }
                other => entries.push(other),
            }
        }

        Ok(entries)
    }

    fn replay(task_id: &str, entries: Vec<LogEntry>) -> Result<TaskState, StoreError> {
        let mut iter = entries.into_iter();
        let mut state = match iter.next() {
            Some(LogEntry::TaskCreated {
                task_id,
                description,
                working_dir,
                created_at,
            }) => TaskState::new(&task_id, &description, working_dir, created_at),
            _ => {
                return Err(StoreError::TaskNotFound {
                    task_id: task_id.to_string(),
                });
            }
        };

        for entry in iter {
            match entry {
                LogEntry::TaskCreated { .. } => {}
                LogEntry::SpecBound { spec_hash } => state.spec_hash = Some(spec_hash),
                LogEntry::Started {
                    component_id,
                    level,
                } => {
                    state.position = Some(Position {
                        component_id,
                        level,
                    });
                }
                LogEntry::PhaseResult { result } => {
                    let id = result.component_id.clone();
                    if result.is_success() {
                        if !state.is_completed(&id) {
                            state.completed.push(id.clone());
                        }
                        if state
                            .escalation
                            .as_ref()
                            .is_some_and(|e| e.component_id == id)
                        {
                            state.escalation = None;
                        }
                    } else {
                        state.completed.retain(|c| c != &id);
                    }
                    if state
                        .position
                        .as_ref()
                        .is_some_and(|p| p.component_id == id)
                    {
                        state.position = None;
                    }
                    state.results.insert(id, result);
                }
                LogEntry::Checkpoint { checkpoint } => state.checkpoints.push(checkpoint),
                LogEntry::Rollback { .. } => {}
                LogEntry::Escalated { escalation } => state.escalation = Some(*escalation),
                LogEntry::Finished { at } => {
                    state.escalation = None;
                    state.finished_at = Some(at);
                }
            }
        }

        Ok(state)
    }
}

fn checkpoint_id(sequence: u64) -> String {
    format!("cp-{:04}", sequence)
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".anvil-probe-{}", Uuid::new_v4().simple()));
    File::create(&probe)?.write_all(b"probe")?;
    fs::remove_file(&probe)
}

impl StateStore for FileStateStore {
    fn create_task(&self, description: &str, working_dir: &Path) -> Result<String, StoreError> {
        probe_writable(working_dir).map_err(|source| StoreError::Unwritable {
            path: working_dir.to_path_buf(),
            source,
        })?;
        let working_dir = working_dir
            .canonicalize()
            .unwrap_or_else(|_| working_dir.to_path_buf());

        let task_id = Uuid::new_v4().to_string();
        let path = self.log_path(&task_id)?;
        let write_err = |source| StoreError::Write {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(write_err)?;
        }
        OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(write_err)?;

        self.append(
            &task_id,
            LogEntry::TaskCreated {
                task_id: task_id.clone(),
                description: description.to_string(),
                working_dir,
                created_at: Utc::now(),
            },
        )?;
        Ok(task_id)
    }

    fn get_state(&self, task_id: &str) -> Result<TaskState, StoreError> {
        let entries = self.effective_entries(task_id)?;
        Self::replay(task_id, entries)
    }

    fn bind_spec(&self, task_id: &str, spec_hash: &str) -> Result<(), StoreError> {
        self.append(
            task_id,
            LogEntry::SpecBound {
                spec_hash: spec_hash.to_string(),
            },
        )
        .map(|_| ())
    }

    fn mark_started(
        &self,
        task_id: &str,
        component_id: &str,
        level: usize,
    ) -> Result<(), StoreError> {
        self.append(
            task_id,
            LogEntry::Started {
                component_id: component_id.to_string(),
                level,
            },
        )
        .map(|_| ())
    }

    fn save_phase_result(
        &self,
        task_id: &str,
        component_id: &str,
        result: &PhaseResult,
    ) -> Result<(), StoreError> {
        let mut result = result.clone();
        result.component_id = component_id.to_string();
        self.append(task_id, LogEntry::PhaseResult { result })
            .map(|_| ())
    }

    fn create_checkpoint(
        &self,
        task_id: &str,
        label: &str,
        snapshot: Option<String>,
    ) -> Result<String, StoreError> {
        let completed_len = self.get_state(task_id)?.completed.len();
        let sequence = self.append_with(task_id, |sequence| LogEntry::Checkpoint {
            checkpoint: Checkpoint {
                id: checkpoint_id(sequence),
                label: label.to_string(),
                sequence,
                completed_len,
                snapshot,
                created_at: Utc::now(),
            },
        })?;
        let id = checkpoint_id(sequence);
        debug!(task_id, checkpoint_id = %id, label, "checkpoint created");
        Ok(id)
    }

    fn rollback(&self, task_id: &str, checkpoint_id: &str) -> Result<(), StoreError> {
        let state = self.get_state(task_id)?;
        if state.checkpoint(checkpoint_id).is_none() {
            return Err(StoreError::CheckpointNotFound {
                task_id: task_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
            });
        }
        self.append(
            task_id,
            LogEntry::Rollback {
                checkpoint_id: checkpoint_id.to_string(),
                at: Utc::now(),
            },
        )
        .map(|_| ())
    }

    fn record_escalation(&self, task_id: &str, escalation: &Escalation) -> Result<(), StoreError> {
        self.append(
            task_id,
            LogEntry::Escalated {
                escalation: Box::new(escalation.clone()),
            },
        )
        .map(|_| ())
    }

    fn mark_finished(&self, task_id: &str) -> Result<(), StoreError> {
        self.append(task_id, LogEntry::Finished { at: Utc::now() })
            .map(|_| ())
    }

    fn list_tasks(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.tasks_dir();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Read { path: dir, source }),
        };

        let mut tasks: Vec<String> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(LOG_FILE).exists())
            .filter_map(|entry| entry.file_name().to_str().map(String::from))
            .collect();
        tasks.sort();
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{Escalation, EscalationStage};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn make_store() -> (FileStateStore, TempDir) {
        let dir = tempdir().unwrap();
        (FileStateStore::new(dir.path().join(".anvil")), dir)
    }

    fn passed(id: &str) -> PhaseResult {
        PhaseResult::passed(id, Duration::from_millis(10))
    }

    #[test]
    fn test_create_and_get_empty_task() {
        let (store, dir) = make_store();
        let task_id = store.create_task("build", dir.path()).unwrap();

        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.task_id, task_id);
        assert_eq!(state.description, "build");
        assert!(state.completed.is_empty());
        assert!(state.results.is_empty());
        assert!(state.checkpoints.is_empty());
        assert!(state.position.is_none());
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let (store, _dir) = make_store();
        assert!(matches!(
            store.get_state("nope"),
            Err(StoreError::TaskNotFound { .. })
        ));
        assert!(matches!(
            store.get_state("../escape"),
            Err(StoreError::TaskNotFound { .. })
        ));
        assert!(matches!(
            store.mark_started("nope", "a", 0),
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn test_unwritable_working_dir() {
        let (store, dir) = make_store();
        let file_path = dir.path().join("plain-file");
        fs::write(&file_path, "not a directory").unwrap();

        let result = store.create_task("x", &file_path);
        assert!(matches!(result, Err(StoreError::Unwritable { .. })));
    }

    #[test]
    fn test_only_successful_results_complete() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();

        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
        let mut failed = PhaseResult::new("b");
        failed.validation_passed = true;
        store.save_phase_result(&task_id, "b", &failed).unwrap();

        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.completed, vec!["a".to_string()]);
        assert_eq!(state.results.len(), 2);
        assert!(!state.results["b"].is_success());
    }

    #[test]
    fn test_result_component_id_follows_argument() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        store.save_phase_result(&task_id, "real", &passed("other")).unwrap();

        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.completed, vec!["real".to_string()]);
        assert_eq!(state.results["real"].component_id, "real");
    }

    #[test]
    fn test_position_tracks_started_component() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();

        store.mark_started(&task_id, "a", 0).unwrap();
        let state = store.get_state(&task_id).unwrap();
        assert_eq!(
            state.position,
            Some(Position {
                component_id: "a".into(),
                level: 0
            })
        );

        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
        assert!(store.get_state(&task_id).unwrap().position.is_none());
    }

    #[test]
    fn test_rollback_restores_checkpoint_state() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();

        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
        let cp = store.create_checkpoint(&task_id, "after a", None).unwrap();
        let at_checkpoint = store.get_state(&task_id).unwrap();

        store.mark_started(&task_id, "b", 1).unwrap();
        store.save_phase_result(&task_id, "b", &passed("b")).unwrap();
        store.create_checkpoint(&task_id, "after b", None).unwrap();
        assert_eq!(store.get_state(&task_id).unwrap().completed.len(), 2);

        store.rollback(&task_id, &cp).unwrap();
        assert_eq!(store.get_state(&task_id).unwrap(), at_checkpoint);
    }

    #[test]
    fn test_checkpoint_records_completed_len_and_snapshot() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
        let cp = store
            .create_checkpoint(&task_id, "after a", Some("abc123".into()))
            .unwrap();

        let state = store.get_state(&task_id).unwrap();
        let checkpoint = state.checkpoint(&cp).unwrap();
        assert_eq!(checkpoint.completed_len, 1);
        assert_eq!(checkpoint.snapshot.as_deref(), Some("abc123"));
        assert_eq!(checkpoint.label, "after a");
        assert_eq!(checkpoint.sequence, 3);
    }

    #[test]
    fn test_rollback_discards_later_checkpoints() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        let first = store.create_checkpoint(&task_id, "one", None).unwrap();
        let second = store.create_checkpoint(&task_id, "two", None).unwrap();

        store.rollback(&task_id, &first).unwrap();
        assert!(matches!(
            store.rollback(&task_id, &second),
            Err(StoreError::CheckpointNotFound { .. })
        ));

        // New checkpoints get fresh ids
        let third = store.create_checkpoint(&task_id, "three", None).unwrap();
        assert_ne!(third, second);
        let state = store.get_state(&task_id).unwrap();
        let ids: Vec<_> = state.checkpoints.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![first, third]);
    }

    #[test]
    fn test_rollback_unknown_checkpoint() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        assert!(matches!(
            store.rollback(&task_id, "cp-9999"),
            Err(StoreError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".anvil");
        let task_id = {
            let store = FileStateStore::new(&root);
            let task_id = store.create_task("t", dir.path()).unwrap();
            store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
            task_id
        };

        let store = FileStateStore::new(&root);
        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.completed, vec!["a".to_string()]);
    }

    #[test]
    fn test_torn_tail_is_ignored_and_healed() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();

        let log = store.log_path(&task_id).unwrap();
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(br#"{"type":"phase_result","result":{"compo"#)
            .unwrap();
        drop(file);

        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.completed, vec!["a".to_string()]);

        store.save_phase_result(&task_id, "b", &passed("b")).unwrap();
        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.completed, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_corrupt_line_is_an_error() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        let log = store.log_path(&task_id).unwrap();
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"garbage\n").unwrap();
        drop(file);

        assert!(matches!(
            store.get_state(&task_id),
            Err(StoreError::Corrupt { line: 2, .. })
        ));
    }

    #[test]
    fn test_spec_binding_and_finish() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        store.bind_spec(&task_id, "deadbeef").unwrap();
        store.mark_finished(&task_id).unwrap();

        let state = store.get_state(&task_id).unwrap();
        assert_eq!(state.spec_hash.as_deref(), Some("deadbeef"));
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_escalation_cleared_by_later_success() {
        let (store, dir) = make_store();
        let task_id = store.create_task("t", dir.path()).unwrap();
        let escalation = Escalation::new(&task_id, "a", EscalationStage::Validation, vec![], vec![]);
        store.record_escalation(&task_id, &escalation).unwrap();

        let state = store.get_state(&task_id).unwrap();
        assert!(state.is_blocked());
        assert_eq!(state.escalation.as_ref().unwrap().component_id, "a");

        store.save_phase_result(&task_id, "a", &passed("a")).unwrap();
        assert!(!store.get_state(&task_id).unwrap().is_blocked());
    }

    #[test]
    fn test_list_tasks() {
        let (store, dir) = make_store();
        assert!(store.list_tasks().unwrap().is_empty());
        let a = store.create_task("a", dir.path()).unwrap();
        let b = store.create_task("b", dir.path()).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list_tasks().unwrap(), expected);
    }
}
