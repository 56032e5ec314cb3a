//! Persistent task and execution stores
//!
//! JSON records in a directory tree:
//!
//! ```text
//! {root}/tasks/{task_id}.json
//! {root}/executions/{task_id}/{execution_id}.json
//! ```
//!
//! Writes go through write-then-rename so a crash never leaves a torn
//! record. Task reads come from an in-memory snapshot kept write-through
//! under a single writer lock; execution history is append-only — one
//! transition from `running` to a terminal status is the only update a
//! record ever sees.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use qualscan_core::limits::MIN_HISTORY_RETENTION;
use qualscan_core::task::{Execution, Task};
use qualscan_core::{QualscanError, Result};

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|source| QualscanError::IoAt {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| QualscanError::IoAt {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|source| QualscanError::IoAt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub struct TaskStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join("tasks");
        fs::create_dir_all(&dir).map_err(|source| QualscanError::IoAt {
            path: dir.clone(),
            source,
        })?;
        let mut cache = HashMap::new();
        for entry in fs::read_dir(&dir).map_err(|source| QualscanError::IoAt {
            path: dir.clone(),
            source,
        })? {
            let path = entry.map_err(QualscanError::Io)?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match read_json::<Task>(&path) {
                    Ok(task) => {
                        cache.insert(task.task_id.clone(), task);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable task record");
                    }
                }
            }
        }
        tracing::info!(tasks = cache.len(), dir = %dir.display(), "task store opened");
        Ok(Self {
            dir,
            cache: RwLock::new(cache),
        })
    }

    fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    pub fn save(&self, task: &Task) -> Result<()> {
        let mut cache = self.cache.write();
        atomic_write(
            &self.path_for(&task.task_id),
            &serde_json::to_vec_pretty(task)?,
        )?;
        cache.insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Task> {
        self.cache
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| QualscanError::NotFound(format!("task {}", task_id)))
    }

    pub fn list(&self) -> Vec<Task> {
        let mut out: Vec<Task> = self.cache.read().values().cloned().collect();
        out.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        out
    }

    /// Delete the definition; execution history is untouched
    pub fn delete(&self, task_id: &str) -> Result<Task> {
        let mut cache = self.cache.write();
        let task = cache
            .remove(task_id)
            .ok_or_else(|| QualscanError::NotFound(format!("task {}", task_id)))?;
        let path = self.path_for(task_id);
        if let Err(source) = fs::remove_file(&path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                cache.insert(task.task_id.clone(), task);
                return Err(QualscanError::IoAt { path, source });
            }
        }
        Ok(task)
    }
}

pub struct ExecutionStore {
    dir: PathBuf,
    write_lock: parking_lot::Mutex<()>,
}

impl ExecutionStore {
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join("executions");
        fs::create_dir_all(&dir).map_err(|source| QualscanError::IoAt {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    fn path_for(&self, task_id: &str, execution_id: &str) -> PathBuf {
        self.dir.join(task_id).join(format!("{}.json", execution_id))
    }

    /// Record a freshly started run
    pub fn create(&self, execution: &Execution) -> Result<()> {
        if execution.status.is_terminal() {
            return Err(QualscanError::Conflict(
                "new executions must be in the running state".to_string(),
            ));
        }
        let _guard = self.write_lock.lock();
        let task_dir = self.dir.join(&execution.task_id);
        fs::create_dir_all(&task_dir).map_err(|source| QualscanError::IoAt {
            path: task_dir,
            source,
        })?;
        let path = self.path_for(&execution.task_id, &execution.execution_id);
        if path.exists() {
            return Err(QualscanError::Conflict(format!(
                "execution {} already exists",
                execution.execution_id
            )));
        }
        atomic_write(&path, &serde_json::to_vec_pretty(execution)?)
    }

    /// One allowed update: running -> terminal. Anything else violates
    /// the append-only history.
    pub fn finalize(&self, execution: &Execution) -> Result<()> {
        if !execution.status.is_terminal() {
            return Err(QualscanError::Conflict(
                "finalize requires a terminal status".to_string(),
            ));
        }
        let _guard = self.write_lock.lock();
        let path = self.path_for(&execution.task_id, &execution.execution_id);
        let existing: Execution = read_json(&path).map_err(|_| {
            QualscanError::NotFound(format!("execution {}", execution.execution_id))
        })?;
        if existing.status.is_terminal() {
            return Err(QualscanError::Conflict(format!(
                "execution {} is already terminal",
                execution.execution_id
            )));
        }
        atomic_write(&path, &serde_json::to_vec_pretty(execution)?)
    }

    pub fn get(&self, task_id: &str, execution_id: &str) -> Result<Execution> {
        read_json(&self.path_for(task_id, execution_id))
            .map_err(|_| QualscanError::NotFound(format!("execution {}", execution_id)))
    }

    /// Newest-first history, optionally restricted to one task
    pub fn list(&self, task_id: Option<&str>, limit: usize) -> Result<Vec<Execution>> {
        let mut out = Vec::new();
        let task_dirs: Vec<PathBuf> = match task_id {
            Some(id) => vec![self.dir.join(id)],
            None => fs::read_dir(&self.dir)
                .map_err(|source| QualscanError::IoAt {
                    path: self.dir.clone(),
                    source,
                })?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
        };
        for dir in task_dirs {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Ok(execution) = read_json::<Execution>(&path) {
                        out.push(execution);
                    }
                }
            }
        }
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.execution_id.cmp(&a.execution_id)));
        out.truncate(limit.max(1));
        Ok(out)
    }

    /// Drop history beyond the retention floor
    ///
    /// The newest MIN_HISTORY_RETENTION records always survive; with
    /// `keep_days` set, older records are deleted only once they age out.
    pub fn prune(&self, task_id: &str, keep_days: Option<u32>) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let dir = self.dir.join(task_id);
        let mut executions: Vec<Execution> = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if let Ok(execution) = read_json::<Execution>(&entry.path()) {
                executions.push(execution);
            }
        }
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let mut removed = 0usize;
        for execution in executions.iter().skip(MIN_HISTORY_RETENTION) {
            let expired = match keep_days {
                Some(days) => {
                    execution.started_at < Utc::now() - chrono::Duration::days(days as i64)
                }
                None => true,
            };
            if expired
                && fs::remove_file(self.path_for(task_id, &execution.execution_id)).is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(task = task_id, removed, "pruned execution history");
        }
        Ok(removed)
    }
}
