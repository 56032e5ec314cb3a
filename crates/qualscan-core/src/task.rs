//! Persisted scheduler records: task definitions and execution history
//!
//! Both types round-trip through serde_json byte-for-byte (all maps are
//! ordered, field order is fixed by the struct definitions) so the stores
//! can compare canonicalized records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DetectionOptions, SampleOptions};

/// What a scheduled task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Image pipeline over every matched file
    BatchImage,
    /// Image pipeline over a random fraction of matched files
    SampleImage,
    /// Video pipeline over every matched file
    Video,
}

/// Input selection and detection settings for a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub input_path: String,
    /// Glob applied to file names under `input_path`
    pub pattern: String,
    pub recursive: bool,
    pub detection: DetectionOptions,
    #[serde(default)]
    pub sampling: SampleOptions,
    /// Fraction of matches processed by `sample_image` tasks, (0,1]
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_sample_rate() -> f64 {
    1.0
}

/// Report output settings for a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    /// History retention in days; unset keeps the entry-count floor only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_days: Option<u32>,
}

/// Persistent cron-driven job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    /// 5-field cron expression, minute precision
    pub cron: String,
    pub enabled: bool,
    pub config: TaskConfig,
    #[serde(default)]
    pub output: TaskOutput,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived from `cron`; recomputed on load and after every run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Terminal status of one task run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    /// Every item processed, no errors
    Success,
    /// Some items errored, some processed
    Partial,
    /// Setup failed or nothing was processed
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Record of one task run, append-only once terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub task_id: String,
    pub task_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub items_processed: u64,
    pub normal_count: u64,
    pub abnormal_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Execution {
    pub fn begin(
        execution_id: String,
        task_id: String,
        task_name: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            task_name,
            status: ExecutionStatus::Running,
            started_at,
            finished_at: None,
            items_processed: 0,
            normal_count: 0,
            abnormal_count: 0,
            error_count: 0,
            report_path: None,
            error_message: None,
        }
    }

    /// Status derived from the tallies once a run finishes
    pub fn conclude(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
        self.status = if self.items_processed == 0 {
            ExecutionStatus::Failed
        } else if self.error_count == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Partial
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectionLevel;

    fn sample_task() -> Task {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Task {
            task_id: "t-1".to_string(),
            name: "nightly".to_string(),
            description: String::new(),
            task_type: TaskType::BatchImage,
            cron: "0 2 * * *".to_string(),
            enabled: true,
            config: TaskConfig {
                input_path: "/data/frames".to_string(),
                pattern: "*.png".to_string(),
                recursive: true,
                detection: DetectionOptions {
                    level: DetectionLevel::Deep,
                    ..Default::default()
                },
                sampling: SampleOptions::default(),
                sample_rate: 1.0,
            },
            output: TaskOutput::default(),
            created_at: now,
            updated_at: now,
            next_run_at: None,
        }
    }

    #[test]
    fn test_task_json_round_trip_is_canonical() {
        let task = sample_task();
        let first = serde_json::to_string(&task).unwrap();
        let reloaded: Task = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_execution_json_round_trip_is_canonical() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut execution = Execution::begin("e-1".into(), "t-1".into(), "nightly".into(), now);
        execution.items_processed = 7;
        execution.abnormal_count = 2;
        execution.normal_count = 5;
        execution.conclude(now);
        let first = serde_json::to_string(&execution).unwrap();
        let reloaded: Execution = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&reloaded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_execution_conclude_statuses() {
        let now = Utc::now();
        let mut e = Execution::begin("e1".into(), "t1".into(), "n".into(), now);
        e.conclude(now);
        assert_eq!(e.status, ExecutionStatus::Failed);

        let mut e = Execution::begin("e2".into(), "t1".into(), "n".into(), now);
        e.items_processed = 5;
        e.conclude(now);
        assert_eq!(e.status, ExecutionStatus::Success);

        let mut e = Execution::begin("e3".into(), "t1".into(), "n".into(), now);
        e.items_processed = 5;
        e.error_count = 2;
        e.conclude(now);
        assert_eq!(e.status, ExecutionStatus::Partial);
    }
}
