//! Job Notifications
//!
//! Messages a plugin publishes while it works on a deferred request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle command carried by a job notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobCommand {
    Progress,
    Done,
    Error,
}

impl JobCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommand::Progress => "progress",
            JobCommand::Done => "done",
            JobCommand::Error => "error",
        }
    }

    /// Done and error end a job
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobCommand::Done | JobCommand::Error)
    }
}

impl std::fmt::Display for JobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A progress, done or error notification for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNotification {
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub command: JobCommand,
    #[serde(default)]
    pub payload: Value,
}

/// Immediate reply of a handler that deferred its work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAccepted {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// Title and body of the progress card shown by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub title: String,
    pub content: String,
}

impl Frame {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Typed progress payload understood by the platform UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Percentage, clamped to 0..=100
    pub progress: u8,
    pub frame: Frame,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl JobProgress {
    pub fn new(progress: u8, frame: Frame) -> Self {
        Self {
            progress: progress.min(100),
            frame,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The 100% frame sent when a job finishes successfully
    pub fn completed(details: Option<Value>) -> Self {
        Self {
            progress: 100,
            frame: Frame::new("Completed", "Job completed successfully"),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_wire_format() {
        let notification = JobNotification {
            job_id: "4f0c".into(),
            command: JobCommand::Progress,
            payload: json!({"pct": 50}),
        };

        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({"jobId": "4f0c", "command": "progress", "payload": {"pct": 50}})
        );
    }

    #[test]
    fn test_progress_is_clamped() {
        let progress = JobProgress::new(250, Frame::new("Scanning", "files"));
        assert_eq!(progress.progress, 100);
    }

    #[test]
    fn test_terminal_commands() {
        assert!(!JobCommand::Progress.is_terminal());
        assert!(JobCommand::Done.is_terminal());
        assert!(JobCommand::Error.is_terminal());
    }
}
