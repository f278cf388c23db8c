use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{MonitorError, Result};

pub type SessionId = String;

/// Milliseconds since the Unix epoch; the wire format for all timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One student's logged-in occupancy of one lab computer, bounded by
/// login/logout. The registry owns the canonical copy; everything else
/// references it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(rename = "_id")]
    pub id: SessionId,
    pub student_name: String,
    pub student_id: String,
    pub computer_name: String,
    pub lab_id: String,
    pub system_number: String,
    pub login_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_time: Option<u64>,
    /// Whole seconds, floored; set only at close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    fn close_at(&mut self, logout_time: u64) {
        self.logout_time = Some(logout_time);
        self.duration = Some(logout_time.saturating_sub(self.login_time) / 1000);
        self.status = SessionStatus::Completed;
    }
}

/// Result of `close_session`: a second close on the same id is not an
/// error, it just reports the already-completed record untouched.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(SessionRecord),
    AlreadyCompleted(SessionRecord),
}

impl CloseOutcome {
    pub fn record(&self) -> &SessionRecord {
        match self {
            CloseOutcome::Closed(record) => record,
            CloseOutcome::AlreadyCompleted(record) => record,
        }
    }
}

/// Authoritative record of active login sessions per computer. Fully
/// in-memory: none of these operations touch I/O, so a single write guard
/// per call is what serializes concurrent logins on the same computer.
pub struct SessionRegistry {
    sessions: Arc<RwLock<Vec<SessionRecord>>>,
    counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(Vec::new())),
            counter: AtomicU64::new(1),
        }
    }

    /// Session id format carried over from the original deployment:
    /// timestamp plus an atomic counter. Best-effort creation order only.
    fn generate_session_id(&self) -> SessionId {
        format!(
            "SESSION_{}_{}",
            now_millis(),
            self.counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Opens a new active session for (computer, student). Any session
    /// still active on the same computer is force-completed first, with its
    /// logout time equal to the new session's login time, so no reader can
    /// ever observe two active sessions on one computer.
    pub async fn open_session(
        &self,
        student_name: &str,
        student_id: &str,
        computer_name: &str,
        lab_id: &str,
        system_number: &str,
    ) -> SessionRecord {
        let login_time = now_millis();
        let session = SessionRecord {
            id: self.generate_session_id(),
            student_name: student_name.to_string(),
            student_id: student_id.to_string(),
            computer_name: computer_name.to_string(),
            lab_id: lab_id.to_string(),
            system_number: system_number.to_string(),
            login_time,
            logout_time: None,
            duration: None,
            status: SessionStatus::Active,
            screenshot: None,
        };

        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions
            .iter_mut()
            .find(|s| s.computer_name == computer_name && s.is_active())
        {
            tracing::info!(
                session_id = %existing.id,
                computer_name = %computer_name,
                "Taking over computer with an active session"
            );
            existing.close_at(login_time);
        }

        sessions.push(session.clone());

        tracing::info!(
            session_id = %session.id,
            student_name = %student_name,
            computer_name = %computer_name,
            "Session created"
        );
        session
    }

    /// Closes an active session. Idempotent: closing an already-completed
    /// session returns the existing record unchanged. Unknown ids are an
    /// error and mutate nothing.
    pub async fn close_session(&self, session_id: &str) -> Result<CloseOutcome> {
        let mut sessions = self.sessions.write().await;

        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| MonitorError::SessionNotFound(session_id.to_string()))?;

        if !session.is_active() {
            tracing::debug!(session_id = %session_id, "Session already completed");
            return Ok(CloseOutcome::AlreadyCompleted(session.clone()));
        }

        session.close_at(now_millis());

        tracing::info!(
            session_id = %session_id,
            student_name = %session.student_name,
            duration = ?session.duration,
            "Session ended"
        );
        Ok(CloseOutcome::Closed(session.clone()))
    }

    /// Replaces the stored screenshot blob. The payload is opaque; only the
    /// latest screenshot is retained (overwrite, never append).
    pub async fn update_screenshot(&self, session_id: &str, payload: String) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| MonitorError::SessionNotFound(session_id.to_string()))?;

        session.screenshot = Some(payload);
        Ok(())
    }

    /// All active sessions, newest login first, optionally filtered by lab
    /// id (case-insensitive on the trimmed lab code).
    pub async fn list_active(&self, lab_filter: Option<&str>) -> Vec<SessionRecord> {
        let sessions = self.sessions.read().await;
        let normalized = lab_filter.map(|l| l.trim().to_ascii_uppercase());

        sessions
            .iter()
            .rev()
            .filter(|s| s.is_active())
            .filter(|s| match &normalized {
                Some(lab) => s.lab_id.trim().to_ascii_uppercase() == *lab,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// The currently active session on a computer, if any.
    pub async fn get_by_computer(&self, computer_name: &str) -> Option<SessionRecord> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .find(|s| s.computer_name == computer_name && s.is_active())
            .cloned()
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let sessions = self.sessions.read().await;
        sessions.iter().find(|s| s.id == session_id).cloned()
    }

    /// The most recent `limit` sessions in creation order, active or not.
    pub async fn history(&self, limit: usize) -> Vec<SessionRecord> {
        let sessions = self.sessions.read().await;
        let start = sessions.len().saturating_sub(limit);
        sessions[start..].to_vec()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
