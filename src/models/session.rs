// Session record shared by the orchestrator, the datastore backends and the realtime view

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Who authored a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// The two consulting agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentName {
    /// Technical AI/engineering researcher
    Pedro,
    /// Project manager who writes the executive report
    Juan,
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentName::Pedro => write!(f, "Pedro"),
            AgentName::Juan => write!(f, "Juan"),
        }
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<AgentName>,
    pub content: String,
    /// Epoch milliseconds, display only. Order is the position in `chat_history`.
    pub timestamp: i64,
}

impl Message {
    /// Create a user message stamped with the current time
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            name: None,
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Create an agent message stamped with the current time
    pub fn agent(name: AgentName, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Agent,
            name: Some(name),
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Position of a session in the consultation workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    /// Initial state, waiting for the user to name a company or topic
    WaitingForInfo,
    /// Pedro is researching
    StartResearch,
    /// Reserved for a conditional "keep researching" branch. Never entered.
    DecideFlow,
    /// Juan is writing the report
    StartReport,
    /// Report delivered. Terminal.
    Finished,
}

impl WorkflowState {
    /// Label shown next to the chat while a run is in progress
    pub fn display_name(&self) -> &'static str {
        match self {
            WorkflowState::WaitingForInfo => "Waiting for instructions",
            WorkflowState::StartResearch => "Pedro is researching...",
            WorkflowState::DecideFlow => "Deciding next step",
            WorkflowState::StartReport => "Juan is writing the report...",
            WorkflowState::Finished => "Analysis complete",
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        WorkflowState::WaitingForInfo
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::WaitingForInfo => "WAITING_FOR_INFO",
            WorkflowState::StartResearch => "START_RESEARCH",
            WorkflowState::DecideFlow => "DECIDE_FLOW",
            WorkflowState::StartReport => "START_REPORT",
            WorkflowState::Finished => "FINISHED",
        };
        f.write_str(name)
    }
}

/// Persisted state of one consultation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chat_history: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub company_info: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub research_results: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub report_final: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_state: WorkflowState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub research_counter: u32,
}

/// Rows inserted by other clients may hold SQL `NULL` in unset columns
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Session {
    /// Build the initial record for a freshly inserted session
    pub fn initial(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            chat_history: Vec::new(),
            company_info: String::new(),
            research_results: Vec::new(),
            report_final: String::new(),
            current_state: WorkflowState::WaitingForInfo,
            research_counter: 0,
        }
    }

    /// Whether a new consultation may start on this session
    pub fn accepts_input(&self) -> bool {
        self.current_state == WorkflowState::WaitingForInfo
    }

    /// Whether the workflow reached its terminal state
    pub fn is_finished(&self) -> bool {
        self.current_state == WorkflowState::Finished
    }
}

/// Fields required to insert a new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: String,
}

impl NewSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    /// Session owned by a freshly generated anonymous principal
    pub fn anonymous() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Partial update of a session. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_results: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_final: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<WorkflowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_counter: Option<u32>,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat_history(mut self, history: Vec<Message>) -> Self {
        self.chat_history = Some(history);
        self
    }

    pub fn company_info(mut self, info: impl Into<String>) -> Self {
        self.company_info = Some(info.into());
        self
    }

    pub fn research_results(mut self, results: Vec<String>) -> Self {
        self.research_results = Some(results);
        self
    }

    pub fn report_final(mut self, report: impl Into<String>) -> Self {
        self.report_final = Some(report.into());
        self
    }

    pub fn current_state(mut self, state: WorkflowState) -> Self {
        self.current_state = Some(state);
        self
    }

    pub fn research_counter(mut self, counter: u32) -> Self {
        self.research_counter = Some(counter);
        self
    }

    /// True when the patch would not change anything
    pub fn is_empty(&self) -> bool {
        self.chat_history.is_none()
            && self.company_info.is_none()
            && self.research_results.is_none()
            && self.report_final.is_none()
            && self.current_state.is_none()
            && self.research_counter.is_none()
    }

    /// Apply the patch in place
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(history) = &self.chat_history {
            session.chat_history = history.clone();
        }
        if let Some(info) = &self.company_info {
            session.company_info = info.clone();
        }
        if let Some(results) = &self.research_results {
            session.research_results = results.clone();
        }
        if let Some(report) = &self.report_final {
            session.report_final = report.clone();
        }
        if let Some(state) = self.current_state {
            session.current_state = state;
        }
        if let Some(counter) = self.research_counter {
            session.research_counter = counter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_state_wire_format() {
        let json = serde_json::to_string(&WorkflowState::WaitingForInfo).unwrap();
        assert_eq!(json, "\"WAITING_FOR_INFO\"");

        let parsed: WorkflowState = serde_json::from_str("\"START_REPORT\"").unwrap();
        assert_eq!(parsed, WorkflowState::StartReport);
        assert_eq!(WorkflowState::StartReport.to_string(), "START_REPORT");
    }

    #[test]
    fn test_user_message_has_no_name() {
        let msg = Message::user("Acme Corp");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("name").is_none());
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_agent_message_carries_name() {
        let msg = Message::agent(AgentName::Juan, "Here is the report.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "agent");
        assert_eq!(json["name"], "Juan");
    }

    #[test]
    fn test_session_deserializes_with_missing_columns() {
        // Freshly inserted rows may omit nullable columns
        let json = r#"{"id":"s-1","user_id":"u-1","current_state":"WAITING_FOR_INFO"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.chat_history.is_empty());
        assert_eq!(session.research_counter, 0);
        assert!(session.accepts_input());
    }

    #[test]
    fn test_session_deserializes_null_columns_as_defaults() {
        let row = r#"{
            "id": "s-1",
            "user_id": "u-1",
            "chat_history": null,
            "company_info": null,
            "research_results": null,
            "report_final": null,
            "current_state": null,
            "research_counter": null
        }"#;

        let session: Session = serde_json::from_str(row).unwrap();
        assert_eq!(session, Session::initial("s-1", "u-1"));
        assert!(session.accepts_input());
    }

    #[test]
    fn test_patch_only_serializes_set_fields() {
        let patch = SessionPatch::new()
            .company_info("Acme Corp")
            .current_state(WorkflowState::StartResearch);
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["current_state"], "START_RESEARCH");
    }

    #[test]
    fn test_patch_apply_leaves_unset_fields() {
        let mut session = Session::initial("s-1", "u-1");
        session.chat_history.push(Message::user("hello"));

        SessionPatch::new().research_counter(1).apply_to(&mut session);

        assert_eq!(session.research_counter, 1);
        assert_eq!(session.chat_history.len(), 1);
        assert_eq!(session.current_state, WorkflowState::WaitingForInfo);
    }

    #[test]
    fn test_empty_patch() {
        assert!(SessionPatch::new().is_empty());
        assert!(!SessionPatch::new().report_final("x").is_empty());
    }
}
