use agent_policy_rs::AgentAction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;

use crate::registry::Agent;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub agent_id: String,
    pub action: AgentAction,
    pub command: String,
    /// Audit entry of the assessment that approved this request.
    pub audit_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub agent_id: String,
    pub action: AgentAction,
    pub accepted_at: DateTime<Utc>,
    pub executed: bool,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("agent {0} is unreachable")]
    Unreachable(String),
    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// Forwards approved operations to the infrastructure running the agents.
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError>;
}

/// Records approved requests without executing them.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    requests: Mutex<Vec<DispatchRequest>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandDispatcher for RecordingDispatcher {
    fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        info!(
            agent_id = %request.agent_id,
            action = %request.action,
            audit_id = %request.audit_id,
            "dispatch recorded"
        );
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        Ok(DispatchReceipt {
            agent_id: request.agent_id.clone(),
            action: request.action,
            accepted_at: Utc::now(),
            executed: false,
        })
    }
}

/// Renders the shell command that performs `action` on `agent`.
///
/// `message` requires `text`; `other` has no canonical command and returns `None`.
pub fn control_command(agent: &Agent, action: AgentAction, text: Option<&str>) -> Option<String> {
    let session = shell_quote(agent.session());
    let launch = format!(
        "tmux new-session -d -s {session} {}",
        shell_quote(&format!("python3 {} --monitor", agent.script))
    );

    let command = match action {
        AgentAction::Start => launch,
        AgentAction::Stop => format!("tmux kill-session -t {session}"),
        AgentAction::Restart => format!("tmux kill-session -t {session} && {launch}"),
        AgentAction::Status => format!("tmux has-session -t {session}"),
        AgentAction::Logs => format!("tmux capture-pane -p -t {session}"),
        AgentAction::Deploy => {
            let dir = Path::new(&agent.script)
                .parent()
                .map(|parent| parent.display().to_string())
                .unwrap_or_else(|| agent.location.clone());
            format!("git -C {} pull --ff-only", shell_quote(&dir))
        }
        AgentAction::Message => {
            let text = text.filter(|text| !text.trim().is_empty())?;
            format!("tmux send-keys -t {session} {} Enter", shell_quote(text))
        }
        AgentAction::Other => return None,
    };
    Some(command)
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':'));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentStatus;

    fn agent() -> Agent {
        Agent {
            id: "business-qa-1".to_string(),
            name: "AI QA Agent".to_string(),
            agent_type: "qa".to_string(),
            status: AgentStatus::Active,
            source: "business".to_string(),
            location: "/srv/agents/qa".to_string(),
            script: "/srv/agents/qa/ai-qa-agent.py".to_string(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn renders_tmux_commands() {
        let agent = agent();
        assert_eq!(
            control_command(&agent, AgentAction::Start, None).unwrap(),
            "tmux new-session -d -s business-qa-1 'python3 /srv/agents/qa/ai-qa-agent.py --monitor'"
        );
        assert_eq!(
            control_command(&agent, AgentAction::Stop, None).unwrap(),
            "tmux kill-session -t business-qa-1"
        );
        assert!(control_command(&agent, AgentAction::Restart, None)
            .unwrap()
            .starts_with("tmux kill-session -t business-qa-1 && tmux new-session"));
        assert_eq!(
            control_command(&agent, AgentAction::Deploy, None).unwrap(),
            "git -C /srv/agents/qa pull --ff-only"
        );
        assert_eq!(control_command(&agent, AgentAction::Other, Some("ls")), None);
    }

    #[test]
    fn message_text_is_quoted() {
        let agent = agent();
        assert_eq!(control_command(&agent, AgentAction::Message, None), None);
        assert_eq!(control_command(&agent, AgentAction::Message, Some("  ")), None);
        assert_eq!(
            control_command(&agent, AgentAction::Message, Some("it's done; rm x")).unwrap(),
            r"tmux send-keys -t business-qa-1 'it'\''s done; rm x' Enter"
        );
    }

    #[test]
    fn recording_dispatcher_never_executes() {
        let dispatcher = RecordingDispatcher::new();
        let receipt = dispatcher
            .dispatch(&DispatchRequest {
                agent_id: "business-qa-1".to_string(),
                action: AgentAction::Status,
                command: "tmux has-session -t business-qa-1".to_string(),
                audit_id: "audit_1_abc".to_string(),
            })
            .unwrap();
        assert!(!receipt.executed);
        assert_eq!(dispatcher.requests().len(), 1);
        assert_eq!(dispatcher.requests()[0].audit_id, "audit_1_abc");
    }
}
