use thiserror::Error;
use tracing::{instrument, warn};

use crate::llm_client::SharedLlmClient;

use super::prompts::{build_prompt, AgentPayload, TeamReports};
use super::role::Role;

/// Completion-service failure tagged with the consult that produced it.
#[derive(Debug, Error)]
#[error("{role} consult failed: {source}")]
pub struct ConsultError {
    pub role: Role,
    #[source]
    pub source: anyhow::Error,
}

/// One consult: a role plus its payload, fixed at construction, forwarded to
/// the completion service exactly once per `run`.
pub struct Agent {
    role: Role,
    payload: AgentPayload,
    llm_client: SharedLlmClient,
}

impl Agent {
    pub fn specialist(role: Role, report: impl Into<String>, llm_client: SharedLlmClient) -> Self {
        assert!(role.is_specialist(), "{role} is not a specialist role");
        Self {
            role,
            payload: AgentPayload::Report(report.into()),
            llm_client,
        }
    }

    pub fn team(reports: TeamReports, llm_client: SharedLlmClient) -> Self {
        Self {
            role: Role::MultidisciplinaryTeam,
            payload: AgentPayload::TeamReports(reports),
            llm_client,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn prompt(&self) -> String {
        build_prompt(self.role, &self.payload)
    }

    /// Build the prompt, make one completion call, return the text unmodified.
    /// No retry; a failure is terminal for this consult only.
    #[instrument(skip_all, fields(role = %self.role))]
    pub async fn run(&self) -> Result<String, ConsultError> {
        let prompt = self.prompt();
        self.llm_client.complete(&prompt).await.map_err(|source| {
            warn!(role = %self.role, ?source, "Consult call failed");
            ConsultError {
                role: self.role,
                source,
            }
        })
    }
}
