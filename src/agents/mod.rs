pub mod agent;
pub mod prompts;
pub mod role;

pub use agent::{Agent, ConsultError};
pub use prompts::{AgentPayload, TeamReports};
pub use role::Role;
