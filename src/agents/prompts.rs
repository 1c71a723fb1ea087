use super::role::Role;

/// Input handed to an agent at construction time. Specialists read the raw
/// report; the team role reads the three specialist reports (with placeholder
/// text already substituted for any consult that failed).
#[derive(Debug, Clone)]
pub enum AgentPayload {
    Report(String),
    TeamReports(TeamReports),
}

#[derive(Debug, Clone, Default)]
pub struct TeamReports {
    pub cardiologist: String,
    pub psychologist: String,
    pub pulmonologist: String,
}

const CARDIOLOGIST_DIRECTIVE: &str = "You are a consultant cardiologist reviewing a patient's medical report. Assess cardiac workup, rhythm, and structural findings; flag subtle signs of cardiac disease the referring physician may have missed; and recommend next cardiac investigations or management.";

const PSYCHOLOGIST_DIRECTIVE: &str = "You are a clinical psychologist reviewing a patient's medical report. Assess mental-state findings, anxiety or panic features, and psychosomatic contributors; note where symptoms could be psychological rather than organic; and recommend psychological assessment or management.";

const PULMONOLOGIST_DIRECTIVE: &str = "You are a consultant pulmonologist reviewing a patient's medical report. Assess respiratory findings, breathing patterns, and pulmonary test results; flag conditions such as asthma, infection, or dysfunctional breathing; and recommend next respiratory investigations or management.";

const TEAM_DIRECTIVE: &str = "You are the multidisciplinary team consolidating three specialist reports into one view. Weigh agreements and conflicts across the consults, then state the most likely health issues with the reasoning behind each.";

fn directive(role: Role) -> &'static str {
    match role {
        Role::Cardiologist => CARDIOLOGIST_DIRECTIVE,
        Role::Psychologist => PSYCHOLOGIST_DIRECTIVE,
        Role::Pulmonologist => PULMONOLOGIST_DIRECTIVE,
        Role::MultidisciplinaryTeam => TEAM_DIRECTIVE,
    }
}

fn specialist_prompt(role: Role, report: &str) -> String {
    let mut prompt = String::from(directive(role));
    prompt.push_str("\n\nMedical report:\n");
    prompt.push_str(report);
    prompt.push_str(
        "\n\nRespond with ## Findings (bulleted), ## Possible Issues, ## Recommended Next Steps.",
    );
    prompt
}

fn team_prompt(reports: &TeamReports) -> String {
    let mut prompt = String::from(TEAM_DIRECTIVE);
    prompt.push_str("\n\nCardiologist report:\n");
    prompt.push_str(&reports.cardiologist);
    prompt.push_str("\n\nPsychologist report:\n");
    prompt.push_str(&reports.psychologist);
    prompt.push_str("\n\nPulmonologist report:\n");
    prompt.push_str(&reports.pulmonologist);
    prompt.push_str(
        "\n\nRespond with ## Consolidated Diagnosis (each issue with its supporting reasoning), ## Points of Disagreement, ## Recommended Plan.",
    );
    prompt
}

/// Pure role -> instruction mapping. A role/payload mismatch is a programming
/// error, not a runtime condition, so it panics.
pub fn build_prompt(role: Role, payload: &AgentPayload) -> String {
    match (role, payload) {
        (Role::MultidisciplinaryTeam, AgentPayload::TeamReports(reports)) => team_prompt(reports),
        (role, AgentPayload::Report(report)) if role.is_specialist() => {
            specialist_prompt(role, report)
        }
        (role, _) => panic!("payload does not match role {role}"),
    }
}
