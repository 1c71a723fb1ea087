use std::collections::HashMap;

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::agents::{Agent, ConsultError, Role, TeamReports};
use crate::llm_client::SharedLlmClient;

/// Failure of the consolidation step itself, surfaced distinctly from
/// specialist-level failures.
#[derive(Debug, Error)]
#[error("multidisciplinary aggregation failed: {source}")]
pub struct AggregationError {
    #[source]
    pub source: anyhow::Error,
}

/// Stage markers for the presentation surface. Cosmetic; correctness never
/// depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    SpecialistsDispatched,
    ConsultRecorded {
        role: Role,
        completed: usize,
        total: usize,
    },
    AggregatorDispatched,
    Complete,
}

/// Per-specialist outcomes keyed by role. By the time aggregation starts every
/// specialist key is present; a consult that never reported (task panic) is
/// backfilled as a failure, never omitted.
#[derive(Debug, Default)]
pub struct ResultSet {
    entries: HashMap<Role, Result<String, ConsultError>>,
}

impl ResultSet {
    pub const PLACEHOLDER: &'static str = "No report generated.";

    fn record(&mut self, role: Role, outcome: Result<String, ConsultError>) {
        self.entries.insert(role, outcome);
    }

    pub fn outcome(&self, role: Role) -> Option<&Result<String, ConsultError>> {
        self.entries.get(&role)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text for the aggregator payload, with the placeholder substituted for
    /// failed or missing consults.
    pub fn text_or_placeholder(&self, role: Role) -> &str {
        match self.entries.get(&role) {
            Some(Ok(text)) => text.as_str(),
            _ => Self::PLACEHOLDER,
        }
    }

    pub fn team_reports(&self) -> TeamReports {
        TeamReports {
            cardiologist: self.text_or_placeholder(Role::Cardiologist).to_string(),
            psychologist: self.text_or_placeholder(Role::Psychologist).to_string(),
            pulmonologist: self.text_or_placeholder(Role::Pulmonologist).to_string(),
        }
    }
}

/// Terminal output of one analysis run. The run itself is infallible: partial
/// failures live inside the result set, and only the aggregation step carries
/// a run-level error.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub consults: ResultSet,
    pub final_diagnosis: Result<String, AggregationError>,
}

/// Fans the report out to the three specialists, joins on all of them, then
/// runs the multidisciplinary aggregation as one sequential step.
pub struct Orchestrator {
    llm_client: SharedLlmClient,
    progress: Option<UnboundedSender<Progress>>,
}

impl Orchestrator {
    pub fn new(llm_client: SharedLlmClient) -> Self {
        Self {
            llm_client,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: UnboundedSender<Progress>) -> Self {
        self.progress = Some(sender);
        self
    }

    fn emit(&self, update: Progress) {
        if let Some(sender) = &self.progress {
            // A closed receiver only means nobody is rendering progress.
            let _ = sender.send(update);
        }
    }

    #[instrument(skip_all, fields(report_len = report.len()))]
    pub async fn analyze(&self, report: &str) -> AnalysisOutcome {
        let total = Role::SPECIALISTS.len();
        let mut consults = ResultSet::default();
        let mut specialists = JoinSet::new();

        for role in Role::SPECIALISTS {
            let agent = Agent::specialist(role, report, self.llm_client.clone());
            specialists.spawn(async move { (agent.role(), agent.run().await) });
        }
        self.emit(Progress::SpecialistsDispatched);

        // Join barrier: wait for the slowest specialist, not the fastest.
        // A failed consult is recorded and never aborts its siblings.
        while let Some(joined) = specialists.join_next().await {
            match joined {
                Ok((role, outcome)) => {
                    match &outcome {
                        Ok(_) => info!(%role, "Specialist consult recorded"),
                        Err(err) => warn!(%role, %err, "Specialist consult failed; continuing"),
                    }
                    consults.record(role, outcome);
                    self.emit(Progress::ConsultRecorded {
                        role,
                        completed: consults.len(),
                        total,
                    });
                }
                Err(join_err) => {
                    warn!(?join_err, "Specialist task panicked");
                }
            }
        }

        // A panicked task never reported its role; backfill so the aggregator
        // always sees all three keys.
        for role in Role::SPECIALISTS {
            if consults.outcome(role).is_none() {
                consults.record(
                    role,
                    Err(ConsultError {
                        role,
                        source: anyhow!("specialist task panicked before completing"),
                    }),
                );
                self.emit(Progress::ConsultRecorded {
                    role,
                    completed: consults.len(),
                    total,
                });
            }
        }

        self.emit(Progress::AggregatorDispatched);
        let team = Agent::team(consults.team_reports(), self.llm_client.clone());
        let final_diagnosis = team
            .run()
            .await
            .map_err(|err| AggregationError { source: err.source });

        match &final_diagnosis {
            Ok(_) => info!("Multidisciplinary diagnosis ready"),
            Err(err) => warn!(%err, "Aggregation step failed"),
        }
        self.emit(Progress::Complete);

        AnalysisOutcome {
            consults,
            final_diagnosis,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;
    use crate::llm_client::LlmClient;

    const CARDIO_MARK: &str = "consultant cardiologist";
    const PSYCH_MARK: &str = "clinical psychologist";
    const PULMO_MARK: &str = "consultant pulmonologist";
    const TEAM_MARK: &str = "multidisciplinary team";

    struct Rule {
        marker: &'static str,
        delay_ms: u64,
        reply: Result<String, String>,
    }

    /// Scripted completion client keyed on role-specific prompt framing.
    #[derive(Default)]
    struct ScriptedLlm {
        rules: Vec<Rule>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn reply(self, marker: &'static str, text: &str) -> Self {
            self.reply_after(marker, 0, text)
        }

        fn reply_after(mut self, marker: &'static str, delay_ms: u64, text: &str) -> Self {
            self.rules.push(Rule {
                marker,
                delay_ms,
                reply: Ok(text.to_string()),
            });
            self
        }

        fn fail(mut self, marker: &'static str, message: &str) -> Self {
            self.rules.push(Rule {
                marker,
                delay_ms: 0,
                reply: Err(message.to_string()),
            });
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock poisoned").clone()
        }

        fn team_calls(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|prompt| prompt.contains(TEAM_MARK))
                .collect()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            self.calls
                .lock()
                .expect("lock poisoned")
                .push(prompt.to_string());

            for rule in &self.rules {
                if prompt.contains(rule.marker) {
                    if rule.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(rule.delay_ms)).await;
                    }
                    return match &rule.reply {
                        Ok(text) => Ok(text.clone()),
                        Err(message) => Err(anyhow!(message.clone())),
                    };
                }
            }

            anyhow::bail!("no scripted reply matched prompt")
        }
    }

    fn all_success_client() -> ScriptedLlm {
        ScriptedLlm::default()
            .reply(CARDIO_MARK, "cardio text C")
            .reply(PSYCH_MARK, "psych text Ps")
            .reply(PULMO_MARK, "pulmo text Pu")
            .reply(TEAM_MARK, "final diagnosis F")
    }

    #[tokio::test]
    async fn all_specialists_feed_exactly_one_aggregation() {
        let llm = Arc::new(all_success_client());
        let orchestrator = Orchestrator::new(llm.clone());

        let outcome = orchestrator
            .analyze("Patient reports palpitations and anxiety, no respiratory symptoms.")
            .await;

        assert_eq!(outcome.consults.len(), 3);
        for role in Role::SPECIALISTS {
            assert!(matches!(outcome.consults.outcome(role), Some(Ok(_))));
        }
        assert_eq!(
            outcome.final_diagnosis.expect("aggregation succeeds"),
            "final diagnosis F"
        );

        let team_calls = llm.team_calls();
        assert_eq!(team_calls.len(), 1, "aggregator must run exactly once");
        let payload = &team_calls[0];
        assert!(payload.contains("cardio text C"));
        assert!(payload.contains("psych text Ps"));
        assert!(payload.contains("pulmo text Pu"));
    }

    #[tokio::test]
    async fn one_failure_is_contained_and_placeholder_substituted() {
        let llm = Arc::new(
            ScriptedLlm::default()
                .reply(CARDIO_MARK, "cardio text C")
                .fail(PSYCH_MARK, "service timeout")
                .reply(PULMO_MARK, "pulmo text Pu")
                .reply(TEAM_MARK, "final diagnosis F"),
        );
        let orchestrator = Orchestrator::new(llm.clone());

        let outcome = orchestrator.analyze("report").await;

        assert_eq!(outcome.consults.len(), 3);
        let psych = outcome
            .consults
            .outcome(Role::Psychologist)
            .expect("entry present");
        let err = psych.as_ref().expect_err("psychologist consult failed");
        assert_eq!(err.role, Role::Psychologist);
        assert!(matches!(
            outcome.consults.outcome(Role::Cardiologist),
            Some(Ok(_))
        ));
        assert!(matches!(
            outcome.consults.outcome(Role::Pulmonologist),
            Some(Ok(_))
        ));

        let team_calls = llm.team_calls();
        let payload = &team_calls[0];
        assert!(payload.contains("cardio text C"));
        assert!(payload.contains("pulmo text Pu"));
        assert!(payload.contains(ResultSet::PLACEHOLDER));

        assert_eq!(
            outcome.final_diagnosis.expect("aggregation still runs"),
            "final diagnosis F"
        );
    }

    #[tokio::test]
    async fn all_failures_still_invoke_the_aggregator() {
        let llm = Arc::new(
            ScriptedLlm::default()
                .fail(CARDIO_MARK, "down")
                .fail(PSYCH_MARK, "down")
                .fail(PULMO_MARK, "down")
                .reply(TEAM_MARK, "degraded diagnosis"),
        );
        let orchestrator = Orchestrator::new(llm.clone());

        let outcome = orchestrator.analyze("report").await;

        for role in Role::SPECIALISTS {
            assert!(matches!(outcome.consults.outcome(role), Some(Err(_))));
            assert_eq!(outcome.consults.text_or_placeholder(role), ResultSet::PLACEHOLDER);
        }

        let team_calls = llm.team_calls();
        assert_eq!(team_calls.len(), 1);
        assert_eq!(
            team_calls[0].matches(ResultSet::PLACEHOLDER).count(),
            3,
            "one placeholder per failed specialist"
        );
        assert_eq!(
            outcome.final_diagnosis.expect("aggregator succeeded"),
            "degraded diagnosis"
        );
    }

    #[tokio::test]
    async fn completion_order_does_not_change_results() {
        let slow_cardio = Arc::new(
            ScriptedLlm::default()
                .reply_after(CARDIO_MARK, 40, "cardio text C")
                .reply_after(PSYCH_MARK, 20, "psych text Ps")
                .reply(PULMO_MARK, "pulmo text Pu")
                .reply(TEAM_MARK, "final diagnosis F"),
        );
        let slow_pulmo = Arc::new(
            ScriptedLlm::default()
                .reply(CARDIO_MARK, "cardio text C")
                .reply_after(PSYCH_MARK, 20, "psych text Ps")
                .reply_after(PULMO_MARK, 40, "pulmo text Pu")
                .reply(TEAM_MARK, "final diagnosis F"),
        );

        let first = Orchestrator::new(slow_cardio).analyze("report").await;
        let second = Orchestrator::new(slow_pulmo).analyze("report").await;

        for role in Role::SPECIALISTS {
            assert_eq!(
                first.consults.text_or_placeholder(role),
                second.consults.text_or_placeholder(role),
                "{role} outcome must not depend on completion order"
            );
        }
    }

    #[tokio::test]
    async fn aggregator_starts_only_after_the_join_barrier() {
        let llm = Arc::new(
            ScriptedLlm::default()
                .reply_after(CARDIO_MARK, 30, "cardio text C")
                .reply(PSYCH_MARK, "psych text Ps")
                .reply(PULMO_MARK, "pulmo text Pu")
                .reply(TEAM_MARK, "final diagnosis F"),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(llm).with_progress(tx);

        orchestrator.analyze("report").await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(events.first(), Some(&Progress::SpecialistsDispatched));
        assert_eq!(events.last(), Some(&Progress::Complete));

        let aggregator_at = events
            .iter()
            .position(|e| *e == Progress::AggregatorDispatched)
            .expect("aggregator stage emitted");
        let consults_before = events[..aggregator_at]
            .iter()
            .filter(|e| matches!(e, Progress::ConsultRecorded { .. }))
            .count();
        assert_eq!(
            consults_before, 3,
            "all specialists must be terminal before the aggregator starts"
        );
    }

    #[tokio::test]
    async fn fully_failing_backend_terminates_with_aggregation_error() {
        let llm = Arc::new(
            ScriptedLlm::default()
                .fail(CARDIO_MARK, "offline")
                .fail(PSYCH_MARK, "offline")
                .fail(PULMO_MARK, "offline")
                .fail(TEAM_MARK, "offline"),
        );
        let orchestrator = Orchestrator::new(llm);

        let outcome = timeout(Duration::from_secs(5), orchestrator.analyze("report"))
            .await
            .expect("run must terminate, not hang");

        assert_eq!(outcome.consults.len(), 3);
        for role in Role::SPECIALISTS {
            assert!(matches!(outcome.consults.outcome(role), Some(Err(_))));
        }
        let err = outcome
            .final_diagnosis
            .expect_err("aggregation fails with this backend");
        assert!(err.to_string().contains("aggregation failed"));
    }

    #[tokio::test]
    async fn end_to_end_canned_scenario() {
        let report = "Patient reports palpitations and anxiety, no respiratory symptoms.";
        let llm = Arc::new(all_success_client());
        let orchestrator = Orchestrator::new(llm.clone());

        let outcome = orchestrator.analyze(report).await;

        assert!(llm.calls().iter().any(|prompt| prompt.contains(report)));
        assert_eq!(
            outcome.consults.text_or_placeholder(Role::Cardiologist),
            "cardio text C"
        );
        assert_eq!(
            outcome.consults.text_or_placeholder(Role::Psychologist),
            "psych text Ps"
        );
        assert_eq!(
            outcome.consults.text_or_placeholder(Role::Pulmonologist),
            "pulmo text Pu"
        );
        assert_eq!(outcome.final_diagnosis.unwrap(), "final diagnosis F");
    }
}
