use std::path::Path;
use std::time::Duration;

use uuid::Uuid;

use crate::analysis::{analyze, AnalysisResult};
use crate::error::PipelineError;
use crate::extract::{ArityPolicy, HypothesisExtractor, ValidationExtractor};
use crate::llm::{generate_text, TextGenerationService};
use crate::loader;
use crate::models::{Hypothesis, ValidatedHypothesis, WoundTable};
use crate::prompts;
use crate::report::{summarize_analysis, summarize_data};

pub const UPLOAD_FIRST: &str = "Please upload data first.";
pub const ANALYZE_FIRST: &str = "Please analyze trends first.";
pub const HYPOTHESIZE_FIRST: &str = "Please generate hypotheses first.";

/// State of one interactive session. Each slot gates the next stage.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub table: Option<WoundTable>,
    pub analysis: Option<AnalysisResult>,
    pub insights: Option<String>,
    pub hypotheses: Option<Vec<Hypothesis>>,
    pub validations: Option<Vec<ValidatedHypothesis>>,
    pub hypothesis_extractor: HypothesisExtractor,
    pub validation_extractor: ValidationExtractor,
    pub call_timeout: Duration,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            table: None,
            analysis: None,
            insights: None,
            hypotheses: None,
            validations: None,
            hypothesis_extractor: HypothesisExtractor::default(),
            validation_extractor: ValidationExtractor::default(),
            call_timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_hypothesis_count(mut self, count: usize) -> Self {
        self.hypothesis_extractor = HypothesisExtractor::new(ArityPolicy::exactly(count.max(1)));
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn upload(&mut self, path: &Path) -> Result<String, PipelineError> {
        let table = loader::load_table(path)?;
        Ok(self.accept_table(table))
    }

    /// Installs a validated table and returns its summary.
    pub fn accept_table(&mut self, table: WoundTable) -> String {
        let summary = summarize_data(&table);
        self.table = Some(table);
        self.analysis = None;
        self.clear_from_insights();
        summary
    }

    pub fn analyze(&mut self) -> Result<&AnalysisResult, PipelineError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition(UPLOAD_FIRST.to_string()))?;
        let result = analyze(table);
        self.clear_from_insights();
        Ok(self.analysis.insert(result))
    }

    pub async fn narrate(
        &mut self,
        service: &dyn TextGenerationService,
    ) -> Result<&str, PipelineError> {
        let (data_summary, analysis_summary) = self.summaries()?;
        let request = prompts::narrate_prompt(&data_summary, &analysis_summary);
        let text = generate_text(service, &request, self.call_timeout).await?;

        self.clear_from_insights();
        Ok(self.insights.insert(text).as_str())
    }

    pub async fn hypothesize(
        &mut self,
        service: &dyn TextGenerationService,
    ) -> Result<&[Hypothesis], PipelineError> {
        let (data_summary, analysis_summary) = self.summaries()?;
        let count = self.hypothesis_extractor.policy.min;
        let request = prompts::hypothesis_prompt(
            &data_summary,
            &analysis_summary,
            self.insights.as_deref(),
            count,
        );
        let text = generate_text(service, &request, self.call_timeout).await?;
        let hypotheses = self.hypothesis_extractor.extract(&text)?;

        tracing::info!(count = hypotheses.len(), "hypotheses ready");
        self.validations = None;
        Ok(self.hypotheses.insert(hypotheses).as_slice())
    }

    pub async fn validate(
        &mut self,
        service: &dyn TextGenerationService,
    ) -> Result<&[ValidatedHypothesis], PipelineError> {
        let hypotheses = self
            .hypotheses
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition(HYPOTHESIZE_FIRST.to_string()))?;
        let (data_summary, analysis_summary) = self.summaries()?;
        let request = prompts::validation_prompt(&data_summary, &analysis_summary, hypotheses);
        let text = generate_text(service, &request, self.call_timeout).await?;
        let records = self.validation_extractor.extract(&text)?;

        if records.len() < hypotheses.len() {
            return Err(PipelineError::parsing(
                "validation",
                format!(
                    "{} hypotheses were submitted but only {} validations came back",
                    hypotheses.len(),
                    records.len()
                ),
                &text,
            ));
        }

        let paired: Vec<ValidatedHypothesis> = hypotheses
            .iter()
            .cloned()
            .zip(records)
            .map(|(hypothesis, validation)| ValidatedHypothesis {
                hypothesis,
                validation,
            })
            .collect();

        tracing::info!(count = paired.len(), "validations ready");
        Ok(self.validations.insert(paired).as_slice())
    }

    /// Data and analysis summaries, once a usable analysis exists.
    fn summaries(&self) -> Result<(String, String), PipelineError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition(UPLOAD_FIRST.to_string()))?;
        let analysis = self
            .analysis
            .as_ref()
            .ok_or_else(|| PipelineError::Precondition(ANALYZE_FIRST.to_string()))?;
        if let Some(error) = analysis.error() {
            return Err(PipelineError::Precondition(format!(
                "The last analysis failed ({error}); upload valid data and analyze again."
            )));
        }
        Ok((summarize_data(table), summarize_analysis(analysis)))
    }

    fn clear_from_insights(&mut self) {
        self.insights = None;
        self.hypotheses = None;
        self.validations = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedService;
    use crate::loader::REQUIRED_COLUMNS;
    use crate::models::{WeekLabel, WoundRecord};
    use chrono::Utc;

    fn table() -> WoundTable {
        let records = (1..=6u64)
            .map(|id| {
                let week = u32::try_from(id % 3 + 1).unwrap();
                WoundRecord {
                    id,
                    week: WeekLabel {
                        number: week,
                        label: format!("Week {week}"),
                    },
                    wound_type: "Ulcer".to_string(),
                    product: if id % 2 == 0 { "Foam" } else { "Gel" }.to_string(),
                    total_wound_area: 4.0 + id as f64,
                    wound_count: id,
                    avg_wound_area: 1.0,
                    active: true,
                    created_by: "etl".to_string(),
                    updated_by: "etl".to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                }
            })
            .collect();
        WoundTable {
            columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    fn analyzed_session() -> Session {
        let mut session = Session::new();
        session.accept_table(table());
        assert!(session.analyze().is_ok());
        session
    }

    fn precondition(err: PipelineError) -> String {
        match err {
            PipelineError::Precondition(message) => message,
            other => panic!("expected precondition error, got {other:?}"),
        }
    }

    #[test]
    fn analyze_requires_upload() {
        let mut session = Session::new();
        assert_eq!(precondition(session.analyze().unwrap_err()), UPLOAD_FIRST);
    }

    #[tokio::test]
    async fn hypothesize_requires_analysis() {
        let mut session = Session::new();
        session.accept_table(table());
        let service = ScriptedService::plain(["Sales rose. Gel fell sharply."]);
        let err = session.hypothesize(&service).await.unwrap_err();
        assert_eq!(precondition(err), ANALYZE_FIRST);
        assert!(service.stages().is_empty());
    }

    #[tokio::test]
    async fn validate_requires_hypotheses() {
        let mut session = analyzed_session();
        let service = ScriptedService::plain(["Status: supported\nEvidence: ok"]);
        let err = session.validate(&service).await.unwrap_err();
        assert_eq!(precondition(err), HYPOTHESIZE_FIRST);
    }

    #[tokio::test]
    async fn failed_analysis_blocks_model_stages() {
        let mut session = Session::new();
        session.accept_table(WoundTable {
            columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records: Vec::new(),
        });
        assert!(session.analyze().unwrap().error().is_some());
        let service = ScriptedService::plain(["unused"]);
        let err = session.narrate(&service).await.unwrap_err();
        assert!(precondition(err).contains("no rows"));
    }

    #[tokio::test]
    async fn full_pipeline_pairs_validations_with_hypotheses() {
        let mut session = analyzed_session();
        let service = ScriptedService::plain([
            "Foam rows carry larger wound areas than Gel rows.",
            "Foam dressings are used on larger wounds. Gel demand rises in later weeks.",
            "- Status: supported\n- Evidence: clear trend\n\n- Status: inconclusive\n- Evidence: limited data",
        ]);

        session.narrate(&service).await.unwrap();
        let hypotheses = session.hypothesize(&service).await.unwrap().to_vec();
        let validated = session.validate(&service).await.unwrap();

        assert_eq!(validated.len(), hypotheses.len());
        for (pair, hypothesis) in validated.iter().zip(&hypotheses) {
            assert_eq!(&pair.hypothesis, hypothesis);
        }
        assert_eq!(validated[0].validation.status, "supported");
        assert_eq!(validated[1].validation.evidence, "limited data");
        assert_eq!(service.stages(), vec!["narrate", "hypothesize", "validate"]);

        let prompts = service.prompts();
        assert!(prompts[1].user.contains("Analyst notes: Foam rows carry larger"));
        assert!(prompts[2].user.contains("2. Gel demand rises in later weeks."));
    }

    #[tokio::test]
    async fn too_few_validations_is_a_parsing_error() {
        let mut session = analyzed_session();
        let reply = "Status: supported\nEvidence: one block only";
        let service = ScriptedService::plain([
            "Foam dressings are used on larger wounds. Gel demand rises in later weeks.",
            reply,
        ]);
        session.hypothesize(&service).await.unwrap();
        let err = session.validate(&service).await.unwrap_err();
        match err {
            PipelineError::OutputParsing { raw, reason, .. } => {
                assert_eq!(raw, reply);
                assert!(reason.contains("only 1 validations"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(session.validations.is_none());
        assert!(session.hypotheses.is_some());
    }

    #[tokio::test]
    async fn surplus_validations_are_dropped() {
        let mut session = analyzed_session().with_hypothesis_count(1);
        let service = ScriptedService::plain([
            "Foam dressings are used on larger wounds.",
            "Status: supported\nEvidence: a\n\nStatus: unsupported\nEvidence: b",
        ]);
        session.hypothesize(&service).await.unwrap();
        let validated = session.validate(&service).await.unwrap();
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].validation.evidence, "a");
    }

    #[tokio::test]
    async fn parse_failure_leaves_previous_hypotheses_in_place() {
        let mut session = analyzed_session();
        let service = ScriptedService::plain([
            "Foam dressings are used on larger wounds. Gel demand rises in later weeks.",
            "Only one.",
        ]);
        session.hypothesize(&service).await.unwrap();
        let err = session.hypothesize(&service).await.unwrap_err();
        assert!(matches!(err, PipelineError::OutputParsing { .. }));
        assert_eq!(session.hypotheses.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn new_upload_clears_downstream_state() {
        let mut session = analyzed_session();
        let service = ScriptedService::plain(["Insight text for the data."]);
        session.narrate(&service).await.unwrap();
        assert!(session.insights.is_some());

        session.accept_table(table());
        assert!(session.analysis.is_none());
        assert!(session.insights.is_none());
        assert!(session.hypotheses.is_none());
    }
}
