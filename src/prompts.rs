use crate::models::Hypothesis;
use crate::report::truncate;

const INSIGHT_LIMIT: usize = 1_500;

const INSTRUCTIONS: &str = "Answer in plain text only. Be brief. \
Do not describe your reasoning, do not use tools, and follow the requested output format exactly.";

/// One chat request: fixed instructions plus a stage-specific body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub stage: &'static str,
    pub system: String,
    pub user: String,
}

fn request(stage: &'static str, role: &str, user: String) -> PromptRequest {
    PromptRequest {
        stage,
        system: format!("You are a {role}. {INSTRUCTIONS}"),
        user,
    }
}

pub fn narrate_prompt(data_summary: &str, analysis_summary: &str) -> PromptRequest {
    request(
        "narrate",
        "clinical data analyst specialising in wound care product sales",
        format!(
            "Dataset summary:\n{data_summary}\n\
             Statistical summary: {analysis_summary}\n\n\
             In at most five sentences, describe the weekly trends, the strongest and weakest \
             products, and any notable correlation or week-over-week shift."
        ),
    )
}

pub fn hypothesis_prompt(
    data_summary: &str,
    analysis_summary: &str,
    insights: Option<&str>,
    count: usize,
) -> PromptRequest {
    let insights = insights
        .map(|text| format!("Analyst notes: {}\n", truncate(text.trim(), INSIGHT_LIMIT)))
        .unwrap_or_default();
    request(
        "hypothesize",
        "medical researcher who derives testable hypotheses from sales data",
        format!(
            "Dataset summary:\n{data_summary}\n\
             Statistical summary: {analysis_summary}\n\
             {insights}\n\
             State exactly {count} distinct, testable hypotheses explaining these patterns. \
             Write each as one declarative sentence ending with a period. \
             No numbering, no headings, no other text."
        ),
    )
}

pub fn validation_prompt(
    data_summary: &str,
    analysis_summary: &str,
    hypotheses: &[Hypothesis],
) -> PromptRequest {
    let listed: Vec<String> = hypotheses
        .iter()
        .map(|h| format!("{}. {}", h.index, h.statement))
        .collect();
    request(
        "validate",
        "board-certified wound care specialist validating hypotheses against evidence",
        format!(
            "Dataset summary:\n{data_summary}\n\
             Statistical summary: {analysis_summary}\n\n\
             Hypotheses:\n{}\n\n\
             For each hypothesis, in the same order, write one block of exactly two lines:\n\
             Status: supported, unsupported or inconclusive\n\
             Evidence: one short sentence\n\
             Separate blocks with a blank line. Write {} blocks and nothing else.",
            listed.join("\n"),
            hypotheses.len()
        ),
    )
}
