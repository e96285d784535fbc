//! Recovery of hypothesis and validation records from free model text.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::PipelineError;
use crate::models::{Hypothesis, ValidationRecord};

const MIN_SENTENCE_CHARS: usize = 6;
const SKIP_MARKERS: [&str; 1] = ["Agent stopped"];

/// How many records an extractor must find, and how many it keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArityPolicy {
    pub min: usize,
    /// Records beyond this are dropped; `None` keeps everything.
    pub max: Option<usize>,
}

impl ArityPolicy {
    pub const fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub const fn at_least(n: usize) -> Self {
        Self { min: n, max: None }
    }

    fn apply<T>(
        &self,
        mut items: Vec<T>,
        stage: &'static str,
        raw: &str,
    ) -> Result<Vec<T>, PipelineError> {
        if items.is_empty() {
            let reason = if raw.trim().is_empty() {
                "response was empty"
            } else {
                "no records found"
            };
            return Err(PipelineError::parsing(stage, reason, raw));
        }
        if items.len() < self.min {
            return Err(PipelineError::parsing(
                stage,
                format!("expected at least {} records, found {}", self.min, items.len()),
                raw,
            ));
        }
        if let Some(max) = self.max {
            items.truncate(max);
        }
        Ok(items)
    }
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*```[A-Za-z0-9_+-]*[ \t]*$").expect("fence pattern is valid")
    })
}

fn blank_line() -> &'static Regex {
    static BLANK: OnceLock<Regex> = OnceLock::new();
    BLANK.get_or_init(|| Regex::new(r"\n[ \t]*\r?\n").expect("blank line pattern is valid"))
}

pub fn strip_code_fences(text: &str) -> String {
    code_fence().replace_all(text, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HypothesisExtractor {
    pub policy: ArityPolicy,
}

impl Default for HypothesisExtractor {
    fn default() -> Self {
        Self {
            policy: ArityPolicy::exactly(2),
        }
    }
}

impl HypothesisExtractor {
    pub fn new(policy: ArityPolicy) -> Self {
        Self { policy }
    }

    pub fn extract(&self, text: &str) -> Result<Vec<Hypothesis>, PipelineError> {
        let cleaned = strip_code_fences(text);
        let statements: Vec<String> = split_sentences(&cleaned)
            .into_iter()
            .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
            .filter(|s| !SKIP_MARKERS.iter().any(|m| s.starts_with(m)))
            .collect();

        let hypotheses = self.policy.apply(statements, "hypothesis", text)?;
        tracing::debug!(count = hypotheses.len(), "hypotheses extracted");
        Ok(hypotheses
            .into_iter()
            .enumerate()
            .map(|(i, statement)| Hypothesis {
                index: i + 1,
                statement,
            })
            .collect())
    }
}

/// Splits after `.` or `?` followed by whitespace, except when the period
/// closes a single-letter token such as `A.` or the `S.` of `U.S.`.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..chars.len() {
        let c = chars[i];
        if c != '.' && c != '?' {
            continue;
        }
        let followed_by_space = chars.get(i + 1).is_some_and(|n| n.is_whitespace());
        if !followed_by_space {
            continue;
        }
        if c == '.' && is_initial(&chars, i) {
            continue;
        }
        push_trimmed(&mut sentences, &chars[start..=i]);
        start = i + 1;
    }
    if start < chars.len() {
        push_trimmed(&mut sentences, &chars[start..]);
    }
    sentences
}

fn is_initial(chars: &[char], dot: usize) -> bool {
    let Some(letter) = dot.checked_sub(1).map(|j| chars[j]) else {
        return false;
    };
    if !letter.is_alphabetic() {
        return false;
    }
    match dot.checked_sub(2).map(|j| chars[j]) {
        None => true,
        Some(before) => before.is_whitespace() || before == '.',
    }
}

fn push_trimmed(out: &mut Vec<String>, chars: &[char]) {
    let sentence: String = chars.iter().collect();
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        out.push(sentence.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationExtractor {
    pub policy: ArityPolicy,
}

impl Default for ValidationExtractor {
    fn default() -> Self {
        Self {
            policy: ArityPolicy::at_least(1),
        }
    }
}

impl ValidationExtractor {
    pub fn extract(&self, text: &str) -> Result<Vec<ValidationRecord>, PipelineError> {
        let cleaned = strip_code_fences(text).replace("\r\n", "\n");
        let mut records = Vec::new();

        for (n, block) in blank_line()
            .split(cleaned.trim())
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .enumerate()
        {
            let lines: Vec<&str> = block
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            if lines.len() < 2 {
                return Err(PipelineError::parsing(
                    "validation",
                    format!("block {} needs a Status line and an Evidence line: {block:?}", n + 1),
                    text,
                ));
            }
            let status = labelled_value(lines[0], "Status:").ok_or_else(|| {
                PipelineError::parsing(
                    "validation",
                    format!("block {} line 1 must start with 'Status:': {block:?}", n + 1),
                    text,
                )
            })?;
            let evidence = labelled_value(lines[1], "Evidence:").ok_or_else(|| {
                PipelineError::parsing(
                    "validation",
                    format!("block {} line 2 must start with 'Evidence:': {block:?}", n + 1),
                    text,
                )
            })?;
            records.push(ValidationRecord { status, evidence });
        }

        let records = self.policy.apply(records, "validation", text)?;
        tracing::debug!(count = records.len(), "validation records extracted");
        Ok(records)
    }
}

fn labelled_value(line: &str, label: &str) -> Option<String> {
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line)
        .trim_start();
    if !line.starts_with(label) {
        return None;
    }
    line.split_once(':').map(|(_, value)| value.trim().to_string())
}
