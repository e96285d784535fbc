use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `Week <n>` label, ordered by `n` rather than by text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekLabel {
    pub number: u32,
    pub label: String,
}

impl WeekLabel {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("Week ")?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let number = digits.parse().ok()?;
        Some(Self {
            number,
            label: trimmed.to_string(),
        })
    }
}

impl Ord for WeekLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for WeekLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for WeekLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WoundRecord {
    pub id: u64,
    pub week: WeekLabel,
    pub wound_type: String,
    pub product: String,
    pub total_wound_area: f64,
    pub wound_count: u64,
    pub avg_wound_area: f64,
    pub active: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated rows plus the header they were read with.
#[derive(Debug, Clone, Default)]
pub struct WoundTable {
    pub columns: Vec<String>,
    pub records: Vec<WoundRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyTrend {
    pub week: WeekLabel,
    pub mean_total_area: f64,
    /// Sample standard deviation; absent for single-row weeks.
    pub std_total_area: Option<f64>,
    pub wound_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPerformance {
    pub product: String,
    pub mean_total_area: f64,
    pub usage_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub variables: Vec<String>,
    /// `None` where a pair involves a column without spread.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.variables.iter().position(|v| v == a)?;
        let j = self.variables.iter().position(|v| v == b)?;
        self.values[i][j]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekValue {
    pub week: WeekLabel,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalDecomposition {
    pub period: usize,
    pub trend: Vec<WeekValue>,
    pub seasonal: Vec<WeekValue>,
    pub residual: Vec<WeekValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductEfficacy {
    pub product: String,
    pub healed_area: f64,
    pub duration_weeks: u32,
    pub healing_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseWeekTest {
    pub from_week: WeekLabel,
    pub to_week: WeekLabel,
    pub t_statistic: Option<f64>,
    pub p_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hypothesis {
    pub index: usize,
    pub statement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationRecord {
    pub status: String,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedHypothesis {
    pub hypothesis: Hypothesis,
    pub validation: ValidationRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WoundTypeSummary {
    pub wound_type: String,
    pub count: usize,
    pub mean_total_area: f64,
}
