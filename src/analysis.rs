use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::AnalysisError;
use crate::loader::REQUIRED_COLUMNS;
use crate::models::{
    CorrelationMatrix, PairwiseWeekTest, ProductEfficacy, ProductPerformance,
    SeasonalDecomposition, WeekLabel, WeekValue, WeeklyTrend, WoundRecord, WoundTable,
};
use crate::stats;

pub const TOP_PRODUCTS: usize = 10;
pub const DECOMPOSITION_PERIOD: usize = 4;
/// Decomposition runs only when the distinct week count exceeds this.
pub const DECOMPOSITION_WEEK_THRESHOLD: usize = 12;
pub const VARIANCE_FLOOR: f64 = 1e-10;

const CORRELATION_COLUMNS: [&str; 3] = ["TOTAL_WOUND_AREA", "WOUND_COUNT", "AVG_WOUND_AREA"];

/// One independently computed part of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Facet<T> {
    Computed { value: T },
    Failed { error: String },
}

impl<T> Facet<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Facet::Computed { value } => Some(value),
            Facet::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Facet::Computed { .. } => None,
            Facet::Failed { error } => Some(error),
        }
    }
}

impl<T> From<Result<T, AnalysisError>> for Facet<T> {
    fn from(result: Result<T, AnalysisError>) -> Self {
        match result {
            Ok(value) => Facet::Computed { value },
            Err(err) => Facet::Failed {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisBundle {
    pub row_count: usize,
    pub week_count: usize,
    pub weekly: Facet<Vec<WeeklyTrend>>,
    pub products: Facet<Vec<ProductPerformance>>,
    pub correlation: Facet<CorrelationMatrix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<Facet<SeasonalDecomposition>>,
    pub efficacy: Facet<Vec<ProductEfficacy>>,
    pub week_tests: Facet<Vec<PairwiseWeekTest>>,
}

/// Outcome of `analyze`; callers check `error()` before touching anything else.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    Failed { error: String },
    Complete(Box<AnalysisBundle>),
}

impl AnalysisResult {
    pub fn error(&self) -> Option<&str> {
        match self {
            AnalysisResult::Failed { error } => Some(error),
            AnalysisResult::Complete(_) => None,
        }
    }

    pub fn bundle(&self) -> Option<&AnalysisBundle> {
        match self {
            AnalysisResult::Failed { .. } => None,
            AnalysisResult::Complete(bundle) => Some(bundle),
        }
    }
}

pub fn analyze(table: &WoundTable) -> AnalysisResult {
    if let Some(missing) = REQUIRED_COLUMNS
        .iter()
        .find(|c| !table.columns.iter().any(|h| h.as_str() == **c))
    {
        return AnalysisResult::Failed {
            error: format!("missing required column {missing}"),
        };
    }
    if table.records.is_empty() {
        return AnalysisResult::Failed {
            error: "the uploaded table has no rows".to_string(),
        };
    }

    let records = &table.records;
    let groups = group_by_week(records);

    let decomposition = if groups.len() > DECOMPOSITION_WEEK_THRESHOLD {
        Some(seasonal_decomposition(&groups).into())
    } else {
        None
    };

    let bundle = AnalysisBundle {
        row_count: records.len(),
        week_count: groups.len(),
        weekly: weekly_trends(&groups).into(),
        products: product_performance(records).into(),
        correlation: correlation_matrix(records).into(),
        decomposition,
        efficacy: treatment_efficacy(records).into(),
        week_tests: pairwise_week_tests(&groups).into(),
    };

    for (facet, error) in bundle.failures() {
        tracing::warn!(facet, %error, "analysis facet failed");
    }
    tracing::info!(
        rows = bundle.row_count,
        weeks = bundle.week_count,
        decomposed = bundle.decomposition.is_some(),
        "analysis complete"
    );

    AnalysisResult::Complete(Box::new(bundle))
}

impl AnalysisBundle {
    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        [
            ("weekly", self.weekly.error()),
            ("products", self.products.error()),
            ("correlation", self.correlation.error()),
            (
                "decomposition",
                self.decomposition.as_ref().and_then(Facet::error),
            ),
            ("efficacy", self.efficacy.error()),
            ("week_tests", self.week_tests.error()),
        ]
        .into_iter()
        .filter_map(|(name, error)| error.map(|error| (name, error)))
        .collect()
    }
}

fn group_by_week(records: &[WoundRecord]) -> BTreeMap<WeekLabel, Vec<&WoundRecord>> {
    let mut groups: BTreeMap<WeekLabel, Vec<&WoundRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.week.clone()).or_default().push(record);
    }
    groups
}

fn areas(rows: &[&WoundRecord]) -> Vec<f64> {
    rows.iter().map(|r| r.total_wound_area).collect()
}

pub fn weekly_trends(
    groups: &BTreeMap<WeekLabel, Vec<&WoundRecord>>,
) -> Result<Vec<WeeklyTrend>, AnalysisError> {
    if groups.is_empty() {
        return Err(AnalysisError::Empty);
    }
    let mut trends = Vec::with_capacity(groups.len());
    for (week, rows) in groups {
        let values = areas(rows);
        trends.push(WeeklyTrend {
            week: week.clone(),
            mean_total_area: stats::mean(&values).ok_or(AnalysisError::Empty)?,
            std_total_area: stats::sample_std(&values),
            wound_count: rows.iter().map(|r| r.wound_count).sum(),
        });
    }
    Ok(trends)
}

pub fn product_performance(
    records: &[WoundRecord],
) -> Result<Vec<ProductPerformance>, AnalysisError> {
    if records.is_empty() {
        return Err(AnalysisError::Empty);
    }
    // first-encounter order so the stable sort breaks ties by row order
    let mut order: Vec<&str> = Vec::new();
    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for record in records {
        let entry = totals.entry(record.product.as_str()).or_insert_with(|| {
            order.push(record.product.as_str());
            (0.0, 0)
        });
        entry.0 += record.total_wound_area;
        entry.1 += 1;
    }

    let mut ranked: Vec<ProductPerformance> = order
        .into_iter()
        .map(|product| {
            let (sum, count) = totals[product];
            ProductPerformance {
                product: product.to_string(),
                mean_total_area: sum / count as f64,
                usage_count: count,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.mean_total_area
            .partial_cmp(&a.mean_total_area)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(TOP_PRODUCTS);
    Ok(ranked)
}

fn numeric_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn correlation_matrix(records: &[WoundRecord]) -> Result<CorrelationMatrix, AnalysisError> {
    if records.len() < 2 {
        return Err(AnalysisError::TooFewObservations {
            needed: 2,
            got: records.len(),
        });
    }
    let columns: [Vec<f64>; 3] = [
        records.iter().map(|r| numeric_or_zero(r.total_wound_area)).collect(),
        records.iter().map(|r| r.wound_count as f64).collect(),
        records.iter().map(|r| numeric_or_zero(r.avg_wound_area)).collect(),
    ];

    // pairs touching a constant column stay empty; the rest are still reported
    let mut values = vec![vec![Some(1.0); 3]; 3];
    let mut computed = 0;
    for i in 0..3 {
        for j in (i + 1)..3 {
            let r = stats::pearson(&columns[i], &columns[j]).map(stats::round2);
            computed += usize::from(r.is_some());
            values[i][j] = r;
            values[j][i] = r;
        }
    }
    if computed == 0 {
        let constant = columns
            .iter()
            .position(|c| stats::sample_variance(c).map_or(true, |v| v <= VARIANCE_FLOOR))
            .unwrap_or(0);
        return Err(AnalysisError::ZeroVariance(CORRELATION_COLUMNS[constant]));
    }

    Ok(CorrelationMatrix {
        variables: CORRELATION_COLUMNS.iter().map(|c| c.to_string()).collect(),
        values,
    })
}

pub fn seasonal_decomposition(
    groups: &BTreeMap<WeekLabel, Vec<&WoundRecord>>,
) -> Result<SeasonalDecomposition, AnalysisError> {
    let weeks: Vec<&WeekLabel> = groups.keys().collect();
    let series: Vec<f64> = groups
        .values()
        .map(|rows| stats::mean(&areas(rows)).unwrap_or(0.0))
        .collect();

    let (trend, seasonal, residual) = stats::seasonal_decompose(&series, DECOMPOSITION_PERIOD)
        .ok_or(AnalysisError::TooFewObservations {
            needed: 2 * DECOMPOSITION_PERIOD,
            got: series.len(),
        })?;

    let pair = |values: Vec<Option<f64>>| -> Vec<WeekValue> {
        weeks
            .iter()
            .zip(values)
            .map(|(week, value)| WeekValue {
                week: (*week).clone(),
                value,
            })
            .collect()
    };

    Ok(SeasonalDecomposition {
        period: DECOMPOSITION_PERIOD,
        trend: pair(trend),
        seasonal: pair(seasonal.into_iter().map(Some).collect()),
        residual: pair(residual),
    })
}

pub fn treatment_efficacy(records: &[WoundRecord]) -> Result<Vec<ProductEfficacy>, AnalysisError> {
    if records.is_empty() {
        return Err(AnalysisError::Empty);
    }
    let mut order: Vec<&str> = Vec::new();
    let mut by_product: HashMap<&str, BTreeMap<&WeekLabel, Vec<f64>>> = HashMap::new();
    for record in records {
        by_product
            .entry(record.product.as_str())
            .or_insert_with(|| {
                order.push(record.product.as_str());
                BTreeMap::new()
            })
            .entry(&record.week)
            .or_default()
            .push(record.total_wound_area);
    }

    let mut efficacy = Vec::with_capacity(order.len());
    for product in order {
        let weeks = &by_product[product];
        let (Some((first_week, first)), Some((last_week, last))) =
            (weeks.first_key_value(), weeks.last_key_value())
        else {
            continue;
        };
        let healed_area = stats::mean(first).unwrap_or(0.0) - stats::mean(last).unwrap_or(0.0);
        let duration_weeks = last_week.number - first_week.number;
        efficacy.push(ProductEfficacy {
            product: product.to_string(),
            healed_area,
            duration_weeks,
            healing_rate: healed_area / f64::from(duration_weeks.max(1)),
        });
    }

    efficacy.sort_by(|a, b| {
        b.healing_rate
            .partial_cmp(&a.healing_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(efficacy)
}

pub fn pairwise_week_tests(
    groups: &BTreeMap<WeekLabel, Vec<&WoundRecord>>,
) -> Result<Vec<PairwiseWeekTest>, AnalysisError> {
    let ordered: Vec<(&WeekLabel, Vec<f64>)> =
        groups.iter().map(|(week, rows)| (week, areas(rows))).collect();

    Ok(ordered
        .windows(2)
        .map(|pair| {
            let (from_week, a) = (&pair[0].0, &pair[0].1);
            let (to_week, b) = (&pair[1].0, &pair[1].1);
            let skip = skip_reason(a, b);
            let result = if skip.is_none() {
                stats::welch_t_test(a, b)
            } else {
                None
            };
            PairwiseWeekTest {
                from_week: (*from_week).clone(),
                to_week: (*to_week).clone(),
                t_statistic: result.map(|r| r.t),
                p_value: result.map(|r| r.p_value),
                skipped: match (skip, result) {
                    (Some(reason), _) => Some(reason),
                    (None, None) => Some("test undefined for these samples".to_string()),
                    (None, Some(_)) => None,
                },
            }
        })
        .collect())
}

fn skip_reason(a: &[f64], b: &[f64]) -> Option<String> {
    if a.len() < 2 || b.len() < 2 {
        return Some("insufficient observations (need at least 2 per week)".to_string());
    }
    let low_variance = |values: &[f64]| {
        stats::sample_variance(values).map_or(true, |v| v < VARIANCE_FLOOR)
    };
    if low_variance(a) || low_variance(b) {
        return Some("near-zero variance".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: u64, week: u32, product: &str, total: f64, count: u64) -> WoundRecord {
        WoundRecord {
            id,
            week: WeekLabel {
                number: week,
                label: format!("Week {week}"),
            },
            wound_type: "Ulcer".to_string(),
            product: product.to_string(),
            total_wound_area: total,
            wound_count: count,
            avg_wound_area: total / count.max(1) as f64,
            active: true,
            created_by: "etl".to_string(),
            updated_by: "etl".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn table(records: Vec<WoundRecord>) -> WoundTable {
        WoundTable {
            columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
        }
    }

    fn sample_rows(weeks: u32) -> Vec<WoundRecord> {
        let mut rows = Vec::new();
        let mut id = 0;
        for week in 1..=weeks {
            for (offset, product) in ["Foam", "Gel", "Alginate"].iter().enumerate() {
                id += 1;
                let total = 10.0 + f64::from(week) * 0.5 + offset as f64 * 3.0 + (id % 3) as f64;
                rows.push(record(id, week, product, total, 2 + (id % 4)));
            }
        }
        rows
    }

    #[test]
    fn rejects_empty_table_with_tagged_error() {
        let result = analyze(&table(Vec::new()));
        assert!(result.error().unwrap().contains("no rows"));
        assert!(result.bundle().is_none());
    }

    #[test]
    fn rejects_missing_columns_with_tagged_error() {
        let mut t = table(sample_rows(2));
        t.columns.retain(|c| c != "NAME");
        assert_eq!(
            analyze(&t).error(),
            Some("missing required column NAME")
        );
    }

    #[test]
    fn weekly_trend_orders_weeks_numerically() {
        let rows = vec![
            record(1, 2, "Foam", 4.0, 1),
            record(2, 10, "Foam", 6.0, 1),
            record(3, 1, "Foam", 2.0, 1),
            record(4, 1, "Foam", 4.0, 3),
        ];
        let result = analyze(&table(rows));
        let weekly = result.bundle().unwrap().weekly.value().unwrap();
        let labels: Vec<&str> = weekly.iter().map(|w| w.week.label.as_str()).collect();
        assert_eq!(labels, vec!["Week 1", "Week 2", "Week 10"]);
        assert!((weekly[0].mean_total_area - 3.0).abs() < 1e-12);
        assert_eq!(weekly[0].wound_count, 4);
        assert!(weekly[0].std_total_area.is_some());
        assert!(weekly[1].std_total_area.is_none());
    }

    #[test]
    fn product_ranking_keeps_top_ten_descending() {
        let rows: Vec<WoundRecord> = (0..15)
            .map(|i| record(i, 1, &format!("P{i}"), f64::from(i as u32) * 2.0, 1))
            .collect();
        let ranked = product_performance(&rows).unwrap();
        assert_eq!(ranked.len(), TOP_PRODUCTS);
        let names: Vec<&str> = ranked.iter().map(|p| p.product.as_str()).collect();
        assert_eq!(
            names,
            vec!["P14", "P13", "P12", "P11", "P10", "P9", "P8", "P7", "P6", "P5"]
        );
    }

    #[test]
    fn product_ranking_ties_follow_row_order() {
        let rows = vec![
            record(1, 1, "Beta", 5.0, 1),
            record(2, 1, "Alpha", 5.0, 1),
            record(3, 1, "Gamma", 7.0, 1),
        ];
        let ranked = product_performance(&rows).unwrap();
        let names: Vec<&str> = ranked.iter().map(|p| p.product.as_str()).collect();
        assert_eq!(names, vec!["Gamma", "Beta", "Alpha"]);
    }

    #[test]
    fn correlation_is_symmetric_with_unit_diagonal() {
        let matrix = correlation_matrix(&sample_rows(5)).unwrap();
        for i in 0..3 {
            assert_eq!(matrix.values[i][i], Some(1.0));
            for j in 0..3 {
                assert_eq!(matrix.values[i][j], matrix.values[j][i]);
                let v = matrix.values[i][j].unwrap();
                assert_eq!(v, stats::round2(v));
            }
        }
        assert!(matrix.get("WOUND_COUNT", "TOTAL_WOUND_AREA").is_some());
    }

    #[test]
    fn constant_column_blanks_only_its_own_pairs() {
        let rows: Vec<WoundRecord> = (1..=5)
            .map(|i| record(u64::from(i), i, "Foam", f64::from(i) * 2.0, 1))
            .collect();
        let matrix = correlation_matrix(&rows).unwrap();
        assert_eq!(matrix.get("TOTAL_WOUND_AREA", "AVG_WOUND_AREA"), Some(1.0));
        assert_eq!(matrix.get("WOUND_COUNT", "TOTAL_WOUND_AREA"), None);
        assert_eq!(matrix.get("AVG_WOUND_AREA", "WOUND_COUNT"), None);
        assert_eq!(matrix.get("WOUND_COUNT", "WOUND_COUNT"), Some(1.0));
    }

    #[test]
    fn fully_degenerate_correlation_fails_only_that_facet() {
        let rows: Vec<WoundRecord> = (1..=4)
            .map(|i| record(u64::from(i), i, "Foam", 6.0, 2))
            .collect();
        let result = analyze(&table(rows));
        let bundle = result.bundle().unwrap();
        assert_eq!(
            bundle.correlation.error(),
            Some("column TOTAL_WOUND_AREA has zero variance")
        );
        assert!(bundle.weekly.value().is_some());
        assert!(bundle.products.value().is_some());
        assert!(bundle.efficacy.value().is_some());
        assert!(bundle.week_tests.value().is_some());
        assert_eq!(
            bundle.failures(),
            vec![("correlation", "column TOTAL_WOUND_AREA has zero variance")]
        );
    }

    #[test]
    fn decomposition_present_only_above_twelve_weeks() {
        let twelve = analyze(&table(sample_rows(12)));
        assert!(twelve.bundle().unwrap().decomposition.is_none());

        let thirteen = analyze(&table(sample_rows(13)));
        let decomposition = thirteen.bundle().unwrap().decomposition.as_ref().unwrap();
        let value = decomposition.value().unwrap();
        assert_eq!(value.period, 4);
        assert_eq!(value.trend.len(), 13);
        assert_eq!(value.seasonal.len(), 13);
        assert!(value.trend[0].value.is_none());
        assert!(value.trend[6].value.is_some());
    }

    #[test]
    fn efficacy_floors_duration_at_one() {
        let rows = vec![
            record(1, 1, "Foam", 10.0, 1),
            record(2, 5, "Foam", 2.0, 1),
            record(3, 3, "Gel", 6.0, 1),
        ];
        let efficacy = treatment_efficacy(&rows).unwrap();
        assert_eq!(efficacy[0].product, "Foam");
        assert!((efficacy[0].healed_area - 8.0).abs() < 1e-12);
        assert_eq!(efficacy[0].duration_weeks, 4);
        assert!((efficacy[0].healing_rate - 2.0).abs() < 1e-12);
        assert_eq!(efficacy[1].duration_weeks, 0);
        assert_eq!(efficacy[1].healing_rate, 0.0);
    }

    #[test]
    fn week_tests_skip_small_or_flat_samples() {
        let rows = vec![
            record(1, 1, "Foam", 3.0, 1),
            record(2, 1, "Gel", 3.0, 1),
            record(3, 2, "Foam", 1.0, 1),
            record(4, 2, "Gel", 5.0, 1),
            record(5, 3, "Foam", 2.0, 1),
            record(6, 3, "Gel", 9.0, 1),
            record(7, 4, "Foam", 4.0, 1),
        ];
        let tests = pairwise_week_tests(&group_by_week(&rows)).unwrap();
        assert_eq!(tests.len(), 3);

        assert!(tests[0].t_statistic.is_none() && tests[0].p_value.is_none());
        assert_eq!(tests[0].skipped.as_deref(), Some("near-zero variance"));

        assert!(tests[1].t_statistic.is_some() && tests[1].p_value.is_some());
        assert!(tests[1].skipped.is_none());
        assert_eq!(tests[1].from_week.label, "Week 2");
        assert_eq!(tests[1].to_week.label, "Week 3");

        assert!(tests[2].p_value.is_none());
        assert!(tests[2].skipped.as_deref().unwrap().contains("insufficient"));
    }
}
