use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use crate::analysis::{AnalysisBundle, AnalysisResult, Facet};
use crate::models::{WoundTable, WoundTypeSummary};
use crate::session::Session;
use crate::stats;

/// Hard cap on the analysis summary handed to the model.
pub const ANALYSIS_SUMMARY_LIMIT: usize = 250;
const SAMPLE_ROWS: usize = 5;
const SIGNIFICANCE: f64 = 0.05;

pub fn summarize_by_wound_type(table: &WoundTable) -> Vec<WoundTypeSummary> {
    let mut map: HashMap<&str, (usize, f64)> = HashMap::new();

    for record in &table.records {
        let entry = map.entry(record.wound_type.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.total_wound_area;
    }

    let mut summaries: Vec<WoundTypeSummary> = map
        .into_iter()
        .map(|(wound_type, (count, total_area))| WoundTypeSummary {
            wound_type: wound_type.to_string(),
            count,
            mean_total_area: if count == 0 {
                0.0
            } else {
                total_area / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.wound_type.cmp(&b.wound_type))
    });
    summaries
}

/// Compact key-value rendering of the uploaded table.
pub fn summarize_data(table: &WoundTable) -> String {
    let mut output = String::new();
    let records = &table.records;

    let _ = writeln!(output, "rows={}", records.len());
    if records.is_empty() {
        return output;
    }

    let weeks: BTreeSet<_> = records.iter().map(|r| &r.week).collect();
    let products: BTreeSet<&str> = records.iter().map(|r| r.product.as_str()).collect();
    if let (Some(first), Some(last)) = (weeks.first(), weeks.last()) {
        let _ = writeln!(output, "weeks={}..{} ({})", first, last, weeks.len());
    }
    let _ = writeln!(output, "products={}", products.len());

    let types: Vec<String> = summarize_by_wound_type(table)
        .iter()
        .map(|s| format!("{}:{}@{:.2}", s.wound_type, s.count, s.mean_total_area))
        .collect();
    let _ = writeln!(output, "wound_types={}", types.join(","));

    let areas: Vec<f64> = records.iter().map(|r| r.total_wound_area).collect();
    let min = areas.iter().copied().fold(f64::INFINITY, f64::min);
    let max = areas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let _ = writeln!(
        output,
        "total_wound_area=mean:{:.2},min:{:.2},max:{:.2}",
        stats::mean(&areas).unwrap_or(0.0),
        min,
        max
    );
    let _ = writeln!(
        output,
        "wound_count={}",
        records.iter().map(|r| r.wound_count).sum::<u64>()
    );
    let _ = writeln!(
        output,
        "active_rows={}",
        records.iter().filter(|r| r.active).count()
    );

    let editors: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| [r.created_by.as_str(), r.updated_by.as_str()])
        .collect();
    let first_created = records.iter().map(|r| r.created_at).min();
    let last_updated = records.iter().map(|r| r.updated_at).max();
    if let (Some(first), Some(last)) = (first_created, last_updated) {
        let _ = writeln!(
            output,
            "audit={}..{} by {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d"),
            editors.into_iter().collect::<Vec<_>>().join(",")
        );
    }

    for record in records.iter().take(SAMPLE_ROWS) {
        let _ = writeln!(
            output,
            "row={}|{}|{}|{:.2}|{}|{:.2}",
            record.week,
            record.wound_type,
            record.product,
            record.total_wound_area,
            record.wound_count,
            record.avg_wound_area
        );
    }

    output
}

/// Single-line key-value digest, never longer than `ANALYSIS_SUMMARY_LIMIT`.
pub fn summarize_analysis(result: &AnalysisResult) -> String {
    let full = match result {
        AnalysisResult::Failed { error } => format!("error={error}"),
        AnalysisResult::Complete(bundle) => analysis_pairs(bundle).join(";"),
    };
    truncate(&full, ANALYSIS_SUMMARY_LIMIT)
}

fn analysis_pairs(bundle: &AnalysisBundle) -> Vec<String> {
    let mut pairs = vec![
        format!("rows={}", bundle.row_count),
        format!("weeks={}", bundle.week_count),
    ];

    match &bundle.weekly {
        Facet::Computed { value } => {
            if let (Some(first), Some(last)) = (value.first(), value.last()) {
                pairs.push(format!(
                    "area={}:{:.2}->{}:{:.2}",
                    first.week, first.mean_total_area, last.week, last.mean_total_area
                ));
            }
        }
        Facet::Failed { .. } => pairs.push("area=error".to_string()),
    }

    match &bundle.products {
        Facet::Computed { value } => {
            let top: Vec<String> = value
                .iter()
                .take(3)
                .map(|p| format!("{}:{:.2}", p.product, p.mean_total_area))
                .collect();
            pairs.push(format!("top={}", top.join(",")));
        }
        Facet::Failed { .. } => pairs.push("top=error".to_string()),
    }

    match &bundle.correlation {
        Facet::Computed { value } => {
            if let Some(r) = value.get("TOTAL_WOUND_AREA", "WOUND_COUNT") {
                pairs.push(format!("r_area_count={r:.2}"));
            }
        }
        Facet::Failed { .. } => pairs.push("corr=error".to_string()),
    }

    match &bundle.efficacy {
        Facet::Computed { value } => {
            if let Some(best) = value.first() {
                pairs.push(format!("best_rate={}:{:.2}", best.product, best.healing_rate));
            }
        }
        Facet::Failed { .. } => pairs.push("efficacy=error".to_string()),
    }

    match &bundle.week_tests {
        Facet::Computed { value } => {
            let significant = value
                .iter()
                .filter(|t| t.p_value.is_some_and(|p| p < SIGNIFICANCE))
                .count();
            pairs.push(format!("sig_shifts={}/{}", significant, value.len()));
        }
        Facet::Failed { .. } => pairs.push("tests=error".to_string()),
    }

    pairs.push(format!(
        "seasonal={}",
        match &bundle.decomposition {
            None => "n/a",
            Some(Facet::Computed { .. }) => "yes",
            Some(Facet::Failed { .. }) => "error",
        }
    ));
    pairs
}

pub fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let kept: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub fn build_report(session: &Session) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Wound Care Insights Report");
    let _ = writeln!(output, "Session {}", session.id);

    let Some(table) = session.table.as_ref() else {
        let _ = writeln!(output);
        let _ = writeln!(output, "No data uploaded.");
        return output;
    };

    let _ = writeln!(output);
    let _ = writeln!(output, "## Dataset");
    let _ = writeln!(output, "- {} rows", table.records.len());
    for summary in summarize_by_wound_type(table) {
        let _ = writeln!(
            output,
            "- {}: {} rows (mean total area {:.2})",
            summary.wound_type, summary.count, summary.mean_total_area
        );
    }

    match session.analysis.as_ref() {
        None => {
            let _ = writeln!(output);
            let _ = writeln!(output, "Analysis not run.");
        }
        Some(AnalysisResult::Failed { error }) => {
            let _ = writeln!(output);
            let _ = writeln!(output, "Analysis failed: {error}");
        }
        Some(AnalysisResult::Complete(bundle)) => write_analysis(&mut output, bundle),
    }

    if let Some(insights) = session.insights.as_deref() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Analyst Notes");
        let _ = writeln!(output, "{}", insights.trim());
    }

    if let Some(hypotheses) = session.hypotheses.as_ref() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Hypotheses");
        for hypothesis in hypotheses {
            let validation = session
                .validations
                .as_ref()
                .and_then(|v| hypothesis.index.checked_sub(1).and_then(|i| v.get(i)));
            match validation {
                Some(v) => {
                    let _ = writeln!(
                        output,
                        "{}. {} **[{}]** {}",
                        hypothesis.index,
                        hypothesis.statement,
                        v.validation.status,
                        v.validation.evidence
                    );
                }
                None => {
                    let _ = writeln!(output, "{}. {}", hypothesis.index, hypothesis.statement);
                }
            }
        }
    }

    output
}

fn write_analysis(output: &mut String, bundle: &AnalysisBundle) {
    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekly Trends");
    match &bundle.weekly {
        Facet::Computed { value } => {
            for trend in value {
                let spread = trend
                    .std_total_area
                    .map_or_else(|| "n/a".to_string(), |s| format!("{s:.2}"));
                let _ = writeln!(
                    output,
                    "- {}: mean area {:.2} (sd {}), {} wounds",
                    trend.week, trend.mean_total_area, spread, trend.wound_count
                );
            }
        }
        Facet::Failed { error } => {
            let _ = writeln!(output, "Unavailable: {error}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Products");
    match &bundle.products {
        Facet::Computed { value } => {
            for product in value {
                let _ = writeln!(
                    output,
                    "- {}: mean area {:.2} across {} rows",
                    product.product, product.mean_total_area, product.usage_count
                );
            }
        }
        Facet::Failed { error } => {
            let _ = writeln!(output, "Unavailable: {error}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Correlation");
    match &bundle.correlation {
        Facet::Computed { value } => {
            let _ = writeln!(output, "| | {} |", value.variables.join(" | "));
            let _ = writeln!(output, "|---|{}", "---|".repeat(value.variables.len()));
            for (name, row) in value.variables.iter().zip(&value.values) {
                let cells: Vec<String> = row
                    .iter()
                    .map(|v| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}")))
                    .collect();
                let _ = writeln!(output, "| {} | {} |", name, cells.join(" | "));
            }
        }
        Facet::Failed { error } => {
            let _ = writeln!(output, "Unavailable: {error}");
        }
    }

    if let Some(decomposition) = &bundle.decomposition {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Seasonality");
        match decomposition {
            Facet::Computed { value } => {
                let _ = writeln!(output, "Additive model, period {}.", value.period);
                for point in value.seasonal.iter().take(value.period) {
                    let _ = writeln!(
                        output,
                        "- {}: seasonal effect {:.2}",
                        point.week,
                        point.value.unwrap_or(0.0)
                    );
                }
            }
            Facet::Failed { error } => {
                let _ = writeln!(output, "Unavailable: {error}");
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Treatment Efficacy");
    match &bundle.efficacy {
        Facet::Computed { value } => {
            for row in value {
                let _ = writeln!(
                    output,
                    "- {}: {:.2} area healed over {} weeks ({:.2}/week)",
                    row.product, row.healed_area, row.duration_weeks, row.healing_rate
                );
            }
        }
        Facet::Failed { error } => {
            let _ = writeln!(output, "Unavailable: {error}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Week-over-Week Tests");
    match &bundle.week_tests {
        Facet::Computed { value } => {
            for test in value {
                match (test.t_statistic, test.p_value) {
                    (Some(t), Some(p)) => {
                        let _ = writeln!(
                            output,
                            "- {} -> {}: t = {:.3}, p = {:.4}",
                            test.from_week, test.to_week, t, p
                        );
                    }
                    _ => {
                        let _ = writeln!(
                            output,
                            "- {} -> {}: skipped ({})",
                            test.from_week,
                            test.to_week,
                            test.skipped.as_deref().unwrap_or("not computed")
                        );
                    }
                }
            }
        }
        Facet::Failed { error } => {
            let _ = writeln!(output, "Unavailable: {error}");
        }
    }
}
