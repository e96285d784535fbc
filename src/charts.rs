use serde::Serialize;

use crate::analysis::AnalysisBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPayload {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<ChartPoint>,
}

/// Weekly trend line and top-product bars, when those facets computed.
pub fn build_charts(bundle: &AnalysisBundle) -> (Option<ChartPayload>, Option<ChartPayload>) {
    let weekly = bundle.weekly.value().map(|trends| ChartPayload {
        kind: ChartKind::Line,
        title: "Weekly Total Wound Area Trend".to_string(),
        x_label: "WEEK".to_string(),
        y_label: "TOTAL_WOUND_AREA".to_string(),
        points: trends
            .iter()
            .map(|t| ChartPoint {
                label: t.week.label.clone(),
                value: t.mean_total_area,
            })
            .collect(),
    });

    let products = bundle.products.value().map(|ranked| ChartPayload {
        kind: ChartKind::Bar,
        title: "Top 10 Products by Total Wound Area".to_string(),
        x_label: "NAME".to_string(),
        y_label: "TOTAL_WOUND_AREA".to_string(),
        points: ranked
            .iter()
            .map(|p| ChartPoint {
                label: p.product.clone(),
                value: p.mean_total_area,
            })
            .collect(),
    });

    (weekly, products)
}
