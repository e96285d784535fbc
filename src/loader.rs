use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::PipelineError;
use crate::models::{WeekLabel, WoundRecord, WoundTable};

pub const REQUIRED_COLUMNS: [&str; 12] = [
    "ID",
    "WEEK",
    "WOUND_TYPE",
    "NAME",
    "TOTAL_WOUND_AREA",
    "WOUND_COUNT",
    "AVG_WOUND_AREA",
    "ACTIVE_STATUS",
    "DW_CREATED_BY",
    "DW_UPDATED_BY",
    "DW_CREATION_TIMESTAMP",
    "DW_UPDATED_TIMESTAMP",
];

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f Z", "%Y-%m-%d %H:%M:%S Z"];

#[derive(serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct CsvRow {
    id: i64,
    week: String,
    wound_type: String,
    name: String,
    total_wound_area: f64,
    wound_count: i64,
    avg_wound_area: f64,
    active_status: i64,
    dw_created_by: String,
    dw_updated_by: String,
    dw_creation_timestamp: String,
    dw_updated_timestamp: String,
}

pub fn load_table(path: &Path) -> Result<WoundTable, PipelineError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|err| {
            PipelineError::InputValidation(format!("cannot read {}: {err}", path.display()))
        })?;
    read_table(reader)
}

pub fn read_table<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> Result<WoundTable, PipelineError> {
    let columns: Vec<String> = reader
        .headers()
        .map_err(|err| PipelineError::InputValidation(format!("unreadable header: {err}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    // row deserialization must see the same names the column check saw
    reader.set_headers(columns.iter().collect());

    for required in REQUIRED_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            return Err(PipelineError::InputValidation(format!(
                "missing required column {required}"
            )));
        }
    }

    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut group_avgs: HashMap<(String, u32), f64> = HashMap::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = result.map_err(|err| {
            PipelineError::InputValidation(format!("row {line}: cannot parse: {err}"))
        })?;
        let record = validate_row(row, line)?;

        if !seen_ids.insert(record.id) {
            return Err(PipelineError::InputValidation(format!(
                "row {line}: ID {} is not unique",
                record.id
            )));
        }

        let key = (record.product.clone(), record.week.number);
        match group_avgs.get(&key) {
            Some(expected) if *expected != record.avg_wound_area => {
                return Err(PipelineError::InputValidation(format!(
                    "row {line}: AVG_WOUND_AREA {} differs from {} for {} in {}",
                    record.avg_wound_area, expected, record.product, record.week
                )));
            }
            Some(_) => {}
            None => {
                group_avgs.insert(key, record.avg_wound_area);
            }
        }

        records.push(record);
    }

    tracing::info!(rows = records.len(), "wound table loaded");
    Ok(WoundTable { columns, records })
}

fn validate_row(row: CsvRow, line: usize) -> Result<WoundRecord, PipelineError> {
    let fail = |column: &str, rule: &str| {
        PipelineError::InputValidation(format!("row {line}: {column} {rule}"))
    };

    let id = u64::try_from(row.id).map_err(|_| fail("ID", "must be >= 0"))?;
    let week = WeekLabel::parse(&row.week)
        .ok_or_else(|| fail("WEEK", &format!("'{}' must match 'Week <n>'", row.week)))?;
    if !row.total_wound_area.is_finite() || row.total_wound_area < 0.0 {
        return Err(fail("TOTAL_WOUND_AREA", "must be a number >= 0"));
    }
    let wound_count =
        u64::try_from(row.wound_count).map_err(|_| fail("WOUND_COUNT", "must be >= 0"))?;
    if !row.avg_wound_area.is_finite() || row.avg_wound_area < 0.0 {
        return Err(fail("AVG_WOUND_AREA", "must be a number >= 0"));
    }
    let active = match row.active_status {
        0 => false,
        1 => true,
        _ => return Err(fail("ACTIVE_STATUS", "must be 0 or 1")),
    };
    let created_at = parse_timestamp(&row.dw_creation_timestamp)
        .ok_or_else(|| fail("DW_CREATION_TIMESTAMP", "is not a valid timestamp"))?;
    let updated_at = parse_timestamp(&row.dw_updated_timestamp)
        .ok_or_else(|| fail("DW_UPDATED_TIMESTAMP", "is not a valid timestamp"))?;

    Ok(WoundRecord {
        id,
        week,
        wound_type: row.wound_type,
        product: row.name,
        total_wound_area: row.total_wound_area,
        wound_count,
        avg_wound_area: row.avg_wound_area,
        active,
        created_by: row.dw_created_by,
        updated_by: row.dw_updated_by,
        created_at,
        updated_at,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "ID,WEEK,WOUND_TYPE,NAME,TOTAL_WOUND_AREA,WOUND_COUNT,AVG_WOUND_AREA,ACTIVE_STATUS,DW_CREATED_BY,DW_UPDATED_BY,DW_CREATION_TIMESTAMP,DW_UPDATED_TIMESTAMP";

    fn row(id: i64, week: &str, name: &str, total: f64, avg: f64) -> String {
        format!(
            "{id},{week},Ulcer,{name},{total},3,{avg},1,etl,etl,2024-01-02 10:00:00.000 Z,2024-01-03 11:30:00.250 Z"
        )
    }

    fn parse(body: &[String]) -> Result<WoundTable, PipelineError> {
        let text = format!("{HEADER}\n{}\n", body.join("\n"));
        read_table(csv::Reader::from_reader(text.as_bytes()))
    }

    fn message(result: Result<WoundTable, PipelineError>) -> String {
        match result {
            Err(PipelineError::InputValidation(msg)) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn loads_valid_rows() {
        let table = parse(&[
            row(1, "Week 1", "Foam", 10.0, 2.5),
            row(2, "Week 1", "Foam", 12.0, 2.5),
            row(3, "Week 10", "Gel", 4.0, 1.0),
        ])
        .unwrap();
        assert_eq!(table.records.len(), 3);
        assert_eq!(table.records[2].week.number, 10);
        assert!(table.records[0].active);
        assert_eq!(table.columns.len(), REQUIRED_COLUMNS.len());
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        writeln!(file, "{}", row(7, "Week 3", "Alginate", 8.0, 2.0)).unwrap();
        let table = load_table(file.path()).unwrap();
        assert_eq!(table.records[0].product, "Alginate");
    }

    #[test]
    fn padded_headers_match_row_fields() {
        let header = HEADER.replace(',', ", ");
        let text = format!("{header}\n{}\n", row(1, "Week 1", "Foam", 4.0, 2.0));
        let table = read_table(csv::Reader::from_reader(text.as_bytes())).unwrap();
        assert_eq!(table.records[0].week.label, "Week 1");
        assert_eq!(table.columns[1], "WEEK");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{header}").unwrap();
        writeln!(file, "{}", row(2, "Week 2", "Gel", 3.0, 1.0)).unwrap();
        assert_eq!(load_table(file.path()).unwrap().records[0].product, "Gel");
    }

    #[test]
    fn missing_file_is_a_validation_error() {
        let result = load_table(Path::new("/nonexistent/wounds.csv"));
        assert!(message(result).contains("cannot read"));
    }

    #[test]
    fn rejects_missing_column() {
        let text = "ID,WEEK\n1,Week 1\n";
        let result = read_table(csv::Reader::from_reader(text.as_bytes()));
        assert!(message(result).contains("missing required column WOUND_TYPE"));
    }

    #[test]
    fn rejects_bad_week_label() {
        let result = parse(&[row(1, "W1", "Foam", 1.0, 1.0)]);
        assert!(message(result).contains("WEEK 'W1'"));
    }

    #[test]
    fn rejects_negative_area() {
        let result = parse(&[row(1, "Week 1", "Foam", -1.0, 1.0)]);
        assert!(message(result).contains("TOTAL_WOUND_AREA"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let result = parse(&[
            row(1, "Week 1", "Foam", 1.0, 1.0),
            row(1, "Week 2", "Foam", 1.0, 1.0),
        ]);
        assert!(message(result).contains("row 3: ID 1 is not unique"));
    }

    #[test]
    fn rejects_inconsistent_group_average() {
        let result = parse(&[
            row(1, "Week 1", "Foam", 1.0, 1.0),
            row(2, "Week 1", "Foam", 2.0, 1.5),
        ]);
        assert!(message(result).contains("AVG_WOUND_AREA"));
    }

    #[test]
    fn rejects_bad_active_status() {
        let line = row(1, "Week 1", "Foam", 1.0, 1.0).replacen(",1,etl", ",2,etl", 1);
        let result = parse(&[line]);
        assert!(message(result).contains("ACTIVE_STATUS"));
    }

    #[test]
    fn accepts_timestamps_without_fraction() {
        let line = row(1, "Week 1", "Foam", 1.0, 1.0).replace(".000 Z", " Z");
        let table = parse(&[line]).unwrap();
        assert_eq!(
            table.records[0].created_at.to_rfc3339(),
            "2024-01-02T10:00:00+00:00"
        );
    }
}
