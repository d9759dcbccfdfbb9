use super::outputs::{Anomaly, AnomalyReport, ExecutionOutput};
use crate::sql_generation::AnswerShape;

const MAX_COLUMNS: usize = 4;
const MIN_VALUES: usize = 5;
const SPIKE_FACTOR: f64 = 2.5;

/// Flag numeric columns whose maximum exceeds 2.5× their mean.
///
/// Only table results are scanned. At most four numeric columns are taken
/// from the first row, in column-name order (rows are sorted maps, so the
/// SELECT order is not kept).
pub fn scan(execution: Option<&ExecutionOutput>) -> AnomalyReport {
    let execution = match execution {
        Some(e) if e.result_type == AnswerShape::Table => e,
        _ => return AnomalyReport::default(),
    };
    let first = match execution.rows.first() {
        Some(row) => row,
        None => return AnomalyReport::default(),
    };

    let numeric_columns: Vec<&String> = first
        .iter()
        .filter(|(_, v)| v.is_number())
        .map(|(k, _)| k)
        .take(MAX_COLUMNS)
        .collect();

    let mut anomalies = Vec::new();
    for column in numeric_columns {
        let values: Vec<f64> = execution
            .rows
            .iter()
            .filter_map(|row| row.get(column).and_then(|v| v.as_f64()))
            .collect();
        if values.len() < MIN_VALUES {
            continue;
        }
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        if avg == 0.0 {
            continue;
        }
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max > avg * SPIKE_FACTOR {
            anomalies.push(Anomaly {
                column: column.clone(),
                kind: "spike".to_string(),
                max,
                avg: (avg * 10_000.0).round() / 10_000.0,
            });
        }
    }

    tracing::debug!(count = anomalies.len(), "anomaly scan finished");
    AnomalyReport {
        count: anomalies.len(),
        anomalies,
    }
}
