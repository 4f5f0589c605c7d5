//! Table detection from text positions.
//!
//! Tables are found without looking at ruling lines: spans are grouped into
//! rows, each row is split into cells wherever the horizontal gap is wide,
//! and a run of consecutive rows whose cell starts line up is a table.
//! Bullet and numbered lists (a marker cell followed by one text cell) are
//! excluded so that ordinary lists do not read as two-column tables, and a
//! run whose cells average more than `max_avg_cell_chars` is a multi-column
//! prose layout, not a table.
//!
//! Detection is advisory: the page classifier treats an `Err` as "no tables".

use crate::pipeline::extract::TextSpan;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableDetectError {
    #[error("span {index} has non-finite coordinates")]
    InvalidGeometry { index: usize },
}

/// Table detector configuration.
#[derive(Debug, Clone)]
pub struct TableDetectorConfig {
    /// Minimum aligned rows to count as a table.
    pub min_rows: usize,
    /// Minimum cells per row.
    pub min_columns: usize,
    /// Maximum cells per row (above this, likely word-level splitting).
    pub max_columns: usize,
    /// Y tolerance for grouping spans into rows (fraction of span height).
    pub y_tolerance_factor: f32,
    /// Minimum horizontal gap between cells (points).
    pub min_column_gap: f32,
    /// How far two cell starts may drift and still be the same column (points).
    pub column_tolerance: f32,
    /// Runs whose cells average more characters than this are text columns.
    pub max_avg_cell_chars: usize,
}

impl Default for TableDetectorConfig {
    fn default() -> Self {
        Self {
            min_rows: 3,
            min_columns: 2,
            max_columns: 8,
            y_tolerance_factor: 0.5,
            min_column_gap: 15.0,
            column_tolerance: 5.0,
            max_avg_cell_chars: 40,
        }
    }
}

struct Row<'a> {
    y: f32,
    spans: Vec<&'a TextSpan>,
}

struct Cell {
    x0: f32,
    text: String,
}

/// Consecutive aligned rows.
#[derive(Default)]
struct Run {
    rows: usize,
    cells: usize,
    chars: usize,
}

impl Run {
    fn push(&mut self, cells: &[Cell]) {
        self.rows += 1;
        self.cells += cells.len();
        self.chars += cells.iter().map(|c| c.text.trim().chars().count()).sum::<usize>();
    }

    /// 1 if the finished run is a table, then reset.
    fn close(&mut self, config: &TableDetectorConfig) -> usize {
        let is_table = self.rows >= config.min_rows
            && self.chars <= self.cells * config.max_avg_cell_chars;
        *self = Run::default();
        usize::from(is_table)
    }
}

/// Count table regions in a page's spans.
pub fn detect_tables(
    spans: &[TextSpan],
    config: &TableDetectorConfig,
) -> Result<usize, TableDetectError> {
    if let Some(index) = spans
        .iter()
        .position(|s| ![s.x0, s.y0, s.x1, s.y1].iter().all(|v| v.is_finite()))
    {
        return Err(TableDetectError::InvalidGeometry { index });
    }

    let rows = group_into_rows(spans, config);
    let mut tables = 0;
    let mut run = Run::default();
    let mut prev_starts: Vec<f32> = Vec::new();

    for row in &rows {
        let cells = split_cells(row, config);
        let tabular = (config.min_columns..=config.max_columns).contains(&cells.len())
            && !is_list_row(&cells);

        if !tabular {
            tables += run.close(config);
            prev_starts.clear();
            continue;
        }

        let starts: Vec<f32> = cells.iter().map(|c| c.x0).collect();
        let aligned = starts
            .iter()
            .filter(|x| {
                prev_starts
                    .iter()
                    .any(|p| (*p - **x).abs() <= config.column_tolerance)
            })
            .count();

        if run.rows == 0 || aligned < config.min_columns {
            tables += run.close(config);
        }
        run.push(&cells);
        prev_starts = starts;
    }
    tables += run.close(config);

    Ok(tables)
}

fn group_into_rows<'a>(spans: &'a [TextSpan], config: &TableDetectorConfig) -> Vec<Row<'a>> {
    let mut sorted: Vec<&TextSpan> = spans.iter().filter(|s| !s.text.trim().is_empty()).collect();
    sorted.sort_by(|a, b| a.center_y().total_cmp(&b.center_y()));

    let mut rows: Vec<Row<'a>> = Vec::new();
    for span in sorted {
        let tolerance = span.height().abs().max(1.0) * config.y_tolerance_factor;
        match rows.last_mut() {
            Some(row) if (span.center_y() - row.y).abs() <= tolerance => row.spans.push(span),
            _ => rows.push(Row {
                y: span.center_y(),
                spans: vec![span],
            }),
        }
    }
    for row in &mut rows {
        row.spans.sort_by(|a, b| a.x0.total_cmp(&b.x0));
    }
    rows
}

fn split_cells(row: &Row<'_>, config: &TableDetectorConfig) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    let mut last_x1 = f32::NEG_INFINITY;

    for span in &row.spans {
        match cells.last_mut() {
            Some(cell) if span.x0 - last_x1 < config.min_column_gap => {
                cell.text.push_str(&span.text);
            }
            _ => cells.push(Cell {
                x0: span.x0,
                text: span.text.clone(),
            }),
        }
        last_x1 = last_x1.max(span.x1);
    }
    cells
}

fn is_list_row(cells: &[Cell]) -> bool {
    cells.len() == 2 && is_list_marker(cells[0].text.trim())
}

fn is_list_marker(text: &str) -> bool {
    const BULLETS: [&str; 8] = ["•", "◦", "▪", "▸", "►", "-", "*", "·"];
    if BULLETS.contains(&text) {
        return true;
    }
    let body = text
        .trim_start_matches(['(', '（'])
        .trim_end_matches(['.', ')', '）', '、', '．']);
    body.len() < text.len()
        && !body.is_empty()
        && body.chars().count() <= 3
        && body.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x: f32, y: f32) -> TextSpan {
        TextSpan {
            x0: x,
            y0: y,
            x1: x + text.len() as f32 * 5.0,
            y1: y + 10.0,
            text: text.to_string(),
        }
    }

    fn grid(rows: &[[&str; 3]]) -> Vec<TextSpan> {
        rows.iter()
            .enumerate()
            .flat_map(|(i, cols)| {
                let y = 100.0 + i as f32 * 14.0;
                vec![span(cols[0], 50.0, y), span(cols[1], 200.0, y), span(cols[2], 350.0, y)]
            })
            .collect()
    }

    #[test]
    fn aligned_grid_is_a_table() {
        let spans = grid(&[
            ["Name", "Qty", "Price"],
            ["Apple", "3", "1.20"],
            ["Pear", "5", "0.80"],
            ["Plum", "9", "2.10"],
        ]);
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 1);
    }

    #[test]
    fn prose_is_not_a_table() {
        let spans: Vec<TextSpan> = (0..6)
            .map(|i| span("A plain line of running text.", 50.0, 100.0 + i as f32 * 14.0))
            .collect();
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 0);
    }

    #[test]
    fn two_column_prose_is_not_a_table() {
        let spans: Vec<TextSpan> = (0..6)
            .flat_map(|i| {
                let y = 100.0 + i as f32 * 14.0;
                vec![
                    span("The model reads each page of the source and then", 50.0, y),
                    span("decides whether its text layer can be trusted for", 310.0, y),
                ]
            })
            .collect();
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 0);
    }

    #[test]
    fn short_two_column_rows_are_still_a_table() {
        let spans: Vec<TextSpan> = (0..4)
            .flat_map(|i| {
                let y = 100.0 + i as f32 * 14.0;
                vec![span(&format!("Item {i}"), 50.0, y), span("12.50", 310.0, y)]
            })
            .collect();
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 1);
    }

    #[test]
    fn too_few_rows_is_not_a_table() {
        let spans = grid(&[["a", "b", "c"], ["d", "e", "f"]]);
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 0);
    }

    #[test]
    fn numbered_list_is_not_a_table() {
        let spans: Vec<TextSpan> = (0..5)
            .flat_map(|i| {
                let y = 100.0 + i as f32 * 14.0;
                vec![span(&format!("{}.", i + 1), 50.0, y), span("List entry text", 80.0, y)]
            })
            .collect();
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 0);
    }

    #[test]
    fn misaligned_rows_break_the_run() {
        let mut spans = grid(&[["a", "b", "c"], ["d", "e", "f"]]);
        spans.push(span("g", 120.0, 130.0));
        spans.push(span("h", 270.0, 130.0));
        assert_eq!(detect_tables(&spans, &TableDetectorConfig::default()).unwrap(), 0);
    }

    #[test]
    fn non_finite_geometry_is_an_error() {
        let mut spans = grid(&[["a", "b", "c"]]);
        spans[1].y0 = f32::NAN;
        assert!(detect_tables(&spans, &TableDetectorConfig::default()).is_err());
    }
}
