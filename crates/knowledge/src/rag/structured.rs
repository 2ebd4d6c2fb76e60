//! Tables and charts recovered from generated markdown.

use crate::types::{ChartData, ChartSeries, ChartType, TableData};
use std::ops::Range;

const DEFAULT_TABLE_TITLE: &str = "Data Table";

fn is_row(line: &str) -> bool {
    let line = line.trim();
    line.len() > 1 && line.starts_with('|') && line.ends_with('|')
}

fn is_separator(line: &str) -> bool {
    is_row(line)
        && line.contains('-')
        && line
            .trim()
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn cells(line: &str) -> Vec<String> {
    let line = line.trim();
    let inner = &line[1..line.len() - 1];
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Line ranges of every `header / separator / rows...` block.
fn table_blocks(lines: &[&str]) -> Vec<Range<usize>> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i + 1 < lines.len() {
        if is_row(lines[i]) && !is_separator(lines[i]) && is_separator(lines[i + 1]) {
            let start = i;
            let mut end = i + 2;
            while end < lines.len() && is_row(lines[end]) {
                end += 1;
            }
            blocks.push(start..end);
            i = end;
        } else {
            i += 1;
        }
    }
    blocks
}

/// Nearest heading (or `Label:` line) directly above a table.
fn title_above(lines: &[&str], start: usize) -> String {
    lines[..start]
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .filter(|l| l.starts_with('#') || l.ends_with(':'))
        .map(|l| {
            l.trim_start_matches('#')
                .trim_end_matches(':')
                .trim_matches('*')
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TABLE_TITLE.to_string())
}

/// Parse every well-formed markdown table in `text`.
///
/// Rows whose cell count differs from the header are dropped; a table with
/// no remaining rows is dropped.
pub fn extract_tables(text: &str, source_documents: &[String]) -> Vec<TableData> {
    let lines: Vec<&str> = text.lines().collect();
    table_blocks(&lines)
        .into_iter()
        .filter_map(|block| {
            let headers = cells(lines[block.start]);
            let rows: Vec<Vec<String>> = lines[block.start + 2..block.end]
                .iter()
                .map(|line| cells(line))
                .filter(|row| row.len() == headers.len())
                .collect();
            if headers.is_empty() || rows.is_empty() {
                return None;
            }
            Some(TableData {
                title: title_above(&lines, block.start),
                headers,
                rows,
                source_documents: source_documents.to_vec(),
            })
        })
        .collect()
}

/// `"$1,200.50"` -> 1200.5, `"12%"` -> 12.0.
fn parse_number(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%' | ' ' | '*'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Bar charts for tables whose first column labels numeric columns.
pub fn derive_charts(tables: &[TableData]) -> Vec<ChartData> {
    tables
        .iter()
        .filter_map(|table| {
            let series: Vec<ChartSeries> = (1..table.headers.len())
                .filter_map(|col| {
                    let values: Option<Vec<f64>> =
                        table.rows.iter().map(|row| parse_number(&row[col])).collect();
                    values.map(|values| ChartSeries {
                        name: table.headers[col].clone(),
                        values,
                    })
                })
                .collect();
            if series.is_empty() {
                return None;
            }
            Some(ChartData {
                title: table.title.clone(),
                chart_type: ChartType::Bar,
                labels: table.rows.iter().map(|row| row[0].clone()).collect(),
                series,
                source_documents: table.source_documents.clone(),
            })
        })
        .collect()
}

/// Remove markdown tables and collapse the blank lines they leave behind.
pub fn strip_tables(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let blocks = table_blocks(&lines);

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if blocks.iter().any(|b| b.contains(&i)) {
            continue;
        }
        let blank = line.trim().is_empty();
        if blank && kept.last().map_or(true, |prev| prev.trim().is_empty()) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n").trim().to_string()
}
