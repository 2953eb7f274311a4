//! Summary formatting: JSON, Table, and CSV output.

use crate::summary::{AccessSummary, DocumentStat};

/// Output format for access summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
}

/// Format a summary in the specified output format.
#[must_use]
pub fn format_summary(summary: &AccessSummary, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(summary),
        OutputFormat::Table => format_table(summary),
        OutputFormat::Csv => format_csv(summary),
    }
}

fn format_json(summary: &AccessSummary) -> String {
    serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
}

fn format_table(summary: &AccessSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Files: {}  Accesses: {}\n",
        summary.total_files, summary.total_accesses
    ));

    if summary.total_files == 0 {
        output.push_str("(no tracked documents)\n");
        return output;
    }

    output.push_str("\nMost accessed\n");
    output.push_str(&ranking_table(&summary.most_accessed));
    output.push_str("\nLeast accessed\n");
    output.push_str(&ranking_table(&summary.least_accessed));

    output.push_str("\nTrends\n");
    let rows: Vec<Vec<String>> = summary
        .trends
        .iter()
        .map(|t| vec![t.window.clone(), t.documents.to_string(), t.accesses.to_string()])
        .collect();
    output.push_str(&render_table(&["window", "documents", "accesses"], &rows));
    output
}

fn ranking_table(stats: &[DocumentStat]) -> String {
    let rows: Vec<Vec<String>> = stats
        .iter()
        .map(|s| vec![s.path.clone(), s.count.to_string(), last_activity(s)])
        .collect();
    render_table(&["path", "count", "last_activity"], &rows)
}

fn render_table(columns: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut output = String::new();

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    output.push_str(header.join(" | ").trim_end());
    output.push('\n');

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&sep.join("-+-"));
    output.push('\n');

    for row in rows {
        let vals: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:width$}", cell, width = widths[i]))
            .collect();
        output.push_str(vals.join(" | ").trim_end());
        output.push('\n');
    }

    output
}

/// One row per ranking entry and trend window, tagged by section.
fn format_csv(summary: &AccessSummary) -> String {
    let mut output = String::from("section,name,documents,accesses,last_activity\n");
    output.push_str(&format!(
        "total,,{},{},\n",
        summary.total_files, summary.total_accesses
    ));
    for (section, stats) in [
        ("most_accessed", &summary.most_accessed),
        ("least_accessed", &summary.least_accessed),
    ] {
        for s in stats {
            output.push_str(&format!(
                "{section},{},,{},{}\n",
                csv_field(&s.path),
                s.count,
                last_activity(s)
            ));
        }
    }
    for t in &summary.trends {
        output.push_str(&format!(
            "trend,{},{},{},\n",
            csv_field(&t.window),
            t.documents,
            t.accesses
        ));
    }
    output
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn last_activity(stat: &DocumentStat) -> String {
    stat.last_activity
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}
