use crate::error::{AppError, AppResult};
use crate::features::report::aggregator::{COLUMNS, Report, ReportRow};
use colored::Colorize;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, console::Style};
use std::io::{self, IsTerminal, Write};

const MAX_QUERY_WIDTH: usize = 60;

pub fn prompt_theme() -> ColorfulTheme {
    ColorfulTheme {
        prompt_style: Style::new().for_stderr().color256(252),
        defaults_style: Style::new().for_stderr().dim(),
        hint_style: Style::new().for_stderr().dim(),
        ..ColorfulTheme::default()
    }
}

pub fn confirm(prompt: &str) -> AppResult<bool> {
    if !is_interactive_terminal() {
        return Err(AppError::invalid_input(format!(
            "{prompt} Pass --force in non-interactive mode."
        )));
    }

    Confirm::with_theme(&prompt_theme())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|err| {
            clear_active_terminal_line();
            AppError::invalid_input(format!("Failed to read confirmation: {err}"))
        })
}

pub fn is_interactive_terminal() -> bool {
    io::stdin().is_terminal() && io::stderr().is_terminal()
}

/// Prints rows as an aligned table, followed by any skipped properties.
pub fn print_report(report: &Report) {
    if report.rows.is_empty() {
        println!("{}", "No query data for this date range.".bright_black());
    } else {
        for line in render_table(&report.rows) {
            println!("{line}");
        }
    }

    println!(
        "{}",
        format!(
            "{} rows from {} of {} properties.",
            report.rows.len(),
            report.properties.saturating_sub(report.skipped.len()),
            report.properties
        )
        .bright_black()
    );

    if report.is_partial() {
        eprintln!(
            "{}",
            "Partial report: some properties could not be queried.".yellow()
        );
    }
    for skipped in &report.skipped {
        eprintln!(
            "{} {} {}",
            "Skipped".yellow(),
            skipped.site,
            format!("({})", skipped.reason).bright_black()
        );
    }
}

fn render_table(rows: &[ReportRow]) -> Vec<String> {
    let cells: Vec<[String; 6]> = rows
        .iter()
        .map(|row| {
            [
                row.site.clone(),
                truncate(&row.query, MAX_QUERY_WIDTH),
                row.clicks.to_string(),
                row.impressions.to_string(),
                format!("{:.4}", row.ctr),
                format!("{:.2}", row.position),
            ]
        })
        .collect();

    let mut widths = COLUMNS.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header = format_line(&COLUMNS.map(|column| column.to_string()), &widths);
    let mut lines = vec![header.bold().to_string()];
    lines.extend(cells.iter().map(|row| format_line(row, &widths)));
    lines
}

// Text columns align left, numbers right.
fn format_line(cells: &[String; 6], widths: &[usize; 6]) -> String {
    cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(index, (cell, &width))| {
            if index < 2 {
                format!("{cell:<width$}")
            } else {
                format!("{cell:>width$}")
            }
        })
        .collect::<Vec<_>>()
        .join("  ")
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let kept: String = value.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn clear_active_terminal_line() {
    if !io::stderr().is_terminal() {
        return;
    }

    let mut stderr = io::stderr();
    let _ = stderr.write_all(b"\r\x1b[2K");
    let _ = stderr.flush();
}
