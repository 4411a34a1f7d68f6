//! Output formatting utilities

use colored::Colorize;
use scale_lib::StatusSnapshot;
use tabled::{settings::Style, Table, Tabled};

/// Row for the final VMI status table
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "VMIs")]
    count: usize,
}

/// Print the final status snapshot as a table
pub fn print_status_table(snapshot: &StatusSnapshot) {
    let rows: Vec<StatusRow> = snapshot
        .entries()
        .map(|(phase, count)| StatusRow {
            phase: color_phase(phase),
            count,
        })
        .collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Color a VMI phase based on health
fn color_phase(phase: &str) -> String {
    match phase {
        "Running" => phase.green().to_string(),
        "Scheduling" | "Pending" => phase.yellow().to_string(),
        "Unknown" | "CrashLoopBackOff" => phase.red().to_string(),
        _ => phase.to_string(),
    }
}
