//! End-of-run summary table

use console::style;
use prettytable::{format, Cell, Row, Table};
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::curation::{RunSummary, Stage};
use crate::utils::format_duration;

/// Counter rows shown in the summary, in pipeline order
fn counter_rows(summary: &RunSummary) -> Vec<(&'static str, usize)> {
    vec![
        ("Images found", summary.images_downloaded),
        ("Videos found", summary.videos_downloaded),
        ("Duplicates removed", summary.duplicates_removed),
        ("Frames extracted", summary.frames_extracted),
        ("Blurry frames discarded", summary.discarded_blurry),
        ("Filtered (no person)", summary.filtered_no_person),
        ("Filtered (person too small)", summary.filtered_too_small),
        ("Routed to final", summary.routed_final),
        ("Queued for 2x", summary.routed_2x),
        ("Queued for 4x", summary.routed_4x),
        ("Upscaled", summary.upscaled),
        ("Faces restored", summary.faces_enhanced),
        ("Copied without upscaling", summary.fallback_copies),
        ("Errors", summary.errors),
        ("Final dataset size", summary.final_count),
    ]
}

pub fn counters_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(Row::new(vec![Cell::new("Metric"), Cell::new("Count")]));
    for (label, count) in counter_rows(summary) {
        table.add_row(Row::new(vec![
            Cell::new(label),
            Cell::new(&count.to_string()),
        ]));
    }
    table
}

pub fn stages_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.add_row(Row::new(vec![Cell::new("Stage"), Cell::new("Status")]));
    for stage in Stage::iter() {
        let status = summary
            .stage_status(stage)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "not reached".to_string());
        table.add_row(Row::new(vec![
            Cell::new(stage.as_ref()),
            Cell::new(&status),
        ]));
    }
    table
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    let header = if summary.interrupted {
        style("Run interrupted, partial summary:").bold().yellow()
    } else if summary.failed_stages().is_empty() {
        style("Curation Summary:").bold().green()
    } else {
        style("Curation Summary (with failed stages):").bold().red()
    };
    println!("{}", header);
    println!();

    counters_table(summary).printstd();
    println!();
    stages_table(summary).printstd();
    println!();

    println!(
        "  Total time: {}",
        style(format_duration(Duration::from_secs_f64(
            summary.elapsed_secs.max(0.0)
        )))
        .bold()
    );
}
