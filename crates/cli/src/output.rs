//! Output formatting for CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ostester_runner::{RunReport, StageRecord};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for StageRecord {
    fn headers() -> Vec<&'static str> {
        vec!["Stage", "Path", "Next", "Polls", "MSE", "SSIM", "Failed actions", "Time"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.matched_path.to_string(),
            self.next_stage.clone(),
            self.polls.to_string(),
            format!("{:.4}", self.mse),
            format!("{:.4}", self.ssim),
            self.failed_actions.to_string(),
            format!("{:.2}s", self.duration_ms as f64 / 1000.0),
        ]
    }
}

/// One unresolved `next_stage` reference found by `check`
#[derive(Debug, Serialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
}

impl TableDisplay for Transition {
    fn headers() -> Vec<&'static str> {
        vec!["From stage", "Unknown next stage"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.from.clone(), self.to.clone()]
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

/// Print a run report
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            print_list(&report.stages, format);
            println!(
                "Run {}: {} stage(s) in {:.2}s",
                report.run_id,
                report.stages.len(),
                report.duration_ms as f64 / 1000.0
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}
