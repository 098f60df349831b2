// AI
//! 📊 progress.rs — "Are we there yet?" — every loader, every time, forever.
//!
//! 🚀 One bar for the whole run: position = files finished, message = how many
//! lines went through and how fast. indicatif hides it on its own when stderr
//! isn't a terminal, so log files stay clean.
//!
//! 🍽️ And once it's all over, [`render_summary`] lays the results out on a comfy table.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

use crate::common::{FileResult, RunSummary};

/// 🔢 `1234567` → `"1,234,567"`. Line counts get big fast; separators keep them legible.
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.char_indices() {
        if i > 0 && i % 3 == lead {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// ⏱️ `MM:SS` for the usual run, `HH:MM:SS` once a backlog takes over an hour.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    match hours {
        0 => format!("{minutes:02}:{seconds:02}"),
        _ => format!("{hours:02}:{minutes:02}:{seconds:02}"),
    }
}

/// 📊 Run-level progress: files done, lines seen, lines per second.
pub(crate) struct RunProgress {
    progress_bar: ProgressBar,
    total_lines: u64,
    total_errors: u64,
    start_time: Instant,
}

impl std::fmt::Debug for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("RunProgress")
            .field("total_lines", &self.total_lines)
            .field("total_errors", &self.total_errors)
            .finish()
    }
}

impl RunProgress {
    pub(crate) fn new(total_files: u64) -> Self {
        let progress_bar = ProgressBar::new(total_files);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        Self {
            progress_bar,
            total_lines: 0,
            total_errors: 0,
            start_time: Instant::now(),
        }
    }

    /// 🔄 One more file off the pile.
    pub(crate) fn file_done(&mut self, file_result: &FileResult) {
        self.total_lines += file_result.lines_processed;
        self.total_errors += file_result.errors;
        self.progress_bar.inc(1);
        self.progress_bar.set_message(self.render());
    }

    /// 💀 One file off the pile, the hard way.
    pub(crate) fn file_failed(&mut self) {
        self.progress_bar.inc(1);
        self.progress_bar.set_message(self.render());
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish_with_message(self.render());
    }

    fn render(&self) -> String {
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        let lines_per_sec = if secs > 0.0 {
            (self.total_lines as f64 / secs) as u64
        } else {
            0
        };
        format!(
            "{} lines | {} errors | {} lines/s | {} elapsed",
            format_number(self.total_lines),
            format_number(self.total_errors),
            format_number(lines_per_sec),
            format_duration(elapsed),
        )
    }
}

/// 🧾 One row per loaded file, one per skipped file, and the totals at the bottom.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Lines", "Success", "Errors", "Failed shards"]);

    let right = |n: u64| Cell::new(format_number(n)).set_alignment(CellAlignment::Right);
    for file in &summary.files {
        table.add_row(vec![
            Cell::new(file.filename.display()),
            right(file.lines_processed),
            right(file.success),
            right(file.errors),
            Cell::new(file.failed_shards.join(", ")),
        ]);
    }
    for path in &summary.failed_files {
        // -- 💀 never finished, so there's nothing to count
        table.add_row(vec![
            Cell::new(path.display()),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new("stream error, skipped"),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL"),
        right(summary.processed),
        right(summary.success),
        right(summary.errors),
        Cell::new(format!("error rate {:.4}", summary.error_rate())),
    ]);
    table.to_string()
}
