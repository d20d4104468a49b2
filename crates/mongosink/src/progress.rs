//! 📊 progress.rs — "Are we there yet?" — every run, every time, forever.
//!
//! Two outputs:
//! - a live progress bar while the input file is read (bytes, records, rate, ETA)
//! - a summary table after the pipeline closes, built from [`RunSummary`]
//!
//! ⚠️ Watching the progress bar will not make it go faster. We've tried. Science says no.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::RunSummary;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// 📏 Bytes, scaled to something a human can read at a glance.
fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b >= MIB => format!("{:.2} MiB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.2} KiB", b as f64 / KIB as f64),
        b => format!("{b} bytes"),
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls. Order pizza. Plural.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 📊 Live read progress for one input file.
///
/// Redraws are throttled to every `REDRAW_EVERY` records; `finish` always draws the final
/// numbers so the last frame is never stale.
pub(crate) struct ProgressMetrics {
    label: String,
    total_size: u64,
    bytes_read: u64,
    records_read: u64,
    since_redraw: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar doesn't derive Debug, and nobody wants its guts in a log line anyway
        f.debug_struct("ProgressMetrics")
            .field("label", &self.label)
            .field("total_size", &self.total_size)
            .field("bytes_read", &self.bytes_read)
            .field("records_read", &self.records_read)
            .finish()
    }
}

impl ProgressMetrics {
    const REDRAW_EVERY: u64 = 256;

    /// 🚀 `total_size` of 0 means "no idea", and the bar shows no percentage or ETA.
    /// `visible = false` keeps the bookkeeping but never touches the terminal.
    pub(crate) fn new(label: String, total_size: u64, visible: bool) -> Self {
        let progress_bar = ProgressBar::new(total_size);
        if visible {
            if let Ok(style) = ProgressStyle::with_template("{msg}\n| [{bar:40.cyan/blue}]") {
                progress_bar.set_style(style.progress_chars("=>-"));
            }
        } else {
            progress_bar.set_draw_target(ProgressDrawTarget::hidden());
        }

        Self {
            label,
            total_size,
            bytes_read: 0,
            records_read: 0,
            since_redraw: 0,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    pub(crate) fn records_read(&self) -> u64 {
        self.records_read
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// 🔄 One more line consumed. `is_record` is false for blank lines.
    pub(crate) fn update(&mut self, bytes: u64, is_record: bool) {
        self.bytes_read += bytes;
        if is_record {
            self.records_read += 1;
        }
        self.since_redraw += 1;
        if self.since_redraw >= Self::REDRAW_EVERY {
            self.since_redraw = 0;
            self.render();
        }
    }

    /// ✅ Final frame, then done.
    pub(crate) fn finish(&self) {
        self.render();
        self.progress_bar.finish();
    }

    fn render(&self) {
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        let records_per_sec = if secs > 0.0 { self.records_read as f64 / secs } else { 0.0 };
        let mib_per_sec = if secs > 0.0 { self.bytes_read as f64 / MIB as f64 / secs } else { 0.0 };

        let (percent, remaining) = if self.total_size > 0 {
            let fraction = self.bytes_read as f64 / self.total_size as f64;
            // 🔮 linear extrapolation: assumes the rest of the file looks like the start of it
            let remaining = if fraction > 0.0 && fraction < 1.0 {
                format_duration(Duration::from_secs_f64(secs / fraction - secs))
            } else {
                "--:--".to_string()
            };
            (format!("{:.2}%", fraction * 100.0), remaining)
        } else {
            ("?%".to_string(), "--:--".to_string())
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} records/s", format_number(records_per_sec as u64))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} records", format_number(self.records_read))).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{mib_per_sec:.2} MiB/s")).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} / {}", format_bytes(self.bytes_read), format_bytes(self.total_size)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed))).set_alignment(CellAlignment::Right),
            Cell::new(format!("{remaining} remaining ({percent})")).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar.set_position(self.bytes_read);
        self.progress_bar.set_message(format!("input: {}\n{table}", self.label));
    }
}

/// 🧾 The end-of-run report: what was read, what was written, what bounced.
pub fn render_summary(summary: &RunSummary) -> String {
    let stats = &summary.stats;
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["metric", "value"]);

    let rows: [(&str, String); 9] = [
        ("records read", format_number(summary.records_read)),
        ("records submitted", format_number(stats.submitted)),
        ("records written", format_number(stats.records_written)),
        ("single writes", format_number(stats.single_writes)),
        ("batch writes", format_number(stats.batch_writes)),
        ("upserts", format_number(stats.upserts)),
        ("duplicates", format_number(stats.duplicates)),
        ("indexes ensured", format_number(stats.indexes_ensured)),
        ("skipped", format_number(summary.skipped)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value).set_alignment(CellAlignment::Right)]);
    }
    table.add_row(vec![
        Cell::new("elapsed"),
        Cell::new(format_duration(summary.elapsed)).set_alignment(CellAlignment::Right),
    ]);
    if let Some(reason) = &summary.stop_reason {
        table.add_row(vec![Cell::new("stopped"), Cell::new(reason)]);
    }
    table.to_string()
}
