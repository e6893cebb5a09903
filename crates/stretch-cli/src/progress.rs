//! 📊 progress.rs: "Are we there yet?" for an NDJSON load.
//!
//! A progress bar sized to the input file, a little table of rates riding on it,
//! and a summary table at the end so you can screenshot it for standup.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};
use stretch::bulk::BulkStats;

// -- 📏 one mebibyte. not a megabyte. there is a difference and I will die on this hill.
const MIB: f64 = 1024.0 * 1024.0;

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut result = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS when it's time to order pizza.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Tracks bytes and docs read from the input and paints the bar.
///
/// Rates come from a sliding 5-second window so a slow flush does not make the
/// numbers look like a seismograph.
pub(crate) struct LoadProgress {
    source_name: String,
    total_size: u64,
    total_bytes: u64,
    total_docs: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for LoadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("LoadProgress")
            .field("source_name", &self.source_name)
            .field("total_size", &self.total_size)
            .field("total_bytes", &self.total_bytes)
            .field("total_docs", &self.total_docs)
            .finish()
    }
}

impl LoadProgress {
    pub(crate) fn new(source_name: String, total_size: u64) -> anyhow::Result<Self> {
        let progress_bar = ProgressBar::new(total_size);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")?
                .progress_chars("=>-"),
        );

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));

        Ok(Self {
            source_name,
            total_size,
            total_bytes: 0,
            total_docs: 0,
            progress_bar,
            rate_samples,
            start_time,
        })
    }

    pub(crate) fn update(&mut self, bytes_read: u64, docs_read: u64) {
        self.total_bytes += bytes_read;
        self.total_docs += docs_read;

        // -- 🐢 repainting on every line would cost more than the load itself
        if self.total_docs % 500 == 0 || self.total_bytes >= self.total_size {
            let (docs_per_sec, mib_per_sec) = self.calculate_rates();
            self.render(docs_per_sec, mib_per_sec);
        }
        self.progress_bar.set_position(self.total_bytes);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self) -> (f64, f64) {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.total_bytes, self.total_docs));

        if let Some(&(oldest_time, oldest_bytes, oldest_docs)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes) as f64;
                let docs_delta = self.total_docs.saturating_sub(oldest_docs) as f64;
                return (docs_delta / elapsed, bytes_delta / elapsed / MIB);
            }
        }
        (0.0, 0.0)
    }

    fn render(&self, docs_per_sec: f64, mib_per_sec: f64) {
        let percent = if self.total_size > 0 {
            (self.total_bytes as f64 / self.total_size as f64) * 100.0
        } else {
            0.0
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Docs", format_number(self.total_docs)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", percent)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(""),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}

/// 🧾 The end-of-load receipt.
pub(crate) fn summary_table(stats: &BulkStats, elapsed: Duration) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["metric", "value"]);
    let rows = [
        ("docs submitted", stats.docs_submitted),
        ("docs sent", stats.docs_sent),
        ("batches sent", stats.batches_sent),
        ("threshold flushes", stats.threshold_flushes),
        ("timer flushes", stats.timer_flushes),
        ("manual flushes", stats.manual_flushes),
        ("failed batches", stats.send_errors),
        ("docs in failed batches", stats.docs_failed),
        ("rejected items", stats.rejected_items),
        ("docs abandoned at shutdown", stats.docs_abandoned),
    ];
    for (name, value) in rows {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(format_number(value)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![Cell::new("elapsed"), Cell::new(format_duration(elapsed))]);
    table
}
