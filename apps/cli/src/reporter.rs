//! Terminal progress bars for transfer events.

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use prism_ova_engine::{ProgressReporter, TerminalOutcome, TransferState};
use prism_ova_transfer::SpeedCalculator;

/// One bar per item; uploads also show throughput and ETA.
pub struct BarReporter {
    multi: MultiProgress,
    items: Mutex<HashMap<String, ItemBar>>,
}

struct ItemBar {
    bar: ProgressBar,
    total_bytes: u64,
    phase: String,
    last_bytes: u64,
    speed: SpeedCalculator,
}

impl BarReporter {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Announces an upload ahead of time so its bar can show speed.
    pub fn expect_item(&self, item_id: &str, total_bytes: u64) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let entry = self.entry(&mut items, item_id);
        entry.total_bytes = total_bytes;
    }

    /// Stops an item's bar with a final message.
    pub fn finish(&self, item_id: &str, message: impl Into<String>) {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = items.get(item_id) {
            item.bar.finish_with_message(message.into());
        }
    }

    fn entry<'m>(
        &self,
        items: &'m mut HashMap<String, ItemBar>,
        item_id: &str,
    ) -> &'m mut ItemBar {
        items.entry(item_id.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(100));
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar.set_prefix(item_id.to_string());
            ItemBar {
                bar,
                total_bytes: 0,
                phase: String::new(),
                last_bytes: 0,
                speed: SpeedCalculator::default(),
            }
        })
    }
}

impl Default for BarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, item_id: &str, phase: &str, percent: u8) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let item = self.entry(&mut items, item_id);

        if item.phase != phase {
            item.phase = phase.to_string();
            item.last_bytes = 0;
            item.speed.reset();
        }
        item.bar.set_position(u64::from(percent.min(100)));

        if phase != TransferState::Uploading.as_str() || item.total_bytes == 0 {
            item.bar.set_message(phase.to_string());
            return;
        }

        let bytes = item.total_bytes * u64::from(percent.min(100)) / 100;
        item.speed.add_sample(bytes.saturating_sub(item.last_bytes));
        item.last_bytes = bytes;

        let rate = item.speed.bytes_per_second() / 1_048_576.0;
        let eta = item
            .speed
            .eta(item.total_bytes - bytes)
            .map(|d| format!(" ETA {}s", d.as_secs()))
            .unwrap_or_default();
        item.bar
            .set_message(format!("{phase} {rate:.1} MiB/s{eta}"));
    }

    fn on_finished(&self, outcome: &TerminalOutcome) {
        let message = match &outcome.error {
            None => "done".to_string(),
            Some(e) => format!("failed: {e}"),
        };
        self.finish(&outcome.remote_name, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_ova_engine::TransferError;

    fn reporter() -> BarReporter {
        BarReporter::with_target(ProgressDrawTarget::hidden())
    }

    fn bar(r: &BarReporter, id: &str) -> (u64, String) {
        let items = r.items.lock().unwrap();
        let item = &items[id];
        (item.bar.position(), item.bar.message())
    }

    #[test]
    fn tracks_phase_and_percent() {
        let r = reporter();
        r.on_progress("vm1", "REGISTERING", 0);
        assert_eq!(bar(&r, "vm1"), (0, "REGISTERING".to_string()));

        r.on_progress("vm1", "VALIDATING", 42);
        assert_eq!(bar(&r, "vm1"), (42, "VALIDATING".to_string()));
    }

    #[test]
    fn byte_phases_show_throughput() {
        let r = reporter();
        r.expect_item("vm1", 200 * 1_048_576);
        r.on_progress("vm1", "UPLOADING", 50);
        let (pos, msg) = bar(&r, "vm1");
        assert_eq!(pos, 50);
        assert!(msg.starts_with("UPLOADING"), "{msg}");
        assert!(msg.contains("MiB/s"), "{msg}");
        assert_eq!(r.items.lock().unwrap()["vm1"].last_bytes, 100 * 1_048_576);
    }

    #[test]
    fn export_phases_show_phase_only() {
        let r = reporter();
        r.expect_item("vm1", 200 * 1_048_576);
        r.on_progress("vm1", prism_ova_engine::export::PHASE_DOWNLOADING, 30);
        assert_eq!(bar(&r, "vm1"), (30, "DOWNLOADING".to_string()));
        assert_eq!(r.items.lock().unwrap()["vm1"].last_bytes, 0);
    }

    #[test]
    fn finished_outcome_ends_bar() {
        let r = reporter();
        r.on_progress("vm1", "UPLOADING", 10);
        r.on_finished(&TerminalOutcome {
            remote_name: "vm1".into(),
            state: TransferState::Failed,
            remote_entity_id: None,
            dependent_entity_id: None,
            error: Some(TransferError::Cancelled),
        });
        let items = r.items.lock().unwrap();
        assert!(items["vm1"].bar.is_finished());
        assert_eq!(items["vm1"].bar.message(), "failed: cancelled");
    }
}
