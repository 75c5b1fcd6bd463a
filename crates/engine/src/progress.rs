//! Progress reporting contract between the engine and its UI.

use tokio::sync::mpsc;

use crate::types::{TerminalOutcome, TransferEvent};

/// Receives progress from the engine.
///
/// Called synchronously from the controlling task. Implementations must not
/// fail: rendering problems are theirs to swallow.
pub trait ProgressReporter: Send + Sync {
    /// `phase` is the item's current state name, `percent` is 0–100 within it.
    fn on_progress(&self, item_id: &str, phase: &str, percent: u8);

    /// Called once per item with its final outcome.
    fn on_finished(&self, _outcome: &TerminalOutcome) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(&str, &str, u8) + Send + Sync,
{
    fn on_progress(&self, item_id: &str, phase: &str, percent: u8) {
        self(item_id, phase, percent)
    }
}

/// Publishes every update as a [`TransferEvent`] on a channel.
impl ProgressReporter for mpsc::UnboundedSender<TransferEvent> {
    fn on_progress(&self, item_id: &str, phase: &str, percent: u8) {
        let _ = self.send(TransferEvent::Progress {
            item_id: item_id.to_string(),
            phase: phase.to_string(),
            percent,
        });
    }

    fn on_finished(&self, outcome: &TerminalOutcome) {
        let _ = self.send(TransferEvent::Finished(outcome.clone()));
    }
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_progress(&self, _item_id: &str, _phase: &str, _percent: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferState;

    #[test]
    fn channel_reporter_publishes_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_progress("vm1", "UPLOADING", 50);
        tx.on_finished(&TerminalOutcome {
            remote_name: "vm1".into(),
            state: TransferState::Completed,
            remote_entity_id: Some("ova-1".into()),
            dependent_entity_id: None,
            error: None,
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            TransferEvent::Progress {
                item_id: "vm1".into(),
                phase: "UPLOADING".into(),
                percent: 50
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), TransferEvent::Finished(o) if o.is_success()));
    }

    #[test]
    fn closed_channel_is_swallowed() {
        let (tx, rx) = mpsc::unbounded_channel::<TransferEvent>();
        drop(rx);
        tx.on_progress("vm1", "UPLOADING", 10);
    }

    #[test]
    fn closures_are_reporters() {
        let seen = std::sync::Mutex::new(Vec::new());
        let reporter = |id: &str, phase: &str, pct: u8| {
            seen.lock().unwrap().push(format!("{id}:{phase}:{pct}"));
        };
        reporter.on_progress("a", "VALIDATING", 7);
        assert_eq!(seen.lock().unwrap()[0], "a:VALIDATING:7");
    }
}
