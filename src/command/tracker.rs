//! Correlation tracker - the single in-flight request slot

use farmbot_shared::Outcome;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Contents of the in-flight slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slot {
    /// Correlation id of the attempt being waited on
    pub label: Option<String>,
    /// Latest outcome observed for that id
    pub outcome: Outcome,
}

/// Holds the correlation id of the in-flight attempt and its latest outcome.
///
/// Shared between the request executor and the reply router. The slot lives
/// in a watch channel so a waiter always sees the current value before it
/// parks, which rules out missed wakeups when a reply lands before the wait.
#[derive(Debug)]
pub struct CorrelationTracker {
    slot: watch::Sender<Slot>,
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTracker {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Slot::default());
        Self { slot }
    }

    /// Start tracking `label`, discarding whatever was tracked before
    pub fn begin(&self, label: &str) {
        self.slot.send_replace(Slot {
            label: Some(label.to_string()),
            outcome: Outcome::Pending,
        });
    }

    /// Record `outcome` if `label` is the one being tracked.
    ///
    /// Returns false for stale or foreign labels, which leave the slot untouched.
    pub fn resolve(&self, label: &str, outcome: Outcome) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.label.as_deref() == Some(label) {
                slot.outcome = outcome;
                true
            } else {
                false
            }
        })
    }

    /// Latest outcome for the tracked label
    pub fn peek(&self) -> Outcome {
        self.slot.borrow().outcome.clone()
    }

    /// Label currently tracked, if any
    pub fn pending_label(&self) -> Option<String> {
        self.slot.borrow().label.clone()
    }

    /// Stop tracking; later replies for the old label are discarded
    pub fn clear(&self) {
        self.slot.send_replace(Slot::default());
    }

    /// Wait until `label` leaves `Pending` or `bound` elapses.
    ///
    /// Returns `Outcome::Pending` on timeout, or if `label` stops being tracked
    /// while waiting.
    pub async fn wait(&self, label: &str, bound: Duration) -> Outcome {
        let mut rx = self.slot.subscribe();
        let waited = timeout(
            bound,
            rx.wait_for(|slot| {
                slot.label.as_deref() != Some(label) || !slot.outcome.is_pending()
            }),
        )
        .await;

        match waited {
            Ok(Ok(slot)) if slot.label.as_deref() == Some(label) => slot.outcome.clone(),
            _ => Outcome::Pending,
        }
    }
}
