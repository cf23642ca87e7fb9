//! Progress of the two loops a run is made of.
//!
//! [`crate::PipelineContext`] carries one [`ProgressCallback`] that counts
//! the years of a stage and one that counts the regions summed within the
//! current year. The CLI draws both as `indicatif` bars; everything else
//! gets [`NullProgress`].

use std::sync::Arc;

/// Receives progress of a year loop or a region loop.
///
/// Years run on blocking threads, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Number of years or regions the loop will visit.
    fn set_total(&self, total: u64);

    /// Items done so far.
    fn set_position(&self, pos: u64);

    /// Counts `delta` more items as done.
    fn inc(&self, delta: u64);

    /// Label of the item in flight, such as `volume 2020`.
    fn set_message(&self, msg: String);

    /// Ends the loop and leaves `msg` on screen.
    fn finish(&self, msg: String);

    /// Ends the loop and removes the indicator.
    fn finish_and_clear(&self);

    /// Starts a new loop of `total` items labelled `label`, at position 0.
    fn restart(&self, total: u64, label: String) {
        self.set_message(label);
        self.set_total(total);
        self.set_position(0);
    }
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Shared [`NullProgress`], the default for both loops.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Records every call as a line of text.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingProgress {
    events: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingProgress {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
impl ProgressCallback for RecordingProgress {
    fn set_total(&self, total: u64) {
        self.push(format!("total {total}"));
    }
    fn set_position(&self, pos: u64) {
        self.push(format!("position {pos}"));
    }
    fn inc(&self, delta: u64) {
        self.push(format!("inc {delta}"));
    }
    fn set_message(&self, msg: String) {
        self.push(format!("message {msg}"));
    }
    fn finish(&self, msg: String) {
        self.push(format!("finish {msg}"));
    }
    fn finish_and_clear(&self) {
        self.push("clear".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_labels_then_resets_the_count() {
        let progress = RecordingProgress::default();
        progress.set_position(7);
        progress.restart(3, "footprint 2020".to_string());

        assert_eq!(
            progress.events(),
            vec![
                "position 7",
                "message footprint 2020",
                "total 3",
                "position 0",
            ]
        );
    }
}
