use crate::models::{PipelineOutcome, RunReport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

pub const SELECT_PROMPT: &str = "Select an image to classify";

// Callbacks run in order with the run-slot transitions; they must not submit
// to the controller that calls them.
pub trait ResultSink: Send + Sync + 'static {
    fn on_busy_changed(&self, _busy: bool) {}

    fn on_outcome(&self, report: RunReport);
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Busy(bool),
    Finished(RunReport),
}

pub struct ChannelSink {
    tx: Sender<PipelineEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn on_busy_changed(&self, busy: bool) {
        let _ = self.tx.send(PipelineEvent::Busy(busy));
    }

    fn on_outcome(&self, report: RunReport) {
        if self.tx.send(PipelineEvent::Finished(report)).is_err() {
            log::warn!("Outcome dropped: receiver is gone");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub message: String,
    pub busy: bool,
    pub last: Option<PipelineOutcome>,
}

impl Default for StatusView {
    fn default() -> Self {
        Self {
            message: SELECT_PROMPT.to_string(),
            busy: false,
            last: None,
        }
    }
}

#[derive(Default)]
pub struct StatusBoard {
    view: Mutex<StatusView>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusView {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for StatusBoard {
    fn on_busy_changed(&self, busy: bool) {
        self.view.lock().unwrap_or_else(PoisonError::into_inner).busy = busy;
    }

    fn on_outcome(&self, report: RunReport) {
        let mut view = self.view.lock().unwrap_or_else(PoisonError::into_inner);
        view.message = report.message();
        view.last = Some(report.outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassificationCandidate;
    use chrono::Utc;

    fn report(outcome: PipelineOutcome) -> RunReport {
        RunReport {
            run_id: "run-1".into(),
            outcome,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn board_starts_with_prompt() {
        let view = StatusBoard::new().snapshot();
        assert_eq!(view.message, SELECT_PROMPT);
        assert!(!view.busy);
        assert_eq!(view.last, None);
    }

    #[test]
    fn board_tracks_busy_and_message() {
        let board = StatusBoard::new();
        board.on_busy_changed(true);
        assert!(board.snapshot().busy);

        board.on_busy_changed(false);
        board.on_outcome(report(PipelineOutcome::Reported(ClassificationCandidate::new(
            "cat", 0.87,
        ))));
        let view = board.snapshot();
        assert!(!view.busy);
        assert_eq!(view.message, "cat, confidence: 0.87");
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (sink, rx) = ChannelSink::new();
        sink.on_busy_changed(true);
        sink.on_busy_changed(false);
        sink.on_outcome(report(PipelineOutcome::ReportedNone));

        assert!(matches!(rx.recv().unwrap(), PipelineEvent::Busy(true)));
        assert!(matches!(rx.recv().unwrap(), PipelineEvent::Busy(false)));
        match rx.recv().unwrap() {
            PipelineEvent::Finished(r) => assert_eq!(r.outcome, PipelineOutcome::ReportedNone),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_outcome(report(PipelineOutcome::ReportedNone));
    }
}
