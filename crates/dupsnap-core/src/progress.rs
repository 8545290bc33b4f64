use crate::engine::ScanStats;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

/// Pipeline states, in the order a successful scan visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Collecting,
    Hashing,
    Fingerprinting,
    Clustering,
    Scoring,
    Done,
}

impl ScanStage {
    /// Percent range this stage reports within.
    pub fn band(self) -> (f64, f64) {
        match self {
            ScanStage::Collecting => (0.0, 5.0),
            ScanStage::Hashing => (5.0, 20.0),
            ScanStage::Fingerprinting => (20.0, 55.0),
            ScanStage::Clustering => (55.0, 90.0),
            ScanStage::Scoring => (90.0, 100.0),
            ScanStage::Done => (100.0, 100.0),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScanStage::Collecting => "Collecting files",
            ScanStage::Hashing => "Hashing file contents",
            ScanStage::Fingerprinting => "Computing perceptual fingerprints",
            ScanStage::Clustering => "Grouping similar media",
            ScanStage::Scoring => "Scoring image quality",
            ScanStage::Done => "Done",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif; [`ChannelReporter`] forwards to
/// another thread. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_stage(&self, _stage: ScanStage, _description: &str) {}
    /// `percent` never decreases during one scan.
    fn on_progress(&self, _percent: f64, _message: &str) {}
    fn on_complete(&self, _stats: &ScanStats) {}
    /// Called once when the scan stops without a result.
    fn on_failed(&self, _error: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Stage {
        stage: ScanStage,
        description: String,
    },
    Progress {
        percent: f64,
        message: String,
    },
    Complete(ScanStats),
    Failed(String),
}

impl ProgressEvent {
    /// Replay this event on `reporter`.
    pub fn dispatch(&self, reporter: &dyn ProgressReporter) {
        match self {
            ProgressEvent::Stage { stage, description } => reporter.on_stage(*stage, description),
            ProgressEvent::Progress { percent, message } => reporter.on_progress(*percent, message),
            ProgressEvent::Complete(stats) => reporter.on_complete(stats),
            ProgressEvent::Failed(error) => reporter.on_failed(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Complete(_) | ProgressEvent::Failed(_))
    }
}

/// Sends every callback as a [`ProgressEvent`]. A dropped receiver is
/// ignored; the scan keeps running.
pub struct ChannelReporter {
    tx: Sender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_stage(&self, stage: ScanStage, description: &str) {
        self.send(ProgressEvent::Stage {
            stage,
            description: description.to_string(),
        });
    }

    fn on_progress(&self, percent: f64, message: &str) {
        self.send(ProgressEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    fn on_complete(&self, stats: &ScanStats) {
        self.send(ProgressEvent::Complete(stats.clone()));
    }

    fn on_failed(&self, error: &str) {
        self.send(ProgressEvent::Failed(error.to_string()));
    }
}

/// Maps per-item counts onto the stage bands and coalesces messages.
///
/// Stage changes always go through; progress messages go through at most
/// once per `interval`, plus the last item of a stage.
pub(crate) struct ProgressThrottle<'a> {
    reporter: &'a dyn ProgressReporter,
    interval: Duration,
    stage: ScanStage,
    percent: f64,
    last_emit: Option<Instant>,
}

impl<'a> ProgressThrottle<'a> {
    pub(crate) fn new(reporter: &'a dyn ProgressReporter, interval: Duration) -> Self {
        Self {
            reporter,
            interval,
            stage: ScanStage::Collecting,
            percent: 0.0,
            last_emit: None,
        }
    }

    pub(crate) fn stage(&mut self, stage: ScanStage) {
        self.stage = stage;
        self.percent = self.percent.max(stage.band().0);
        let description = stage.description();
        self.reporter.on_stage(stage, description);
        self.reporter.on_progress(self.percent, description);
        self.last_emit = Some(Instant::now());
    }

    /// `done` of `total` items finished in the current stage.
    pub(crate) fn advance<F>(&mut self, done: usize, total: usize, message: F)
    where
        F: FnOnce() -> String,
    {
        let (start, end) = self.stage.band();
        let fraction = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).min(1.0)
        };
        self.percent = self.percent.max(start + (end - start) * fraction);
        if done >= total || self.due() {
            self.emit(message());
        }
    }

    /// Message without a known total; the percentage stays put.
    pub(crate) fn note<F>(&mut self, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.due() {
            self.emit(message());
        }
    }

    fn due(&self) -> bool {
        self.last_emit
            .map_or(true, |last| last.elapsed() >= self.interval)
    }

    fn emit(&mut self, message: String) {
        self.reporter.on_progress(self.percent, &message);
        self.last_emit = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<ScanStage>>,
        percents: Mutex<Vec<f64>>,
    }

    impl ProgressReporter for Recorder {
        fn on_stage(&self, stage: ScanStage, _description: &str) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_progress(&self, percent: f64, _message: &str) {
            self.percents.lock().unwrap().push(percent);
        }
    }

    #[test]
    fn test_bands_are_contiguous() {
        let stages = [
            ScanStage::Collecting,
            ScanStage::Hashing,
            ScanStage::Fingerprinting,
            ScanStage::Clustering,
            ScanStage::Scoring,
            ScanStage::Done,
        ];
        assert_eq!(stages[0].band().0, 0.0);
        for pair in stages.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
    }

    #[test]
    fn test_throttle_coalesces_but_never_drops_stage_changes() {
        let recorder = Recorder::default();
        let mut throttle = ProgressThrottle::new(&recorder, Duration::from_secs(3600));
        throttle.stage(ScanStage::Hashing);
        for i in 1..=100 {
            throttle.advance(i, 100, || format!("file {}", i));
        }
        throttle.stage(ScanStage::Fingerprinting);

        assert_eq!(
            *recorder.stages.lock().unwrap(),
            vec![ScanStage::Hashing, ScanStage::Fingerprinting]
        );
        // stage start, final item, next stage start
        assert_eq!(*recorder.percents.lock().unwrap(), vec![5.0, 20.0, 20.0]);
    }

    #[test]
    fn test_percent_never_decreases() {
        let recorder = Recorder::default();
        let mut throttle = ProgressThrottle::new(&recorder, Duration::ZERO);
        throttle.stage(ScanStage::Clustering);
        throttle.advance(5, 10, String::new);
        throttle.advance(2, 10, String::new);
        let percents = recorder.percents.lock().unwrap();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_channel_reporter_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);
        reporter.on_stage(ScanStage::Hashing, "Hashing file contents");
        reporter.on_failed("boom");
        drop(reporter);

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ProgressEvent::Stage {
                stage: ScanStage::Hashing,
                ..
            }
        ));
        assert!(events[1].is_terminal());
    }
}
