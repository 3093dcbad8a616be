use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::error::Result;

/// `tracing` target for structured training events.
pub const ANALYTICS_TARGET: &str = "analytics";

/// Column keys of the statistics CSV. Each event sets a subset of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatParameter {
    /// Seconds since the collector was started.
    Time,

    /// Environment steps taken by the run so far.
    GlobalStep,

    /// "episode", "update" or "evaluation".
    Kind,

    // Episode
    EpisodeReward,
    EpisodeLength,

    // Update
    PolicyLoss,
    ValueLoss,
    Entropy,
    ApproxKl,
    ClipFraction,

    /// Mini-batches dropped because of non-finite loss or gradients.
    SkippedBatches,
}

impl StatParameter {
    /// Column order of the CSV.
    pub const ALL: [StatParameter; 11] = [
        StatParameter::Time,
        StatParameter::GlobalStep,
        StatParameter::Kind,
        StatParameter::EpisodeReward,
        StatParameter::EpisodeLength,
        StatParameter::PolicyLoss,
        StatParameter::ValueLoss,
        StatParameter::Entropy,
        StatParameter::ApproxKl,
        StatParameter::ClipFraction,
        StatParameter::SkippedBatches,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatParameter::Time => "Time",
            StatParameter::GlobalStep => "GlobalStep",
            StatParameter::Kind => "Kind",
            StatParameter::EpisodeReward => "EpisodeReward",
            StatParameter::EpisodeLength => "EpisodeLength",
            StatParameter::PolicyLoss => "PolicyLoss",
            StatParameter::ValueLoss => "ValueLoss",
            StatParameter::Entropy => "Entropy",
            StatParameter::ApproxKl => "ApproxKl",
            StatParameter::ClipFraction => "ClipFraction",
            StatParameter::SkippedBatches => "SkippedBatches",
        }
    }

    pub fn headers() -> Vec<&'static str> {
        Self::ALL.iter().map(StatParameter::name).collect()
    }
}

/// Values are kept in their native type and only formatted by the writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl StatValue {
    fn format(&self) -> String {
        match self {
            StatValue::Integer(i) => i.to_string(),
            StatValue::Float(f) => f.to_string(),
            StatValue::Text(t) => t.clone(),
        }
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        StatValue::Integer(v)
    }
}

impl From<usize> for StatValue {
    fn from(v: usize) -> Self {
        StatValue::Integer(v as i64)
    }
}

impl From<f32> for StatValue {
    fn from(v: f32) -> Self {
        StatValue::Float(v as f64)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        StatValue::Float(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        StatValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticEvent {
    data: HashMap<StatParameter, StatValue>,
}

impl StatisticEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<V: Into<StatValue>>(&mut self, param: StatParameter, value: V) -> &mut Self {
        self.data.insert(param, value.into());
        self
    }

    pub fn get(&self, param: StatParameter) -> Option<&StatValue> {
        self.data.get(&param)
    }

    fn to_row(&self) -> Vec<String> {
        StatParameter::ALL.iter().map(|p| self.data.get(p).map(StatValue::format).unwrap_or_else(|| "NA".to_string())).collect()
    }
}

enum StatsMessage {
    Log(StatisticEvent),
    Flush,
    Shutdown,
}

/// Handle to a background CSV writer.
///
/// Owned by whoever drives the run; dropping it flushes the file and joins the
/// writer thread.
pub struct StatsCollector {
    sender: mpsc::Sender<StatsMessage>,
    worker: Option<JoinHandle<()>>,
    started: Instant,
}

impl StatsCollector {
    /// Starts the writer. With `None` rows go to stdout.
    ///
    /// The output file is created here so a bad path fails the caller instead
    /// of the background thread.
    pub fn init(path: Option<&Path>) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(p) => Box::new(File::create(p)?),
            None => Box::new(io::stdout()),
        };

        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || Self::worker_loop(rx, writer));

        Ok(Self { sender: tx, worker: Some(worker), started: Instant::now() })
    }

    fn worker_loop(rx: mpsc::Receiver<StatsMessage>, writer: Box<dyn Write + Send>) {
        let mut csv_wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(writer);

        if let Err(e) = csv_wtr.write_record(StatParameter::headers()) {
            log::error!("Stats Error: Failed to write headers: {}", e);
        }

        for msg in rx {
            match msg {
                StatsMessage::Log(event) => {
                    if let Err(e) = csv_wtr.write_record(event.to_row()) {
                        log::error!("Stats Error: Failed to write record: {}", e);
                    }
                }
                StatsMessage::Flush => {
                    let _ = csv_wtr.flush();
                }
                StatsMessage::Shutdown => break,
            }
        }

        if let Err(e) = csv_wtr.flush() {
            log::error!("Stats Error: Failed to flush statistics: {}", e);
        }
    }

    /// Non-blocking; stamps `Time` unless the event already carries it.
    pub fn add_event(&self, mut event: StatisticEvent) {
        if event.get(StatParameter::Time).is_none() {
            event.set(StatParameter::Time, self.started.elapsed().as_secs_f64());
        }
        // A dead writer must not take the training run down with it.
        let _ = self.sender.send(StatsMessage::Log(event));
    }

    pub fn flush(&self) {
        let _ = self.sender.send(StatsMessage::Flush);
    }

    /// Flushes pending rows and waits for the writer to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.sender.send(StatsMessage::Shutdown);
            if worker.join().is_err() {
                log::error!("Stats Error: writer thread panicked");
            }
        }
    }
}

impl Drop for StatsCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_are_na() {
        let mut event = StatisticEvent::new();
        event.set(StatParameter::Kind, "episode").set(StatParameter::EpisodeReward, 2.5f64);

        let row = event.to_row();
        assert_eq!(row.len(), StatParameter::ALL.len());
        assert_eq!(row[2], "episode");
        assert_eq!(row[3], "2.5");
        assert_eq!(row[5], "NA");
    }

    #[test]
    fn shutdown_writes_all_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");

        let collector = StatsCollector::init(Some(&path)).unwrap();
        for step in 0..3usize {
            let mut event = StatisticEvent::new();
            event.set(StatParameter::GlobalStep, step).set(StatParameter::Kind, "update");
            collector.add_event(event);
        }
        collector.shutdown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4, "header plus three rows, got: {:?}", lines);
        assert!(lines[0].starts_with("Time;GlobalStep;Kind"));
        assert!(lines[3].contains(";2;update;"));
    }
}
