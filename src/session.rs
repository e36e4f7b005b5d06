//! Experiment session state machine and periodic temperature sampling.
//!
//! A session is either `Idle` or `Running`. Starting an experiment
//! dispatches the start frame, truncates a fresh CSV log with a fixed
//! header, runs one sampling cycle immediately, then free-runs on a fixed
//! interval (each completed cycle schedules the next, so drift by one
//! cycle's execution time is accepted).
//!
//! A sampling cycle can never abort the experiment: a silent device is
//! recorded as the `N/A` sentinel and write failures are logged. Only
//! [`ExperimentSession::stop`] ends the schedule; it cancels the pending
//! cycle and awaits the sampling task, so no log append can happen after
//! it returns.

use chrono::Local;
use log::{info, warn};
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec;
use crate::config::ExperimentSettings;
use crate::error::{AppResult, PlateError};
use crate::link::LinkHandle;

/// Sentinel recorded when a cycle sees no telemetry within the settle
/// window.
const TEMP_UNAVAILABLE: &str = "N/A";

/// Timestamp format of the experiment log, local time.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentState {
    /// No experiment running
    Idle,
    /// An experiment is running and sampling periodically
    Running,
}

/// Coordinates experiment start/stop and the periodic sampling task.
pub struct ExperimentSession {
    link: LinkHandle,
    logs_dir: PathBuf,
    sample_interval: Duration,
    settle: Duration,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ExperimentSession {
    /// Creates an idle session from the experiment settings.
    pub fn new(link: LinkHandle, settings: &ExperimentSettings) -> Self {
        Self::with_timing(
            link,
            settings.logs_dir.clone(),
            settings.sample_interval(),
            settings.settle(),
        )
    }

    /// Creates an idle session with explicit timing, mainly for tests.
    pub fn with_timing(
        link: LinkHandle,
        logs_dir: PathBuf,
        sample_interval: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            link,
            logs_dir,
            sample_interval,
            settle,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
            shutdown_tx: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ExperimentState {
        if self.running.load(Ordering::SeqCst) {
            ExperimentState::Running
        } else {
            ExperimentState::Idle
        }
    }

    /// Path of the log file for the given experiment name.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.logs_dir.join(format!("exp_{}.csv", name.trim()))
    }

    /// Starts an experiment and the periodic sampling schedule.
    ///
    /// Rejects an empty name and rejects a second start while one is
    /// already running (a silent restart would truncate the live log).
    /// The log file is created fresh each start; an earlier run's file of
    /// the same name is truncated, never reopened for append.
    pub async fn start(&mut self, name: &str) -> AppResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(PlateError::ExperimentAlreadyRunning);
        }
        let frame = codec::encode_start(name)?;
        let name = name.trim();
        if name.contains(['/', '\\']) {
            return Err(PlateError::Validation(format!(
                "Experiment name '{name}' must not contain path separators"
            )));
        }

        std::fs::create_dir_all(&self.logs_dir)?;
        let path = self.log_path(name);
        let mut writer = csv::Writer::from_writer(File::create(&path)?);
        writer.write_record(["Timestamp", "Temperature (C)"])?;
        writer.flush()?;

        self.link.send(&frame).await;
        info!(
            "Experiment {} started at {}",
            name,
            Local::now().format(TIMESTAMP_FORMAT)
        );

        self.running.store(true, Ordering::SeqCst);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let link = self.link.clone();
        let running = self.running.clone();
        let settle = self.settle;
        let interval = self.sample_interval;

        self.task = Some(tokio::spawn(async move {
            loop {
                // A fired-but-cancelled cycle must be a safe no-op.
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                sample_once(&link, settle, &mut writer).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut shutdown_rx => break,
                }
            }
            if let Err(e) = writer.flush() {
                warn!("Failed to flush experiment log: {}", e);
            }
        }));
        self.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Stops the running experiment; a no-op when idle.
    ///
    /// Dispatches the stop frame, cancels the pending sampling cycle and
    /// awaits the sampling task, so no further append can occur once this
    /// returns. The log file is left closed for writing.
    pub async fn stop(&mut self) -> AppResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.link.send(&codec::encode_stop()).await;
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Experiment stopped.");
        Ok(())
    }
}

impl Drop for ExperimentSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One sampling cycle: request, settle-bounded read, append.
///
/// Must succeed even if the device is silent; a dropped sample is logged
/// as unavailable, never an aborted experiment.
async fn sample_once(link: &LinkHandle, settle: Duration, writer: &mut csv::Writer<File>) {
    link.send(&codec::encode_temperature_request()).await;
    let lines = link.read_lines(settle).await;
    let value =
        codec::extract_temperature(&lines).unwrap_or_else(|| TEMP_UNAVAILABLE.to_string());

    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    info!("Logged temp at {}: {}", timestamp, value);
    if let Err(e) = writer.write_record([timestamp.as_str(), value.as_str()]) {
        warn!("Failed to append experiment log row: {}", e);
        return;
    }
    if let Err(e) = writer.flush() {
        warn!("Failed to flush experiment log row: {}", e);
    }
}
