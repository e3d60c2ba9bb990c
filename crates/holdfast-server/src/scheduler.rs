//! Periodic background jobs.
//!
//! The daemon runs two jobs on this scheduler: the expired-hold sweeper and
//! webhook channel renewal. Each scheduler owns one job and supports:
//! - Configurable run intervals
//! - Jitter to avoid thundering herd
//! - Exponential backoff on errors
//! - Run-now, pause, resume and stop commands

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Job name used in logs.
    pub name: String,
    /// Base interval between runs.
    pub interval: Duration,
    /// Maximum jitter to add to the interval (as fraction 0.0-1.0).
    pub jitter_fraction: f64,
    /// Whether to run once immediately on start.
    pub run_on_start: bool,
    /// Initial backoff duration on error.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Consecutive failures after which each further failure is logged as an error.
    pub max_consecutive_failures: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "job".to_string(),
            interval: Duration::from_secs(300),      // 5 minutes
            jitter_fraction: 0.1,                    // 10% jitter
            run_on_start: true,
            initial_backoff: Duration::from_secs(5), // 5 seconds
            max_backoff: Duration::from_secs(300),   // 5 minutes
            backoff_multiplier: 2.0,
            max_consecutive_failures: 10,
        }
    }
}

impl SchedulerConfig {
    /// Creates a config for the named job with the given interval.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: run once immediately on start, or wait a full interval.
    pub fn with_run_on_start(mut self, run: bool) -> Self {
        self.run_on_start = run;
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the next run delay with jitter.
    pub fn next_delay(&self) -> Duration {
        let base = self.interval.as_secs_f64();
        let jitter_range = base * self.jitter_fraction;
        let jitter = rand_jitter(jitter_range);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Calculates backoff delay based on consecutive failures.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let multiplier = self
            .backoff_multiplier
            .powi(consecutive_failures.min(64) as i32 - 1);
        let delay = base * multiplier;
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

/// Pseudo-random jitter in [-range, range], seeded from the clock.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let fraction = (nanos as f64) / (1_000_000_000.0);
    (fraction * 2.0 - 1.0) * range
}

/// Commands that can be sent to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run the job immediately.
    RunNow,
    /// Pause the scheduler.
    Pause,
    /// Resume the scheduler.
    Resume,
    /// Stop the scheduler.
    Stop,
}

/// Scheduler state.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Whether the scheduler is paused.
    pub paused: bool,
    /// Number of consecutive failures.
    pub consecutive_failures: u32,
    /// Number of completed runs, successful or not.
    pub runs: u64,
    /// Last successful run time.
    pub last_success: Option<DateTime<Utc>>,
    /// Last run attempt time.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SchedulerState {
    /// Creates a new scheduler state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful run.
    pub fn record_success(&mut self) {
        self.runs += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
    }

    /// Records a failed run.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.runs += 1;
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// Creates a new shared scheduler state.
pub fn new_scheduler_state() -> SharedSchedulerState {
    Arc::new(RwLock::new(SchedulerState::new()))
}

/// Runs one job periodically until stopped.
pub struct Scheduler {
    config: SchedulerConfig,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a new scheduler with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            state: new_scheduler_state(),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands to the scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Runs the scheduler loop.
    ///
    /// The job is called periodically and should return Ok(()) on success
    /// or an error message on failure. Returns when a stop command arrives
    /// or every handle is dropped.
    pub async fn run<F, Fut>(self, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send,
    {
        let Self {
            config,
            state,
            command_tx,
            mut command_rx,
        } = self;
        // Only external handles keep the channel open.
        drop(command_tx);
        let runner = Runner { config, state };

        info!(
            job = %runner.config.name,
            interval_secs = runner.config.interval.as_secs(),
            "Scheduler started"
        );

        if runner.config.run_on_start {
            runner.run_once(&job).await;
        }

        loop {
            let delay = runner.next_delay().await;
            debug!(job = %runner.config.name, delay_secs = delay.as_secs(), "Scheduling next run");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if runner.state.read().await.paused {
                        debug!(job = %runner.config.name, "Scheduler paused, skipping run");
                        continue;
                    }
                    runner.run_once(&job).await;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::RunNow) => {
                            debug!(job = %runner.config.name, "Received RunNow command");
                            runner.run_once(&job).await;
                        }
                        Some(SchedulerCommand::Pause) => {
                            info!(job = %runner.config.name, "Scheduler paused");
                            runner.state.write().await.paused = true;
                        }
                        Some(SchedulerCommand::Resume) => {
                            info!(job = %runner.config.name, "Scheduler resumed");
                            runner.state.write().await.paused = false;
                        }
                        Some(SchedulerCommand::Stop) | None => {
                            info!(job = %runner.config.name, "Scheduler stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

struct Runner {
    config: SchedulerConfig,
    state: SharedSchedulerState,
}

impl Runner {
    async fn next_delay(&self) -> Duration {
        let state = self.state.read().await;

        if state.consecutive_failures > 0 {
            let backoff = self.config.backoff_delay(state.consecutive_failures);
            debug!(
                job = %self.config.name,
                failures = state.consecutive_failures,
                backoff_secs = backoff.as_secs(),
                "Using backoff delay"
            );
            return backoff.min(self.config.next_delay());
        }

        self.config.next_delay()
    }

    async fn run_once<F, Fut>(&self, job: &F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), String>>,
    {
        debug!(job = %self.config.name, "Starting run");
        match job().await {
            Ok(()) => {
                debug!(job = %self.config.name, "Run completed");
                self.state.write().await.record_success();
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.record_failure(e.clone());
                if state.consecutive_failures >= self.config.max_consecutive_failures {
                    error!(
                        job = %self.config.name,
                        failures = state.consecutive_failures,
                        error = %e,
                        "Job keeps failing"
                    );
                } else {
                    warn!(job = %self.config.name, error = %e, "Run failed");
                }
            }
        }
    }
}

/// Handle for sending commands to a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Runs the job immediately.
    pub async fn run_now(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::RunNow).await
    }

    /// Pauses the scheduler.
    pub async fn pause(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Pause).await
    }

    /// Resumes the scheduler.
    pub async fn resume(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Resume).await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Returns a snapshot of the scheduler state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }

    /// Returns true if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }
}
