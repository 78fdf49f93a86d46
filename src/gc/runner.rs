//! Generic periodic-task driver.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use super::CancellationToken;
use crate::config::{GcSettings, SettingsHandle};
use crate::error::StorageResult;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Work driven by a [`PollingRunner`].
#[async_trait]
pub trait PollingTask: Send + Sync + 'static {
    /// Evaluated before every tick; `false` skips the tick.
    async fn should_run(&self) -> bool;

    /// Runs one tick. Must stop starting new work once `cancel` fires.
    async fn poll(&self, cancel: CancellationToken) -> StorageResult<()>;
}

/// Where a runner takes its interval from.
#[derive(Clone)]
pub enum PollInterval {
    Fixed(Duration),
    /// Picked from the settings before every wait. A settings change
    /// restarts the pending wait with the new interval.
    Settings {
        settings: SettingsHandle,
        pick: fn(&GcSettings) -> Duration,
    },
}

impl From<Duration> for PollInterval {
    fn from(interval: Duration) -> Self {
        PollInterval::Fixed(interval)
    }
}

impl PollInterval {
    fn watch(&self) -> IntervalWatch {
        match self {
            PollInterval::Fixed(interval) => IntervalWatch {
                fixed: *interval,
                source: None,
            },
            PollInterval::Settings { settings, pick } => IntervalWatch {
                fixed: Duration::ZERO,
                source: Some((settings.subscribe(), *pick)),
            },
        }
    }
}

struct IntervalWatch {
    fixed: Duration,
    source: Option<(watch::Receiver<GcSettings>, fn(&GcSettings) -> Duration)>,
}

impl IntervalWatch {
    fn current(&mut self) -> Duration {
        let interval = match &mut self.source {
            Some((rx, pick)) => pick(&rx.borrow_and_update()),
            None => self.fixed,
        };
        interval.max(MIN_INTERVAL)
    }

    async fn changed(&mut self) {
        if let Some((rx, _)) = &mut self.source {
            if rx.changed().await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives a [`PollingTask`] on an interval.
///
/// Errors and panics from a tick are logged and never stop the loop.
pub struct PollingRunner {
    name: String,
    interval: PollInterval,
    randomize_start: bool,
    task: Arc<dyn PollingTask>,
    task_type: &'static str,
    running: Mutex<Option<RunningLoop>>,
}

impl PollingRunner {
    pub fn new<T: PollingTask>(
        name: impl Into<String>,
        interval: impl Into<PollInterval>,
        task: Arc<T>,
    ) -> Self {
        Self {
            name: name.into(),
            interval: interval.into(),
            randomize_start: false,
            task,
            task_type: std::any::type_name::<T>(),
            running: Mutex::new(None),
        }
    }

    /// Delays the first tick by a random fraction of the interval so a fleet
    /// of processes does not poll in lock-step.
    pub fn with_randomized_start(mut self, randomize: bool) -> Self {
        self.randomize_start = randomize;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Starts the polling loop. Calling it on a running runner does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let start_fraction = if self.randomize_start {
            rand::thread_rng().gen_range(0.0..1.0)
        } else {
            0.0
        };
        info!(runner = %self.name, start_fraction, "starting polling runner");
        let handle = tokio::spawn(run_loop(
            self.name.clone(),
            self.task.clone(),
            self.task_type,
            self.interval.watch(),
            start_fraction,
            cancel.clone(),
        ));
        *running = Some(RunningLoop { cancel, handle });
    }

    /// Stops the loop, signalling cancellation to an in-flight tick and
    /// waiting for it to wind down. Calling it on a stopped runner does nothing.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!(runner = %self.name, error = %e, "polling loop ended abnormally");
        }
        info!(runner = %self.name, "polling runner stopped");
    }
}

async fn run_loop(
    name: String,
    task: Arc<dyn PollingTask>,
    task_type: &'static str,
    mut interval: IntervalWatch,
    start_fraction: f64,
    cancel: CancellationToken,
) {
    // The first deadline is a fraction of one interval after start; every
    // later one is a full interval after the previous tick fired.
    let mut anchor = Instant::now();
    let mut fraction = start_fraction;

    loop {
        let deadline = anchor + interval.current().mul_f64(fraction);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.changed() => {
                trace!(runner = %name, "poll interval changed");
                continue;
            }
            _ = time::sleep_until(deadline) => {}
        }
        anchor = Instant::now();
        fraction = 1.0;

        if !task.should_run().await {
            trace!(runner = %name, "polling task disabled, skipping tick");
            continue;
        }

        debug!(runner = %name, "polling");
        let tick_task = task.clone();
        let tick_cancel = cancel.clone();
        match tokio::spawn(async move { tick_task.poll(tick_cancel).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(runner = %name, task = task_type, error = %e, "polling task failed");
            }
            Err(e) => {
                error!(runner = %name, task = task_type, error = %e, "polling task panicked");
            }
        }
    }

    debug!(runner = %name, "polling loop exited");
}
