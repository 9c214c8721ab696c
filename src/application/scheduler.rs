use super::overdue::{OverdueJob, ProcessingReport};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// When the overdue job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed wall-clock times of day, UTC.
    DailyAt(Vec<NaiveTime>),
    Every(Duration),
}

impl Cadence {
    /// Delay from `now` until the next firing, strictly in the future.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Cadence::Every(period) => *period,
            Cadence::DailyAt(times) => {
                let today = now.date_naive();
                let next = times
                    .iter()
                    .filter_map(|time| {
                        let candidate = today.and_time(*time).and_utc();
                        if candidate > now {
                            Some(candidate)
                        } else {
                            today
                                .checked_add_days(Days::new(1))
                                .map(|tomorrow| tomorrow.and_time(*time).and_utc())
                        }
                    })
                    .min();
                match next {
                    Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                    None => Duration::from_secs(24 * 60 * 60),
                }
            }
        }
    }
}

/// Holds the in-flight flag for the lifetime of one run.
struct FlightGuard(Arc<AtomicBool>);

impl FlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the job in its own task so a panic surfaces as an error here.
///
/// The guard moves into the job task and is released only when the job ends,
/// even if the caller stops awaiting this future.
async fn supervise(
    job: Arc<dyn OverdueJob>,
    guard: FlightGuard,
    as_of: DateTime<Utc>,
) -> Result<ProcessingReport> {
    let run = tokio::spawn(async move {
        let _guard = guard;
        job.run(as_of).await
    });
    let outcome = match run.await {
        Ok(result) => result,
        Err(e) => Err(LedgerError::storage(format!("overdue run aborted: {}", e))),
    };
    if let Err(e) = &outcome {
        error!(%as_of, "overdue run failed: {}", e);
    }
    outcome
}

/// Owned periodic driver for an [`OverdueJob`].
///
/// At most one run is in flight at any time, whether started by the timer or
/// by [`trigger`](Self::trigger). Ticks that find a run in flight are dropped
/// and missed ticks are never replayed.
pub struct OverdueScheduler {
    job: Arc<dyn OverdueJob>,
    cadence: Cadence,
    in_flight: Arc<AtomicBool>,
    shutdown: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OverdueScheduler {
    pub fn new(job: Arc<dyn OverdueJob>, cadence: Cadence) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            job,
            cadence,
            in_flight: Arc::new(AtomicBool::new(false)),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawns the timer task. Fails if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(LedgerError::validation("overdue scheduler already started"));
        }

        let job = Arc::clone(&self.job);
        let cadence = self.cadence.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(timer_loop(job, cadence, in_flight, shutdown)));
        info!(cadence = ?self.cadence, "overdue scheduler started");
        Ok(())
    }

    /// Signals shutdown and waits for the timer task and any run it started.
    pub async fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        // No receiver means the loop already exited.
        let _ = self.shutdown.send(());
        if let Err(e) = handle.await {
            error!("overdue scheduler task failed: {}", e);
        }
        info!("overdue scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Runs one guarded pass now. `None` if a run is already in flight.
    pub async fn trigger(&self, as_of: DateTime<Utc>) -> Option<Result<ProcessingReport>> {
        let guard = FlightGuard::acquire(&self.in_flight)?;
        Some(supervise(Arc::clone(&self.job), guard, as_of).await)
    }
}

async fn timer_loop(
    job: Arc<dyn OverdueJob>,
    cadence: Cadence,
    in_flight: Arc<AtomicBool>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut current: Option<JoinHandle<Result<ProcessingReport>>> = None;
    loop {
        let delay = cadence.next_delay(Utc::now());
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = tokio::time::sleep(delay) => {
                let Some(guard) = FlightGuard::acquire(&in_flight) else {
                    warn!("previous overdue run still in flight, skipping tick");
                    continue;
                };
                current = Some(tokio::spawn(supervise(Arc::clone(&job), guard, Utc::now())));
            }
        }
    }

    if let Some(run) = current {
        let _ = run.await;
    }
}
