use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Running {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Drives a poll function on a fixed cadence.
///
/// Invocations never overlap: the loop awaits each one before taking the
/// next. Cadence slots that fall due while an invocation is pending are
/// dropped, so the next cadence run is the first slot after it returns. A
/// manual refresh requested meanwhile runs once, right after it returns.
#[derive(Default)]
pub struct PollingScheduler {
    running: Option<Running>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Invokes `poll_fn` immediately, then every `interval` until [`stop`].
    /// Ignored if a cadence is already running.
    ///
    /// [`stop`]: PollingScheduler::stop
    pub fn start<F, Fut>(&mut self, poll_fn: F, interval: Duration)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_running() {
            warn!("Polling already running; ignoring second start");
            return;
        }

        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());
        let task = tokio::spawn(run_loop(poll_fn, interval, cancel.clone(), refresh.clone()));
        info!("Polling started every {} ms", interval.as_millis());

        self.running = Some(Running { cancel, refresh, task });
    }

    /// Requests one out-of-band invocation without touching the cadence.
    /// Returns false when nothing is running.
    pub fn refresh_now(&self) -> bool {
        match &self.running {
            Some(running) if !running.cancel.is_cancelled() => {
                running.refresh.notify_one();
                true
            }
            _ => {
                debug!("Refresh requested while polling is stopped");
                false
            }
        }
    }

    /// Cancels the cadence and waits for the loop to exit. No invocation
    /// happens after this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        running.task.abort();
        let _ = running.task.await;
        info!("Polling stopped");
    }
}

async fn run_loop<F, Fut>(poll_fn: F, period: Duration, cancel: CancellationToken, refresh: Arc<Notify>)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    let mut next_slot = Instant::now();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(next_slot) => {}
            () = refresh.notified() => debug!("Manual refresh"),
        }

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = poll_fn() => {}
        }

        next_slot = first_slot_after(next_slot, period, Instant::now());
    }
}

/// Advances `slot` along its cadence grid until it lies after `now`.
fn first_slot_after(mut slot: Instant, period: Duration, now: Instant) -> Instant {
    while slot <= now {
        slot += period;
    }
    slot
}
