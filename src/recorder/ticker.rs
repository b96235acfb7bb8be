//! Elapsed-time ticker
//!
//! Counts display seconds while a session is Active and enforces the capture
//! caps. A tripped cap is reported once through `on_limit`, after which the
//! ticker exits on its own.

use super::state::StopReason;
use crate::capture::traits::{CameraBackend, CaptureLimits};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) struct Ticker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn<T, L>(
        period: Duration,
        limits: CaptureLimits,
        camera: Arc<dyn CameraBackend>,
        on_tick: T,
        on_limit: L,
    ) -> Self
    where
        T: Fn(u64) + Send + 'static,
        L: FnOnce(StopReason) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_ticker(
            period,
            limits,
            camera,
            cancel.clone(),
            on_tick,
            on_limit,
        ));

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel and wait for the task to exit
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Ticker task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_ticker<T, L>(
    period: Duration,
    limits: CaptureLimits,
    camera: Arc<dyn CameraBackend>,
    cancel: CancellationToken,
    on_tick: T,
    on_limit: L,
) where
    T: Fn(u64) + Send + 'static,
    L: FnOnce(StopReason) + Send + 'static,
{
    let started = Instant::now();
    let mut interval = tokio::time::interval_at(started + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let period_ms = period.as_millis() as u64;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        ticks += 1;
        on_tick(ticks * period_ms / 1000);

        let reason = if started.elapsed() >= limits.max_duration() {
            Some(StopReason::MaxDuration)
        } else if camera.bytes_recorded() >= limits.max_size_bytes {
            Some(StopReason::MaxSize)
        } else {
            None
        };

        if let Some(reason) = reason {
            tracing::info!("Capture limit reached: {:?}", reason);
            on_limit(reason);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::{Device, DeviceKind};
    use crate::testing::mocks::MockCamera;
    use parking_lot::Mutex;

    fn limits(max_duration_seconds: u64, max_size_bytes: u64) -> CaptureLimits {
        CaptureLimits {
            max_duration_seconds,
            max_size_bytes,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_ticks_until_cancelled() {
        let camera = Arc::new(MockCamera::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tick_log = seen.clone();

        let ticker = Ticker::spawn(
            Duration::from_millis(500),
            limits(60, u64::MAX),
            camera,
            move |elapsed| tick_log.lock().push(elapsed),
            |_| panic!("no limit expected"),
        );

        tokio::time::sleep(Duration::from_millis(2200)).await;
        ticker.stop().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(*seen.lock(), vec![0, 1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_limit_fires_once() {
        let camera = Arc::new(MockCamera::new());
        let tripped = Arc::new(Mutex::new(Vec::new()));
        let trip_log = tripped.clone();

        let ticker = Ticker::spawn(
            Duration::from_secs(1),
            limits(3, u64::MAX),
            camera,
            |_| {},
            move |reason| trip_log.lock().push(reason),
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        ticker.stop().await;
        assert_eq!(*tripped.lock(), vec![StopReason::MaxDuration]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_limit() {
        let camera = Arc::new(MockCamera::new());
        camera.set_bytes_per_second(1_000);
        let device = Device {
            id: "cam".into(),
            display_name: "Cam".into(),
            kind: DeviceKind::BuiltIn,
        };
        camera.start_capture(&device, limits(60, 2_500)).await.unwrap();

        let tripped = Arc::new(Mutex::new(None));
        let trip_log = tripped.clone();
        let ticker = Ticker::spawn(
            Duration::from_secs(1),
            limits(60, 2_500),
            camera.clone(),
            |_| {},
            move |reason| *trip_log.lock() = Some((reason, Instant::now())),
        );
        let started = Instant::now();

        tokio::time::sleep(Duration::from_secs(10)).await;
        ticker.stop().await;

        let (reason, at) = tripped.lock().take().unwrap();
        assert_eq!(reason, StopReason::MaxSize);
        assert_eq!(at - started, Duration::from_secs(3));
    }
}
