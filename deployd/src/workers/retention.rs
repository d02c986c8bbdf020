//! Retention worker for completed log topics

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bus::LogBus;

/// Retention worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between sweeps
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Run the retention worker until shutdown
pub async fn run<S, F>(
    options: &Options,
    bus: &LogBus,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!(
        "Retention worker starting (sweep every {:?}, retention {:?})",
        options.interval,
        bus.options().retention
    );

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Retention worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        let evicted = bus.evict_expired(Instant::now());
        if evicted > 0 {
            info!("Evicted {} retired log topics", evicted);
        } else {
            debug!("No log topics past retention");
        }
    }
}
