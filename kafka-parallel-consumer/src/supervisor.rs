use std::future::Future;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backoff::BackoffPolicy;
use crate::error::ConsumerError;
use crate::metrics_consts::SUBTREE_RESTARTS;

/// Restarts a failing unit of work with exponential backoff.
///
/// Every incarnation gets a child token of the supervisor's token. An
/// incarnation that ran for at least the initial backoff delay is considered
/// healthy, so the next failure starts backing off from the beginning again.
#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: BackoffPolicy,
    max_restarts: Option<u32>,
}

impl Supervisor {
    pub fn new(policy: BackoffPolicy, max_restarts: Option<u32>) -> Self {
        Self {
            policy,
            max_restarts,
        }
    }

    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut start: F,
    ) -> Result<(), ConsumerError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), ConsumerError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            let started = Instant::now();
            let result = start(cancel.child_token()).await;

            if cancel.is_cancelled() {
                if let Err(e) = result {
                    debug!(error = ?e, "Incarnation failed while stopping");
                }
                info!("Supervisor stopped");
                return Ok(());
            }

            let failure = match result {
                Ok(()) => ConsumerError::UnexpectedStop,
                Err(e) => e,
            };

            if started.elapsed() >= self.policy.initial_delay {
                attempt = 0;
            }

            if let Some(max) = self.max_restarts {
                if attempt >= max {
                    error!(restarts = attempt, error = ?failure, "Giving up restarting consumer");
                    return Err(ConsumerError::RestartsExhausted {
                        restarts: attempt,
                        source: Box::new(failure),
                    });
                }
            }

            let delay = self.policy.next_delay(attempt);
            attempt = attempt.saturating_add(1);
            metrics::counter!(SUBTREE_RESTARTS).increment(1);
            error!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = ?failure,
                "Consumer failed, restarting after backoff"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Supervisor stopped during backoff");
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(5), 2.0, Duration::from_secs(300), 0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_with_growing_delays() {
        let supervisor = Supervisor::new(policy(), Some(3));
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let recorded = starts.clone();
        let err = supervisor
            .run(&CancellationToken::new(), move |_token| {
                recorded.lock().unwrap().push(origin.elapsed().as_secs());
                async { Err(ConsumerError::UnexpectedStop) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConsumerError::RestartsExhausted { restarts: 3, .. }
        ));
        // 5s, 10s and 20s of backoff between the four incarnations
        assert_eq!(*starts.lock().unwrap(), vec![0, 5, 15, 35]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_running_incarnation_resets_backoff() {
        let supervisor = Supervisor::new(policy(), Some(1));
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let err = supervisor
            .run(&CancellationToken::new(), move |_token| {
                let run = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if run < 3 {
                        sleep(Duration::from_secs(10)).await;
                    }
                    Err(ConsumerError::UnexpectedStop)
                }
            })
            .await
            .unwrap_err();

        // healthy runs reset the attempt, so only the fast failure exhausts the restart
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(matches!(
            err,
            ConsumerError::RestartsExhausted { restarts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_cleanly() {
        let supervisor = Supervisor::new(policy(), None);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(60)).await;
            stopper.cancel();
        });

        let result = supervisor
            .run(&cancel, |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let supervisor = Supervisor::new(policy(), None);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        let result = supervisor
            .run(&cancel, move |_token| {
                let stopper = stopper.clone();
                async move {
                    tokio::spawn(async move {
                        sleep(Duration::from_secs(1)).await;
                        stopper.cancel();
                    });
                    Err(ConsumerError::UnexpectedStop)
                }
            })
            .await;

        assert!(result.is_ok());
    }
}
