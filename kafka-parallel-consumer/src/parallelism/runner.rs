use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::ConsumerError;
use crate::handler::RecordHandler;
use crate::kafka::types::Record;
use crate::metrics_consts::{HANDLER_DURATION, HANDLER_FAILURES, RECORDS_HANDLED};
use crate::parallelism::coordinator::CoordinatorCommand;
use crate::parallelism::handling_tracker::{RunnerId, Ticket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    pub ticket: Ticket,
    pub record: Record,
}

/// Worker that invokes the handler for one record at a time, in the order its
/// commands arrive. Runners hold no state between records and are reused
/// across lanes.
pub struct Runner<H> {
    id: RunnerId,
    handler: Arc<H>,
    commands: UnboundedReceiver<RunnerCommand>,
    coordinator: UnboundedSender<CoordinatorCommand>,
    cancel: CancellationToken,
}

impl<H: RecordHandler> Runner<H> {
    /// Creates a runner along with the sender used to hand it work.
    pub fn new(
        id: RunnerId,
        handler: Arc<H>,
        coordinator: UnboundedSender<CoordinatorCommand>,
        cancel: CancellationToken,
    ) -> (Self, UnboundedSender<RunnerCommand>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let runner = Self {
            id,
            handler,
            commands,
            coordinator,
            cancel,
        };
        (runner, tx)
    }

    pub async fn run(mut self) -> Result<(), ConsumerError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle(&self, command: RunnerCommand) -> Result<(), ConsumerError> {
        let RunnerCommand { ticket, record } = command;
        let position = record.position().clone();

        debug!(
            runner = self.id,
            topic = position.topic(),
            partition = position.partition_number(),
            offset = position.offset(),
            "Handling record"
        );

        let started = Instant::now();
        let outcome = self.handler.handle(record, self.cancel.clone()).await;
        metrics::histogram!(HANDLER_DURATION).record(started.elapsed().as_secs_f64());

        if let Err(e) = outcome {
            error!(
                runner = self.id,
                topic = position.topic(),
                partition = position.partition_number(),
                offset = position.offset(),
                error = ?e,
                "Record handler failed"
            );
            metrics::counter!(HANDLER_FAILURES).increment(1);
            return Err(ConsumerError::Handler {
                position,
                source: e,
            });
        }

        metrics::counter!(RECORDS_HANDLED).increment(1);
        self.coordinator
            .send(CoordinatorCommand::RecordHandled { ticket, position })
            .map_err(|_| ConsumerError::ChannelClosed("coordinator"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;
    use crate::kafka::types::Partition;

    fn command(offset: i64) -> RunnerCommand {
        let partition = Partition::new("test-topic".to_string(), 0);
        RunnerCommand {
            ticket: Ticket::Partition(partition),
            record: Record::new("test-topic", 0, offset, None, None),
        }
    }

    #[tokio::test]
    async fn test_reports_completions_in_order() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = Arc::new(move |_record: Record, _cancel: CancellationToken| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        let (coordinator_tx, mut coordinator_rx) = mpsc::unbounded_channel();
        let (runner, tx) = Runner::new(0, handler, coordinator_tx, CancellationToken::new());

        for offset in 0..3 {
            tx.send(command(offset)).unwrap();
        }
        drop(tx);
        runner.run().await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        for expected in 0..3 {
            match coordinator_rx.try_recv().unwrap() {
                CoordinatorCommand::RecordHandled { position, .. } => {
                    assert_eq!(position.offset(), expected)
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_handler_error_fails_runner() {
        let handler = Arc::new(|record: Record, _cancel: CancellationToken| async move {
            if record.offset() == 1 {
                Err(anyhow!("boom"))
            } else {
                Ok(())
            }
        });
        let (coordinator_tx, mut coordinator_rx) = mpsc::unbounded_channel();
        let (runner, tx) = Runner::new(0, handler, coordinator_tx, CancellationToken::new());

        for offset in 0..3 {
            tx.send(command(offset)).unwrap();
        }

        let err = runner.run().await.unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::Handler { ref position, .. } if position.offset() == 1
        ));
        assert!(coordinator_rx.try_recv().is_ok());
        assert!(coordinator_rx.try_recv().is_err());
    }
}
