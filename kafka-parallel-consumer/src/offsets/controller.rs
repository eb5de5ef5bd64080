use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ConsumerError;
use crate::kafka::types::TopicPartitionOffset;
use crate::metrics_consts::{OFFSETS_TRACKED, OFFSET_WATERMARKS_RELEASED};
use crate::offsets::tracker::OffsetTracker;
use crate::orchestrator::OrchestratorEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetCommand {
    Track(TopicPartitionOffset),
    Complete(TopicPartitionOffset),
}

/// Task owning the [`OffsetTracker`]. Reports every new commit watermark to
/// the orchestrator.
pub struct OffsetController {
    tracker: OffsetTracker,
    commands: UnboundedReceiver<OffsetCommand>,
    events: UnboundedSender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl OffsetController {
    pub fn new(
        commands: UnboundedReceiver<OffsetCommand>,
        events: UnboundedSender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tracker: OffsetTracker::new(),
            commands,
            events,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<(), ConsumerError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(
                        still_tracked = self.tracker.total_tracked(),
                        "Offset controller stopping"
                    );
                    return Ok(());
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command)?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn handle(&mut self, command: OffsetCommand) -> Result<(), ConsumerError> {
        match command {
            OffsetCommand::Track(position) => {
                self.tracker.track(&position)?;
            }
            OffsetCommand::Complete(position) => {
                if let Some(watermark) = self.tracker.complete(&position)? {
                    debug!(
                        topic = watermark.topic(),
                        partition = watermark.partition_number(),
                        offset = watermark.offset(),
                        "Offset ready for commit"
                    );
                    metrics::counter!(OFFSET_WATERMARKS_RELEASED).increment(1);
                    self.events
                        .send(OrchestratorEvent::OffsetReadyForCommit(watermark))
                        .map_err(|_| ConsumerError::ChannelClosed("orchestrator"))?;
                }
            }
        }

        metrics::gauge!(OFFSETS_TRACKED).set(self.tracker.total_tracked() as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::InvariantViolation;
    use crate::kafka::types::Partition;

    fn at(offset: i64) -> TopicPartitionOffset {
        TopicPartitionOffset::new(Partition::new("test-topic".to_string(), 0), offset)
    }

    #[tokio::test]
    async fn test_emits_watermark_once_prefix_completes() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let controller = OffsetController::new(cmd_rx, event_tx, CancellationToken::new());
        let handle = tokio::spawn(controller.run());

        for offset in 0..3 {
            cmd_tx.send(OffsetCommand::Track(at(offset))).unwrap();
        }
        cmd_tx.send(OffsetCommand::Complete(at(1))).unwrap();
        cmd_tx.send(OffsetCommand::Complete(at(2))).unwrap();
        cmd_tx.send(OffsetCommand::Complete(at(0))).unwrap();
        drop(cmd_tx);

        handle.await.unwrap().unwrap();

        let events: Vec<_> = std::iter::from_fn(|| event_rx.try_recv().ok()).collect();
        assert_eq!(events, vec![OrchestratorEvent::OffsetReadyForCommit(at(2))]);
    }

    #[tokio::test]
    async fn test_fails_on_out_of_order_track() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let controller = OffsetController::new(cmd_rx, event_tx, CancellationToken::new());

        cmd_tx.send(OffsetCommand::Track(at(0))).unwrap();
        cmd_tx.send(OffsetCommand::Track(at(2))).unwrap();

        let err = controller.run().await.unwrap_err();
        assert!(matches!(
            err,
            ConsumerError::Invariant(InvariantViolation::OutOfOrderOffset { offset: 2, .. })
        ));
    }
}
