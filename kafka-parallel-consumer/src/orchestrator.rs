use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client_proxy::ProxyHandle;
use crate::error::ConsumerError;
use crate::kafka::types::{Record, TopicPartitionOffset};
use crate::offsets::OffsetCommand;
use crate::parallelism::CoordinatorCommand;

/// Everything the pipeline components report upwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    InboundRecord(Record),
    AvailableForRecord,
    RecordHandled(TopicPartitionOffset),
    OffsetReadyForCommit(TopicPartitionOffset),
}

/// Stateless router between the client proxy, the offset controller and the
/// parallelism coordinator.
pub struct Orchestrator {
    events: UnboundedReceiver<OrchestratorEvent>,
    offsets: UnboundedSender<OffsetCommand>,
    coordinator: UnboundedSender<CoordinatorCommand>,
    proxy: ProxyHandle,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        events: UnboundedReceiver<OrchestratorEvent>,
        offsets: UnboundedSender<OffsetCommand>,
        coordinator: UnboundedSender<CoordinatorCommand>,
        proxy: ProxyHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            offsets,
            coordinator,
            proxy,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<(), ConsumerError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                event = self.events.recv() => match event {
                    Some(event) => self.route(event)?,
                    None => return Ok(()),
                },
            }
        }
    }

    fn route(&self, event: OrchestratorEvent) -> Result<(), ConsumerError> {
        match event {
            OrchestratorEvent::InboundRecord(record) => {
                // tracking has to be in place before the record can complete
                self.send_offsets(OffsetCommand::Track(record.position().clone()))?;
                self.coordinator
                    .send(CoordinatorCommand::HandleRecord(record))
                    .map_err(|_| ConsumerError::ChannelClosed("coordinator"))
            }
            OrchestratorEvent::AvailableForRecord => self.proxy.fetch(),
            OrchestratorEvent::RecordHandled(position) => {
                self.send_offsets(OffsetCommand::Complete(position))
            }
            OrchestratorEvent::OffsetReadyForCommit(position) => {
                debug!(%position, "Forwarding offset for commit");
                self.proxy.commit(position)
            }
        }
    }

    fn send_offsets(&self, command: OffsetCommand) -> Result<(), ConsumerError> {
        self.offsets
            .send(command)
            .map_err(|_| ConsumerError::ChannelClosed("offset controller"))
    }
}
