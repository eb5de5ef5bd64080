use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ConsumerError, InvariantViolation};
use crate::kafka::types::{Record, TopicPartitionOffset};
use crate::metrics_consts::{RECORDS_ENQUEUED_BEHIND_LANE, RECORDS_IN_FLIGHT, RUNNING_LANES};
use crate::orchestrator::OrchestratorEvent;
use crate::parallelism::handling_tracker::{HandlingTracker, RunnerId, Ticket};
use crate::parallelism::runner::RunnerCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorCommand {
    HandleRecord(Record),
    RecordHandled {
        ticket: Ticket,
        position: TopicPartitionOffset,
    },
}

/// Assigns records to lanes and runners and decides when to ask for more.
///
/// Two caps bound the work in the pipeline: at most `max_parallelism` lanes
/// hold a runner, and at most `2 * max_parallelism` records are accepted and
/// not yet handled. Outstanding requests for records count against both.
pub struct Coordinator {
    max_parallelism: usize,
    max_tracked: usize,
    running: usize,
    pending_availability: usize,
    total_tracked: usize,
    tracker: Box<dyn HandlingTracker>,
    runners: Vec<UnboundedSender<RunnerCommand>>,
    free_runners: Vec<RunnerId>,
    commands: UnboundedReceiver<CoordinatorCommand>,
    events: UnboundedSender<OrchestratorEvent>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// One runner per sender; the pool size is the maximum parallelism.
    pub fn new(
        tracker: Box<dyn HandlingTracker>,
        runners: Vec<UnboundedSender<RunnerCommand>>,
        commands: UnboundedReceiver<CoordinatorCommand>,
        events: UnboundedSender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let max_parallelism = runners.len();
        Self {
            max_parallelism,
            max_tracked: max_parallelism * 2,
            running: 0,
            pending_availability: 0,
            total_tracked: 0,
            tracker,
            free_runners: (0..max_parallelism).rev().collect(),
            runners,
            commands,
            events,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<(), ConsumerError> {
        info!(
            max_parallelism = self.max_parallelism,
            strategy = %self.tracker.strategy(),
            "Parallelism coordinator starting"
        );
        self.notify_if_available()?;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),

                command = self.commands.recv() => match command {
                    Some(CoordinatorCommand::HandleRecord(record)) => self.handle_record(record)?,
                    Some(CoordinatorCommand::RecordHandled { ticket, position }) => {
                        self.record_handled(ticket, position)?
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    pub(crate) fn handle_record(&mut self, record: Record) -> Result<(), ConsumerError> {
        if self.pending_availability == 0 {
            return Err(InvariantViolation::UnsolicitedRecord.into());
        }
        self.pending_availability -= 1;
        self.total_tracked += 1;

        let ticket = self.tracker.create_ticket(&record);
        let runner = match self.tracker.lane(&ticket) {
            Some(_) => {
                metrics::counter!(RECORDS_ENQUEUED_BEHIND_LANE).increment(1);
                self.tracker.enqueue(&ticket)?
            }
            None => {
                if self.running >= self.max_parallelism {
                    return Err(InvariantViolation::CapacityExceeded {
                        running: self.running,
                        max: self.max_parallelism,
                    }
                    .into());
                }
                let runner = self
                    .free_runners
                    .pop()
                    .ok_or(InvariantViolation::CapacityExceeded {
                        running: self.running,
                        max: self.max_parallelism,
                    })?;
                self.running += 1;
                self.tracker.register(ticket.clone(), runner)?;
                runner
            }
        };

        debug!(
            topic = record.topic(),
            partition = record.partition_number(),
            offset = record.offset(),
            runner,
            %ticket,
            "Dispatching record"
        );

        self.runners
            .get(runner)
            .ok_or(InvariantViolation::UnknownRunner(runner))?
            .send(RunnerCommand { ticket, record })
            .map_err(|_| ConsumerError::ChannelClosed("runner"))?;

        self.report_gauges();
        self.notify_if_available()
    }

    pub(crate) fn record_handled(
        &mut self,
        ticket: Ticket,
        position: TopicPartitionOffset,
    ) -> Result<(), ConsumerError> {
        self.events
            .send(OrchestratorEvent::RecordHandled(position))
            .map_err(|_| ConsumerError::ChannelClosed("orchestrator"))?;

        self.total_tracked -= 1;
        if let Some(runner) = self.tracker.complete_one(&ticket)? {
            self.running -= 1;
            self.free_runners.push(runner);
        }

        self.report_gauges();
        self.notify_if_available()
    }

    /// Asks for at most one more record, when both caps leave room for it.
    fn notify_if_available(&mut self) -> Result<(), ConsumerError> {
        let outstanding = self.pending_availability;
        if self.running + outstanding < self.max_parallelism
            && self.total_tracked + outstanding < self.max_tracked
        {
            self.pending_availability += 1;
            self.events
                .send(OrchestratorEvent::AvailableForRecord)
                .map_err(|_| ConsumerError::ChannelClosed("orchestrator"))?;
        }
        Ok(())
    }

    fn report_gauges(&self) {
        metrics::gauge!(RUNNING_LANES).set(self.running as f64);
        metrics::gauge!(RECORDS_IN_FLIGHT).set(self.total_tracked as f64);
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn total_tracked(&self) -> usize {
        self.total_tracked
    }

    pub fn pending_availability(&self) -> usize {
        self.pending_availability
    }
}
