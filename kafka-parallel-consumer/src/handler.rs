use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::kafka::types::Record;

/// User logic invoked once per record.
///
/// The token is cancelled when the consumer stops or the pipeline is torn down
/// after a failure; long running handlers should watch it. Returning an error
/// tears the pipeline down and the record is delivered again after restart.
#[async_trait]
pub trait RecordHandler: Send + Sync + 'static {
    async fn handle(&self, record: Record, cancel: CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> RecordHandler for F
where
    F: Fn(Record, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, record: Record, cancel: CancellationToken) -> anyhow::Result<()> {
        (self)(record, cancel).await
    }
}
