pub mod sink;

use tokio::time::{Duration, MissedTickBehavior};

use crate::dehydrator::dehydrator::Dehydrator;
use crate::dehydrator::error::Error;
use crate::dehydrator::payload::Payload;
use crate::dehydrator::store::Store;

/// Drives `Dehydrator::poll` and hands whatever comes out to a sink.
pub struct Poller<P: Send + Sync, S: Sink<P>, St: Store> {
    p: std::marker::PhantomData<P>,
    dehydrator: Dehydrator<St>,
    sink: S,
    interval: Duration
}

#[async_trait::async_trait]
pub trait Sink<P: Send + Sync> {
    async fn process(&self, payload: &P) -> Result<(), Error>;
}

impl<
    P: Payload + Send + Sync + 'static,
    S: Sink<P> + Send + Sync + 'static,
    St: Store + 'static
> Poller<P, S, St> {
    pub fn new(
        dehydrator: Dehydrator<St>,
        sink: S,
        interval: Duration
    ) -> Self {
        Self {
            p: std::marker::PhantomData::default(),
            dehydrator,
            sink,
            interval
        }
    }

    /// One poll. Every expired element is offered to the sink; elements
    /// that fail to decode or that the sink rejects are logged and lost,
    /// since the poll has already finalized them. Returns the number the
    /// sink accepted.
    pub async fn tick(&mut self) -> Result<usize, Error> {
        let expired = self.dehydrator.poll().await?;
        let mut delivered = 0;

        for bytes in expired.iter() {
            let Some(payload) = P::decode(bytes) else {
                tracing::warn!(dehydrator = self.dehydrator.name(), "dropping undecodable payload ({} bytes)", bytes.len());
                continue;
            };

            match self.sink.process(&payload).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(dehydrator = self.dehydrator.name(), "sink rejected payload: {}", e)
            }
        }

        Ok(delivered)
    }

    // Ticks on `interval` forever. A failed cycle is logged and the
    // next one runs as scheduled.
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if let Err(e) = self.tick().await {
                tracing::warn!(dehydrator = self.dehydrator.name(), "poll failed: {}", e);
            }
        }
    }

    /// Runs the poller on its own task. Abort the handle to stop it.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await
        })
    }
}
