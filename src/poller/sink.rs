use redis::AsyncCommands;

use crate::dehydrator::error::Error;
use crate::dehydrator::payload::Payload;
use crate::poller::Sink;

/// Publishes every payload on a Redis pub/sub channel.
#[derive(Clone)]
pub struct Publish {
    redis: redis::aio::ConnectionManager,
    channel: String
}

impl Publish {
    pub fn new(redis: redis::aio::ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into()
        }
    }
}

#[async_trait::async_trait]
impl<P: Payload + Send + Sync> Sink<P> for Publish {
    async fn process(&self, payload: &P) -> Result<(), Error> {
        let bytes = payload.encode()?;
        let mut redis = self.redis.clone();
        let receivers: i64 = redis.publish(&self.channel, bytes).await?;

        tracing::debug!(channel = %self.channel, receivers, "published");
        Ok(())
    }
}

/// Forwards payloads into an in-process channel.
#[derive(Clone)]
pub struct Forward<P> {
    tx: tokio::sync::mpsc::Sender<P>
}

impl<P> Forward<P> {
    pub fn new(tx: tokio::sync::mpsc::Sender<P>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl<P: Clone + Send + Sync> Sink<P> for Forward<P> {
    async fn process(&self, payload: &P) -> Result<(), Error> {
        self.tx
            .send(payload.clone())
            .await
            .map_err(|_| Error::SinkError("receiver dropped".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::dehydrator::error::Error;
    use crate::poller::Sink;
    use crate::poller::sink::Forward;

    #[tokio::test]
    async fn forwards_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let sink = Forward::new(tx);

        sink.process(&"a".to_string()).await.unwrap();
        sink.process(&"b".to_string()).await.unwrap();

        assert_eq!(rx.recv().await, Some("a".to_string()));
        assert_eq!(rx.recv().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn closed_receiver_is_an_error() {
        let (tx, rx) = tokio::sync::mpsc::channel::<String>(1);
        drop(rx);

        let sink = Forward::new(tx);
        assert!(matches!(sink.process(&"a".to_string()).await, Err(Error::SinkError(_))));
    }
}
