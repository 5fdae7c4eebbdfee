use std::marker::PhantomData;

use crate::{
    DynConsumer, DynProducer, QueueBackend, QueueConsumer as _, QueueProducer as _, Result,
};

/// Builder mode yielding the backend's own producer and consumer types.
#[non_exhaustive]
pub struct Static;

/// Builder mode yielding [`DynProducer`] and [`DynConsumer`], so the backend
/// can be picked from configuration at runtime.
#[non_exhaustive]
pub struct Dynamic;

/// Connects to a queue from a backend config.
///
/// Obtained from [`InMemoryBackend::builder`][crate::backends::InMemoryBackend::builder]
/// or [`SqsBackend::builder`][crate::backends::SqsBackend::builder]. A consumer
/// loop typically needs the consuming half of one queue and, for
/// dead-lettering, the producing half of another.
pub struct QueueBuilder<Q: QueueBackend, M = Static> {
    config: Q::Config,
    _mode: PhantomData<M>,
}

impl<Q: QueueBackend> QueueBuilder<Q> {
    pub fn new(config: Q::Config) -> Self {
        Self {
            config,
            _mode: PhantomData,
        }
    }

    pub async fn build_pair(self) -> Result<(Q::Producer, Q::Consumer)> {
        Q::new_pair(self.config).await
    }

    pub async fn build_producer(self) -> Result<Q::Producer> {
        Q::producing_half(self.config).await
    }

    pub async fn build_consumer(self) -> Result<Q::Consumer> {
        Q::consuming_half(self.config).await
    }

    pub fn make_dynamic(self) -> QueueBuilder<Q, Dynamic> {
        QueueBuilder {
            config: self.config,
            _mode: PhantomData,
        }
    }
}

impl<Q: QueueBackend + 'static> QueueBuilder<Q, Dynamic> {
    pub async fn build_pair(self) -> Result<(DynProducer, DynConsumer)> {
        let (p, c) = Q::new_pair(self.config).await?;
        Ok((p.into_dyn(), c.into_dyn()))
    }

    pub async fn build_producer(self) -> Result<DynProducer> {
        Ok(Q::producing_half(self.config).await?.into_dyn())
    }

    pub async fn build_consumer(self) -> Result<DynConsumer> {
        Ok(Q::consuming_half(self.config).await?.into_dyn())
    }
}
