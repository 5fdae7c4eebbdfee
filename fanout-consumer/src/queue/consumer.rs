use std::{future::Future, pin::Pin, time::Duration};

use crate::Result;

use super::Delivery;

/// Receiving side of a queue.
pub trait QueueConsumer: Send {
    /// Waits until a message is available and returns it.
    fn receive(&mut self) -> impl Future<Output = Result<Delivery>> + Send;

    /// Waits up to `deadline` for at least one message and returns up to
    /// `max_messages` of them.
    ///
    /// Messages that are already available are returned without waiting. When
    /// the deadline elapses with nothing available an empty batch is returned;
    /// that is not an error.
    fn receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> impl Future<Output = Result<Vec<Delivery>>> + Send;

    fn into_dyn(self) -> DynConsumer
    where
        Self: Sized + 'static,
    {
        DynConsumer(Box::new(self))
    }
}

type ReceiveFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Object-safe view of a consumer, boxing the returned futures.
trait BoxedReceive: Send {
    fn boxed_receive(&mut self) -> ReceiveFuture<'_, Delivery>;
    fn boxed_receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> ReceiveFuture<'_, Vec<Delivery>>;
}

impl<C: QueueConsumer> BoxedReceive for C {
    fn boxed_receive(&mut self) -> ReceiveFuture<'_, Delivery> {
        Box::pin(self.receive())
    }

    fn boxed_receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> ReceiveFuture<'_, Vec<Delivery>> {
        Box::pin(self.receive_all(max_messages, deadline))
    }
}

/// A consumer of any backend, chosen at runtime.
pub struct DynConsumer(Box<dyn BoxedReceive>);

impl QueueConsumer for DynConsumer {
    async fn receive(&mut self) -> Result<Delivery> {
        self.0.boxed_receive().await
    }

    async fn receive_all(
        &mut self,
        max_messages: usize,
        deadline: Duration,
    ) -> Result<Vec<Delivery>> {
        self.0.boxed_receive_all(max_messages, deadline).await
    }

    fn into_dyn(self) -> DynConsumer {
        self
    }
}
