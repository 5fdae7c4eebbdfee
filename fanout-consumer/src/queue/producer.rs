use std::{future::Future, pin::Pin};

use serde::Serialize;

use crate::Result;

/// Sending side of a queue.
///
/// Bodies are opaque bytes; backends that only carry text reject bodies that
/// are not valid UTF-8.
pub trait QueueProducer: Send + Sync + Sized {
    fn send_bytes(&self, body: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn send_serde_json<T: Serialize + Sync>(
        &self,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let body = serde_json::to_vec(value)?;
            self.send_bytes(&body).await
        }
    }

    fn into_dyn(self) -> DynProducer
    where
        Self: 'static,
    {
        DynProducer(Box::new(self))
    }
}

type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Object-safe view of a producer, boxing the returned future.
trait BoxedSend: Send + Sync {
    fn boxed_send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a>;
}

impl<P: QueueProducer> BoxedSend for P {
    fn boxed_send<'a>(&'a self, body: &'a [u8]) -> SendFuture<'a> {
        Box::pin(self.send_bytes(body))
    }
}

/// A producer of any backend, chosen at runtime.
pub struct DynProducer(Box<dyn BoxedSend>);

impl QueueProducer for DynProducer {
    async fn send_bytes(&self, body: &[u8]) -> Result<()> {
        self.0.boxed_send(body).await
    }

    fn into_dyn(self) -> DynProducer {
        self
    }
}
