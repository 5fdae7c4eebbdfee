use std::{future::Future, pin::Pin};

use sync_wrapper::SyncWrapper;

use super::AckError;

pub(crate) trait Acker: Send {
    fn ack(&mut self) -> impl Future<Output = Result<(), AckError>> + Send;
    fn nack(&mut self) -> impl Future<Output = Result<(), AckError>> + Send;
}

pub(crate) struct DynAcker(SyncWrapper<Box<dyn ErasedAcker>>);

impl DynAcker {
    pub(super) fn new(inner: impl Acker + 'static) -> Self {
        let c = DynAckerInner { inner };
        Self(SyncWrapper::new(Box::new(c)))
    }
}

impl Acker for DynAcker {
    async fn ack(&mut self) -> Result<(), AckError> {
        self.0.get_mut().ack().await
    }

    async fn nack(&mut self) -> Result<(), AckError> {
        self.0.get_mut().nack().await
    }
}

type AckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AckError>> + Send + 'a>>;

trait ErasedAcker: Send {
    fn ack(&mut self) -> AckFuture<'_>;
    fn nack(&mut self) -> AckFuture<'_>;
}

struct DynAckerInner<C> {
    inner: C,
}

impl<C: Acker> ErasedAcker for DynAckerInner<C> {
    fn ack(&mut self) -> AckFuture<'_> {
        Box::pin(async move { self.inner.ack().await })
    }

    fn nack(&mut self) -> AckFuture<'_> {
        Box::pin(async move { self.inner.nack().await })
    }
}
