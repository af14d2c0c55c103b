use std::future::Future;

use async_trait::async_trait;

/// Job handler run by every worker of a [`WorkPool`](super::WorkPool)
///
/// One handler instance is shared by all workers, so it must tolerate
/// concurrent calls. Any `Fn(J) -> impl Future<Output = R>` closure is a handler.
#[async_trait]
pub trait Handler<J, R>: Send + Sync + 'static {
    async fn handle(&self, job: J) -> R;
}

#[async_trait]
impl<J, R, F, Fut> Handler<J, R> for F
where
    J: Send + 'static,
    R: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    async fn handle(&self, job: J) -> R {
        self(job).await
    }
}
