use async_trait::async_trait;

use crate::Event;

/// Dispatcher interface: reacts to one delivered event.
///
/// Implementations must tolerate duplicates and reordering. A returned error
/// is reported by the delivering worker and never stops delivery of later
/// events.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    type Error: core::fmt::Display + Send + Sync + 'static;

    async fn handle(&self, event: E) -> Result<(), Self::Error>;
}

#[async_trait]
impl<E, H> EventHandler<E> for std::sync::Arc<H>
where
    E: Event,
    H: EventHandler<E> + ?Sized,
{
    type Error = H::Error;

    async fn handle(&self, event: E) -> Result<(), Self::Error> {
        (**self).handle(event).await
    }
}
