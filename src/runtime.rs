//! The few runtime hooks background maintenance needs, for tokio or smol.

use std::{future::Future, time::Duration};

#[cfg(feature = "redis-tokio")]
pub(crate) fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(crate) fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(fut).detach();
}

#[cfg(feature = "redis-tokio")]
pub(crate) async fn sleep(period: Duration) {
    tokio::time::sleep(period).await;
}

#[cfg(all(feature = "redis-smol", not(feature = "redis-tokio")))]
pub(crate) async fn sleep(period: Duration) {
    smol::Timer::after(period).await;
}
