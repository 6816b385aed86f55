/*!
 * Promise Combinators
 *
 * Aggregation over collections of promises. All forms accept any
 * iterator of handles; `all`-shaped results preserve input order no
 * matter which promise settles first. Losing branches are dropped,
 * which de-tables their waiters immediately.
 */

use super::Promise;
use crate::core::errors::{WaitError, WaitResult};
use futures::future;
use std::pin::Pin;

type BoxedGet<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;

impl<T: Clone + Send + 'static> Promise<T> {
    /// Wait for every promise; results in input order.
    pub async fn all<I>(promises: I) -> Vec<T>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        future::join_all(
            promises
                .into_iter()
                .map(|promise| async move { promise.get().await }),
        )
        .await
    }

    /// Wait for the first settlement, whatever it carries. An empty
    /// input has nothing to settle and pends forever.
    pub async fn race<I>(promises: I) -> T
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        let entries: Vec<BoxedGet<T>> = promises
            .into_iter()
            .map(|promise| -> BoxedGet<T> { Box::pin(async move { promise.get().await }) })
            .collect();
        if entries.is_empty() {
            return future::pending().await;
        }
        let (value, _index, _rest) = future::select_all(entries).await;
        value
    }
}

impl<T, E> Promise<Result<T, E>>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Wait for every promise, short-circuiting on the first failure.
    /// On success the values come back in input order; on failure the
    /// surviving branches are dropped.
    pub async fn try_all<I>(promises: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = Promise<Result<T, E>>>,
    {
        future::try_join_all(
            promises
                .into_iter()
                .map(|promise| async move { promise.get().await }),
        )
        .await
    }

    /// Wait for every promise, collecting each outcome in input order.
    /// Never fails.
    pub async fn all_settled<I>(promises: I) -> Vec<Result<T, E>>
    where
        I: IntoIterator<Item = Promise<Result<T, E>>>,
    {
        future::join_all(
            promises
                .into_iter()
                .map(|promise| async move { promise.get().await }),
        )
        .await
    }

    /// Wait for the first success, skipping failures. When every
    /// promise fails, or the input is empty, the wait reports
    /// [`WaitError::Cancelled`].
    pub async fn any<I>(promises: I) -> WaitResult<T>
    where
        I: IntoIterator<Item = Promise<Result<T, E>>>,
    {
        let mut entries: Vec<BoxedGet<Result<T, E>>> = promises
            .into_iter()
            .map(|promise| -> BoxedGet<Result<T, E>> {
                Box::pin(async move { promise.get().await })
            })
            .collect();

        while !entries.is_empty() {
            let (outcome, _index, rest) = future::select_all(entries).await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(_) => entries = rest,
            }
        }
        Err(WaitError::Cancelled)
    }
}
