//! The failover client pool.

use crate::{
    client::{
        rolling::RollingStrategy,
        sort::{SortDirection, SortValueFetcher},
    },
    config::PollerConfig,
    error::{BoxedError, ClientPoolError},
    shutdown::Shutdown,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{info, warn};

struct PoolInner<C> {
    clients: Vec<C>,
    strategy: Box<dyn RollingStrategy<C>>,
}

/// An ordered pool of interchangeable backend clients.
///
/// # Concurrency
///
/// The pool mutex is the serialisation point for client mutation: it is held
/// for the entire sequence of attempts of one [`with_client`] session, so at
/// most one rotating operation is in flight per pool. [`sort_clients`]
/// computes the new order outside the lock and swaps it in atomically.
///
/// [`with_client`]: ClientPool::with_client
/// [`sort_clients`]: ClientPool::sort_clients
pub struct ClientPool<C> {
    inner: Mutex<PoolInner<C>>,
    max_fetch_duration: Duration,
}

impl<C> ClientPool<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Creates an empty pool.
    ///
    /// `max_fetch_duration` bounds every individual attempt made through
    /// [`with_client`](ClientPool::with_client); a timed-out attempt counts as
    /// a failure and triggers rotation.
    #[must_use]
    pub fn new(max_fetch_duration: Duration, strategy: Box<dyn RollingStrategy<C>>) -> Self {
        Self { inner: Mutex::new(PoolInner { clients: Vec::new(), strategy }), max_fetch_duration }
    }

    /// Creates an empty pool with the per-attempt timeout taken from the
    /// configuration (`max_block_fetch_duration_secs`).
    #[must_use]
    pub fn from_config(config: &PollerConfig, strategy: Box<dyn RollingStrategy<C>>) -> Self {
        Self::new(config.max_block_fetch_duration(), strategy)
    }

    /// Appends a client to the pool.
    pub async fn add(&self, client: C) {
        self.inner.lock().await.clients.push(client);
    }

    /// Returns a snapshot of the current client order.
    #[must_use]
    pub async fn clients(&self) -> Vec<C> {
        self.inner.lock().await.clients.clone()
    }

    /// Invokes `op` against one client at a time until it succeeds or the
    /// rolling strategy is exhausted.
    ///
    /// Each attempt runs inside a fresh timeout of `max_fetch_duration`. On
    /// exhaustion the returned error aggregates every per-attempt error in
    /// order.
    pub async fn with_client<V, F, Fut>(&self, op: F) -> Result<V, ClientPoolError>
    where
        F: Fn(C) -> Fut,
        Fut: Future<Output = Result<V, BoxedError>>,
    {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;

        inner.strategy.reset();
        let mut attempts: Vec<BoxedError> = Vec::new();

        loop {
            let Some(client) = inner.strategy.next(&inner.clients) else {
                return Err(ClientPoolError::NoMoreClients { attempts });
            };

            match tokio::time::timeout(self.max_fetch_duration, op(client)).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(err)) => attempts.push(err),
                Err(_) => attempts
                    .push(Box::new(ClientPoolError::AttemptTimeout(self.max_fetch_duration))),
            }
        }
    }

    /// Reorders the pool by the value each client reports through `fetcher`.
    ///
    /// Sort values are gathered from a snapshot outside the pool lock so that
    /// in-flight sessions are not stalled behind slow value fetches; a fetch
    /// error degrades that client's value to 0. The new order is swapped in
    /// under the lock.
    pub async fn sort_clients(&self, fetcher: &dyn SortValueFetcher<C>, direction: SortDirection) {
        let snapshot = self.clients().await;
        if snapshot.is_empty() {
            return;
        }

        let mut keyed: Vec<(u64, C)> = Vec::with_capacity(snapshot.len());
        for client in snapshot {
            let value = match fetcher.fetch_sort_value(&client).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(%err, "fetching sort value, defaulting to 0");
                    0
                }
            };
            keyed.push((value, client));
        }

        match direction {
            SortDirection::Ascending => keyed.sort_by(|a, b| a.0.cmp(&b.0)),
            SortDirection::Descending => keyed.sort_by(|a, b| b.0.cmp(&a.0)),
        }

        let sorted: Vec<C> = keyed.into_iter().map(|(_, c)| c).collect();
        self.inner.lock().await.clients = sorted;
    }

    /// Spawns a background task re-sorting the pool every `every` until
    /// shutdown.
    pub fn start_sorting(
        self: &Arc<Self>,
        fetcher: Arc<dyn SortValueFetcher<C>>,
        direction: SortDirection,
        every: Duration,
        shutdown: &Shutdown,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let mut shutdown_rx = shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                info!("sorting clients");
                pool.sort_clients(fetcher.as_ref(), direction).await;

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("client sorter terminating");
                        return;
                    }
                    () = tokio::time::sleep(every) => {}
                }
            }
        })
    }
}
