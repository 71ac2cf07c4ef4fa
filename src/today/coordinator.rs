use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::error::RefreshError;
use super::listener::spawn_publishers_listener;
use crate::feed::{FeedSource, FeedTransformer, TodayFeed};
use crate::publishers::{enabled_only, PublisherProvider};
use crate::storage::{KeyValueStore, StorageBridge};
use crate::util::catch_task_panic;

/// Shared result of one refresh attempt.
pub type RefreshOutcome = Result<(), Arc<RefreshError>>;

/// Collaborators the coordinator is wired with.
pub struct FeedDeps {
    pub source: Arc<dyn FeedSource>,
    pub publishers: Arc<dyn PublisherProvider>,
    pub transformer: Arc<dyn FeedTransformer>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Awaitable marker for the one refresh currently in flight.
///
/// Clones share the same outcome; any number of callers can wait on it.
#[derive(Clone)]
pub struct RefreshHandle {
    generation: u64,
    outcome: watch::Receiver<Option<RefreshOutcome>>,
}

impl RefreshHandle {
    /// Monotonic id of the refresh, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until the refresh has settled and return its outcome.
    pub async fn settled(mut self) -> RefreshOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(Arc::new(RefreshError::Abandoned))),
            Err(_) => Err(Arc::new(RefreshError::Abandoned)),
        }
    }
}

enum Flight {
    Idle,
    Running(RefreshHandle),
}

struct Inner {
    source: Arc<dyn FeedSource>,
    publishers: Arc<dyn PublisherProvider>,
    transformer: Arc<dyn FeedTransformer>,
    storage: StorageBridge,
    /// Current snapshot; only refresh tasks and the initial load write it
    feed: RwLock<Option<Arc<TodayFeed>>>,
    /// Single-flight state; check-and-start happens under this lock
    flight: Mutex<Flight>,
    generation: AtomicU64,
    /// Flips to `true` once the durable store has been consulted
    initial_load: watch::Receiver<bool>,
    /// Most recent detached save, kept so shutdown can wait for it
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

/// Single-flight cache of the presentation feed.
///
/// Reads are served from memory once populated. At most one network refresh
/// runs at any time: concurrent callers join it, and forced refreshes wait
/// for it and then run exactly one more. Cloning is cheap and every clone
/// shares the same cache.
#[derive(Clone)]
pub struct TodayFeedService {
    inner: Arc<Inner>,
}

/// Non-owning reference held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakTodayFeedService(Weak<Inner>);

impl WeakTodayFeedService {
    pub(crate) fn upgrade(&self) -> Option<TodayFeedService> {
        self.0.upgrade().map(|inner| TodayFeedService { inner })
    }
}

impl TodayFeedService {
    /// Build the coordinator and start its background work.
    ///
    /// Kicks off the load of any persisted feed (reads wait for it) and
    /// subscribes once to publisher changes. Must be called inside a Tokio
    /// runtime.
    pub fn start(deps: FeedDeps) -> Self {
        let changes = deps.publishers.subscribe();
        let (loaded_tx, loaded_rx) = watch::channel(false);

        let service = Self {
            inner: Arc::new(Inner {
                source: deps.source,
                publishers: deps.publishers,
                transformer: deps.transformer,
                storage: StorageBridge::new(deps.store),
                feed: RwLock::new(None),
                flight: Mutex::new(Flight::Idle),
                generation: AtomicU64::new(0),
                initial_load: loaded_rx,
                pending_save: Mutex::new(None),
            }),
        };

        let inner = Arc::clone(&service.inner);
        tokio::spawn(async move {
            if let Some(feed) = inner.storage.load().await {
                let feed = Arc::new(feed);
                let installed = {
                    let mut current = inner.feed.write().unwrap_or_else(PoisonError::into_inner);
                    // A refresh may already have produced something newer
                    if current.is_none() {
                        *current = Some(Arc::clone(&feed));
                        true
                    } else {
                        false
                    }
                };
                if installed {
                    tracing::info!(hash = %feed.hash, items = feed.item_count(), "Loaded persisted feed");
                } else {
                    tracing::debug!("Persisted feed superseded by a completed refresh");
                }
            }
            let _ = loaded_tx.send(true);
        });

        let _ = spawn_publishers_listener(&service, changes);
        service
    }

    /// Return the cached feed, fetching it first if nothing is cached.
    ///
    /// Waits for the initial storage load. `None` means no feed could be
    /// obtained; callers should treat it as an empty/loading state.
    pub async fn get_or_fetch_data(&self) -> Option<Arc<TodayFeed>> {
        self.wait_initial_load().await;
        if let Some(feed) = self.current() {
            return Some(feed);
        }
        self.update(false).await
    }

    /// Refresh the feed and return the cached feed afterwards.
    ///
    /// Without `force`, joins a refresh that is already running. With
    /// `force`, waits for any running refresh and then refreshes again, so
    /// the result was fetched after this call was made. Failures are logged
    /// and leave the previous feed (or `None`) in place.
    pub async fn update(&self, force: bool) -> Option<Arc<TodayFeed>> {
        if let Err(e) = self.try_update(force).await {
            tracing::debug!(force, error = %e, "Feed update settled without new data");
        }
        self.current()
    }

    /// Like [`update`](Self::update) but reports the outcome of the refresh
    /// this call waited on.
    pub async fn try_update(
        &self,
        force: bool,
    ) -> Result<Option<Arc<TodayFeed>>, Arc<RefreshError>> {
        let handle = if force {
            self.fresh_handle().await?
        } else {
            self.join_or_begin()?
        };
        handle.settled().await?;
        Ok(self.current())
    }

    /// Cached feed without triggering any work.
    pub fn current(&self) -> Option<Arc<TodayFeed>> {
        self.inner
            .feed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_flight(), Flight::Running(_))
    }

    /// Wait for every scheduled background save to finish.
    ///
    /// Saves run one after another in refresh order and never block refresh
    /// waiters; call this before shutting down so the last fetched feed
    /// reaches durable storage.
    pub async fn flush(&self) {
        let pending = self
            .inner
            .pending_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Feed save task failed");
            }
        }
    }

    pub(crate) fn downgrade(&self) -> WeakTodayFeedService {
        WeakTodayFeedService(Arc::downgrade(&self.inner))
    }

    async fn wait_initial_load(&self) {
        let mut loaded = self.inner.initial_load.clone();
        if loaded.wait_for(|done| *done).await.is_err() {
            tracing::warn!("Initial feed load ended without signalling completion");
        }
    }

    fn join_or_begin(&self) -> Result<RefreshHandle, Arc<RefreshError>> {
        let mut flight = self.inner.lock_flight();
        if let Flight::Running(handle) = &*flight {
            return Ok(handle.clone());
        }
        self.inner.launch(&mut flight).map_err(Arc::new)
    }

    async fn fresh_handle(&self) -> Result<RefreshHandle, Arc<RefreshError>> {
        let running = match &*self.inner.lock_flight() {
            Flight::Running(handle) => Some(handle.clone()),
            Flight::Idle => None,
        };

        if let Some(stale) = running {
            tracing::debug!(
                generation = stale.generation,
                "Forced update waiting for in-flight refresh"
            );
            // Its outcome belongs to whoever started it
            let _ = stale.settled().await;
        }

        // Whatever runs now was started after this call was made
        self.join_or_begin()
    }
}

impl Inner {
    fn lock_flight(&self) -> MutexGuard<'_, Flight> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a refresh task. The caller must hold the flight lock.
    fn launch(self: &Arc<Self>, flight: &mut Flight) -> Result<RefreshHandle, RefreshError> {
        if let Flight::Running(running) = flight {
            tracing::error!(
                running = running.generation,
                "Asked to update feed but already waiting for another update"
            );
            return Err(RefreshError::ProtocolViolation {
                running: running.generation,
            });
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = RefreshHandle {
            generation,
            outcome: outcome_rx,
        };
        *flight = Flight::Running(handle.clone());

        let lease = FlightLease {
            inner: Arc::clone(self),
            generation,
        };
        tokio::spawn(run_refresh(lease, outcome_tx));
        Ok(handle)
    }

    async fn perform_refresh(&self) -> Result<Option<Arc<TodayFeed>>, RefreshError> {
        let (feed, publishers) = tokio::join!(self.source.fetch(), self.publishers.get_or_fetch());

        let items = feed.map_err(|source| RefreshError::FetchFailed {
            url: self.source.url().to_string(),
            source,
        })?;
        let publishers = publishers.ok_or(RefreshError::PublishersUnavailable)?;

        let enabled = enabled_only(&publishers);
        tracing::debug!(
            items = items.len(),
            publishers = publishers.len(),
            enabled = enabled.len(),
            "Filtering feed"
        );

        let feed = self.transformer.transform(items, &enabled).await?;
        Ok(feed.map(Arc::new))
    }
}

/// Ownership of the `Running` flight slot for one refresh.
///
/// Dropping it returns the coordinator to `Idle`, whatever the outcome.
struct FlightLease {
    inner: Arc<Inner>,
    generation: u64,
}

impl Drop for FlightLease {
    fn drop(&mut self) {
        let mut flight = self.inner.lock_flight();
        match &*flight {
            Flight::Running(handle) if handle.generation == self.generation => {
                *flight = Flight::Idle;
            }
            _ => {
                tracing::error!(
                    generation = self.generation,
                    "Refresh finished but the flight slot belonged to another refresh"
                );
            }
        }
    }
}

async fn run_refresh(lease: FlightLease, outcome_tx: watch::Sender<Option<RefreshOutcome>>) {
    let inner = Arc::clone(&lease.inner);
    let generation = lease.generation;
    let started = Instant::now();

    let result = match catch_task_panic(inner.perform_refresh()).await {
        Ok(result) => result,
        Err(panic_msg) => Err(RefreshError::Panicked(panic_msg)),
    };

    let (outcome, fresh): (RefreshOutcome, _) = match result {
        Ok(Some(feed)) => {
            *inner.feed.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&feed));
            tracing::info!(
                generation,
                hash = %feed.hash,
                items = feed.item_count(),
                publishers = feed.publisher_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Feed updated"
            );
            (Ok(()), Some(feed))
        }
        Ok(None) => {
            tracing::info!(generation, "Transformer produced no feed, keeping previous one");
            (Ok(()), None)
        }
        Err(e) => {
            match &e {
                RefreshError::FetchFailed { url, source } => tracing::warn!(
                    generation,
                    url = %url,
                    status = ?source.status(),
                    error = %source,
                    "Could not process feed contents"
                ),
                other => tracing::warn!(generation, error = %other, "Could not process feed contents"),
            }
            (Err(Arc::new(e)), None)
        }
    };

    // Scheduled, not awaited: waiters never block on storage
    if let Some(feed) = fresh {
        let mut pending = inner
            .pending_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = pending.take();
        *pending = Some(inner.storage.save_detached(feed, previous));
    }

    // Free the slot before waking waiters so a forced follow-up can start
    drop(lease);
    let _ = outcome_tx.send(Some(outcome));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DefaultTransformer, FeedItem, FetchError, RemoteData};
    use crate::publishers::{Publisher, PublisherMap};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct StaticSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl FeedSource for StaticSource {
        fn url(&self) -> &str {
            "memory://feed"
        }

        async fn fetch(&self) -> Result<RemoteData, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(vec![FeedItem {
                id: format!("a{call}"),
                publisher: "p1".into(),
                title: None,
                url: None,
                img: None,
                category: None,
                publish_time: None,
                score: None,
                content_type: "article".into(),
            }])
        }
    }

    struct StaticPublishers {
        changes: broadcast::Sender<PublisherMap>,
    }

    #[async_trait]
    impl PublisherProvider for StaticPublishers {
        async fn get_or_fetch(&self) -> Option<PublisherMap> {
            let p1 = Publisher {
                publisher_id: "p1".into(),
                publisher_name: "One".into(),
                category: String::new(),
                enabled: true,
                user_enabled: None,
            };
            Some(PublisherMap::from([("p1".to_string(), p1)]))
        }

        fn subscribe(&self) -> broadcast::Receiver<PublisherMap> {
            self.changes.subscribe()
        }
    }

    async fn service(delay: Duration) -> (TodayFeedService, Arc<StaticSource>) {
        let source = Arc::new(StaticSource {
            calls: AtomicUsize::new(0),
            delay,
        });
        let (changes, _) = broadcast::channel(4);
        let service = TodayFeedService::start(FeedDeps {
            source: source.clone(),
            publishers: Arc::new(StaticPublishers { changes }),
            transformer: Arc::new(DefaultTransformer::default()),
            store: Arc::new(Database::open(":memory:").await.unwrap()),
        });
        (service, source)
    }

    #[tokio::test]
    async fn test_launch_while_running_is_refused() {
        let (service, source) = service(Duration::from_millis(200)).await;

        let handle = service.join_or_begin().unwrap();
        assert!(service.is_refreshing());

        let result = {
            let mut flight = service.inner.lock_flight();
            service.inner.launch(&mut flight)
        };
        match result {
            Err(RefreshError::ProtocolViolation { running }) => {
                assert_eq!(running, handle.generation())
            }
            Err(e) => panic!("Expected ProtocolViolation, got {e:?}"),
            Ok(_) => panic!("Expected ProtocolViolation, got a new refresh"),
        }

        // The refused start must not disturb the running refresh
        handle.settled().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!service.is_refreshing());
        assert!(service.current().is_some());
    }

    #[tokio::test]
    async fn test_generations_increase() {
        let (service, _source) = service(Duration::ZERO).await;

        let first = service.join_or_begin().unwrap();
        let first_generation = first.generation();
        first.settled().await.unwrap();

        let second = service.join_or_begin().unwrap();
        assert!(second.generation() > first_generation);
        second.settled().await.unwrap();
    }

    #[tokio::test]
    async fn test_flight_cleared_before_waiters_wake() {
        let (service, _source) = service(Duration::from_millis(20)).await;

        let handle = service.join_or_begin().unwrap();
        handle.settled().await.unwrap();
        assert!(!service.is_refreshing());
    }

    #[tokio::test]
    async fn test_abandoned_handle() {
        let (tx, rx) = watch::channel(None);
        drop(tx);
        let handle = RefreshHandle {
            generation: 1,
            outcome: rx,
        };
        let outcome = handle.settled().await;
        assert!(matches!(
            outcome.as_ref().map_err(|e| &**e),
            Err(RefreshError::Abandoned)
        ));
    }
}
