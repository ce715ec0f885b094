use std::future::Future;
use std::sync::Arc;

use log::{error, info, warn};
use reqwest::StatusCode;

use crate::config::RetrySettings;
use crate::db::{self, SharedDb};
use crate::probe::Connectivity;
use crate::queue::DeliveryQueue;
use crate::record::Outbound;
use crate::remote::Deliver;

/// What a single worker cycle did with the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing arrived within the pop timeout.
    Idle,
    /// Probe failed, record put back.
    Offline,
    Delivered,
    /// Remote answered with something other than 201, record put back.
    Rejected(StatusCode),
    /// Transport error, record put back.
    Unreachable,
    /// Delivered but the synced flag could not be written, record put back.
    StoreFailed,
}

impl Cycle {
    fn requeued(self) -> bool {
        !matches!(self, Cycle::Idle | Cycle::Delivered)
    }
}

/// Drains one delivery queue into the remote API, forever.
pub struct Worker<T, C, S> {
    queue: Arc<DeliveryQueue<T>>,
    db: SharedDb,
    probe: C,
    sender: S,
    retry: RetrySettings,
}

impl<T, C, S> Worker<T, C, S>
where
    T: Outbound,
    C: Connectivity,
    S: Deliver<T>,
{
    pub fn new(
        queue: Arc<DeliveryQueue<T>>,
        db: SharedDb,
        probe: C,
        sender: S,
        retry: RetrySettings,
    ) -> Self {
        Self {
            queue,
            db,
            probe,
            sender,
            retry,
        }
    }

    pub async fn run(self) {
        info!("Delivery worker for {} started", T::KIND);
        loop {
            self.cycle().await;
        }
    }

    /// Pops at most one record and tries to deliver it.
    ///
    /// Every popped record is either marked synced and dropped, or put back
    /// into the queue followed by the backoff sleep.
    pub async fn cycle(&self) -> Cycle {
        let Some(entry) = self.queue.pop(self.retry.pop_timeout).await else {
            return Cycle::Idle;
        };

        let outcome = self.attempt(&entry).await;

        if outcome.requeued() {
            self.queue.requeue(entry, self.retry.preserve_order);
            tokio::time::sleep(self.retry.backoff).await;
        }

        outcome
    }

    async fn attempt(&self, entry: &T) -> Cycle {
        if !self.probe.is_online().await {
            info!("Waiting for network to send {} id={}", T::KIND, entry.id());
            return Cycle::Offline;
        }

        match self.sender.deliver(entry).await {
            Ok(StatusCode::CREATED) => {
                let marked =
                    db::lock(&self.db).and_then(|mut store| T::mark_synced(&mut store, entry.id()));
                match marked {
                    Ok(()) => {
                        info!("Delivered {} id={}", T::KIND, entry.id());
                        Cycle::Delivered
                    }
                    Err(e) => {
                        error!(
                            "Delivered {} id={} but could not mark it synced: {:#}",
                            T::KIND,
                            entry.id(),
                            e
                        );
                        Cycle::StoreFailed
                    }
                }
            }
            Ok(status) => {
                warn!(
                    "Remote rejected {} id={} with {}, retrying",
                    T::KIND,
                    entry.id(),
                    status
                );
                Cycle::Rejected(status)
            }
            Err(e) => {
                warn!("Failed to send {} id={}: {}, retrying", T::KIND, entry.id(), e);
                Cycle::Unreachable
            }
        }
    }
}

/// Runs the task built by `start` and builds a fresh one whenever it panics.
///
/// Returns only if the task finishes on its own or gets cancelled.
pub async fn supervise<F, Fut>(kind: &str, mut start: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + 'static,
{
    loop {
        match actix_web::rt::spawn(start()).await {
            Ok(()) => {
                warn!("Delivery worker for {} returned", kind);
                return;
            }
            Err(e) if e.is_panic() => {
                error!("Delivery worker for {} panicked, restarting", kind);
            }
            Err(e) => {
                error!("Delivery worker for {} stopped: {}", kind, e);
                return;
            }
        }
    }
}

/// Puts every record the store still holds as unsynced back into `queue`.
pub fn recover<T: Outbound>(store: &SharedDb, queue: &DeliveryQueue<T>) -> anyhow::Result<usize> {
    let entries = {
        let mut db = db::lock(store)?;
        T::unsynced(&mut db)?
    };
    let count = entries.len();
    for entry in entries {
        queue.enqueue(entry);
    }

    if count > 0 {
        info!("Recovered {} unsynced {} from the store", count, T::KIND);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{self, AppState};
    use crate::db::{Db, NewReading, NewSeats};
    use crate::record::{ReadingEntry, SeatEntry};
    use crate::remote::DeliveryError;
    use actix_web::{test, web::Data, App};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers from a script, then repeats `fallback` once the script runs out.
    #[derive(Clone)]
    struct ScriptedProbe {
        script: Arc<Mutex<VecDeque<bool>>>,
        fallback: bool,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedProbe {
        fn new(script: &[bool], fallback: bool) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                fallback,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn online() -> Self {
            Self::new(&[], true)
        }
    }

    #[async_trait]
    impl Connectivity for ScriptedProbe {
        async fn is_online(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback)
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Status(StatusCode),
        Unreachable,
    }

    /// Records every id and body it was asked to deliver.
    #[derive(Clone)]
    struct ScriptedRemote {
        script: Arc<Mutex<VecDeque<Reply>>>,
        fallback: Reply,
        sent: Arc<Mutex<Vec<i64>>>,
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl ScriptedRemote {
        fn new(script: &[Reply], fallback: Reply) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.iter().copied().collect())),
                fallback,
                sent: Arc::new(Mutex::new(Vec::new())),
                bodies: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn accepting() -> Self {
            Self::new(&[], Reply::Status(StatusCode::CREATED))
        }

        fn sent(&self) -> Vec<i64> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<T: Outbound> Deliver<T> for ScriptedRemote {
        async fn deliver(&self, entry: &T) -> Result<StatusCode, DeliveryError> {
            self.sent.lock().unwrap().push(entry.id());
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::to_value(entry.payload()).unwrap());
            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);
            match reply {
                Reply::Status(status) => Ok(status),
                Reply::Unreachable => {
                    // a real reqwest error from a refused connection
                    let err = reqwest::Client::builder()
                        .no_proxy()
                        .build()
                        .unwrap()
                        .get("http://127.0.0.1:1/")
                        .send()
                        .await
                        .unwrap_err();
                    Err(DeliveryError::Transport {
                        url: "http://127.0.0.1:1/".to_string(),
                        source: err,
                    })
                }
            }
        }
    }

    fn fast_retry() -> RetrySettings {
        RetrySettings {
            pop_timeout: Duration::from_millis(5),
            backoff: Duration::ZERO,
            preserve_order: false,
        }
    }

    fn shared_db() -> SharedDb {
        Arc::new(Mutex::new(Db::in_memory().unwrap()))
    }

    fn insert_reading(db: &SharedDb, value1: &str, value2: &str) -> ReadingEntry {
        let id = db
            .lock()
            .unwrap()
            .insert_reading(&NewReading {
                value1: value1.to_string(),
                value2: value2.to_string(),
            })
            .unwrap();
        ReadingEntry {
            id,
            value1: json!(value1),
            value2: json!(value2),
        }
    }

    fn synced(db: &SharedDb, id: i64) -> bool {
        db.lock().unwrap().reading(id).unwrap().unwrap().synced
    }

    #[tokio::test]
    async fn empty_queue_is_idle() {
        let queue = Arc::new(DeliveryQueue::<ReadingEntry>::new());
        let probe = ScriptedProbe::online();
        let worker = Worker::new(
            queue,
            shared_db(),
            probe.clone(),
            ScriptedRemote::accepting(),
            fast_retry(),
        );

        assert_eq!(worker.cycle().await, Cycle::Idle);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delivered_record_is_marked_synced_and_removed_once() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let entry = insert_reading(&db, "40", "21");
        queue.enqueue(entry.clone());
        let remote = ScriptedRemote::accepting();
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            ScriptedProbe::online(),
            remote.clone(),
            fast_retry(),
        );

        assert_eq!(worker.cycle().await, Cycle::Delivered);
        assert_eq!(worker.cycle().await, Cycle::Idle);

        assert!(synced(&db, entry.id));
        assert!(queue.is_empty());
        assert_eq!(remote.sent(), vec![entry.id]);
    }

    #[tokio::test]
    async fn failures_then_success_retry_without_duplicate_rows() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let entry = insert_reading(&db, "1", "2");
        queue.enqueue(entry.clone());
        let remote = ScriptedRemote::new(
            &[
                Reply::Status(StatusCode::INTERNAL_SERVER_ERROR),
                Reply::Unreachable,
                Reply::Status(StatusCode::OK),
            ],
            Reply::Status(StatusCode::CREATED),
        );
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            ScriptedProbe::online(),
            remote.clone(),
            fast_retry(),
        );

        assert_eq!(
            worker.cycle().await,
            Cycle::Rejected(StatusCode::INTERNAL_SERVER_ERROR)
        );
        assert_eq!(worker.cycle().await, Cycle::Unreachable);
        // only 201 counts as accepted
        assert_eq!(worker.cycle().await, Cycle::Rejected(StatusCode::OK));
        assert!(!synced(&db, entry.id));
        assert_eq!(queue.len(), 1);

        assert_eq!(worker.cycle().await, Cycle::Delivered);

        assert!(synced(&db, entry.id));
        assert!(queue.is_empty());
        assert_eq!(remote.sent(), vec![entry.id; 4]);
        assert_eq!(db.lock().unwrap().reading_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn offline_record_stays_queued_until_network_returns() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let entry = insert_reading(&db, "1", "2");
        queue.enqueue(entry.clone());
        let probe = ScriptedProbe::new(&[false, false, true, false, false, false], true);
        let remote = ScriptedRemote::new(
            &[Reply::Status(StatusCode::SERVICE_UNAVAILABLE)],
            Reply::Status(StatusCode::CREATED),
        );
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            probe,
            remote.clone(),
            fast_retry(),
        );

        let mut cycles = Vec::new();
        loop {
            let cycle = worker.cycle().await;
            cycles.push(cycle);
            if cycle == Cycle::Delivered {
                break;
            }
            assert_eq!(queue.len(), 1, "record lost after {cycles:?}");
        }

        assert_eq!(
            cycles,
            vec![
                Cycle::Offline,
                Cycle::Offline,
                Cycle::Rejected(StatusCode::SERVICE_UNAVAILABLE),
                Cycle::Offline,
                Cycle::Offline,
                Cycle::Offline,
                Cycle::Delivered,
            ]
        );
        // never sent while offline
        assert_eq!(remote.sent().len(), 2);
        assert!(synced(&db, entry.id));
    }

    #[tokio::test]
    async fn failed_record_goes_to_tail_by_default() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let first = insert_reading(&db, "a", "1");
        let second = insert_reading(&db, "b", "2");
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        let remote = ScriptedRemote::new(
            &[Reply::Status(StatusCode::BAD_GATEWAY)],
            Reply::Status(StatusCode::CREATED),
        );
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            ScriptedProbe::online(),
            remote.clone(),
            fast_retry(),
        );

        for _ in 0..3 {
            worker.cycle().await;
        }

        assert_eq!(remote.sent(), vec![first.id, second.id, first.id]);
        assert!(synced(&db, first.id));
        assert!(synced(&db, second.id));
    }

    #[tokio::test]
    async fn preserve_order_retries_failed_record_first() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let first = insert_reading(&db, "a", "1");
        let second = insert_reading(&db, "b", "2");
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        let remote = ScriptedRemote::new(
            &[Reply::Status(StatusCode::BAD_GATEWAY)],
            Reply::Status(StatusCode::CREATED),
        );
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            ScriptedProbe::online(),
            remote.clone(),
            RetrySettings {
                preserve_order: true,
                ..fast_retry()
            },
        );

        for _ in 0..3 {
            worker.cycle().await;
        }

        assert_eq!(remote.sent(), vec![first.id, first.id, second.id]);
    }

    #[tokio::test]
    async fn backoff_follows_a_failed_cycle() {
        let queue = Arc::new(DeliveryQueue::<SeatEntry>::new());
        queue.enqueue(SeatEntry {
            id: 1,
            seat1: 1,
            seat2: 0,
            seat3: 0,
            seat4: 0,
        });
        let worker = Worker::new(
            queue,
            shared_db(),
            ScriptedProbe::new(&[], false),
            ScriptedRemote::accepting(),
            RetrySettings {
                backoff: Duration::from_millis(30),
                ..fast_retry()
            },
        );

        let start = std::time::Instant::now();
        assert_eq!(worker.cycle().await, Cycle::Offline);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn seats_end_to_end_through_store() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let id = db
            .lock()
            .unwrap()
            .insert_seats(&NewSeats {
                seat1: 3,
                ..Default::default()
            })
            .unwrap();
        queue.enqueue(SeatEntry {
            id,
            seat1: 3,
            seat2: 0,
            seat3: 0,
            seat4: 0,
        });
        let worker = Worker::new(
            queue,
            db.clone(),
            ScriptedProbe::online(),
            ScriptedRemote::accepting(),
            fast_retry(),
        );

        assert_eq!(worker.cycle().await, Cycle::Delivered);
        assert!(db.lock().unwrap().seats(id).unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn recover_enqueues_only_unsynced_rows_in_id_order() {
        let db = shared_db();
        let a = insert_reading(&db, "1", "x");
        let b = insert_reading(&db, "2", "y");
        let c = insert_reading(&db, "3", "z");
        db.lock().unwrap().mark_reading_synced(b.id).unwrap();
        let queue = DeliveryQueue::new();

        assert_eq!(recover::<ReadingEntry>(&db, &queue).unwrap(), 2);

        let first = queue.try_pop().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(first.value1, json!(1));
        assert_eq!(first.value2, json!("x"));
        assert_eq!(queue.try_pop().unwrap().id, c.id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn run_keeps_delivering_in_the_background() {
        let db = shared_db();
        let queue = Arc::new(DeliveryQueue::new());
        let entry = insert_reading(&db, "1", "2");
        let worker = Worker::new(
            queue.clone(),
            db.clone(),
            ScriptedProbe::new(&[false], true),
            ScriptedRemote::accepting(),
            fast_retry(),
        );
        let handle = tokio::spawn(worker.run());

        queue.enqueue(entry.clone());
        for _ in 0..200 {
            if synced(&db, entry.id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();

        assert!(synced(&db, entry.id));
        assert!(queue.is_empty());
    }

    #[actix_web::test]
    async fn posted_seats_reach_the_remote_and_get_synced() {
        let state = AppState {
            db: shared_db(),
            readings: Arc::new(DeliveryQueue::new()),
            seats: Arc::new(DeliveryQueue::new()),
        };
        let app = test::init_service(
            App::new()
                .app_data(Data::new(state.clone()))
                .configure(api::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/table")
            .set_json(json!({"seat1": 3}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let rows = state.db.lock().unwrap().unsynced_seats().unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!((row.seat1, row.seat2, row.seat3, row.seat4), (3, 0, 0, 0));
        assert_eq!(state.seats.len(), 1);

        let remote = ScriptedRemote::accepting();
        let worker = Worker::new(
            state.seats.clone(),
            state.db.clone(),
            ScriptedProbe::online(),
            remote.clone(),
            fast_retry(),
        );
        assert_eq!(worker.cycle().await, Cycle::Delivered);

        assert_eq!(remote.sent(), vec![row.id]);
        assert_eq!(
            remote.bodies.lock().unwrap().clone(),
            vec![json!({"seat1": 3, "seat2": 0, "seat3": 0, "seat4": 0})]
        );
        assert!(state.db.lock().unwrap().seats(row.id).unwrap().unwrap().synced);
        assert!(state.seats.is_empty());
    }

    #[actix_web::test]
    async fn supervise_restarts_a_panicked_worker() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();

        supervise("test", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    panic!("worker crashed");
                }
            }
        })
        .await;

        assert_eq!(starts.load(Ordering::SeqCst), 3);
    }
}
