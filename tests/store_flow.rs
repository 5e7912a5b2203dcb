use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use goalPlanner::models::event::{Event, EventTags};
use goalPlanner::store::{
    encode_events, DocumentBackend, EventStore, FileBackend, QueuedStore, StoreError,
};

fn sample(id: u64, text: &str) -> Event {
    Event {
        id,
        text: text.to_string(),
        start: Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 2, 10, 10, 30, 0).unwrap(),
        tags: Some(EventTags {
            color: Some("#d50000".to_string()),
            progress: Some(40),
        }),
        overlap: id % 2 == 0,
    }
}

/// Writes one byte at a time and yields in between, so overlapping writes
/// would leave a spliced document behind.
#[derive(Default)]
struct SlowBackend {
    document: StdMutex<Vec<u8>>,
    writers: AtomicUsize,
    max_writers: AtomicUsize,
}

#[async_trait]
impl DocumentBackend for SlowBackend {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(Some(self.document.lock().unwrap().clone()))
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let active = self.writers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writers.fetch_max(active, Ordering::SeqCst);
        self.document.lock().unwrap().clear();
        for byte in bytes {
            self.document.lock().unwrap().push(*byte);
            tokio::task::yield_now().await;
        }
        self.writers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn file_round_trip_preserves_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("events.json");
    let events = vec![sample(1, "Write chapter"), sample(2, "Review \"draft\"")];

    let store = QueuedStore::spawn(FileBackend::new(&path));
    store.save(&events).await.unwrap();
    drop(store);

    let reopened = QueuedStore::spawn(FileBackend::new(&path));
    assert_eq!(reopened.load().await.unwrap(), events);
}

#[tokio::test]
async fn missing_file_loads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = QueuedStore::spawn(FileBackend::new(dir.path().join("absent.json")));
    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    std::fs::write(&path, b"{ not events").unwrap();

    let store = QueuedStore::spawn(FileBackend::new(&path));
    assert!(matches!(store.load().await, Err(StoreError::Decode(_))));
}

#[tokio::test]
async fn save_leaves_no_temp_files_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    let store = QueuedStore::spawn(FileBackend::new(&path));
    store.save(&[sample(1, "a")]).await.unwrap();
    store.save(&[sample(2, "b")]).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["events.json".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_never_splice() {
    let backend = Arc::new(SlowBackend::default());
    let store = QueuedStore::spawn(backend.clone());

    let first = vec![sample(1, "first collection"), sample(3, "still first")];
    let second = vec![sample(2, "second collection with a much longer text body")];

    let a = {
        let store = store.clone();
        let events = first.clone();
        tokio::spawn(async move { store.save(&events).await })
    };
    let b = {
        let store = store.clone();
        let events = second.clone();
        tokio::spawn(async move { store.save(&events).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let document = backend.document.lock().unwrap().clone();
    assert!(
        document == encode_events(&first).unwrap() || document == encode_events(&second).unwrap(),
        "stored document is neither complete collection"
    );
    assert_eq!(backend.max_writers.load(Ordering::SeqCst), 1);

    let loaded = store.load().await.unwrap();
    assert!(loaded == first || loaded == second);
}
