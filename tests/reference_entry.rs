// ReferenceEntry scenario tests.
//
// Each test documents the behavior verified. The core invariants exercised:
// - A fresh entry holds one reference and is not loaded.
// - Every acquire registered before `mark_loaded` resumes with the same
//   resource, in registration order on a single-threaded executor.
// - count == 1 + accepted acquires - releases; the release that reaches zero
//   returns true and fires the unload action exactly once.
use load_ref_cache::ReferenceEntry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct Texture {
    id: u32,
}

type Unloaded = Arc<Mutex<Vec<u32>>>;

fn texture_entry(key: &str) -> (Arc<ReferenceEntry<Arc<Texture>>>, Unloaded) {
    let unloaded: Unloaded = Arc::default();
    let sink = unloaded.clone();
    let entry = ReferenceEntry::new(key, move |t: Arc<Texture>| sink.lock().push(t.id));
    (Arc::new(entry), unloaded)
}

async fn wait_for_waiters<T>(entry: &ReferenceEntry<T>, n: usize) {
    while entry.pending_waiters() < n {
        tokio::task::yield_now().await;
    }
}

// Scenario: create "A" → acquire twice while loading → mark_loaded → release
// three times. Verifies: both suspended acquires resume with the object, the
// first two releases keep it alive, the third unloads it exactly once.
#[tokio::test]
async fn end_to_end_two_waiters_three_releases() {
    let (entry, unloaded) = texture_entry("A");
    assert_eq!(entry.count(), 1);
    assert!(!entry.is_done());

    let w1 = tokio::spawn({
        let e = entry.clone();
        async move { e.acquire().await }
    });
    let w2 = tokio::spawn({
        let e = entry.clone();
        async move { e.acquire().await }
    });
    wait_for_waiters(&entry, 2).await;
    assert_eq!(entry.count(), 3);
    assert!(!entry.is_done());

    let obj = Arc::new(Texture { id: 7 });
    entry.mark_loaded(obj.clone()).unwrap();

    let r1 = w1.await.unwrap().unwrap();
    let r2 = w2.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&r1, &obj));
    assert!(Arc::ptr_eq(&r2, &obj));
    assert_eq!(entry.count(), 3);

    assert!(!entry.release());
    assert!(!entry.release());
    assert!(unloaded.lock().is_empty());
    assert!(entry.release());
    assert_eq!(*unloaded.lock(), vec![7]);

    // No double fire.
    assert!(!entry.release());
    assert_eq!(*unloaded.lock(), vec![7]);
}

// Scenario: two callers acquire a not-yet-loaded entry from worker threads;
// a third party marks it loaded. Verifies: both receive the resource and the
// count is 3 (creator + two acquires).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_on_threads_observe_resource() {
    let (entry, _unloaded) = texture_entry("shared");
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let e = entry.clone();
            tokio::spawn(async move { e.acquire().await })
        })
        .collect();
    wait_for_waiters(&entry, 2).await;

    let loader = {
        let e = entry.clone();
        std::thread::spawn(move || e.mark_loaded(Arc::new(Texture { id: 3 })))
    };
    loader.join().unwrap().unwrap();

    for w in waiters {
        let t = w.await.unwrap().unwrap();
        assert_eq!(t.id, 3);
    }
    assert_eq!(entry.count(), 3);
    assert!(entry.is_done());
}

// Verifies: on a single-threaded executor, suspended acquires resume in the
// order they registered.
#[tokio::test]
async fn waiters_resume_in_registration_order() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (entry, _unloaded) = texture_entry("fifo");
            let order = Arc::new(Mutex::new(Vec::new()));
            let mut tasks = Vec::new();
            for i in 0..4 {
                let e = entry.clone();
                let order = order.clone();
                tasks.push(tokio::task::spawn_local(async move {
                    let t = e.acquire().await.unwrap();
                    order.lock().push(i);
                    t
                }));
                wait_for_waiters(&entry, i + 1).await;
            }

            entry.mark_loaded(Arc::new(Texture { id: 1 })).unwrap();
            for t in tasks {
                assert_eq!(t.await.unwrap().id, 1);
            }
            assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
            assert_eq!(entry.count(), 5);
        })
        .await;
}

// Verifies: acquires issued after the load completes return immediately
// without suspending, and each adds exactly one hold.
#[tokio::test]
async fn acquire_after_load_does_not_suspend() {
    let (entry, _unloaded) = texture_entry("ready");
    entry.mark_loaded(Arc::new(Texture { id: 2 })).unwrap();
    for n in 1..=3 {
        let t = tokio::time::timeout(Duration::from_millis(100), entry.acquire())
            .await
            .expect("acquire of a loaded entry must not wait")
            .unwrap();
        assert_eq!(t.id, 2);
        assert_eq!(entry.count(), 1 + n);
    }
}

// Verifies: a load that never completes leaves acquirers suspended.
#[tokio::test]
async fn acquire_waits_while_load_never_completes() {
    let (entry, _unloaded) = texture_entry("stuck");
    let res = tokio::time::timeout(Duration::from_millis(20), entry.acquire()).await;
    assert!(res.is_err(), "acquire must stay pending without mark_loaded");
    // The timed-out acquire gave its hold back.
    assert_eq!(entry.count(), 1);
}

// Verifies: many threads racing to release never fire the unload action
// twice, and exactly one of them observes the transition to zero.
#[test]
fn racing_releases_unload_once() {
    let unloads = Arc::new(AtomicUsize::new(0));
    let seen = unloads.clone();
    let entry = Arc::new(ReferenceEntry::new("race", move |_t: u64| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    entry.mark_loaded(11).unwrap();

    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    rt.block_on(async {
        for _ in 0..15 {
            entry.acquire().await.unwrap();
        }
    });
    assert_eq!(entry.count(), 16);

    // 16 holds, 24 releases: 8 of them are redundant.
    let handles: Vec<_> = (0..24)
        .map(|_| {
            let e = entry.clone();
            std::thread::spawn(move || e.release())
        })
        .collect();
    let finals = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|unloaded| *unloaded)
        .count();

    assert_eq!(finals, 1);
    assert_eq!(unloads.load(Ordering::SeqCst), 1);
    assert_eq!(entry.count(), 0);
}
