use super::{room, sample_rooms, sample_store};
use crate::error::StoreError;
use crate::storage::{LockCookie, RecordId};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const BLOCKED: Duration = Duration::from_millis(150);
const GENEROUS: Duration = Duration::from_secs(10);

#[test]
fn test_second_locker_waits_for_unlock() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let id = RecordId(1);

    let first = store.lock(id).unwrap();
    assert_eq!(first, LockCookie(1000));

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let cookie = store.lock(id).unwrap();
            tx.send(cookie).unwrap();
        })
    };

    assert!(rx.recv_timeout(BLOCKED).is_err(), "second lock returned early");
    store.unlock(id, first).unwrap();

    let second = rx.recv_timeout(GENEROUS).unwrap();
    waiter.join().unwrap();
    assert_eq!(second, LockCookie(1001));
    store.unlock(id, second).unwrap();
}

#[test]
fn test_locks_on_different_records_do_not_block() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let held = store.lock(RecordId(0)).unwrap();

    let other = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.lock(RecordId(2)))
    };
    let cookie = other.join().unwrap().unwrap();
    assert_ne!(cookie, held);
    store.unlock(RecordId(2), cookie).unwrap();
    store.unlock(RecordId(0), held).unwrap();
}

#[test]
fn test_reads_and_finds_ignore_record_locks() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let cookie = store.lock(RecordId(0)).unwrap();

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            (
                store.read(RecordId(0)).unwrap(),
                store.find(&["pal"]).unwrap(),
            )
        })
    };
    let (values, found) = reader.join().unwrap();
    assert_eq!(values, sample_rooms()[0]);
    assert_eq!(found, vec![RecordId(0)]);
    store.unlock(RecordId(0), cookie).unwrap();
}

#[test]
fn test_cookies_are_unique_under_contention() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);

    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut cookies = Vec::new();
                for i in 0..30 {
                    let id = RecordId(((worker + i) % 3) as u32);
                    let cookie = store.lock(id).unwrap();
                    cookies.push(cookie);
                    store.unlock(id, cookie).unwrap();
                }
                cookies
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for cookie in worker.join().unwrap() {
            assert!(seen.insert(cookie), "cookie {} handed out twice", cookie);
        }
    }
    assert_eq!(seen.len(), 180);
}

#[test]
fn test_concurrent_updates_are_serialised_per_record() {
    let (_dir, path, store) = sample_store();
    let store = Arc::new(store);
    let id = RecordId(2);

    // Each worker bumps the size field under the lock; lost updates would
    // leave the final count short
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..25 {
                    let cookie = store.lock(id).unwrap();
                    let mut values = store.read(id).unwrap();
                    let size: u32 = values[2].parse().unwrap();
                    values[2] = (size + 1).to_string();
                    store.update(id, &values, cookie).unwrap();
                    store.unlock(id, cookie).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(store.read(id).unwrap()[2], "104");
    let reopened = crate::storage::Store::open(&path).unwrap();
    assert_eq!(reopened.read(id).unwrap()[2], "104");
}

#[test]
fn test_creates_from_many_threads_get_distinct_slots() {
    let (_dir, path, store) = sample_store();
    let store = Arc::new(store);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        let name = format!("Annex {}-{}", worker, i);
                        store.create(&room(&name, "Whoville", "1", "")).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for worker in workers {
        ids.extend(worker.join().unwrap());
    }
    assert_eq!(ids.len(), 20);
    assert_eq!(store.record_count(), 23);

    let reopened = crate::storage::Store::open(&path).unwrap();
    assert_eq!(reopened.record_count(), 23);
    assert_eq!(reopened.find(&["annex"]).unwrap().len(), 20);
}

#[test]
fn test_delete_releases_waiters_as_not_found() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let id = RecordId(0);
    let cookie = store.lock(id).unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.lock(id))
    };
    thread::sleep(BLOCKED);

    store.delete(id, cookie).unwrap();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(StoreError::RecordNotFound(_))
    ));
    // The deleter lets go of the tombstone like any other lock
    store.unlock(id, cookie).unwrap();
    assert!(matches!(store.lock(id), Err(StoreError::RecordNotFound(_))));
}

#[test]
fn test_shutdown_interrupts_blocked_lockers() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let id = RecordId(0);
    store.lock(id).unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.lock(id))
    };
    thread::sleep(BLOCKED);

    store.shutdown();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(StoreError::Interrupted(_))
    ));
}

#[test]
fn test_reload_interrupts_blocked_lockers() {
    let (_dir, _path, store) = sample_store();
    let store = Arc::new(store);
    let id = RecordId(0);
    store.lock(id).unwrap();

    let waiter = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.lock(id))
    };
    thread::sleep(BLOCKED);

    store.reload().unwrap();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(StoreError::Interrupted(_))
    ));
    // Fresh cache, fresh numbers, nothing locked
    assert_eq!(store.live_count(), 3);
    assert!(!store.is_locked(RecordId(3)).unwrap());
}
