//! Pool integration tests.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{spawn_multi_server, test_opts};
use pglink::{Error, Pool};

fn scripted_pool(port: u16, max: usize) -> Pool {
    let mut opts = test_opts(port);
    opts.pool_max_size = max;
    Pool::new(opts)
}

#[test]
fn acquire_reuses_released_connections() {
    let (port, _server) = spawn_multi_server(|server| {
        server.handshake();
        server.serve_simple_queries();
    });

    let pool = scripted_pool(port, 2);

    let mut conn = pool.acquire().unwrap();
    conn.exec("select 1").unwrap();
    let pid = conn.backend_pid();
    drop(conn);

    let (total, idle, max) = pool.status();
    assert_eq!((total, idle, max), (1, 1, 2));

    // Same connection comes back
    let conn = pool.acquire().unwrap();
    assert_eq!(conn.backend_pid(), pid);
    drop(conn);
}

#[test]
fn third_acquire_blocks_until_release() {
    let (port, _server) = spawn_multi_server(|server| {
        server.handshake();
        server.serve_simple_queries();
    });

    let pool = scripted_pool(port, 2);

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    assert_eq!(pool.status().0, 2);

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let pool = pool.clone();
        let acquired = Arc::clone(&acquired);
        std::thread::spawn(move || {
            let conn = pool.acquire().unwrap();
            acquired.store(true, Ordering::SeqCst);
            drop(conn);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(
        !acquired.load(Ordering::SeqCst),
        "third acquire should block at the cap"
    );

    drop(first);
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));

    drop(second);

    // Pool invariant held throughout: total never exceeded the cap
    let (total, _, max) = pool.status();
    assert!(total <= max);
}

#[test]
fn release_rolls_back_open_transactions() {
    let (port, _server) = spawn_multi_server(|server| {
        server.handshake();
        server.serve_simple_queries();
    });

    let pool = scripted_pool(port, 1);

    let mut conn = pool.acquire().unwrap();
    conn.exec("begin").unwrap();
    assert!(conn.transaction_status().in_transaction());
    drop(conn);

    // The reset rolled back; the recycled connection is idle again
    let conn = pool.acquire().unwrap();
    assert!(!conn.transaction_status().in_transaction());
    drop(conn);
}

#[test]
fn release_clears_listens_and_notifications() {
    let (port, _server) = spawn_multi_server(|server| {
        server.handshake();
        server.serve_simple_queries();
    });

    let pool = scripted_pool(port, 1);

    let mut conn = pool.acquire().unwrap();
    conn.listen("events").unwrap();
    assert_eq!(conn.listening_channels().count(), 1);
    drop(conn);

    let mut conn = pool.acquire().unwrap();
    assert_eq!(conn.listening_channels().count(), 0);
    assert!(conn.next_notification().is_none());
    drop(conn);
}

#[test]
fn dead_connections_are_discarded() {
    let served = Arc::new(AtomicBool::new(false));
    let served_clone = Arc::clone(&served);
    let (port, _server) = spawn_multi_server(move |server| {
        server.handshake();
        if !served_clone.swap(true, Ordering::SeqCst) {
            // First connection: die on the first query
            server.expect(b'Q');
            server.error_response("FATAL", "57P01", "terminating connection");
            server.ready_for_query(b'I');
        } else {
            server.serve_simple_queries();
        }
    });

    let pool = scripted_pool(port, 1);

    let mut conn = pool.acquire().unwrap();
    assert!(conn.exec("select 1").is_err());
    assert!(!conn.is_alive());
    drop(conn);

    // The dead connection freed its slot; a fresh one takes its place
    let mut conn = pool.acquire().unwrap();
    conn.exec("select 1").unwrap();
    drop(conn);
}

#[test]
fn closed_pool_rejects_acquire() {
    let (port, _server) = spawn_multi_server(|server| {
        server.handshake();
        server.serve_simple_queries();
    });

    let pool = scripted_pool(port, 2);
    let conn = pool.acquire().unwrap();
    drop(conn);

    pool.close();
    assert!(pool.is_closed());
    assert!(matches!(pool.acquire(), Err(Error::PoolClosed)));
}
