//! Bounded connection pool.
//!
//! One mutex guards the idle list and the accounting; a condition
//! variable parks waiters when the pool is at capacity. Connections are
//! reset on release: open transactions roll back, LISTEN registrations
//! and queued notifications are cleared.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::opts::Opts;

type AfterConnect = Box<dyn Fn(&mut Conn) -> Result<()> + Send + Sync>;

struct PoolState {
    idle: Vec<Conn>,
    total: usize,
}

struct PoolInner {
    opts: Opts,
    max: usize,
    state: Mutex<PoolState>,
    available: Condvar,
    closed: AtomicBool,
    after_connect: Option<AfterConnect>,
}

/// A bounded pool of connections.
///
/// Cloning the handle is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool over the given options; `opts.pool_max_size` bounds
    /// the number of live connections.
    pub fn new(opts: Opts) -> Self {
        Self::with_after_connect(opts, None)
    }

    /// Create a pool with a hook that runs on every fresh connection
    /// (session settings, type loading, …).
    pub fn with_after_connect(opts: Opts, after_connect: Option<AfterConnect>) -> Self {
        let max = opts.pool_max_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                opts,
                max,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                }),
                available: Condvar::new(),
                closed: AtomicBool::new(false),
                after_connect,
            }),
        }
    }

    /// Parse a connection string and build a pool from it.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let opts = Opts::parse(dsn)?.resolve()?;
        Ok(Self::new(opts))
    }

    /// Acquire a connection, blocking while the pool is exhausted.
    ///
    /// Policy: pop an idle connection, else create one below the cap,
    /// else wait for a release.
    pub fn acquire(&self) -> Result<PooledConn> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| Error::PoolClosed)?;

        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(Error::PoolClosed);
            }

            if let Some(conn) = state.idle.pop() {
                drop(state);
                return Ok(PooledConn {
                    pool: self.clone(),
                    conn: Some(conn),
                });
            }

            if state.total < self.inner.max {
                // Reserve the slot, connect outside the lock
                state.total += 1;
                drop(state);
                return match self.connect_one() {
                    Ok(conn) => Ok(PooledConn {
                        pool: self.clone(),
                        conn: Some(conn),
                    }),
                    Err(err) => {
                        self.forget_one();
                        Err(err)
                    }
                };
            }

            state = self
                .inner
                .available
                .wait(state)
                .map_err(|_| Error::PoolClosed)?;
        }
    }

    fn connect_one(&self) -> Result<Conn> {
        let mut conn = Conn::connect(self.inner.opts.clone())?;
        if let Some(hook) = &self.inner.after_connect {
            hook(&mut conn)?;
        }
        Ok(conn)
    }

    /// Drop a reserved or dead slot and wake one waiter.
    fn forget_one(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.total = state.total.saturating_sub(1);
        }
        self.inner.available.notify_one();
    }

    /// Return a connection, resetting its session state first.
    fn release(&self, mut conn: Conn) {
        if self.inner.closed.load(Ordering::SeqCst) {
            drop(conn);
            self.forget_one();
            self.inner.available.notify_all();
            return;
        }

        if !conn.is_alive() {
            drop(conn);
            self.forget_one();
            return;
        }

        if let Err(err) = Self::reset(&mut conn) {
            tracing::debug!(error = %err, "discarding connection after failed reset");
            drop(conn);
            self.forget_one();
            return;
        }

        if let Ok(mut state) = self.inner.state.lock() {
            state.idle.push(conn);
        }
        self.inner.available.notify_one();
    }

    /// Transaction-aware reset: roll back open or failed transactions,
    /// unlisten, and drop queued notifications.
    fn reset(conn: &mut Conn) -> Result<()> {
        if conn.transaction_status().in_transaction() {
            conn.exec("rollback")?;
        }
        if conn.listening_channels().next().is_some() {
            conn.unlisten_all()?;
        }
        while conn.next_notification().is_some() {}
        Ok(())
    }

    /// Close the pool: fail pending acquires, wait for every connection
    /// to come back, then close them.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.available.notify_all();

        let mut state = match self.inner.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        // Wait until everything checked out has been released
        while state.total > state.idle.len() {
            state = match self.inner.available.wait(state) {
                Ok(state) => state,
                Err(_) => return,
            };
        }

        for conn in state.idle.drain(..) {
            let _ = conn.close();
        }
        state.total = 0;
    }

    /// True once [`Self::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// (live connections, idle connections, maximum).
    pub fn status(&self) -> (usize, usize, usize) {
        match self.inner.state.lock() {
            Ok(state) => (state.total, state.idle.len(), self.inner.max),
            Err(_) => (0, 0, self.inner.max),
        }
    }
}

/// A pool checkout; derefs to [`Conn`] and releases on drop.
pub struct PooledConn {
    pool: Pool,
    conn: Option<Conn>,
}

impl PooledConn {
    /// Permanently detach the connection from the pool.
    pub fn detach(mut self) -> Conn {
        let conn = self.conn.take().expect("connection already taken");
        self.pool.forget_one();
        conn
    }
}

impl Deref for PooledConn {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("connection already taken")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("connection already taken")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_bounds() {
        let mut opts = Opts::default();
        opts.user = "u".into();
        opts.pool_max_size = 3;
        let pool = Pool::new(opts);

        let (total, idle, max) = pool.status();
        assert_eq!(total, 0);
        assert_eq!(idle, 0);
        assert_eq!(max, 3);
    }

    #[test]
    fn acquire_on_closed_pool_fails() {
        let mut opts = Opts::default();
        opts.user = "u".into();
        let pool = Pool::new(opts);
        pool.close();
        assert!(matches!(pool.acquire(), Err(Error::PoolClosed)));
    }

    #[test]
    fn max_is_at_least_one() {
        let mut opts = Opts::default();
        opts.user = "u".into();
        opts.pool_max_size = 0;
        let pool = Pool::new(opts);
        assert_eq!(pool.status().2, 1);
    }
}
