use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

/// Fixed set of SQLite connections opened up front. A unit of work holds a
/// `PooledConnection` for its duration; dropping it hands the connection back.
pub struct Pool {
    idle: Mutex<Vec<Connection>>,
    returned: Condvar,
    acquire_timeout: Duration,
}

impl Pool {
    pub fn new(connections: Vec<Connection>, acquire_timeout: Duration) -> Self {
        Pool { idle: Mutex::new(connections), returned: Condvar::new(), acquire_timeout }
    }

    /// The idle list is only pushed or popped under the lock, so a panic
    /// elsewhere while holding it cannot leave it half-updated.
    fn idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn acquire(&self) -> StoreResult<PooledConnection<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut idle = self.idle();
        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection { pool: self, conn: Some(conn) });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::PoolTimeout(self.acquire_timeout.as_millis() as u64));
            }
            let (guard, _) = self.returned.wait_timeout(idle, deadline - now).unwrap_or_else(|e| e.into_inner());
            idle = guard;
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    fn release(&self, conn: Connection) {
        self.idle().push(conn);
        self.returned.notify_one();
    }
}

pub struct PooledConnection<'a> {
    pool: &'a Pool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
