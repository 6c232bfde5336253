use crate::errors::{FabricError, Result};
use crate::services::logger::Logger;
use crate::transport::{Connection, Connector};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub size: usize,
    pub overflow: usize,
    /// Default acquisition timeout used by `acquire`.
    pub timeout: Duration,
    /// How long to wait for an idle connection before considering a new one.
    pub avail_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub live: usize,
    pub created: usize,
    pub destroyed: usize,
    pub hijacked: usize,
    pub available_permits: usize,
}

enum Waited {
    Idle(Option<Connection>),
    Admitted,
    Closed,
    TimedOut,
}

/// Bounded cache of connections to one host/user, with overflow admission.
///
/// Every live connection holds one admission permit; at most `size` of them
/// are cached idle, the rest (overflow) are destroyed on release.
pub struct ConnectionPool {
    host: String,
    user: String,
    settings: PoolSettings,
    connector: Arc<dyn Connector>,
    logger: Logger,
    idle_tx: Mutex<Option<mpsc::Sender<Connection>>>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    admission: Semaphore,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    hijacked: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(
        host: &str,
        user: &str,
        settings: PoolSettings,
        connector: Arc<dyn Connector>,
        logger: Logger,
    ) -> Self {
        // mpsc needs a non-zero bound; a zero-sized pool never enqueues.
        let (idle_tx, idle_rx) = mpsc::channel(settings.size.max(1));
        let admission = Semaphore::new(settings.size + settings.overflow);
        Self {
            host: host.to_string(),
            user: user.to_string(),
            settings,
            connector,
            logger: logger.child("pool"),
            idle_tx: Mutex::new(Some(idle_tx)),
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            admission,
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            hijacked: AtomicUsize::new(0),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    fn sender(&self) -> Option<mpsc::Sender<Connection>> {
        self.idle_tx
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    fn closed_error(&self) -> FabricError {
        FabricError::PoolClosed {
            host: self.host.clone(),
        }
    }

    pub async fn acquire(&self) -> Result<Connection> {
        self.acquire_timeout(self.settings.timeout).await
    }

    /// Tiered acquisition: an idle connection right away, then a short wait
    /// for one to be released, then a race between a released connection, a
    /// free admission permit (new connection) and the deadline.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Connection> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let (path, result) = self.acquire_inner(deadline).await;
        self.logger.debug(
            "acquire",
            Some(&serde_json::json!({
                "host": self.host,
                "path": path,
                "elapsed_us": started.elapsed().as_micros() as u64,
                "ok": result.is_ok(),
            })),
        );
        result.map_err(|err| match err {
            FabricError::PoolTimeout { host, .. } => FabricError::PoolTimeout {
                host,
                waited: started.elapsed(),
            },
            other => other,
        })
    }

    async fn acquire_inner(
        &self,
        deadline: tokio::time::Instant,
    ) -> (&'static str, Result<Connection>) {
        let timed_out = || FabricError::PoolTimeout {
            host: self.host.clone(),
            waited: Duration::ZERO,
        };
        if self.is_closed() {
            return ("closed", Err(self.closed_error()));
        }

        let waited = {
            let mut idle = match tokio::time::timeout_at(deadline, self.idle_rx.lock()).await {
                Ok(guard) => guard,
                Err(_) => return ("timeout", Err(timed_out())),
            };

            match idle.try_recv() {
                Ok(conn) => return ("short-circuit", self.checked(conn)),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return ("closed", Err(self.closed_error()))
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            let avail_deadline = std::cmp::min(
                tokio::time::Instant::now() + self.settings.avail_wait,
                deadline,
            );
            match tokio::time::timeout_at(avail_deadline, idle.recv()).await {
                Ok(Some(conn)) => return ("avail1", self.checked(conn)),
                Ok(None) => return ("closed", Err(self.closed_error())),
                Err(_) => {}
            }

            tokio::select! {
                received = idle.recv() => Waited::Idle(received),
                permit = self.admission.acquire() => match permit {
                    Ok(permit) => {
                        permit.forget();
                        Waited::Admitted
                    }
                    Err(_) => Waited::Closed,
                },
                _ = tokio::time::sleep_until(deadline) => Waited::TimedOut,
            }
        };

        match waited {
            Waited::Idle(Some(conn)) => ("avail2", self.checked(conn)),
            Waited::Idle(None) | Waited::Closed => ("closed", Err(self.closed_error())),
            Waited::TimedOut => ("timeout", Err(timed_out())),
            Waited::Admitted => ("create", self.create().await),
        }
    }

    /// Hands out a dequeued connection unless the pool closed meanwhile.
    fn checked(&self, conn: Connection) -> Result<Connection> {
        if self.is_closed() {
            self.destroy(conn);
            return Err(self.closed_error());
        }
        Ok(conn)
    }

    async fn create(&self) -> Result<Connection> {
        match self.connector.connect(&self.host, &self.user).await {
            Ok(conn) => {
                self.created.fetch_add(1, Ordering::SeqCst);
                Ok(conn)
            }
            Err(err) => {
                self.admission.add_permits(1);
                self.logger.warn(
                    "connect failed",
                    Some(&serde_json::json!({"host": self.host, "error": err.to_string()})),
                );
                Err(err)
            }
        }
    }

    /// Acquires a connection that will never come back to this pool. Its
    /// admission permit stays consumed for the lifetime of the pool.
    pub async fn hijack(&self) -> Result<Connection> {
        let conn = self.acquire().await?;
        self.hijacked.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }

    /// Returns a connection for reuse; overflow connections, and anything
    /// released after close, are destroyed.
    pub fn release(&self, conn: Option<Connection>) {
        let Some(conn) = conn else {
            return;
        };
        let sender = match self.sender() {
            Some(sender) if self.settings.size > 0 => sender,
            _ => {
                self.destroy(conn);
                return;
            }
        };
        match sender.try_send(conn) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(conn))
            | Err(mpsc::error::TrySendError::Closed(conn)) => self.destroy(conn),
        }
    }

    fn destroy(&self, mut conn: Connection) {
        conn.close();
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.admission.add_permits(1);
    }

    /// Closes every idle connection. Safe to call more than once.
    pub async fn close(&self) {
        let sender = self
            .idle_tx
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        self.admission.close();
        let mut idle = self.idle_rx.lock().await;
        idle.close();
        let mut closed = 0usize;
        while let Ok(conn) = idle.try_recv() {
            self.destroy(conn);
            closed += 1;
        }
        self.logger.debug(
            "closed",
            Some(&serde_json::json!({"host": self.host, "idle_closed": closed})),
        );
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self
            .sender()
            .map(|s| s.max_capacity() - s.capacity())
            .unwrap_or(0);
        let created = self.created.load(Ordering::SeqCst);
        let destroyed = self.destroyed.load(Ordering::SeqCst);
        PoolStats {
            idle,
            live: created.saturating_sub(destroyed),
            created,
            destroyed,
            hijacked: self.hijacked.load(Ordering::SeqCst),
            available_permits: self.admission.available_permits(),
        }
    }
}

/// A connection checked out of a pool. Dropping it returns the connection;
/// if dropped while unwinding from a panic, the connection is destroyed
/// instead since its session state is unknown.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection>,
}

impl PooledConnection {
    pub async fn acquire(pool: &Arc<ConnectionPool>) -> Result<Self> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool: pool.clone(),
            conn: Some(conn),
        })
    }

    /// Destroys the connection instead of returning it for reuse.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.destroy(conn);
        }
    }

    pub fn connection(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| FabricError::session("connection already returned"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if std::thread::panicking() {
            self.pool.destroy(conn);
        } else {
            self.pool.release(Some(conn));
        }
    }
}
