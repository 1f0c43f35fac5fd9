//! In-memory driver for integration tests.
//!
//! `MockServer` behaves like a single PostgreSQL socket: one command at a
//! time, with a result holding the command slot until it is exhausted or
//! dropped. Every command is recorded in order.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use pglink::error::Result;
use pglink::{
    Conn, Connecting, Connector, Driver, Error, ErrorFields, Notification, PollingStatus,
    RawNotifications, RawResult, RawStatement, Row, Value,
};
use tokio::sync::{OwnedMutexGuard, mpsc};

/// One scripted result in a chain.
#[derive(Debug, Clone)]
pub enum MockSet {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Command(u64),
}

impl MockSet {
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        MockSet::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// A single `int` column.
    pub fn ints(column: &str, values: impl IntoIterator<Item = i64>) -> Self {
        Self::rows(
            &[column],
            values.into_iter().map(|v| vec![Value::Int(v)]).collect(),
        )
    }
}

pub struct MockServer {
    pid: u32,
    slot: Arc<tokio::sync::Mutex<()>>,
    log: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Vec<MockSet>>>,
    errors: Mutex<HashMap<String, ErrorFields>>,
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<Notification>>>,
    rows_fetched: AtomicUsize,
    alive: AtomicBool,
    last_used: Mutex<Instant>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pid: 4242,
            slot: Arc::new(tokio::sync::Mutex::new(())),
            log: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            rows_fetched: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            last_used: Mutex::new(Instant::now()),
        })
    }

    /// Results returned for `sql`, one per statement.
    pub fn script(&self, sql: &str, sets: Vec<MockSet>) {
        self.scripts.lock().unwrap().insert(sql.to_string(), sets);
    }

    /// Make `sql` fail with a server error.
    pub fn fail(&self, sql: &str, fields: ErrorFields) {
        self.errors.lock().unwrap().insert(sql.to_string(), fields);
    }

    /// Commands received so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.log().iter().filter(|c| *c == command).count()
    }

    pub fn rows_fetched(&self) -> usize {
        self.rows_fetched.load(Ordering::SeqCst)
    }

    pub fn is_slot_free(&self) -> bool {
        self.slot.try_lock().is_ok()
    }

    /// Simulate losing the connection.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.channels.lock().unwrap().clear();
    }

    async fn acquire_slot(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.slot).lock_owned().await
    }

    fn record(&self, command: String) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::Connection("server closed the connection".into()));
        }
        *self.last_used.lock().unwrap() = Instant::now();
        let error = self.errors.lock().unwrap().get(&command).cloned();
        self.log.lock().unwrap().push(command);
        match error {
            Some(fields) => Err(Error::Server(fields)),
            None => Ok(()),
        }
    }

    fn script_for(&self, sql: &str) -> Option<Vec<MockSet>> {
        self.scripts.lock().unwrap().get(sql).cloned()
    }

    async fn run(self: &Arc<Self>, sql: &str, params: &[Value]) -> Result<MockResult> {
        let slot = self.acquire_slot().await;
        self.record(sql.to_string())?;
        let sets = match self.script_for(sql) {
            Some(sets) => sets,
            None if params.is_empty() => vec![MockSet::Command(0)],
            None => {
                let columns: Vec<String> = (1..=params.len()).map(|i| format!("${}", i)).collect();
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                vec![MockSet::rows(&columns, vec![params.to_vec()])]
            }
        };
        Ok(MockResult::new(sets, Arc::clone(self), slot))
    }
}

pub struct MockDriver {
    server: Arc<MockServer>,
}

impl MockDriver {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self { server }
    }
}

/// A streaming connection over a fresh mock server.
pub fn connection() -> (Conn<MockDriver>, Arc<MockServer>) {
    let server = MockServer::new();
    (Conn::new(MockDriver::new(Arc::clone(&server)), false), server)
}

impl Driver for MockDriver {
    type Result = MockResult;
    type Statement = MockStatement;
    type Notifications = MockNotifications;

    async fn query(&self, sql: &str) -> Result<MockResult> {
        let slot = self.server.acquire_slot().await;
        self.server.record(sql.to_string())?;
        let sets = self
            .server
            .script_for(sql)
            .unwrap_or_else(|| vec![MockSet::Command(0)]);
        Ok(MockResult::new(sets, Arc::clone(&self.server), slot))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<MockResult> {
        self.server.run(sql, params).await
    }

    async fn prepare(&self, sql: &str) -> Result<MockStatement> {
        let _slot = self.server.acquire_slot().await;
        self.server.record(format!("PREPARE {}", sql))?;
        Ok(MockStatement {
            server: Arc::clone(&self.server),
            sql: sql.to_string(),
        })
    }

    async fn notify(&self, channel: &str, payload: &str) -> Result<MockResult> {
        let slot = self.server.acquire_slot().await;
        self.server
            .record(format!("NOTIFY {}, {}", channel, payload))?;
        if let Some(tx) = self.server.channels.lock().unwrap().get(channel) {
            let _ = tx.send(Notification::new(channel, self.server.pid, payload));
        }
        Ok(MockResult::new(
            vec![MockSet::Command(0)],
            Arc::clone(&self.server),
            slot,
        ))
    }

    async fn listen(&self, channel: &str) -> Result<MockNotifications> {
        let _slot = self.server.acquire_slot().await;
        self.server.record(format!("LISTEN {}", channel))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.server
            .channels
            .lock()
            .unwrap()
            .insert(channel.to_string(), tx);
        Ok(MockNotifications(rx))
    }

    async fn unlisten(&self, channel: &str) -> Result<()> {
        let _slot = self.server.acquire_slot().await;
        self.server.record(format!("UNLISTEN {}", channel))?;
        self.server.channels.lock().unwrap().remove(channel);
        Ok(())
    }

    fn quote_string(&self, data: &str) -> String {
        format!("'{}'", data.replace('\'', "''"))
    }

    fn quote_name(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn is_alive(&self) -> bool {
        self.server.alive.load(Ordering::SeqCst)
    }

    fn last_used_at(&self) -> Instant {
        *self.server.last_used.lock().unwrap()
    }

    fn close(&self) {
        self.server.kill();
    }
}

pub struct MockResult {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<Value>>,
    affected: Option<u64>,
    rest: VecDeque<MockSet>,
    server: Arc<MockServer>,
    _slot: OwnedMutexGuard<()>,
}

impl MockResult {
    fn new(sets: Vec<MockSet>, server: Arc<MockServer>, slot: OwnedMutexGuard<()>) -> Self {
        let mut rest: VecDeque<MockSet> = sets.into();
        let first = rest.pop_front().unwrap_or(MockSet::Command(0));
        Self::from_set(first, rest, server, slot)
    }

    fn from_set(
        set: MockSet,
        rest: VecDeque<MockSet>,
        server: Arc<MockServer>,
        slot: OwnedMutexGuard<()>,
    ) -> Self {
        let (columns, rows, affected) = match set {
            MockSet::Rows { columns, rows } => (columns, rows.into(), None),
            MockSet::Command(n) => (Vec::new(), VecDeque::new(), Some(n)),
        };
        Self {
            columns: columns.into(),
            rows,
            affected,
            rest,
            server,
            _slot: slot,
        }
    }
}

impl RawResult for MockResult {
    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn rows_affected(&self) -> Option<u64> {
        self.affected
    }

    async fn fetch_row(&mut self) -> Result<Option<Row>> {
        tokio::task::yield_now().await;
        let Some(values) = self.rows.pop_front() else {
            return Ok(None);
        };
        self.server.rows_fetched.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Row::new(Arc::clone(&self.columns), values)))
    }

    async fn next_result(mut self) -> Result<Option<Self>> {
        tokio::task::yield_now().await;
        let Some(next) = self.rest.pop_front() else {
            return Ok(None);
        };
        let rest = std::mem::take(&mut self.rest);
        Ok(Some(Self::from_set(next, rest, self.server, self._slot)))
    }
}

pub struct MockStatement {
    server: Arc<MockServer>,
    sql: String,
}

impl RawStatement for MockStatement {
    type Result = MockResult;

    async fn execute(&self, params: &[Value]) -> Result<MockResult> {
        self.server.run(&self.sql, params).await
    }
}

pub struct MockNotifications(mpsc::UnboundedReceiver<Notification>);

impl RawNotifications for MockNotifications {
    async fn recv(&mut self) -> Option<Notification> {
        self.0.recv().await
    }
}

/// Starts mock connection attempts over Unix socket pairs.
pub struct MockConnector {
    script: Vec<PollingStatus>,
    error: String,
    refuse: Option<String>,
    polls: Arc<AtomicUsize>,
    sockets: Mutex<Vec<(Arc<UnixStream>, UnixStream)>>,
    servers: Mutex<Vec<Arc<MockServer>>>,
    conninfos: Mutex<Vec<String>>,
}

impl MockConnector {
    /// Every attempt polls through `script`, then reports `Ok`.
    pub fn new(script: Vec<PollingStatus>) -> Self {
        Self {
            script,
            error: "connection refused".into(),
            refuse: None,
            polls: Arc::new(AtomicUsize::new(0)),
            sockets: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
            conninfos: Mutex::new(Vec::new()),
        }
    }

    /// Message reported when the script reaches `Failed`.
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = error.into();
        self
    }

    /// Fail before a socket is even opened.
    pub fn refusing(mut self, reason: &str) -> Self {
        self.refuse = Some(reason.into());
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.conninfos.lock().unwrap().len()
    }

    pub fn conninfos(&self) -> Vec<String> {
        self.conninfos.lock().unwrap().clone()
    }

    /// Server behind the `idx`-th attempt.
    pub fn server(&self, idx: usize) -> Arc<MockServer> {
        Arc::clone(&self.servers.lock().unwrap()[idx])
    }

    /// Client-side socket of the `idx`-th attempt.
    pub fn socket_fd(&self, idx: usize) -> RawFd {
        self.sockets.lock().unwrap()[idx].0.as_raw_fd()
    }

    /// Make the `idx`-th attempt's socket readable.
    pub fn send_from_server(&self, idx: usize) {
        use std::io::Write;
        let sockets = self.sockets.lock().unwrap();
        (&sockets[idx].1).write_all(b"R").unwrap();
    }
}

impl Connector for MockConnector {
    type Driver = MockDriver;
    type Connecting = MockConnecting;

    fn start(&self, conninfo: &str) -> std::io::Result<MockConnecting> {
        if let Some(reason) = &self.refuse {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                reason.clone(),
            ));
        }
        self.conninfos.lock().unwrap().push(conninfo.to_string());

        let (client, server_end) = UnixStream::pair()?;
        client.set_nonblocking(true)?;
        let client = Arc::new(client);
        self.sockets
            .lock()
            .unwrap()
            .push((Arc::clone(&client), server_end));

        let server = MockServer::new();
        self.servers.lock().unwrap().push(Arc::clone(&server));

        Ok(MockConnecting {
            socket: client,
            script: self.script.iter().copied().collect(),
            error: self.error.clone(),
            polls: Arc::clone(&self.polls),
            server,
        })
    }
}

pub struct MockConnecting {
    socket: Arc<UnixStream>,
    script: VecDeque<PollingStatus>,
    error: String,
    polls: Arc<AtomicUsize>,
    server: Arc<MockServer>,
}

impl Connecting for MockConnecting {
    type Driver = MockDriver;

    fn socket(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn poll(&mut self) -> PollingStatus {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut buf = [0u8; 16];
        while let Ok(n) = (&*self.socket).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
        self.script.pop_front().unwrap_or(PollingStatus::Ok)
    }

    fn error_message(&self) -> String {
        self.error.clone()
    }

    fn into_driver(self) -> MockDriver {
        MockDriver::new(self.server)
    }
}
