//! Tests for the non-blocking connect handshake

mod common;

use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use common::MockConnector;
use pglink::{Conn, Error, Opts, PollingStatus};
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;

fn opts() -> Opts {
    Opts::try_from("host=localhost user=postgres dbname=test application_name=tests").unwrap()
}

struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[tokio::test]
async fn test_connect_immediately() {
    let connector = MockConnector::new(vec![]);
    let conn = Conn::connect(&connector, &opts(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(conn.is_alive());
    assert_eq!(connector.polls(), 1);
    assert_eq!(connector.conninfos(), vec![opts().conninfo()]);

    conn.query("SELECT 1").await.unwrap();
    assert_eq!(connector.server(0).log(), vec!["SELECT 1"]);
}

#[tokio::test]
async fn test_connect_waits_for_readable() {
    let connector = Arc::new(MockConnector::new(vec![
        PollingStatus::Writing,
        PollingStatus::Reading,
    ]));

    // Each server message wakes the socket: first the pending write, then
    // the pending read.
    let server = tokio::spawn({
        let connector = Arc::clone(&connector);
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.send_from_server(0);
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.send_from_server(0);
        }
    });

    let conn = Conn::connect(&*connector, &opts(), &CancellationToken::new())
        .await
        .unwrap();
    server.await.unwrap();

    assert!(conn.is_alive());
    assert_eq!(connector.polls(), 3);
}

#[tokio::test]
async fn test_connect_failure_carries_driver_message() {
    let connector = MockConnector::new(vec![PollingStatus::Reading, PollingStatus::Failed])
        .with_error("FATAL:  password authentication failed for user \"postgres\"");

    let opts = opts();
    let cancel = CancellationToken::new();
    let (result, ()) = tokio::join!(
        Conn::connect(&connector, &opts, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.send_from_server(0);
        }
    );
    let err = result.err().unwrap();
    assert!(matches!(
        err,
        Error::Connection(ref msg) if msg == "FATAL:  password authentication failed for user \"postgres\""
    ));
    assert!(err.is_connection_broken());
    assert_eq!(connector.polls(), 2);
}

#[tokio::test]
async fn test_writing_waits_for_next_event() {
    let connector = MockConnector::new(vec![PollingStatus::Writing]);

    let opts = opts();
    let cancel = CancellationToken::new();
    let (conn, ()) = tokio::join!(
        Conn::connect(&connector, &opts, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(connector.polls(), 1);
            connector.send_from_server(0);
        }
    );
    assert!(conn.is_ok());
    assert_eq!(connector.polls(), 2);
}

#[tokio::test]
async fn test_connector_refusal() {
    let connector = MockConnector::new(vec![]).refusing("out of memory");

    let err = Conn::connect(&connector, &opts(), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "Connection error: Could not connect to PostgreSQL server: out of memory"
    );
    assert_eq!(connector.polls(), 0);
}

#[tokio::test]
async fn test_cancel_during_handshake() {
    let connector = MockConnector::new(vec![PollingStatus::Reading]);
    let cancel = CancellationToken::new();

    let canceller = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    });

    let err = Conn::connect(&connector, &opts(), &cancel).await.err().unwrap();
    canceller.await.unwrap();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(connector.polls(), 1);

    // The socket is still open but no longer registered with the reactor.
    let fd = AsyncFd::new(Fd(connector.socket_fd(0))).unwrap();
    drop(fd);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let connector = MockConnector::new(vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Conn::connect(&connector, &opts(), &cancel).await.err().unwrap();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(connector.polls(), 0);
}

#[tokio::test]
async fn test_socket_deregistered_after_success() {
    let connector = MockConnector::new(vec![PollingStatus::Reading]);
    let opts = opts();
    let cancel = CancellationToken::new();
    let (conn, ()) = tokio::join!(
        Conn::connect(&connector, &opts, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connector.send_from_server(0);
        }
    );
    assert!(conn.is_ok());

    let fd = AsyncFd::new(Fd(connector.socket_fd(0))).unwrap();
    drop(fd);
}

#[tokio::test]
async fn test_socket_deregistered_after_failure() {
    let connector = MockConnector::new(vec![PollingStatus::Failed]);
    assert!(
        Conn::connect(&connector, &opts(), &CancellationToken::new())
            .await
            .is_err()
    );

    let fd = AsyncFd::new(Fd(connector.socket_fd(0))).unwrap();
    drop(fd);
}

#[tokio::test]
async fn test_buffering_follows_opts() {
    let connector = MockConnector::new(vec![]);
    let mut opts = opts();
    opts.buffer_results = true;

    let conn = Conn::connect(&connector, &opts, &CancellationToken::new())
        .await
        .unwrap();
    assert!(conn.is_buffering_results());
}
