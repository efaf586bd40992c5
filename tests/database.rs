use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use redwire::connection::RetryPolicy;
use redwire::frame;
use redwire::{Config, ConnectionManager, Error, Generation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const HELLO_3: &[u8] = b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n";
const HELLO_3_AUTH: &[u8] =
    b"*5\r\n$5\r\nHELLO\r\n$1\r\n3\r\n$4\r\nAUTH\r\n$7\r\ndefault\r\n$2\r\npw\r\n";
const HELLO_MAP: &[u8] =
    b"%3\r\n$6\r\nserver\r\n$5\r\nredis\r\n$7\r\nversion\r\n$5\r\n7.2.4\r\n$5\r\nproto\r\n:3\r\n";
const UNKNOWN_HELLO: &[u8] = b"-ERR unknown command 'HELLO', with args beginning with: '3'\r\n";
const CLIENT_REPLY_ON: &[u8] = b"*3\r\n$6\r\nCLIENT\r\n$5\r\nREPLY\r\n$2\r\nON\r\n";
const AUTH_PW: &[u8] = b"*2\r\n$4\r\nAUTH\r\n$2\r\npw\r\n";
const HGET_K_F: &[u8] = b"*3\r\n$4\r\nHGET\r\n$1\r\nk\r\n$1\r\nf\r\n";
const OK: &[u8] = b"+OK\r\n";

/// What the fake server does next on a connection.
enum Step {
    /// Waits for exactly this request, then answers.
    Reply(&'static [u8], &'static [u8]),
    /// Writes without waiting for a request.
    Push(&'static [u8]),
}

/// Serves one script per accepted connection, in order, and records every request it reads.
struct FakeServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeServer {
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn config(&self) -> Config {
        Config::new(self.addr.ip().to_string(), self.addr.port()).with_retry_policy(
            RetryPolicy {
                connect_timeout: Duration::from_secs(5),
                backoff: Duration::from_millis(10),
                max_attempts: 3,
                max_reconnects: 3,
            },
        )
    }
}

async fn fake_server(scripts: Vec<Vec<Step>>) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let log = requests.clone();
    tokio::spawn(async move {
        for script in scripts {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();

            tokio::spawn(async move {
                for step in script {
                    match step {
                        Step::Reply(request, reply) => {
                            let mut buf = vec![0u8; request.len()];
                            if socket.read_exact(&mut buf).await.is_err() {
                                return;
                            }
                            log.lock()
                                .unwrap()
                                .push(String::from_utf8_lossy(&buf).into_owned());
                            if socket.write_all(reply).await.is_err() {
                                return;
                            }
                        }
                        Step::Push(data) => {
                            if socket.write_all(data).await.is_err() {
                                return;
                            }
                        }
                    }
                }

                // Keep the connection open until the client goes away.
                let mut buf = [0u8; 64];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });

    FakeServer { addr, requests }
}

fn text(request: &[u8]) -> String {
    String::from_utf8_lossy(request).into_owned()
}

async fn within<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("test timed out")
}

#[tokio::test]
async fn test_detects_resp3() {
    let server = fake_server(vec![
        vec![Step::Reply(HELLO_3, HELLO_MAP)],
        vec![
            Step::Reply(HELLO_3, HELLO_MAP),
            Step::Reply(
                b"*4\r\n$7\r\nHINCRBY\r\n$7\r\ncounter\r\n$4\r\nhits\r\n$1\r\n5\r\n",
                b":5\r\n",
            ),
        ],
    ])
    .await;

    let mut manager = ConnectionManager::new(server.config()).unwrap();
    let generation = within(manager.initialize()).await.unwrap();
    assert_eq!(generation, Generation::Resp3);

    let mut db = within(manager.create_connection()).await.unwrap();
    assert_eq!(db.generation(), Generation::Resp3);

    let value = within(db.hincrby("counter", "hits", 5)).await.unwrap();
    assert_eq!(value, 5);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_falls_back_to_resp2() {
    let server = fake_server(vec![
        vec![Step::Reply(HELLO_3, UNKNOWN_HELLO)],
        vec![Step::Reply(CLIENT_REPLY_ON, OK)],
        vec![Step::Reply(HGET_K_F, b"$-1\r\n")],
    ])
    .await;

    let mut manager = ConnectionManager::new(server.config()).unwrap();
    assert_eq!(
        within(manager.initialize()).await.unwrap(),
        Generation::Resp2
    );

    let mut db = within(manager.create_connection()).await.unwrap();
    assert_eq!(within(db.hget("k", "f")).await.unwrap(), None);

    assert_eq!(
        server.requests(),
        vec![
            String::from_utf8_lossy(HELLO_3),
            String::from_utf8_lossy(CLIENT_REPLY_ON),
            String::from_utf8_lossy(HGET_K_F),
        ]
    );
}

#[tokio::test]
async fn test_detection_authenticates() {
    let server = fake_server(vec![
        vec![Step::Reply(HELLO_3_AUTH, UNKNOWN_HELLO)],
        vec![Step::Reply(AUTH_PW, OK), Step::Reply(CLIENT_REPLY_ON, OK)],
        vec![Step::Reply(AUTH_PW, OK), Step::Reply(HGET_K_F, b"$2\r\nv1\r\n")],
    ])
    .await;

    let mut manager = ConnectionManager::new(server.config().with_password("pw")).unwrap();
    within(manager.initialize()).await.unwrap();

    let mut db = within(manager.create_connection()).await.unwrap();

    assert_eq!(
        within(db.hget("k", "f")).await.unwrap(),
        Some("v1".to_string())
    );
}

#[tokio::test]
async fn test_detection_failure() {
    let server = fake_server(vec![
        vec![Step::Reply(HELLO_3, UNKNOWN_HELLO)],
        vec![Step::Reply(
            CLIENT_REPLY_ON,
            b"-NOPERM this user has no permissions to run the 'client' command\r\n",
        )],
    ])
    .await;

    let mut manager = ConnectionManager::new(server.config()).unwrap();
    let err = within(manager.initialize()).await.unwrap_err();

    match err {
        Error::Detection(source) => {
            assert!(matches!(*source, Error::Remote { ref kind, .. } if kind == "NOPERM"))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(manager.generation(), None);
}

#[tokio::test]
async fn test_remote_error_keeps_the_connection() {
    let server = fake_server(vec![vec![
        Step::Reply(
            b"*4\r\n$7\r\nHINCRBY\r\n$1\r\nk\r\n$1\r\nf\r\n$1\r\n1\r\n",
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
        ),
        Step::Reply(HGET_K_F, b"$1\r\nx\r\n"),
    ]])
    .await;

    let mut manager =
        ConnectionManager::new(server.config().with_protocol(Generation::Resp2)).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let err = within(db.hincrby("k", "f", 1)).await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref kind, .. } if kind == "WRONGTYPE"));

    assert_eq!(
        within(db.hget("k", "f")).await.unwrap(),
        Some("x".to_string())
    );
}

#[tokio::test]
async fn test_protocol_fault_reconnects() {
    let server = fake_server(vec![
        vec![Step::Reply(HGET_K_F, b"$10\r\nabcd")],
        vec![Step::Reply(HGET_K_F, b"$3\r\nabc\r\n")],
    ])
    .await;

    let mut manager =
        ConnectionManager::new(server.config().with_protocol(Generation::Resp2)).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let err = within(db.hget("k", "f")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol {
            source: frame::Error::Incomplete,
            ..
        }
    ));

    // The corrupted socket was dropped, so this goes out on a fresh connection.
    assert_eq!(
        within(db.hget("k", "f")).await.unwrap(),
        Some("abc".to_string())
    );
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_resp3_pubsub() {
    let server = fake_server(vec![vec![
        Step::Reply(HELLO_3, HELLO_MAP),
        Step::Reply(
            b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n",
            b">3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n",
        ),
        Step::Push(b">3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n"),
        Step::Push(b">2\r\n$7\r\nmessage\r\n$5\r\nworld\r\n"),
        Step::Reply(
            b"*2\r\n$11\r\nUNSUBSCRIBE\r\n$4\r\nnews\r\n",
            b">3\r\n$11\r\nunsubscribe\r\n$4\r\nnews\r\n:0\r\n",
        ),
        Step::Reply(
            b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nnews\r\n$3\r\nbye\r\n",
            b":0\r\n",
        ),
    ]])
    .await;

    let mut manager =
        ConnectionManager::new(server.config().with_protocol(Generation::Resp3)).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    within(db.subscribe("news", tx, CancellationToken::new()))
        .await
        .unwrap();

    let first = within(rx.recv()).await.unwrap();
    assert_eq!(first.channel.as_deref(), Some("news"));
    assert_eq!(first.payload, Bytes::from("hello"));

    let second = within(rx.recv()).await.unwrap();
    assert_eq!(second.channel, None);
    assert_eq!(second.payload, Bytes::from("world"));

    assert!(matches!(
        db.hget("k", "f").await,
        Err(Error::Mode { .. })
    ));

    within(db.unsubscribe()).await.unwrap();
    assert_eq!(within(db.publish("news", "bye")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_resp2_pubsub() {
    let server = fake_server(vec![vec![
        Step::Reply(
            b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n",
            b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n",
        ),
        Step::Push(b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n"),
    ]])
    .await;

    let mut manager =
        ConnectionManager::new(server.config().with_protocol(Generation::Resp2)).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    within(db.subscribe("news", tx, CancellationToken::new()))
        .await
        .unwrap();

    let message = within(rx.recv()).await.unwrap();
    assert_eq!(message.payload_str(), Some("hello"));

    within(db.close()).await.unwrap();
}

#[tokio::test]
async fn test_reconnect_authenticates_again() {
    let server = fake_server(vec![
        vec![
            Step::Reply(AUTH_PW, OK),
            Step::Reply(HGET_K_F, b"$10\r\nabcd"),
        ],
        vec![
            Step::Reply(AUTH_PW, OK),
            Step::Reply(HGET_K_F, b"$3\r\nabc\r\n"),
        ],
    ])
    .await;

    let config = server
        .config()
        .with_password("pw")
        .with_protocol(Generation::Resp2);
    let mut manager = ConnectionManager::new(config).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let err = within(db.hget("k", "f")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));

    assert_eq!(
        within(db.hget("k", "f")).await.unwrap(),
        Some("abc".to_string())
    );
    assert_eq!(
        server.requests(),
        vec![text(AUTH_PW), text(HGET_K_F), text(AUTH_PW), text(HGET_K_F)]
    );
}

#[tokio::test]
async fn test_reconnect_renegotiates_resp3() {
    let server = fake_server(vec![
        vec![
            Step::Reply(HELLO_3, HELLO_MAP),
            Step::Reply(HGET_K_F, b"$10\r\nabcd"),
        ],
        vec![
            Step::Reply(HELLO_3, HELLO_MAP),
            Step::Reply(
                b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n",
                b">3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n",
            ),
            Step::Push(b">3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n"),
        ],
    ])
    .await;

    let mut manager =
        ConnectionManager::new(server.config().with_protocol(Generation::Resp3)).unwrap();
    within(manager.initialize()).await.unwrap();
    let mut db = within(manager.create_connection()).await.unwrap();

    let err = within(db.hget("k", "f")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));

    let (tx, mut rx) = mpsc::unbounded_channel();
    within(db.subscribe("news", tx, CancellationToken::new()))
        .await
        .unwrap();

    let message = within(rx.recv()).await.unwrap();
    assert_eq!(message.channel.as_deref(), Some("news"));
    assert_eq!(message.payload_str(), Some("hello"));

    // The second socket speaks RESP3 again before it carries the subscription.
    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2], text(HELLO_3));

    within(db.close()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_credentials_fail_the_connection() {
    let server = fake_server(vec![vec![Step::Reply(
        AUTH_PW,
        b"-WRONGPASS invalid username-password pair or user is disabled.\r\n",
    )]])
    .await;

    let config = server
        .config()
        .with_password("pw")
        .with_protocol(Generation::Resp2);
    let mut manager = ConnectionManager::new(config).unwrap();
    within(manager.initialize()).await.unwrap();

    let err = within(manager.create_connection()).await.unwrap_err();

    assert!(matches!(err, Error::Remote { ref kind, .. } if kind == "WRONGPASS"));
}
