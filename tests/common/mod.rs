//! Shared utilities for integration tests.
//!
//! Every server here binds `127.0.0.1:0`, so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::{self, pki_types::ServerName, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use forward_proxy::config::ProxyConfig;
use forward_proxy::net::{tls, AdmissionBudget, AdmissionListener};
use forward_proxy::observability::MemoryReporter;
use forward_proxy::{ProxyServer, ServerError, Shutdown};

pub const TOKEN: &str = "AsdFasdfawer";
pub const TOKEN_HEADER: &str = "X-Lantern-Auth-Token";
pub const UID_HEADER: &str = "X-Lantern-UID";
pub const CLIENT_ID: &str = "client-1";

pub const TUNNELED_REQUEST: &str = "GET / HTTP/1.1\r\n\r\n";
pub const TARGET_RESPONSE: &str = "Fight for a Free Internet!";

/// Any duplex byte stream a test client may hold.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

fn canned_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        TARGET_RESPONSE.len(),
        TARGET_RESPONSE
    )
}

/// Read an HTTP message head, up to and including the blank line.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Read until the peer closes, tolerating an abrupt close.
pub async fn read_all<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn serve_canned<S: AsyncRead + AsyncWrite + Unpin>(mut socket: S) -> String {
    let head = read_head(&mut socket).await;
    let _ = socket.write_all(canned_response().as_bytes()).await;
    let _ = socket.shutdown().await;
    head
}

/// Plain HTTP target answering every request with [`TARGET_RESPONSE`].
pub async fn start_target() -> SocketAddr {
    start_recording_target().await.0
}

/// Like [`start_target`], also yielding each request head it received.
pub async fn start_recording_target() -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = serve_canned(socket).await;
                let _ = tx.send(head);
            });
        }
    });
    (addr, rx)
}

/// Target that accepts and then never sends anything.
pub async fn start_silent_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Self-signed material for `localhost`, as PEM strings.
pub fn test_certificate() -> (String, String) {
    tls::generate_self_signed("localhost").unwrap()
}

fn server_config(cert_pem: &str, key_pem: &str) -> rustls::ServerConfig {
    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .unwrap()
        .unwrap();
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap()
}

/// TLS-only target answering with [`TARGET_RESPONSE`]. Returns its
/// certificate PEM for the client to trust.
pub async fn start_tls_target() -> (SocketAddr, String) {
    let (cert_pem, key_pem) = test_certificate();
    let acceptor = TlsAcceptor::from(Arc::new(server_config(&cert_pem, &key_pem)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(socket).await {
                    serve_canned(stream).await;
                }
            });
        }
    });
    (addr, cert_pem)
}

/// Wrap `stream` in a TLS client session that trusts only `cert_pem`.
pub async fn tls_connect<S>(stream: S, cert_pem: &str) -> tokio_rustls::client::TlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut cert_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
        .connect(ServerName::try_from("localhost").unwrap(), stream)
        .await
        .unwrap()
}

pub fn proxy_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.token = TOKEN.into();
    config
}

/// A running proxy and what a test needs to talk to it.
pub struct TestProxy {
    pub addr: SocketAddr,
    /// Certificate PEM when the proxy listens over TLS.
    pub cert_pem: Option<String>,
    pub budget: Arc<AdmissionBudget>,
    pub reporter: MemoryReporter,
    pub shutdown: Shutdown,
    /// The serving task; finishes once shutdown has drained.
    pub server: JoinHandle<Result<(), ServerError>>,
    _scratch: Option<PathBuf>,
}

impl TestProxy {
    /// Open a client connection, over TLS if the proxy uses it.
    pub async fn connect(&self) -> Box<dyn Io> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        match &self.cert_pem {
            Some(cert_pem) => Box::new(tls_connect(stream, cert_pem).await),
            None => Box::new(stream),
        }
    }

    /// Wait until the proxy has accepted `n` live connections.
    pub async fn wait_live(&self, n: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.budget.live_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {} live connections, have {}", n, self.budget.live_count()));
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(dir) = &self._scratch {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Start a proxy over plaintext (`tls == false`) or TLS.
pub async fn start_proxy(config: ProxyConfig, tls: bool) -> TestProxy {
    let reporter = MemoryReporter::new();
    let server = ProxyServer::with_reporter(config.clone(), Arc::new(reporter.clone())).unwrap();
    let listener = AdmissionListener::bind(&config.listener.bind_address, config.listener.max_connections)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let budget = listener.budget();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();

    let (cert_pem, scratch, server) = if tls {
        let dir = std::env::temp_dir().join(format!(
            "forward-proxy-it-{}-{}",
            std::process::id(),
            addr.port()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let (cert_path, key_path) = (dir.join("cert.pem"), dir.join("key.pem"));
        tls::ensure_certificate(&cert_path, &key_path, "localhost").unwrap();
        let acceptor = tls::load_tls_acceptor(&cert_path, &key_path).await.unwrap();
        let cert_pem = std::fs::read_to_string(&cert_path).unwrap();

        let task = tokio::spawn(server.serve_https(listener, acceptor, receiver));
        (Some(cert_pem), Some(dir), task)
    } else {
        let task = tokio::spawn(server.serve_http(listener, receiver));
        (None, None, task)
    };

    TestProxy {
        addr,
        cert_pem,
        budget,
        reporter,
        shutdown,
        server,
        _scratch: scratch,
    }
}

/// A CONNECT request for `target` carrying `headers`.
pub fn connect_request(target: &str, headers: &[(&str, &str)]) -> String {
    let mut req = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", target, target);
    for (name, value) in headers {
        req.push_str(&format!("{}: {}\r\n", name, value));
    }
    req.push_str("\r\n");
    req
}

/// A direct `GET` for `path` on `host` carrying `headers`, asking the proxy
/// to close the connection afterwards.
pub fn direct_request(host: &str, path: &str, headers: &[(&str, &str)]) -> String {
    let mut headers = headers.to_vec();
    headers.push(("Connection", "close"));
    keep_alive_request(host, path, &headers)
}

/// A direct `GET` that leaves the client connection open.
pub fn keep_alive_request(host: &str, path: &str, headers: &[(&str, &str)]) -> String {
    let mut req = format!("GET {} HTTP/1.1\r\nHost: {}\r\n", path, host);
    for (name, value) in headers {
        req.push_str(&format!("{}: {}\r\n", name, value));
    }
    req.push_str("\r\n");
    req
}

/// Read one response with a `Content-Length` body, leaving the stream open.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> (String, String) {
    let head = read_head(stream).await;
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (head, String::from_utf8_lossy(&body).into_owned())
}

/// Both authentication headers with valid values.
pub fn auth_headers() -> [(&'static str, &'static str); 2] {
    [(TOKEN_HEADER, TOKEN), (UID_HEADER, CLIENT_ID)]
}

/// Open a tunnel to `target` and return the stream after the 200.
pub async fn open_tunnel(proxy: &TestProxy, target: &str) -> Box<dyn Io> {
    let mut stream = proxy.connect().await;
    stream
        .write_all(connect_request(target, &auth_headers()).as_bytes())
        .await
        .unwrap();
    let head = read_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected CONNECT answer: {head:?}");
    stream
}
