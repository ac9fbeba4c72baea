//! OpenVPN management interface client
//!
//! Speaks the daemon's line-oriented control protocol over a fresh
//! connection per call: read and discard the greeting, send one command,
//! then read the reply. Every call is bounded by a timeout and every
//! transport failure surfaces as `ManagementUnavailable`.

use crate::types::{validate_client_name, LiveSession, SessionTermination};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

/// Default bound on a whole management exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Live-session operations the registry needs from the VPN daemon
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Current sessions keyed by client name
    async fn list_sessions(&self) -> Result<HashMap<String, LiveSession>>;

    /// Disconnect the session of `name`; no session is not an error
    async fn terminate_session(&self, name: &str) -> Result<SessionTermination>;
}

/// Where the management interface listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for ManagementEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagementEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            ManagementEndpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
        }
    }
}

trait ControlStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ControlStream for T {}

/// One record of a `status 3` reply, classified by its leading token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusRecord {
    Client(LiveSession),
    /// A `CLIENT_LIST` row that could not be decoded
    MalformedClient(String),
    RoutingTable,
    GlobalStats,
    Header,
    Title,
    Time,
    /// Asynchronous `>` notification interleaved with the reply
    Notification,
    End,
    Other,
}

const CLIENT_LIST_FIELDS: usize = 9;

impl StatusRecord {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == "END" {
            return StatusRecord::End;
        }
        if line.starts_with('>') {
            return StatusRecord::Notification;
        }

        let mut fields = line.split('\t');
        match fields.next().unwrap_or_default() {
            "CLIENT_LIST" => match parse_client_fields(line) {
                Some(session) => StatusRecord::Client(session),
                None => StatusRecord::MalformedClient(line.to_string()),
            },
            "ROUTING_TABLE" => StatusRecord::RoutingTable,
            "GLOBAL_STATS" => StatusRecord::GlobalStats,
            "HEADER" => StatusRecord::Header,
            "TITLE" => StatusRecord::Title,
            "TIME" => StatusRecord::Time,
            _ => StatusRecord::Other,
        }
    }
}

/// Positional decode of a tab-delimited `CLIENT_LIST` row:
/// name, real address, virtual address, (ipv6), bytes received, bytes sent,
/// connected since (text), connected since (epoch), ...
fn parse_client_fields(line: &str) -> Option<LiveSession> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < CLIENT_LIST_FIELDS || fields[1].is_empty() {
        return None;
    }

    let epoch: i64 = fields[8].trim().parse().ok()?;
    let connected_since = DateTime::<Utc>::from_timestamp(epoch, 0)?;

    Some(LiveSession {
        name: fields[1].to_string(),
        real_address: fields[2].to_string(),
        virtual_address: fields[3].to_string(),
        bytes_received: fields[5].trim().parse().ok()?,
        bytes_sent: fields[6].trim().parse().ok()?,
        connected_since,
    })
}

/// Accumulates a `status` reply until the `END` sentinel
#[derive(Debug, Default)]
pub struct StatusCollector {
    sessions: HashMap<String, LiveSession>,
    skipped: usize,
    done: bool,
}

impl StatusCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns `true` once the sentinel has been seen
    pub fn feed(&mut self, line: &str) -> bool {
        if self.done {
            return true;
        }

        match StatusRecord::parse(line) {
            StatusRecord::Client(session) => {
                self.sessions.insert(session.name.clone(), session);
            }
            StatusRecord::MalformedClient(raw) => {
                warn!("Skipping malformed client record: {:?}", raw);
                self.skipped += 1;
            }
            StatusRecord::End => self.done = true,
            _ => {}
        }

        self.done
    }

    /// Feed one raw line; lines that are not UTF-8 are skipped
    pub fn feed_bytes(&mut self, raw: &[u8]) -> bool {
        match std::str::from_utf8(raw) {
            Ok(line) => self.feed(line),
            Err(_) if self.done => true,
            Err(_) => {
                warn!(
                    "Skipping undecodable status line: {:?}",
                    String::from_utf8_lossy(raw)
                );
                self.skipped += 1;
                false
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Client records that could not be parsed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finish(self) -> HashMap<String, LiveSession> {
        self.sessions
    }
}

/// Client for the daemon's management channel
#[derive(Debug, Clone)]
pub struct ManagementClient {
    endpoint: ManagementEndpoint,
    timeout: Duration,
}

impl ManagementClient {
    pub fn new(endpoint: ManagementEndpoint) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &ManagementEndpoint {
        &self.endpoint
    }

    /// Connect and consume the greeting
    async fn open(&self) -> Result<Connection> {
        let stream: Box<dyn ControlStream> = match &self.endpoint {
            #[cfg(unix)]
            ManagementEndpoint::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
            #[cfg(not(unix))]
            ManagementEndpoint::Unix(_) => {
                return Err(Error::ManagementUnavailable(
                    "unix sockets are not supported on this platform".to_string(),
                ))
            }
            ManagementEndpoint::Tcp(addr) => Box::new(tokio::net::TcpStream::connect(addr).await?),
        };

        let mut conn = Connection {
            reader: BufReader::new(stream),
        };

        match conn.read_line().await? {
            Some(greeting) => trace!("Management greeting: {}", greeting),
            None => {
                return Err(Error::ManagementUnavailable(
                    "connection closed before greeting".to_string(),
                ))
            }
        }

        debug!("Connected to management interface {}", self.endpoint);
        Ok(conn)
    }

    /// Apply the per-call timeout and fold transport errors into `ManagementUnavailable`
    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::Io(e))) => Err(Error::ManagementUnavailable(format!(
                "{}: {}",
                self.endpoint, e
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::ManagementUnavailable(format!(
                "{}: no reply within {:?}",
                self.endpoint, self.timeout
            ))),
        }
    }

    async fn fetch_status(&self) -> Result<HashMap<String, LiveSession>> {
        let mut conn = self.open().await?;
        conn.send("status 3").await?;

        let mut collector = StatusCollector::new();
        while let Some(raw) = conn.read_raw_line().await? {
            trace!("Management status: {}", String::from_utf8_lossy(&raw));
            if collector.feed_bytes(&raw) {
                break;
            }
        }

        if !collector.is_done() {
            debug!("Status reply ended without sentinel");
        }
        if collector.skipped() > 0 {
            warn!("Skipped {} unreadable client record(s)", collector.skipped());
        }
        conn.close().await;

        Ok(collector.finish())
    }

    async fn kill(&self, name: &str) -> Result<SessionTermination> {
        let mut conn = self.open().await?;
        conn.send(&format!("kill {}", name)).await?;

        let outcome = loop {
            let Some(line) = conn.read_line().await? else {
                return Err(Error::ManagementUnavailable(
                    "connection closed before kill reply".to_string(),
                ));
            };
            trace!("Management kill reply: {}", line);

            if line.starts_with('>') {
                continue;
            }
            if line.starts_with("SUCCESS:") {
                break SessionTermination::Terminated;
            }
            if line.starts_with("ERROR:") {
                debug!("No session to kill for {}: {}", name, line);
                break SessionTermination::NotConnected;
            }
        };
        conn.close().await;

        Ok(outcome)
    }
}

#[async_trait]
impl SessionControl for ManagementClient {
    async fn list_sessions(&self) -> Result<HashMap<String, LiveSession>> {
        self.bounded(self.fetch_status()).await
    }

    async fn terminate_session(&self, name: &str) -> Result<SessionTermination> {
        validate_client_name(name)?;
        self.bounded(self.kill(name)).await
    }
}

struct Connection {
    reader: BufReader<Box<dyn ControlStream>>,
}

impl Connection {
    async fn send(&mut self, command: &str) -> Result<()> {
        trace!("Management command: {}", command);
        let writer = self.reader.get_mut();
        writer.write_all(format!("{}\n", command).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Next line without its terminator; `None` at end of stream
    /// Next line without its terminator; bytes are returned as sent
    async fn read_raw_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(Some(line))
    }

    async fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_raw_line()
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    async fn close(mut self) {
        let _ = self.reader.get_mut().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "TITLE\tOpenVPN 2.6.8 x86_64-pc-linux-gnu\r\n\
TIME\t2024-03-01 10:00:00\t1709287200\r\n\
HEADER\tCLIENT_LIST\tCommon Name\tReal Address\tVirtual Address\tVirtual IPv6 Address\tBytes Received\tBytes Sent\tConnected Since\tConnected Since (time_t)\tUsername\tClient ID\tPeer ID\tData Channel Cipher\r\n\
CLIENT_LIST\tedge1\t203.0.113.7:51234\t172.21.0.2\t\t1024\t2048\t2024-03-01 09:00:00\t1709283600\tUNDEF\t0\t0\tAES-256-GCM\r\n\
CLIENT_LIST\tbroken\t203.0.113.8:4000\r\n\
CLIENT_LIST\tedge2\t198.51.100.3:1194\t172.21.0.3\t\t10\t20\t2024-03-01 09:30:00\t1709285400\tUNDEF\t1\t1\tAES-256-GCM\r\n\
HEADER\tROUTING_TABLE\tVirtual Address\tCommon Name\tReal Address\tLast Ref\tLast Ref (time_t)\r\n\
ROUTING_TABLE\t172.21.0.2\tedge1\t203.0.113.7:51234\t2024-03-01 10:00:00\t1709287200\r\n\
GLOBAL_STATS\tMax bcast/mcast queue length\t0\r\n\
END\r\n";

    #[test]
    fn test_parse_client_list_record() {
        let line = "CLIENT_LIST\tedge1\t203.0.113.7:51234\t172.21.0.2\t\t1024\t2048\t2024-03-01 09:00:00\t1709283600\tUNDEF";
        match StatusRecord::parse(line) {
            StatusRecord::Client(s) => {
                assert_eq!(s.name, "edge1");
                assert_eq!(s.real_address, "203.0.113.7:51234");
                assert_eq!(s.virtual_address, "172.21.0.2");
                assert_eq!(s.bytes_received, 1024);
                assert_eq!(s.bytes_sent, 2048);
                assert_eq!(s.connected_since.timestamp(), 1709283600);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_classify_records() {
        assert_eq!(StatusRecord::parse("END"), StatusRecord::End);
        assert_eq!(StatusRecord::parse("END\r\n"), StatusRecord::End);
        assert_eq!(StatusRecord::parse("ROUTING_TABLE\tx"), StatusRecord::RoutingTable);
        assert_eq!(StatusRecord::parse("GLOBAL_STATS\tx\t0"), StatusRecord::GlobalStats);
        assert_eq!(StatusRecord::parse("HEADER\tCLIENT_LIST\tCommon Name"), StatusRecord::Header);
        assert_eq!(StatusRecord::parse(">INFO:hello"), StatusRecord::Notification);
        assert_eq!(StatusRecord::parse("garbage"), StatusRecord::Other);
        assert!(matches!(
            StatusRecord::parse("CLIENT_LIST\tedge\tx\ty\t\tnot-a-number\t0\td\t0"),
            StatusRecord::MalformedClient(_)
        ));
    }

    #[test]
    fn test_collector_keeps_only_client_records() {
        let mut collector = StatusCollector::new();
        for line in TRANSCRIPT.lines() {
            if collector.feed(line) {
                break;
            }
        }

        assert!(collector.is_done());
        assert_eq!(collector.skipped(), 1);
        let sessions = collector.finish();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["edge1"].virtual_address, "172.21.0.2");
        assert_eq!(sessions["edge2"].bytes_sent, 20);
    }

    #[test]
    fn test_collector_ignores_lines_after_sentinel() {
        let mut collector = StatusCollector::new();
        assert!(collector.feed("END"));
        assert!(collector.feed(
            "CLIENT_LIST\tlate\ta\tb\t\t1\t2\tc\t1709283600"
        ));
        assert!(collector.finish().is_empty());
    }

    #[test]
    fn test_collector_skips_undecodable_lines() {
        let mut collector = StatusCollector::new();
        assert!(!collector.feed_bytes(
            b"CLIENT_LIST\tedge1\ta\t172.21.0.2\t\t1\t2\tx\t1709283600"
        ));
        assert!(!collector.feed_bytes(
            b"CLIENT_LIST\tbad\xff\xfe\ta\t172.21.0.9\t\t1\t2\tx\t1709283600"
        ));
        assert!(collector.feed_bytes(b"END"));

        assert_eq!(collector.skipped(), 1);
        let sessions = collector.finish();
        assert_eq!(sessions.len(), 1);
        assert!(sessions.contains_key("edge1"));
    }

    #[cfg(unix)]
    mod daemon {
        use super::*;
        use tokio::io::AsyncReadExt;
        use tokio::net::UnixListener;

        const GREETING: &str = ">INFO:OpenVPN Management Interface Version 5 -- type 'help' for more info\r\n";

        /// Serve one connection: send greeting, capture the command, reply
        fn fake_daemon(
            dir: &tempfile::TempDir,
            reply: impl AsRef<[u8]> + Send + 'static,
        ) -> (ManagementClient, tokio::task::JoinHandle<String>) {
            let path = dir.path().join("mgmt.sock");
            let listener = UnixListener::bind(&path).unwrap();

            let handle = tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                stream.write_all(GREETING.as_bytes()).await.unwrap();

                let mut buf = vec![0u8; 256];
                let n = stream.read(&mut buf).await.unwrap();
                stream.write_all(reply.as_ref()).await.unwrap();
                String::from_utf8_lossy(&buf[..n]).to_string()
            });

            (ManagementClient::new(ManagementEndpoint::Unix(path)), handle)
        }

        #[tokio::test]
        async fn test_list_sessions_over_socket() {
            let tmp = tempfile::TempDir::new().unwrap();
            let (client, daemon) = fake_daemon(&tmp, TRANSCRIPT);

            let sessions = client.list_sessions().await.unwrap();
            assert_eq!(sessions.len(), 2);
            assert!(sessions.contains_key("edge1"));
            assert_eq!(daemon.await.unwrap(), "status 3\n");
        }

        #[tokio::test]
        async fn test_list_sessions_survives_non_utf8_record() {
            let tmp = tempfile::TempDir::new().unwrap();
            let mut reply = Vec::new();
            reply.extend_from_slice(
                b"CLIENT_LIST\tedge1\t203.0.113.7:51234\t172.21.0.2\t\t1024\t2048\tx\t1709283600\r\n",
            );
            reply.extend_from_slice(
                b"CLIENT_LIST\tbad\xff\xfe\t203.0.113.9:4000\t172.21.0.9\t\t1\t2\tx\t1709283600\r\n",
            );
            reply.extend_from_slice(
                b"CLIENT_LIST\tedge2\t198.51.100.3:1194\t172.21.0.3\t\t10\t20\tx\t1709285400\r\n",
            );
            reply.extend_from_slice(b"END\r\n");
            let (client, _daemon) = fake_daemon(&tmp, reply);

            let sessions = client.list_sessions().await.unwrap();
            assert_eq!(sessions.len(), 2);
            assert!(sessions.contains_key("edge1"));
            assert!(sessions.contains_key("edge2"));
        }

        #[tokio::test]
        async fn test_list_sessions_truncated_stream() {
            let tmp = tempfile::TempDir::new().unwrap();
            let (client, _daemon) = fake_daemon(
                &tmp,
                "CLIENT_LIST\tedge1\ta\t172.21.0.2\t\t1\t2\tx\t1709283600\n",
            );

            let sessions = client.list_sessions().await.unwrap();
            assert_eq!(sessions.len(), 1);
        }

        #[tokio::test]
        async fn test_kill_success_and_not_found() {
            let tmp = tempfile::TempDir::new().unwrap();
            let (client, daemon) = fake_daemon(
                &tmp,
                "SUCCESS: common name 'edge1' found, 1 client(s) killed\r\n",
            );
            assert_eq!(
                client.terminate_session("edge1").await.unwrap(),
                SessionTermination::Terminated
            );
            assert_eq!(daemon.await.unwrap(), "kill edge1\n");

            let tmp = tempfile::TempDir::new().unwrap();
            let (client, _daemon) = fake_daemon(
                &tmp,
                ">CLIENT:ESTABLISHED,3\r\nERROR: common name 'ghost' not found\r\n",
            );
            assert_eq!(
                client.terminate_session("ghost").await.unwrap(),
                SessionTermination::NotConnected
            );
        }

        #[tokio::test]
        async fn test_kill_rejects_unsafe_name() {
            let tmp = tempfile::TempDir::new().unwrap();
            let client = ManagementClient::new(ManagementEndpoint::Unix(tmp.path().join("none.sock")));
            let err = client.terminate_session("a\nsignal SIGTERM").await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidName);
        }

        #[tokio::test]
        async fn test_missing_socket_is_unavailable() {
            let tmp = tempfile::TempDir::new().unwrap();
            let client = ManagementClient::new(ManagementEndpoint::Unix(tmp.path().join("none.sock")));
            let err = client.list_sessions().await.unwrap_err();
            assert!(matches!(err, Error::ManagementUnavailable(_)));
        }

        #[tokio::test]
        async fn test_silent_daemon_times_out() {
            let tmp = tempfile::TempDir::new().unwrap();
            let path = tmp.path().join("mgmt.sock");
            let listener = UnixListener::bind(&path).unwrap();
            let _daemon = tokio::spawn(async move {
                // Accept and never speak
                let (stream, _) = listener.accept().await.unwrap();
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(stream);
            });

            let client = ManagementClient::new(ManagementEndpoint::Unix(path))
                .with_timeout(Duration::from_millis(100));
            let err = client.list_sessions().await.unwrap_err();
            match err {
                Error::ManagementUnavailable(msg) => assert!(msg.contains("no reply")),
                other => panic!("unexpected error: {}", other),
            }
        }
    }
}
