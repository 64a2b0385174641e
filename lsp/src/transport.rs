//! Byte transport for one server connection.
//!
//! A [`Transport`] owns exactly one connection (child process pipes or a TCP
//! socket) and moves raw frames in both directions on dedicated tokio tasks.
//! The rest of the crate only sees two unbounded queues, drained without
//! blocking by [`Transport::try_recv`].

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::codec::{Frame, FrameReader, FrameWriter, MissingLengthPolicy};

/// How long a socket connect is retried before giving up.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Process {
        program: PathBuf,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: Vec<(String, OsString)>,
        capture_stderr: bool,
    },
    Socket {
        host: String,
        port: u16,
    },
}

/// Item on the inbound queue.
#[derive(Debug)]
pub enum Inbound {
    Frame(Frame),
    /// The read loop has ended; nothing more will arrive.
    Closed,
}

#[derive(Debug)]
enum Outbound {
    Frame(Vec<u8>),
    Stop,
}

pub struct Transport {
    name: String,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    stderr_rx: Option<mpsc::UnboundedReceiver<String>>,
    child: Option<Child>,
    reader_handle: JoinHandle<()>,
    stderr_handle: Option<JoinHandle<()>>,
    read_closed: bool,
    stopped: bool,
}

impl Transport {
    /// Connect to `endpoint` and start the IO tasks.
    pub async fn open(name: &str, endpoint: &Endpoint, policy: MissingLengthPolicy) -> Result<Self> {
        match endpoint {
            Endpoint::Process {
                program,
                args,
                cwd,
                env,
                capture_stderr,
            } => {
                let resolved = which::which(program)
                    .with_context(|| format!("{} not found in PATH", program.display()))?;
                let mut cmd = Command::new(&resolved);
                cmd.args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(if *capture_stderr {
                        Stdio::piped()
                    } else {
                        Stdio::null()
                    })
                    .kill_on_drop(true);
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                for (key, value) in env {
                    cmd.env(key, value);
                }

                let mut child = cmd
                    .spawn()
                    .with_context(|| format!("spawning {}", resolved.display()))?;
                let stdout = child.stdout.take().context("no stdout from child")?;
                let stdin = child.stdin.take().context("no stdin from child")?;
                let stderr = child.stderr.take();

                tracing::info!(server = %name, program = %resolved.display(), "Spawned language server");
                let mut transport = Self::from_streams(name, stdout, stdin, policy);
                if let Some(stderr) = stderr {
                    let (tx, rx) = mpsc::unbounded_channel();
                    transport.stderr_handle = Some(tokio::spawn(stderr_loop(
                        stderr,
                        tx,
                        name.to_string(),
                    )));
                    transport.stderr_rx = Some(rx);
                }
                transport.child = Some(child);
                Ok(transport)
            }
            Endpoint::Socket { host, port } => {
                let stream = connect_with_retry(host, *port).await?;
                tracing::info!(server = %name, %host, port, "Connected to language server");
                let (read_half, write_half) = stream.into_split();
                Ok(Self::from_streams(name, read_half, write_half, policy))
            }
        }
    }

    /// Start the IO tasks over an existing stream pair.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_streams<R, W>(name: &str, reader: R, writer: W, policy: MissingLengthPolicy) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(writer, outbound_rx, name.to_string()));
        let reader_handle = tokio::spawn(read_loop(
            reader,
            policy,
            inbound_tx,
            outbound_tx.clone(),
            name.to_string(),
        ));

        Self {
            name: name.to_string(),
            outbound_tx,
            inbound_rx,
            stderr_rx: None,
            child: None,
            reader_handle,
            stderr_handle: None,
            read_closed: false,
            stopped: false,
        }
    }

    /// Queue an encoded frame for the write loop.
    ///
    /// Returns `false` once the transport has been stopped.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        if self.stopped {
            return false;
        }
        self.outbound_tx.send(Outbound::Frame(frame)).is_ok()
    }

    /// Next inbound item, if one is already queued.
    pub fn try_recv(&mut self) -> Option<Inbound> {
        if self.read_closed {
            return None;
        }
        match self.inbound_rx.try_recv() {
            Ok(Inbound::Closed) | Err(mpsc::error::TryRecvError::Disconnected) => {
                self.read_closed = true;
                Some(Inbound::Closed)
            }
            Ok(item) => Some(item),
            Err(mpsc::error::TryRecvError::Empty) => None,
        }
    }

    /// Next captured stderr line, if stderr capture is enabled.
    pub fn try_recv_stderr(&mut self) -> Option<String> {
        self.stderr_rx.as_mut()?.try_recv().ok()
    }

    #[must_use]
    pub fn is_read_closed(&self) -> bool {
        self.read_closed
    }

    /// Stop the write loop after everything already queued has been written.
    ///
    /// Idempotent.
    pub fn close(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let _ = self.outbound_tx.send(Outbound::Stop);
        tracing::debug!(server = %self.name, "Transport closed");
    }

    /// Forcibly terminate the child process, if any.
    pub fn kill(&mut self) {
        self.close();
        if let Some(child) = self.child.as_mut()
            && let Err(e) = child.start_kill()
        {
            tracing::debug!(server = %self.name, "Failed to kill server process: {e}");
        }
    }

    /// Exit status of the child process, if it has exited.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        self.child.as_mut()?.try_wait().ok().flatten()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
        self.reader_handle.abort();
        if let Some(handle) = &self.stderr_handle {
            handle.abort();
        }
    }
}

async fn connect_with_retry(host: &str, port: u16) -> Result<TcpStream> {
    let deadline = Instant::now() + TCP_CONNECT_TIMEOUT;
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() < deadline => {
                tracing::trace!(%host, port, "Connect failed, retrying: {e}");
                tokio::task::yield_now().await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "connecting to {host}:{port} (gave up after {}s)",
                        TCP_CONNECT_TIMEOUT.as_secs()
                    )
                });
            }
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: R,
    policy: MissingLengthPolicy,
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
    name: String,
) {
    let mut reader = FrameReader::new(reader).with_missing_length(policy);
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if inbound.send(Inbound::Frame(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(server = %name, "Language server closed its output");
                break;
            }
            Err(e) if e.is_fatal() => {
                tracing::warn!(server = %name, "LSP read error: {e}");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %name, "Discarding malformed frame: {e}");
            }
        }
    }
    let _ = inbound.send(Inbound::Closed);
    let _ = outbound.send(Outbound::Stop);
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    name: String,
) {
    let mut writer = FrameWriter::new(writer);
    while let Some(cmd) = outbound.recv().await {
        match cmd {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_encoded(&frame).await {
                    tracing::warn!(server = %name, "LSP write error: {e}");
                    break;
                }
            }
            Outbound::Stop => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn stderr_loop<R: AsyncRead + Unpin>(
    stderr: R,
    lines_tx: mpsc::UnboundedSender<String>,
    name: String,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "tether_lsp::stderr", server = %name, "{line}");
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %name, "stderr read error: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn recv_frame(transport: &mut Transport) -> Inbound {
        for _ in 0..200 {
            if let Some(item) = transport.try_recv() {
                return item;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no inbound item");
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (mut server_read, mut server_write) = tokio::io::split(server_side);
        let mut transport =
            Transport::from_streams("test", client_read, client_write, MissingLengthPolicy::Reject);

        assert!(transport.send(encode_frame(b"{\"id\":1}")));
        let expected = encode_frame(b"{\"id\":1}");
        let mut buf = vec![0u8; expected.len()];
        server_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);

        server_write
            .write_all(&encode_frame(b"{\"id\":2}"))
            .await
            .unwrap();
        match recv_frame(&mut transport).await {
            Inbound::Frame(frame) => assert_eq!(frame.body(), b"{\"id\":2}"),
            Inbound::Closed => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_eof_yields_closed_once() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let mut transport =
            Transport::from_streams("test", client_read, client_write, MissingLengthPolicy::Reject);
        drop(server_side);

        assert!(matches!(recv_frame(&mut transport).await, Inbound::Closed));
        assert!(transport.is_read_closed());
        assert!(transport.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_close() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (_server_read, mut server_write) = tokio::io::split(server_side);
        let mut transport =
            Transport::from_streams("test", client_read, client_write, MissingLengthPolicy::Reject);

        server_write
            .write_all(b"Content-Length: bogus\r\n\r\n")
            .await
            .unwrap();
        server_write
            .write_all(&encode_frame(b"{\"ok\":true}"))
            .await
            .unwrap();

        match recv_frame(&mut transport).await {
            Inbound::Frame(frame) => assert_eq!(frame.body(), b"{\"ok\":true}"),
            Inbound::Closed => panic!("malformed frame must not close the connection"),
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let (client_side, _server_side) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let mut transport =
            Transport::from_streams("test", client_read, client_write, MissingLengthPolicy::Reject);
        transport.close();
        transport.close();
        assert!(!transport.send(encode_frame(b"{}")));
    }

    #[tokio::test]
    async fn test_socket_connect_gives_up() {
        // Port 9 on loopback is almost never listening.
        let endpoint = Endpoint::Socket {
            host: "127.0.0.1".to_string(),
            port: 9,
        };
        let start = Instant::now();
        let result = Transport::open("test", &endpoint, MissingLengthPolicy::Reject).await;
        assert!(result.is_err());
        assert!(start.elapsed() >= TCP_CONNECT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_socket_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let endpoint = Endpoint::Socket {
            host: "127.0.0.1".to_string(),
            port,
        };
        let transport = Transport::open("test", &endpoint, MissingLengthPolicy::Reject).await;
        assert!(transport.is_ok());
        accept.await.unwrap();
    }
}
