//! Minimal HTTP/1.1 file server for resume scenarios.
//!
//! wiremock answers with complete bodies only; these tests need a server that
//! sends part of a body and then goes quiet, so a transfer can be paused with
//! a known number of bytes on disk, or one that hangs up mid-body so the
//! transfer has to resume.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as the server saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub range: Option<String>,
}

struct State {
    body: Vec<u8>,
    accept_ranges: bool,
    stall_after: Option<usize>,
    stalled: AtomicBool,
    cut_after: usize,
    cuts_left: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl State {
    /// Claims one cut connection, if any are left.
    fn take_cut(&self) -> bool {
        self.cuts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

/// Serves one file at every path; optionally stalls the first full GET.
pub struct RangeServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

#[allow(dead_code)]
impl RangeServer {
    /// Starts a server for `body`.
    ///
    /// With `stall_after = Some(n)`, the first GET without a `Range` header
    /// sends `n` bytes of a full-length response and then never finishes.
    pub async fn start(
        body: Vec<u8>,
        accept_ranges: bool,
        stall_after: Option<usize>,
    ) -> std::io::Result<Self> {
        Self::spawn(State {
            body,
            accept_ranges,
            stall_after,
            stalled: AtomicBool::new(false),
            cut_after: 0,
            cuts_left: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
        .await
    }

    /// Starts a range-capable server whose first `cuts` GETs each send a
    /// full-length header, `chunk` bytes of body, and then hang up.
    pub async fn start_cutting(body: Vec<u8>, chunk: usize, cuts: usize) -> std::io::Result<Self> {
        Self::spawn(State {
            body,
            accept_ranges: true,
            stall_after: None,
            stalled: AtomicBool::new(false),
            cut_after: chunk,
            cuts_left: AtomicUsize::new(cuts),
            requests: Mutex::new(Vec::new()),
        })
        .await
    }

    async fn spawn(state: State) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(state);
        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, Arc::clone(&accept_state)));
            }
        });
        Ok(Self { addr, state, task })
    }

    /// URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// `Range` headers of every GET, in order.
    pub fn get_ranges(&self) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .map(|r| r.range)
            .collect()
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut stream: TcpStream, state: Arc<State>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let method = lines
        .next()
        .and_then(|line| line.split(' ').next())
        .unwrap_or_default()
        .to_string();
    let range = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .map(|(_, value)| value.trim().to_string());
    if let Ok(mut requests) = state.requests.lock() {
        requests.push(RecordedRequest {
            method: method.clone(),
            range: range.clone(),
        });
    }

    let len = state.body.len();
    let accept = if state.accept_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method == "HEAD" {
        let head =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\n{accept}Connection: close\r\n\r\n");
        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.shutdown().await;
        return;
    }

    let start = range
        .as_deref()
        .filter(|_| state.accept_ranges)
        .and_then(|value| value.strip_prefix("bytes="))
        .and_then(|value| value.strip_suffix('-'))
        .and_then(|value| value.parse::<usize>().ok());

    match start {
        Some(start) if start >= len => {
            let head = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{len}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes()).await;
        }
        Some(start) => {
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{}/{len}\r\nContent-Length: {}\r\n{accept}Connection: close\r\n\r\n",
                len - 1,
                len - start
            );
            let _ = stream.write_all(head.as_bytes()).await;
            if state.take_cut() {
                let end = (start + state.cut_after).min(len);
                let _ = stream.write_all(&state.body[start..end]).await;
            } else {
                let _ = stream.write_all(&state.body[start..]).await;
            }
        }
        None => {
            let head =
                format!("HTTP/1.1 200 OK\r\nContent-Length: {len}\r\n{accept}Connection: close\r\n\r\n");
            let _ = stream.write_all(head.as_bytes()).await;
            if state.take_cut() {
                let _ = stream.write_all(&state.body[..state.cut_after.min(len)]).await;
            } else if let Some(stall) = state.stall_after
                && !state.stalled.swap(true, Ordering::SeqCst)
            {
                let _ = stream.write_all(&state.body[..stall.min(len)]).await;
                let _ = stream.flush().await;
                std::future::pending::<()>().await;
            } else {
                let _ = stream.write_all(&state.body).await;
            }
        }
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}
