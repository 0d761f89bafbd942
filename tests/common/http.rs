//! Minimal HTTP/1.1 file server for exercising the transfer engine.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub enum Route {
    File {
        body: Vec<u8>,
        /// Without a Range header, send this many bytes and then hang.
        stall_after: Option<usize>,
        /// Answer 200 with the full body even when a range is asked for.
        ignore_range: bool,
    },
    Redirect(String),
    Status(u16),
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub range: Option<String>,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, Route>,
    requests: Vec<Recorded>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(socket, shared.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn route(&self, path: &str, route: Route) {
        self.state.lock().routes.insert(path.to_string(), route);
    }

    pub fn file(&self, path: &str, body: &[u8]) {
        self.route(
            path,
            Route::File {
                body: body.to_vec(),
                stall_after: None,
                ignore_range: false,
            },
        );
    }

    pub fn stalled_file(&self, path: &str, body: &[u8], after: usize) {
        self.route(
            path,
            Route::File {
                body: body.to_vec(),
                stall_after: Some(after),
                ignore_range: false,
            },
        );
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }
}

/// Body of `len` bytes that is not all the same value.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<State>>) {
    let Some((path, range)) = read_request(&mut socket).await else {
        return;
    };

    let route = {
        let mut state = state.lock();
        state.requests.push(Recorded {
            path: path.clone(),
            range: range.clone(),
        });
        state.routes.get(&path).cloned()
    };

    match route {
        None => respond_status(&mut socket, 404).await,
        Some(Route::Status(code)) => respond_status(&mut socket, code).await,
        Some(Route::Redirect(location)) => {
            let head = format!(
                "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = socket.write_all(head.as_bytes()).await;
        }
        Some(Route::File {
            body,
            stall_after,
            ignore_range,
        }) => {
            let offset = range
                .as_deref()
                .filter(|_| !ignore_range)
                .and_then(parse_range_start)
                .filter(|start| *start <= body.len());

            let head = match offset {
                Some(start) => format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                    body.len() - start,
                    start,
                    body.len().saturating_sub(1),
                    body.len()
                ),
                None => format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                ),
            };
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }

            let payload = &body[offset.unwrap_or(0)..];
            match stall_after.filter(|_| range.is_none()) {
                Some(after) => {
                    let _ = socket.write_all(&payload[..after.min(payload.len())]).await;
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                None => {
                    let _ = socket.write_all(payload).await;
                }
            }
        }
    }

    let _ = socket.flush().await;
    let _ = socket.shutdown().await;
}

async fn respond_status(socket: &mut TcpStream, code: u16) {
    let head = format!("HTTP/1.1 {code} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    let _ = socket.write_all(head.as_bytes()).await;
}

async fn read_request(socket: &mut TcpStream) -> Option<(String, Option<String>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines = text.split("\r\n");
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });

    Some((path, range))
}

fn parse_range_start(range: &str) -> Option<usize> {
    range
        .strip_prefix("bytes=")?
        .split('-')
        .next()?
        .parse()
        .ok()
}
