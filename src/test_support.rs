//! Loopback HTTP server used by the client tests.

use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

/// Request head as the server saw it.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub head: String,
}

impl Request {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    pub fn has_header(&self, name: &str, value: &str) -> bool {
        let wanted = format!("{}: {}", name.to_lowercase(), value.to_lowercase());
        self.head.to_lowercase().lines().any(|l| l.trim() == wanted)
    }
}

pub enum Body {
    Fixed(String),
    /// SSE frames written one at a time; `hold_open` keeps the socket until the client leaves
    Events { frames: Vec<String>, hold_open: bool },
}

pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Body,
    pub delay: Duration,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: Body::Fixed(body.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn text(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            body: Body::Fixed(body.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn events(payloads: &[String], hold_open: bool) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: Body::Events {
                frames: payloads.iter().map(|p| format!("data: {}\n\n", p)).collect(),
                hold_open,
            },
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Serves every connection with `handler` and returns the `/api` base URL.
pub async fn serve<F>(handler: F) -> String
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let _ = handle_connection(socket, handler.as_ref()).await;
            });
        }
    });

    format!("http://{}/api", addr)
}

pub fn session(base_url: &str) -> Session {
    Session::new(base_url, "test-token", Duration::from_secs(2)).unwrap()
}

async fn read_head(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

async fn handle_connection<F>(mut socket: TcpStream, handler: &F) -> std::io::Result<()>
where
    F: Fn(&Request) -> Reply,
{
    let head = read_head(&mut socket).await?;
    let mut parts = head.lines().next().unwrap_or("").split_whitespace();
    let request = Request {
        method: parts.next().unwrap_or("").to_string(),
        target: parts.next().unwrap_or("").to_string(),
        head: head.clone(),
    };

    let reply = handler(&request);
    if !reply.delay.is_zero() {
        sleep(reply.delay).await;
    }

    match reply.body {
        Body::Fixed(body) => {
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.status,
                reply.content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await?;
        }
        Body::Events { frames, hold_open } => {
            let header = format!(
                "HTTP/1.1 {} X\r\nContent-Type: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
                reply.status, reply.content_type
            );
            socket.write_all(header.as_bytes()).await?;
            for frame in frames {
                socket.write_all(frame.as_bytes()).await?;
                socket.flush().await?;
            }
            if hold_open {
                let mut sink = [0u8; 64];
                while socket.read(&mut sink).await? > 0 {}
            }
        }
    }

    socket.shutdown().await
}
