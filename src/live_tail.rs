use crate::error::ConsoleError;
use crate::session::{ensure_success, Session};
use crate::sse::SseDecoder;
use crate::types::{LiveBuffer, StreamMessage};
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Messages from the live tail to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    /// The stream response was accepted
    Connected,
    /// The buffer was replaced by the server's recent lines
    History(Vec<String>),
    /// One new line was prepended to the buffer
    Line(String),
    /// The server reported a problem before closing the stream
    ServerError(String),
    Stopped,
}

struct Connection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Counts open stream responses; released when the connection task lets go of it.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns at most one live tail connection and feeds it into the shared buffer.
///
/// The connection ends on `stop`, on drop, or on any transport failure; it is
/// never reopened automatically.
pub struct LiveTail {
    session: Session,
    buffer: Arc<Mutex<LiveBuffer>>,
    events: mpsc::Sender<TailEvent>,
    streaming: Arc<AtomicBool>,
    open_connections: Arc<AtomicUsize>,
    connection: Option<Connection>,
}

impl LiveTail {
    /// Events are delivered with backpressure: a consumer that stops reading
    /// eventually stalls the stream.
    pub fn new(
        session: Session,
        buffer: Arc<Mutex<LiveBuffer>>,
    ) -> (Self, mpsc::Receiver<TailEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let tail = Self {
            session,
            buffer,
            events,
            streaming: Arc::new(AtomicBool::new(false)),
            open_connections: Arc::new(AtomicUsize::new(0)),
            connection: None,
        };
        (tail, rx)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Opens a new connection, tearing down the previous one first.
    pub async fn start(&mut self) {
        self.stop().await;

        let cancel = CancellationToken::new();
        self.streaming.store(true, Ordering::SeqCst);

        let task = tokio::spawn({
            let session = self.session.clone();
            let buffer = Arc::clone(&self.buffer);
            let events = self.events.clone();
            let streaming = Arc::clone(&self.streaming);
            let open_connections = Arc::clone(&self.open_connections);
            let cancel = cancel.clone();

            async move {
                match stream_into(&session, &buffer, &events, &cancel, &open_connections).await {
                    Ok(()) => info!("Live tail stopped"),
                    Err(e) => error!("Live tail connection error: {}", e),
                }
                streaming.store(false, Ordering::SeqCst);
                deliver(TailEvent::Stopped, &events, &cancel).await;
            }
        });

        self.connection = Some(Connection { cancel, task });
    }

    /// Closes the current connection, if any, and waits for its teardown.
    pub async fn stop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
            if let Err(e) = connection.task.await {
                if !e.is_cancelled() {
                    error!("Live tail task failed: {}", e);
                }
            }
        }
        self.streaming.store(false, Ordering::SeqCst);
    }
}

impl Drop for LiveTail {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
            connection.task.abort();
        }
    }
}

async fn stream_into(
    session: &Session,
    buffer: &Arc<Mutex<LiveBuffer>>,
    events: &mpsc::Sender<TailEvent>,
    cancel: &CancellationToken,
    open_connections: &Arc<AtomicUsize>,
) -> Result<(), ConsoleError> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        response = session.stream("/admin/logs/stream").send() => response?,
    };
    let response = ensure_success(response).await?;

    let _guard = ConnectionGuard::new(open_connections);
    info!("Live tail connected to {}", session.base_url());
    if !deliver(TailEvent::Connected, events, cancel).await {
        return Ok(());
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for payload in decoder.feed(&bytes) {
                    if let Some(event) = handle_payload(&payload, buffer).await {
                        if !deliver(event, events, cancel).await {
                            return Ok(());
                        }
                    }
                }
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(ConsoleError::StreamError(
                    "server closed the stream".to_string(),
                ))
            }
        }
    }
}

/// Sends `event` unless cancelled first; false means the connection should end.
///
/// A cancelled connection never delivers, so a restart cannot see the old
/// connection's `Stopped` after the new one began.
async fn deliver(
    event: TailEvent,
    events: &mpsc::Sender<TailEvent>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        // A dropped receiver only means nobody renders; the buffer still fills.
        _ = events.send(event) => true,
    }
}

async fn handle_payload(payload: &str, buffer: &Arc<Mutex<LiveBuffer>>) -> Option<TailEvent> {
    let message = match serde_json::from_str::<StreamMessage>(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to parse stream message: {}", e);
            return None;
        }
    };

    match message {
        StreamMessage::Log { data } => {
            buffer.lock().await.push_front(data.clone());
            Some(TailEvent::Line(data))
        }
        StreamMessage::History { data } => {
            debug!("Received {} history lines", data.len());
            buffer.lock().await.replace(data.clone());
            Some(TailEvent::History(data))
        }
        StreamMessage::Connected { client_id } => {
            debug!("Stream registered as client {}", client_id.as_deref().unwrap_or("?"));
            None
        }
        StreamMessage::Heartbeat { timestamp } => {
            trace!("Heartbeat {:?}", timestamp);
            None
        }
        StreamMessage::Error { message } => {
            let message = message.unwrap_or_else(|| "unknown stream error".to_string());
            warn!("Server reported stream error: {}", message);
            Some(TailEvent::ServerError(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, session, Reply};
    use std::time::Duration;
    use tokio::time::timeout;

    fn log_message(line: &str) -> String {
        serde_json::json!({ "type": "log", "data": line }).to_string()
    }

    async fn next_event(rx: &mut mpsc::Receiver<TailEvent>) -> TailEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for tail event")
            .expect("event channel closed")
    }

    async fn wait_for(rx: &mut mpsc::Receiver<TailEvent>, wanted: TailEvent) {
        loop {
            if next_event(rx).await == wanted {
                return;
            }
        }
    }

    #[tokio::test]
    async fn history_then_lines_fill_buffer_newest_first() {
        let history: Vec<String> = (0..50).map(|i| format!("history {}", 49 - i)).collect();
        let mut payloads = vec![
            serde_json::json!({ "type": "connected", "clientId": "1-abc" }).to_string(),
            serde_json::json!({ "type": "history", "data": history }).to_string(),
        ];
        payloads.extend((0..10).map(|i| log_message(&format!("live {}", i))));
        payloads.push(serde_json::json!({ "type": "heartbeat", "timestamp": 1 }).to_string());

        let base = serve(move |req| {
            assert_eq!(req.path(), "/api/admin/logs/stream");
            assert!(req.target.contains("token=test-token"));
            Reply::events(&payloads, false)
        })
        .await;

        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), Arc::clone(&buffer));
        tail.start().await;

        let mut lines = 0;
        loop {
            match next_event(&mut rx).await {
                TailEvent::Line(_) => lines += 1,
                TailEvent::Stopped => break,
                _ => {}
            }
        }

        assert_eq!(lines, 10);
        assert!(!tail.is_streaming());
        assert_eq!(tail.open_connections(), 0);

        let buffer = buffer.lock().await;
        assert_eq!(buffer.len(), 60);
        let contents: Vec<String> = buffer.iter().cloned().collect();
        assert_eq!(contents[0], "live 9");
        assert_eq!(contents[9], "live 0");
        assert_eq!(contents[10], "history 49");
        assert_eq!(contents[59], "history 0");
    }

    #[tokio::test]
    async fn buffer_stays_bounded_under_many_lines() {
        let payloads: Vec<String> = (0..600).map(|i| log_message(&format!("line {}", i))).collect();
        let base = serve(move |_| Reply::events(&payloads, false)).await;

        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), Arc::clone(&buffer));
        tail.start().await;
        wait_for(&mut rx, TailEvent::Stopped).await;

        let buffer = buffer.lock().await;
        assert_eq!(buffer.len(), 500);
        assert_eq!(buffer.iter().next().map(String::as_str), Some("line 599"));
    }

    #[tokio::test]
    async fn restart_leaves_exactly_one_connection() {
        let base = serve(|_| {
            let hello = serde_json::json!({ "type": "connected", "clientId": "c" }).to_string();
            Reply::events(&[hello], true)
        })
        .await;

        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), buffer);

        tail.start().await;
        wait_for(&mut rx, TailEvent::Connected).await;
        assert_eq!(tail.open_connections(), 1);

        tail.start().await;
        wait_for(&mut rx, TailEvent::Connected).await;
        assert_eq!(tail.open_connections(), 1);
        assert!(tail.is_streaming());

        tail.stop().await;
        assert_eq!(tail.open_connections(), 0);
        assert!(!tail.is_streaming());

        tail.start().await;
        wait_for(&mut rx, TailEvent::Connected).await;
        assert_eq!(tail.open_connections(), 1);
    }

    fn held_open_stream(_: &crate::test_support::Request) -> Reply {
        let hello = serde_json::json!({ "type": "connected", "clientId": "c" }).to_string();
        Reply::events(&[hello], true)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_does_not_report_the_old_connection_stopping() {
        let base = serve(held_open_stream).await;
        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), buffer);

        tail.start().await;
        assert_eq!(next_event(&mut rx).await, TailEvent::Connected);

        for _ in 0..20 {
            tail.start().await;
            assert_eq!(next_event(&mut rx).await, TailEvent::Connected);
            assert!(tail.is_streaming());
        }
        assert_eq!(tail.open_connections(), 1);
    }

    #[tokio::test]
    async fn drop_releases_connection() {
        let base = serve(held_open_stream).await;
        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), buffer);

        tail.start().await;
        assert_eq!(next_event(&mut rx).await, TailEvent::Connected);
        let open = Arc::clone(&tail.open_connections);
        assert_eq!(open.load(Ordering::SeqCst), 1);

        drop(tail);
        timeout(Duration::from_secs(5), async {
            while open.load(Ordering::SeqCst) != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection still open after drop");
    }

    #[tokio::test]
    async fn server_error_message_ends_the_stream() {
        let base = serve(|_| {
            let denied =
                serde_json::json!({ "type": "error", "message": "Unauthorized - Admin only" })
                    .to_string();
            Reply::events(&[denied], false)
        })
        .await;

        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), buffer);
        tail.start().await;

        assert_eq!(next_event(&mut rx).await, TailEvent::Connected);
        assert_eq!(
            next_event(&mut rx).await,
            TailEvent::ServerError("Unauthorized - Admin only".to_string())
        );
        assert_eq!(next_event(&mut rx).await, TailEvent::Stopped);
        assert!(!tail.is_streaming());
    }

    #[tokio::test]
    async fn rejected_stream_stops_without_connecting() {
        let base = serve(|_| Reply::json(401, r#"{"message":"Not authenticated"}"#)).await;

        let buffer = Arc::new(Mutex::new(LiveBuffer::default()));
        let (mut tail, mut rx) = LiveTail::new(session(&base), buffer);
        tail.start().await;

        assert_eq!(next_event(&mut rx).await, TailEvent::Stopped);
        assert_eq!(tail.open_connections(), 0);
        assert!(!tail.is_streaming());
    }
}
