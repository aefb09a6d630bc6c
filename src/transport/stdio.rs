//! Line-delimited JSON over a local pipe.
//!
//! Mirrors [`HttpTransport`](super::HttpTransport) for agents spawned as child
//! processes: one JSON document per line each way. A pipe is not a remote
//! failure domain, so there is no retry and no circuit breaker.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
    time::timeout,
};
use tracing::debug;
use uuid::Uuid;

use super::{retry::RetryPolicy, Transport};
use crate::protocol::Message;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Pipe {
    reader: Reader,
    writer: Writer,
    /// Partial line, kept across cancelled reads.
    line: Vec<u8>,
    /// Requests that timed out and may still be answered.
    unanswered: usize,
}

impl Pipe {
    async fn exchange(&mut self, request: &str, conversation_id: Uuid) -> std::io::Result<Option<Value>> {
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        loop {
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = std::mem::take(&mut self.line);
            let answer: Value = match serde_json::from_slice(line.trim_ascii()) {
                Ok(answer) => answer,
                Err(e) => {
                    debug!(%e, "undecodable line on pipe");
                    continue;
                }
            };
            if self.belongs_to(&answer, conversation_id) {
                return Ok(Some(answer));
            }
        }
    }

    /// Whether `answer` answers the request of `conversation_id`.
    ///
    /// Answers carrying a conversation are matched on it. Bare answers are
    /// taken in order, after the pending answers of timed out requests.
    fn belongs_to(&mut self, answer: &Value, conversation_id: Uuid) -> bool {
        let stale = match answer.get("conversation_id").and_then(Value::as_str) {
            Some(id) => id != conversation_id.to_string(),
            None => self.unanswered > 0,
        };
        if stale {
            debug!(unanswered = self.unanswered, "dropping an answer to an earlier request");
            self.unanswered = self.unanswered.saturating_sub(1);
        }
        !stale
    }
}

/// Request/response exchange over a byte stream pair.
pub struct StdioTransport {
    pipe: Mutex<Pipe>,
    timeout: Duration,
}

impl StdioTransport {
    /// Exchange over `reader`/`writer`; each exchange times out after `timeout`.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        timeout: Duration,
    ) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let writer: Writer = Box::new(writer);
        Self {
            pipe: Mutex::new(Pipe {
                reader: BufReader::new(reader),
                writer,
                line: Vec::new(),
                unanswered: 0,
            }),
            timeout,
        }
    }

    /// Exchange over the process' own stdin and stdout.
    pub fn stdio(timeout: Duration) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), timeout)
    }

    /// Same contract as [`Messenger::send_with_retry`](super::Messenger::send_with_retry),
    /// restricted to a single attempt.
    pub async fn send_with_retry(
        &self,
        endpoint: &str,
        message: &Message,
        _policy: RetryPolicy,
    ) -> Option<Value> {
        self.send(endpoint, message).await
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, _endpoint: &str, message: &Message) -> Option<Value> {
        let line = serde_json::to_string(message).ok()?;
        // The deadline starts once the pipe is ours.
        let mut pipe = self.pipe.lock().await;
        let outcome = timeout(self.timeout, pipe.exchange(&line, message.conversation_id)).await;
        match outcome {
            Ok(Ok(Some(answer))) => Some(answer),
            Ok(Ok(None)) => {
                debug!("pipe closed");
                None
            }
            Ok(Err(e)) => {
                debug!(%e, "pipe error");
                None
            }
            Err(_) => {
                pipe.unanswered += 1;
                debug!(timeout = ?self.timeout, "no answer on pipe");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::protocol::messages::StartLeague;

    #[tokio::test]
    async fn exchanges_one_line_each_way() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = split(client);
        let transport = StdioTransport::new(client_r, client_w, Duration::from_secs(5));

        let peer = tokio::spawn(async move {
            let (server_r, mut server_w) = split(server);
            let mut lines = BufReader::new(server_r).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let received: Value = serde_json::from_str(&line).unwrap();
            server_w
                .write_all(b"{\"status\":\"ok\",\"message\":\"started\"}\n")
                .await
                .unwrap();
            received
        });

        let msg = Message::new("launcher", StartLeague { league_id: "L".into() });
        let answer = transport
            .send_with_retry("stdio", &msg, RetryPolicy::default())
            .await;
        assert_eq!(answer, Some(json!({"status": "ok", "message": "started"})));
        assert_eq!(peer.await.unwrap()["message_type"], "START_LEAGUE");
    }

    fn start(league_id: &str) -> Message {
        Message::new(
            "launcher",
            StartLeague {
                league_id: league_id.into(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn late_answer_is_not_taken_for_the_next_one() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = split(client);
        let transport = StdioTransport::new(client_r, client_w, Duration::from_millis(100));

        let peer = tokio::spawn(async move {
            let (server_r, mut server_w) = split(server);
            let mut lines = BufReader::new(server_r).lines();
            lines.next_line().await.unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            server_w.write_all(b"{\"answer_to\":\"first\"}\n").await.unwrap();
            lines.next_line().await.unwrap().unwrap();
            server_w.write_all(b"{\"answer_to\":\"second\"}\n").await.unwrap();
        });

        assert_eq!(transport.send("stdio", &start("first")).await, None);
        let second = transport.send("stdio", &start("second")).await;
        assert_eq!(second, Some(json!({"answer_to": "second"})));
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn answers_are_matched_on_their_conversation() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = split(client);
        let transport = StdioTransport::new(client_r, client_w, Duration::from_secs(5));
        let request = start("L");
        let conversation_id = request.conversation_id;

        let peer = tokio::spawn(async move {
            let (server_r, mut server_w) = split(server);
            let mut lines = BufReader::new(server_r).lines();
            lines.next_line().await.unwrap().unwrap();
            let stray = json!({"conversation_id": Uuid::new_v4(), "answer_to": "other"});
            let own = json!({"conversation_id": conversation_id, "answer_to": "L"});
            server_w
                .write_all(format!("{stray}\nnot json\n{own}\n").as_bytes())
                .await
                .unwrap();
        });

        let answer = transport.send("stdio", &request).await.unwrap();
        assert_eq!(answer["answer_to"], "L");
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_the_pipe_does_not_eat_the_deadline() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = split(client);
        let transport = StdioTransport::new(client_r, client_w, Duration::from_millis(100));

        let peer = tokio::spawn(async move {
            let (server_r, mut server_w) = split(server);
            let mut lines = BufReader::new(server_r).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                let request: Value = serde_json::from_str(&line).unwrap();
                tokio::time::sleep(Duration::from_millis(80)).await;
                let answer = json!({"conversation_id": request["conversation_id"], "status": "ok"});
                server_w
                    .write_all(format!("{answer}\n").as_bytes())
                    .await
                    .unwrap();
            }
        });

        let (first, second) = (start("first"), start("second"));
        let (a, b) = tokio::join!(
            transport.send("stdio", &first),
            transport.send("stdio", &second)
        );
        assert!(a.is_some());
        assert!(b.is_some());
        drop(transport);
        peer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (client, _server) = tokio::io::duplex(4096);
        let (client_r, client_w) = split(client);
        let transport = StdioTransport::new(client_r, client_w, Duration::from_secs(1));
        let msg = Message::new("launcher", StartLeague { league_id: "L".into() });
        assert_eq!(transport.send("stdio", &msg).await, None);
    }
}
