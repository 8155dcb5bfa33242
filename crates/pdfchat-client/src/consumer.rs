use crate::coalescer::Coalescer;
use crate::protocol::LineBuffer;
use futures::StreamExt;
use pdfchat_core::models::{ChatDetail, StreamRecord};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Events delivered to the UI layer, in order, over one channel.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The server accepted the request; the stream is open.
    Opened,
    /// Coalesced token text flushed on the timer tick.
    Delta { text: String },
    /// The stream failed. `accepted` is whether the server had accepted the
    /// user message before the failure (stream opened = accepted).
    Failed { message: String, accepted: bool },
    /// Terminal done record observed.
    Done,
    /// Authoritative chat state fetched after done; replaces all local
    /// optimistic content.
    Reconciled { chat: ChatDetail },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Flush cadence for the pending-token buffer.
    pub flush_interval: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            flush_interval: Duration::from_millis(60),
        }
    }
}

/// Consumes the streaming answer protocol. Holds at most one in-flight
/// stream; a new send or an explicit abort cancels the previous one,
/// releasing its network reader, and no flush fires after teardown.
pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
    in_flight: Option<CancellationToken>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            in_flight: None,
        }
    }

    /// Abort the in-flight stream, if any.
    pub fn abort(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }

    /// Send a message and stream the answer back as [`ChatEvent`]s.
    pub fn send_message(
        &mut self,
        chat_id: i32,
        content: String,
        collection_name: String,
    ) -> mpsc::Receiver<ChatEvent> {
        self.abort();

        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());

        let (tx, rx) = mpsc::channel(32);
        let http = self.http.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            run_stream(http, config, chat_id, content, collection_name, token, tx).await;
        });

        rx
    }

    /// Fetch the authoritative chat state.
    pub async fn fetch_chat(&self, chat_id: i32) -> Result<ChatDetail, reqwest::Error> {
        self.http
            .get(format!("{}/chat/{}", self.config.base_url, chat_id))
            .send()
            .await?
            .error_for_status()?
            .json::<ChatDetail>()
            .await
    }
}

async fn run_stream(
    http: reqwest::Client,
    config: ClientConfig,
    chat_id: i32,
    content: String,
    collection_name: String,
    token: CancellationToken,
    tx: mpsc::Sender<ChatEvent>,
) {
    let body = serde_json::json!({
        "chatId": chat_id,
        "content": content,
        "role": "user",
        "collectionName": collection_name,
    });

    let response = match http
        .post(format!("{}/message", config.base_url))
        .json(&body)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            let _ = tx
                .send(ChatEvent::Failed {
                    message: format!("Server rejected the message: {}", response.status()),
                    accepted: false,
                })
                .await;
            return;
        }
        Err(e) => {
            // The request never reached the server.
            let _ = tx
                .send(ChatEvent::Failed {
                    message: format!("Request failed: {}", e),
                    accepted: false,
                })
                .await;
            return;
        }
    };

    // Stream opened successfully: treat the user message as accepted.
    if tx.send(ChatEvent::Opened).await.is_err() {
        return;
    }

    let mut byte_stream = response.bytes_stream();
    let mut lines = LineBuffer::new();
    let mut coalescer = Coalescer::new();
    let mut flush_tick = tokio::time::interval(config.flush_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // Teardown: drop the reader, never flush after this point.
                debug!("Stream for chat {} cancelled", chat_id);
                return;
            }

            _ = flush_tick.tick() => {
                if let Some(text) = coalescer.take() {
                    if tx.send(ChatEvent::Delta { text }).await.is_err() {
                        return;
                    }
                }
            }

            chunk = byte_stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for line in lines.push(&bytes) {
                            match serde_json::from_str::<StreamRecord>(&line) {
                                Ok(StreamRecord::Token { text }) => {
                                    coalescer.push(&text);
                                }
                                Ok(StreamRecord::Error { message }) => {
                                    // Discard the partial answer, surface the
                                    // failure. Done still follows.
                                    coalescer.clear();
                                    let _ = tx.send(ChatEvent::Failed {
                                        message,
                                        accepted: true,
                                    }).await;
                                }
                                Ok(StreamRecord::Done) => {
                                    if let Some(text) = coalescer.take() {
                                        let _ = tx.send(ChatEvent::Delta { text }).await;
                                    }
                                    let _ = tx.send(ChatEvent::Done).await;
                                    reconcile(&http, &config, chat_id, &tx).await;
                                    return;
                                }
                                Err(e) => {
                                    warn!("Skipping malformed stream record: {}", e);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        coalescer.clear();
                        let _ = tx.send(ChatEvent::Failed {
                            message: format!("Stream error: {}", e),
                            accepted: true,
                        }).await;
                        return;
                    }
                    None => {
                        // EOF without a done record
                        coalescer.clear();
                        let _ = tx.send(ChatEvent::Failed {
                            message: "Stream ended before done".to_string(),
                            accepted: true,
                        }).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Re-fetch the durable chat state after done; the locally accumulated text
/// may have parsed differently than the server's final formatting.
async fn reconcile(
    http: &reqwest::Client,
    config: &ClientConfig,
    chat_id: i32,
    tx: &mpsc::Sender<ChatEvent>,
) {
    let result = async {
        http.get(format!("{}/chat/{}", config.base_url, chat_id))
            .send()
            .await?
            .error_for_status()?
            .json::<ChatDetail>()
            .await
    }
    .await;

    match result {
        Ok(chat) => {
            let _ = tx.send(ChatEvent::Reconciled { chat }).await;
        }
        Err(e) => {
            warn!("Reconciliation fetch failed for chat {}: {}", chat_id, e);
        }
    }
}
