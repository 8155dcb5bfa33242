use axum::body::{Body, Bytes};
use axum::extract::Path;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use pdfchat_client::{ChatClient, ChatEvent, ClientConfig, LocalId, SessionState};
use pdfchat_core::models::{ChatDetail, Message, MessageRole, StreamRecord};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn token(text: &str) -> StreamRecord {
    StreamRecord::Token {
        text: text.to_string(),
    }
}

fn chat_detail(messages: Vec<(i32, MessageRole, &str)>) -> ChatDetail {
    ChatDetail {
        id: 1,
        name: "stub".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        messages: messages
            .into_iter()
            .map(|(id, role, content)| Message {
                id,
                chat_id: 1,
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            })
            .collect(),
        docs: Vec::new(),
    }
}

/// Stub server streaming the given records on /message with a delay between
/// frames, and serving the given chat on /chat/{id}.
async fn spawn_stub(
    records: Vec<StreamRecord>,
    frame_delay: Duration,
    chat: ChatDetail,
) -> String {
    let records = Arc::new(records);
    let chat = Arc::new(chat);

    let app = Router::new()
        .route(
            "/message",
            post({
                let records = records.clone();
                move || {
                    let records = records.clone();
                    async move {
                        let stream = async_stream::stream! {
                            for record in records.iter() {
                                tokio::time::sleep(frame_delay).await;
                                yield Ok::<_, Infallible>(Bytes::from(record.to_ndjson()));
                            }
                        };

                        Response::builder()
                            .header("content-type", "application/x-ndjson")
                            .body(Body::from_stream(stream))
                            .unwrap()
                    }
                }
            }),
        )
        .route(
            "/chat/{id}",
            get({
                let chat = chat.clone();
                move |Path(_id): Path<i32>| {
                    let chat = chat.clone();
                    async move { Json((*chat).clone()) }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn collect_events(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("stream did not terminate");
    events
}

fn client_with_flush(base_url: &str, flush_ms: u64) -> ChatClient {
    let mut config = ClientConfig::new(base_url);
    config.flush_interval = Duration::from_millis(flush_ms);
    ChatClient::new(config)
}

#[tokio::test]
async fn tokens_are_coalesced_and_reconciled_against_the_server_record() {
    let mut records: Vec<StreamRecord> = "The refund window is 30 days"
        .split_inclusive(' ')
        .map(token)
        .collect();
    let token_count = records.len();
    records.push(StreamRecord::Done);

    let chat = chat_detail(vec![
        (1, MessageRole::User, "what is the refund window?"),
        (2, MessageRole::Assistant, "### 1. Formatted by the server"),
    ]);

    let base_url = spawn_stub(records, Duration::from_millis(2), chat).await;
    let mut client = client_with_flush(&base_url, 50);

    let mut session = SessionState::new(1);
    session.begin_send("what is the refund window?");

    let rx = client.send_message(
        1,
        "what is the refund window?".to_string(),
        "col".to_string(),
    );
    let events = collect_events(rx).await;

    for event in &events {
        session.apply(event);
    }

    assert!(matches!(events[0], ChatEvent::Opened));

    // All token text arrives, in order, in fewer flushes than tokens.
    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ChatEvent::Delta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas.concat(), "The refund window is 30 days");
    assert!(deltas.len() < token_count, "updates were not coalesced");

    assert!(events.iter().any(|e| matches!(e, ChatEvent::Done)));
    assert!(matches!(events.last(), Some(ChatEvent::Reconciled { .. })));

    // The session now holds the authoritative record, not the raw stream.
    assert_eq!(session.messages().len(), 2);
    assert_eq!(session.messages()[0].id, LocalId::Persisted(1));
    assert_eq!(
        session.messages()[1].content,
        "### 1. Formatted by the server"
    );
}

#[tokio::test]
async fn error_records_discard_the_partial_and_keep_the_user_message() {
    let records = vec![
        token("half an ans"),
        StreamRecord::Error {
            message: "generation failed".to_string(),
        },
        StreamRecord::Done,
    ];
    // The durable state after the failure: user message only.
    let chat = chat_detail(vec![(1, MessageRole::User, "question")]);

    let base_url = spawn_stub(records, Duration::from_millis(2), chat).await;
    let mut client = client_with_flush(&base_url, 50);

    let mut session = SessionState::new(1);
    session.begin_send("question");

    let rx = client.send_message(1, "question".to_string(), "col".to_string());
    let events = collect_events(rx).await;

    for event in &events {
        session.apply(event);
    }

    let failed = events
        .iter()
        .find_map(|e| match e {
            ChatEvent::Failed { message, accepted } => Some((message.clone(), *accepted)),
            _ => None,
        })
        .expect("no failure surfaced");
    assert_eq!(failed.0, "generation failed");
    assert!(failed.1, "server had accepted the message");

    // Done still terminates the stream and reconciliation still runs.
    assert!(events.iter().any(|e| matches!(e, ChatEvent::Done)));
    assert!(matches!(events.last(), Some(ChatEvent::Reconciled { .. })));

    // No assistant message anywhere; the user message survived.
    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.messages()[0].role, MessageRole::User);
}

#[tokio::test]
async fn aborting_mid_stream_stops_events_without_done() {
    // A long stream with no done record within the test window.
    let records: Vec<StreamRecord> = (0..200).map(|i| token(&format!("t{} ", i))).collect();
    let chat = chat_detail(vec![]);

    let base_url = spawn_stub(records, Duration::from_millis(20), chat).await;
    let mut client = client_with_flush(&base_url, 10);

    let mut rx = client.send_message(1, "question".to_string(), "col".to_string());

    // Wait until the stream is open and producing.
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event before abort")
        .expect("stream closed early");
    assert!(matches!(first, ChatEvent::Opened));

    client.abort();

    // The channel drains and closes; no done, no reconciliation.
    let remaining = collect_events(rx).await;
    assert!(!remaining.iter().any(|e| matches!(e, ChatEvent::Done)));
    assert!(!remaining
        .iter()
        .any(|e| matches!(e, ChatEvent::Reconciled { .. })));
}

#[tokio::test]
async fn a_new_send_aborts_the_previous_stream() {
    let records: Vec<StreamRecord> = (0..200).map(|i| token(&format!("t{} ", i))).collect();
    let chat = chat_detail(vec![]);

    let base_url = spawn_stub(records, Duration::from_millis(20), chat).await;
    let mut client = client_with_flush(&base_url, 10);

    let mut first_rx = client.send_message(1, "first".to_string(), "col".to_string());
    let first = tokio::time::timeout(Duration::from_secs(5), first_rx.recv())
        .await
        .expect("no event on first stream")
        .expect("first stream closed early");
    assert!(matches!(first, ChatEvent::Opened));

    let _second_rx = client.send_message(1, "second".to_string(), "col".to_string());

    // The first stream terminates without a done record.
    let remaining = collect_events(first_rx).await;
    assert!(!remaining.iter().any(|e| matches!(e, ChatEvent::Done)));
}

#[tokio::test]
async fn a_request_that_never_reaches_the_server_rolls_back_the_user_message() {
    // Nothing is listening here.
    let mut client = client_with_flush("http://127.0.0.1:9", 50);

    let mut session = SessionState::new(1);
    session.begin_send("question");

    let rx = client.send_message(1, "question".to_string(), "col".to_string());
    let events = collect_events(rx).await;

    for event in &events {
        session.apply(event);
    }

    assert!(matches!(
        events.as_slice(),
        [ChatEvent::Failed { accepted: false, .. }]
    ));
    assert!(session.messages().is_empty());
}
