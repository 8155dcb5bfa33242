use crate::consumer::ChatEvent;
use pdfchat_core::models::{ChatDetail, MessageRole};

/// Local message identity: optimistic entries get a temporary id until the
/// reconciliation re-fetch replaces them with the server's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalId {
    Temp(u64),
    Persisted(i32),
}

#[derive(Debug, Clone)]
pub struct LocalMessage {
    pub id: LocalId,
    pub role: MessageRole,
    pub content: String,
}

/// Client-side view of one chat during streaming.
///
/// Holds the optimistic user message and the not-yet-durable assistant
/// buffer, applies the rollback rules on failure, and is replaced wholesale
/// by the authoritative record on reconciliation; the locally accumulated
/// text may have been formatted differently by the server.
#[derive(Debug)]
pub struct SessionState {
    chat_id: i32,
    messages: Vec<LocalMessage>,
    next_temp: u64,
    pending_user: Option<u64>,
    streaming_assistant: Option<u64>,
}

impl SessionState {
    pub fn new(chat_id: i32) -> Self {
        Self {
            chat_id,
            messages: Vec::new(),
            next_temp: 0,
            pending_user: None,
            streaming_assistant: None,
        }
    }

    /// Seed the state from a fetched chat.
    pub fn from_chat(chat: &ChatDetail) -> Self {
        let mut state = Self::new(chat.id);
        state.replace_with(chat);
        state
    }

    pub fn chat_id(&self) -> i32 {
        self.chat_id
    }

    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }

    /// Optimistically append the user's message before the request is sent.
    pub fn begin_send(&mut self, content: &str) -> u64 {
        let id = self.alloc_temp();
        self.messages.push(LocalMessage {
            id: LocalId::Temp(id),
            role: MessageRole::User,
            content: content.to_string(),
        });
        self.pending_user = Some(id);
        id
    }

    pub fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Opened => {
                let id = self.alloc_temp();
                self.messages.push(LocalMessage {
                    id: LocalId::Temp(id),
                    role: MessageRole::Assistant,
                    content: String::new(),
                });
                self.streaming_assistant = Some(id);
            }

            ChatEvent::Delta { text } => {
                if let Some(id) = self.streaming_assistant {
                    if let Some(message) = self
                        .messages
                        .iter_mut()
                        .find(|m| m.id == LocalId::Temp(id))
                    {
                        message.content.push_str(text);
                    }
                }
            }

            ChatEvent::Failed { accepted, .. } => {
                // The partial assistant message is never kept.
                if let Some(id) = self.streaming_assistant.take() {
                    self.remove_temp(id);
                }
                // The user's own message is rolled back only when the
                // request never reached the server.
                match self.pending_user.take() {
                    Some(id) if !*accepted => self.remove_temp(id),
                    _ => {}
                }
            }

            ChatEvent::Done => {}

            ChatEvent::Reconciled { chat } => {
                self.replace_with(chat);
            }
        }
    }

    fn replace_with(&mut self, chat: &ChatDetail) {
        // Server arrays arrive in total order (created_at, id); adopt them
        // verbatim and drop every optimistic entry.
        self.messages = chat
            .messages
            .iter()
            .map(|m| LocalMessage {
                id: LocalId::Persisted(m.id),
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        self.pending_user = None;
        self.streaming_assistant = None;
    }

    fn alloc_temp(&mut self) -> u64 {
        let id = self.next_temp;
        self.next_temp += 1;
        id
    }

    fn remove_temp(&mut self, id: u64) {
        self.messages.retain(|m| m.id != LocalId::Temp(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pdfchat_core::models::Message;

    fn chat_with_messages(messages: Vec<(i32, MessageRole, &str)>) -> ChatDetail {
        ChatDetail {
            id: 1,
            name: "test".to_string(),
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

    #[test]
    fn deltas_accumulate_into_the_streaming_assistant_message() {
        let mut state = SessionState::new(1);
        state.begin_send("question");
        state.apply(&ChatEvent::Opened);
        state.apply(&ChatEvent::Delta {
            text: "partial ".to_string(),
        });
        state.apply(&ChatEvent::Delta {
            text: "answer".to_string(),
        });

        let messages = state.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "partial answer");
    }

    #[test]
    fn rejected_request_rolls_back_the_user_message() {
        let mut state = SessionState::new(1);
        state.begin_send("question");

        state.apply(&ChatEvent::Failed {
            message: "connection refused".to_string(),
            accepted: false,
        });

        assert!(state.messages().is_empty());
    }

    #[test]
    fn mid_stream_failure_keeps_the_user_message_and_drops_the_partial() {
        let mut state = SessionState::new(1);
        state.begin_send("question");
        state.apply(&ChatEvent::Opened);
        state.apply(&ChatEvent::Delta {
            text: "half an answ".to_string(),
        });

        state.apply(&ChatEvent::Failed {
            message: "generation failed".to_string(),
            accepted: true,
        });

        let messages = state.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "question");
    }

    #[test]
    fn reconciliation_replaces_optimistic_content_with_the_server_record() {
        let mut state = SessionState::new(1);
        state.begin_send("question");
        state.apply(&ChatEvent::Opened);
        state.apply(&ChatEvent::Delta {
            text: "raw streamed text".to_string(),
        });
        state.apply(&ChatEvent::Done);

        // The server formatted the answer differently than the raw stream.
        let chat = chat_with_messages(vec![
            (10, MessageRole::User, "question"),
            (11, MessageRole::Assistant, "### 1. Formatted answer"),
        ]);
        state.apply(&ChatEvent::Reconciled { chat });

        let messages = state.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, LocalId::Persisted(10));
        assert_eq!(messages[1].content, "### 1. Formatted answer");
    }

    #[test]
    fn crash_between_writes_reads_as_no_assistant_reply_yet() {
        // Reconciled state with a user message and no assistant reply is a
        // valid state, not an error.
        let chat = chat_with_messages(vec![(10, MessageRole::User, "question")]);
        let state = SessionState::from_chat(&chat);

        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].role, MessageRole::User);
    }
}
