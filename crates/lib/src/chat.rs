//! Chat turn: append the prompt, stream the model's reply, append the reply.
//!
//! [`Orchestrator::submit`] returns a lazy stream of [`ChatEvent`]s. The inference request is
//! sent on first poll; `Done` and `Error` are the two terminal events. Dropping the stream
//! early abandons the turn without appending an assistant reply.

use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use crate::llm::{ChatBackend, ChatMessage, ChunkStream};
use crate::session::{SessionError, SessionId, SessionStore, Turn};

/// One item of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Next piece of reply text, in arrival order.
    Chunk(String),
    /// Stream completed; the assistant turn that was appended.
    Done(Turn),
    /// Request or stream failed; the user turn stays, no assistant turn is appended.
    Error(String),
}

pub type ReplyStream = BoxStream<'static, ChatEvent>;

/// Runs chat turns against one backend and model.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    model: String,
}

enum Phase {
    Connect(Vec<ChatMessage>),
    Streaming(ChunkStream),
    Finished,
}

struct TurnState {
    backend: Arc<dyn ChatBackend>,
    model: String,
    store: SessionStore,
    session_id: SessionId,
    reply: String,
    phase: Phase,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ChatBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start a turn. Returns `Ok(None)` for an empty or whitespace-only prompt, in which case
    /// nothing is appended and no request is made.
    pub async fn submit(
        &self,
        store: &SessionStore,
        session_id: &str,
        prompt: &str,
    ) -> Result<Option<ReplyStream>, SessionError> {
        if prompt.trim().is_empty() {
            log::debug!("chat: ignoring empty prompt");
            return Ok(None);
        }
        store.append(session_id, Turn::user(prompt)).await?;
        let session = store
            .get(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let messages: Vec<ChatMessage> = session.turns().iter().map(ChatMessage::from).collect();
        log::info!(
            "chat: session {} sending {} message(s) to model {}",
            session_id,
            messages.len(),
            self.model
        );

        let state = TurnState {
            backend: self.backend.clone(),
            model: self.model.clone(),
            store: store.clone(),
            session_id: session_id.to_string(),
            reply: String::new(),
            phase: Phase::Connect(messages),
        };
        Ok(Some(stream::unfold(state, next_event).boxed()))
    }
}

async fn next_event(mut st: TurnState) -> Option<(ChatEvent, TurnState)> {
    loop {
        match std::mem::replace(&mut st.phase, Phase::Finished) {
            Phase::Connect(messages) => {
                let connected = st.backend.chat_stream(&st.model, messages).await;
                match connected {
                    Ok(chunks) => st.phase = Phase::Streaming(chunks),
                    Err(e) => {
                        log::warn!("chat: request failed: {}", e);
                        return Some((ChatEvent::Error(e.to_string()), st));
                    }
                }
            }
            Phase::Streaming(mut chunks) => match chunks.next().await {
                Some(Ok(chunk)) => {
                    st.reply.push_str(&chunk);
                    st.phase = Phase::Streaming(chunks);
                    return Some((ChatEvent::Chunk(chunk), st));
                }
                Some(Err(e)) => {
                    log::warn!("chat: stream failed: {}", e);
                    return Some((ChatEvent::Error(e.to_string()), st));
                }
                None => {
                    let turn = Turn::assistant(std::mem::take(&mut st.reply));
                    let event = match st.store.append(&st.session_id, turn.clone()).await {
                        Ok(()) => ChatEvent::Done(turn),
                        Err(e) => ChatEvent::Error(e.to_string()),
                    };
                    return Some((event, st));
                }
            },
            Phase::Finished => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ModelDescriptor};
    use crate::session::Role;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted backend: replies with fixed chunks, optionally failing.
    #[derive(Default)]
    struct ScriptedBackend {
        chunks: Vec<&'static str>,
        refuse: bool,
        fail_after: Option<usize>,
        calls: AtomicUsize,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn list_models(&self) -> Result<Vec<ModelDescriptor>, LlmError> {
            Ok(vec![])
        }

        async fn chat_stream(
            &self,
            _model: &str,
            messages: Vec<ChatMessage>,
        ) -> Result<ChunkStream, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(messages);
            if self.refuse {
                return Err(LlmError::Api("connection refused".to_string()));
            }
            let mut items: Vec<Result<String, LlmError>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(LlmError::Incomplete));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    fn setup(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Orchestrator) {
        let backend = Arc::new(backend);
        let orchestrator = Orchestrator::new(backend.clone(), "test-model");
        (backend, orchestrator)
    }

    async fn run(orchestrator: &Orchestrator, store: &SessionStore, id: &str, prompt: &str) -> Vec<ChatEvent> {
        match orchestrator.submit(store, id, prompt).await.unwrap() {
            Some(reply) => reply.collect().await,
            None => Vec::new(),
        }
    }

    #[tokio::test]
    async fn fever_scenario_streams_and_appends_reply() {
        let (_, orchestrator) = setup(ScriptedBackend {
            chunks: vec!["A ", "fever ", "is ..."],
            ..Default::default()
        });
        let store = SessionStore::new();
        let id = store.create().await;

        let events = run(&orchestrator, &store, &id, "What is a fever?").await;
        assert_eq!(events[0], ChatEvent::Chunk("A ".to_string()));
        assert_eq!(events[1], ChatEvent::Chunk("fever ".to_string()));
        assert_eq!(events[2], ChatEvent::Chunk("is ...".to_string()));
        match &events[3] {
            ChatEvent::Done(turn) => assert_eq!(turn.content, "A fever is ..."),
            other => panic!("expected Done, got {:?}", other),
        }
        assert_eq!(events.len(), 4);

        let session = store.get(&id).await.unwrap();
        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!((turns[0].role, turns[0].content.as_str()), (Role::User, "What is a fever?"));
        assert_eq!((turns[1].role, turns[1].content.as_str()), (Role::Assistant, "A fever is ..."));
    }

    #[tokio::test]
    async fn each_exchange_adds_two_turns_in_order() {
        let (backend, orchestrator) = setup(ScriptedBackend {
            chunks: vec!["ok"],
            ..Default::default()
        });
        let store = SessionStore::new();
        let id = store.create().await;
        let prompts = ["first", "second", "third"];
        for p in prompts {
            run(&orchestrator, &store, &id, p).await;
        }

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.len(), 2 * prompts.len());
        for (i, pair) in session.turns().chunks(2).enumerate() {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[0].content, prompts[i]);
            assert_eq!(pair[1].role, Role::Assistant);
        }
        assert!(session.turns().windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        // Third request carries the full history without timestamps.
        let requests = backend.requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(
            last[4],
            ChatMessage {
                role: "user".to_string(),
                content: "third".to_string()
            }
        );
        assert_eq!(last[1].role, "assistant");
    }

    #[tokio::test]
    async fn empty_prompt_is_a_no_op() {
        let (backend, orchestrator) = setup(ScriptedBackend::default());
        let store = SessionStore::new();
        let id = store.create().await;
        for prompt in ["", "   ", "\n\t"] {
            assert!(orchestrator.submit(&store, &id, prompt).await.unwrap().is_none());
        }
        assert!(store.get(&id).await.unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refused_request_keeps_user_turn() {
        let (_, orchestrator) = setup(ScriptedBackend {
            refuse: true,
            ..Default::default()
        });
        let store = SessionStore::new();
        let id = store.create().await;
        let events = run(&orchestrator, &store, &id, "hello").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChatEvent::Error(m) if m.contains("connection refused")));

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.len(), 1);
        assert_eq!(session.turns()[0].role, Role::User);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_chunks_but_no_reply() {
        let (_, orchestrator) = setup(ScriptedBackend {
            chunks: vec!["A ", "fever ", "is ..."],
            fail_after: Some(2),
            ..Default::default()
        });
        let store = SessionStore::new();
        let id = store.create().await;
        let events = run(&orchestrator, &store, &id, "What is a fever?").await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], ChatEvent::Error(_)));
        assert_eq!(store.get(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_abandons_the_turn() {
        let (backend, orchestrator) = setup(ScriptedBackend {
            chunks: vec!["A ", "fever"],
            ..Default::default()
        });
        let store = SessionStore::new();
        let id = store.create().await;
        let reply = orchestrator.submit(&store, &id, "hi").await.unwrap();
        drop(reply);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let (backend, orchestrator) = setup(ScriptedBackend::default());
        let store = SessionStore::new();
        let err = orchestrator.submit(&store, "sess-nope", "hi").await.err().unwrap();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
