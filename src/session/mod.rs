//! Conversation session: one send -> stream -> commit turn at a time
//!
//! The session owns a working copy of the tree and the last snapshot the
//! store confirmed. Reads (`view`, `resolve_path`, `state`) only take the
//! tree lock briefly, so they stay available while a turn streams. No lock
//! is held across an await point.

mod state;

pub use state::{TransitionError, TurnEvent, TurnMachine, TurnState, TurnTransition};

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

use crate::branch::{self, BranchPoint};
use crate::error::{Error, Result};
use crate::locale::Locale;
use crate::prompt::{self, Quote};
use crate::provider::{CompletionEvent, CompletionRequest, CompletionService, Usage, DEFAULT_MODEL};
use crate::store::{ConversationRepository, ConversationTree};
use crate::sync;
use crate::tree::{self, Message, MessageStore, Role};

/// Titles derived from the first user message are cut to this many characters
pub const TITLE_MAX_CHARS: usize = 30;

const EVENT_CAPACITY: usize = 256;

/// Preferences a session is constructed with
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub locale: Locale,
    pub model: String,
    pub stream: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            model: DEFAULT_MODEL.to_string(),
            stream: true,
        }
    }
}

/// What a UI renders: the active path and every node of the tree
#[derive(Debug, Clone)]
pub struct ConversationView {
    pub conversation_id: String,
    pub current_path: Vec<String>,
    pub current_messages: Vec<Message>,
    pub all_messages: HashMap<String, Message>,
}

impl ConversationView {
    fn from_tree(conversation_id: &str, snapshot: &ConversationTree) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            current_path: snapshot.current_path.clone(),
            current_messages: tree::messages_along(&snapshot.messages, &snapshot.current_path),
            all_messages: snapshot.messages.to_map(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TurnStarted {
        user_message_id: String,
    },
    AssistantCreated {
        message_id: String,
    },
    Delta {
        message_id: String,
        text: String,
    },
    Committed {
        user_message_id: String,
        assistant_message_id: String,
    },
    Failed {
        notice: String,
        assistant_message_id: Option<String>,
    },
}

#[derive(Debug)]
pub enum TurnOutcome {
    /// Another turn was in flight; nothing changed
    Busy,
    Completed {
        user_message_id: String,
        assistant_message_id: String,
        usage: Option<Usage>,
    },
    /// The provider failed. With an assistant id the pair was committed with
    /// an apology; without one the turn was rolled back.
    Failed {
        notice: String,
        error: Error,
        assistant_message_id: Option<String>,
    },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }
}

struct SyncState {
    working: ConversationTree,
    confirmed: ConversationTree,
}

pub struct ConversationSession {
    conversation_id: String,
    repo: Arc<dyn ConversationRepository>,
    provider: Arc<dyn CompletionService>,
    settings: SessionSettings,
    tree: RwLock<SyncState>,
    machine: Mutex<TurnMachine>,
    events: broadcast::Sender<SessionEvent>,
}

/// Returns the machine to Idle when a turn ends, however it ends
struct TurnGuard<'a> {
    machine: &'a Mutex<TurnMachine>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        if machine.state() != &TurnState::Idle {
            machine.handle(TurnEvent::Reset).ok();
        }
    }
}

impl ConversationSession {
    pub fn open(
        conversation_id: &str,
        repo: Arc<dyn ConversationRepository>,
        provider: Arc<dyn CompletionService>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let loaded = sync::pull(repo.as_ref(), conversation_id)?;
        tracing::debug!(
            conversation_id = %conversation_id,
            messages = loaded.messages.len(),
            path_len = loaded.current_path.len(),
            "session opened"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            conversation_id: conversation_id.to_string(),
            repo,
            provider,
            settings,
            tree: RwLock::new(SyncState {
                working: loaded.clone(),
                confirmed: loaded,
            }),
            machine: Mutex::new(TurnMachine::new()),
            events,
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> TurnState {
        self.lock_machine().state().clone()
    }

    pub fn view(&self) -> ConversationView {
        ConversationView::from_tree(&self.conversation_id, &self.read_state().working)
    }

    pub fn resolve_path(&self, message_id: &str) -> Vec<String> {
        tree::resolve_path(&self.read_state().working.messages, message_id)
    }

    /// Messages or a path change the store has not accepted yet
    pub fn has_pending(&self) -> bool {
        let state = self.read_state();
        !sync::is_synced(&state.working, &state.confirmed)
    }

    /// Push pending writes. Returns how many messages were sent.
    pub fn retry_pending(&self) -> Result<usize> {
        let machine = self.lock_machine();
        if machine.state().is_busy() {
            tracing::debug!(conversation_id = %self.conversation_id, "retry skipped, turn in flight");
            return Ok(0);
        }
        let sent = self.push_working()?;
        drop(machine);
        tracing::info!(conversation_id = %self.conversation_id, sent, "pending writes flushed");
        Ok(sent)
    }

    /// Run one turn: append the user node, stream the reply into a new
    /// assistant node and commit the pair.
    ///
    /// `branch_parent` forks from that message instead of the end of the
    /// current path. A quote only changes the prompt sent to the provider.
    pub async fn send_message(
        &self,
        content: &str,
        branch_parent: Option<&str>,
        quote: Option<&Quote>,
    ) -> Result<TurnOutcome> {
        if content.trim().is_empty() {
            return Err(Error::Validation("message content is empty".to_string()));
        }
        if !self.lock_machine().try_begin() {
            tracing::debug!(conversation_id = %self.conversation_id, "turn in flight, send ignored");
            return Ok(TurnOutcome::Busy);
        }
        let _guard = TurnGuard {
            machine: &self.machine,
        };
        let locale = self.settings.locale;

        let (user_id, user_path, previous_path) = {
            let mut guard = self.write_state();
            let working = &mut guard.working;
            let previous_path = working.current_path.clone();
            let plan = branch::plan(
                &working.messages,
                &working.current_path,
                BranchPoint::from_option(branch_parent),
            )?;
            let user = Message::user(content, &self.conversation_id, None);
            let user_id = user.id.clone();
            let path = branch::attach(&mut working.messages, &plan, user)?;
            working.current_path = path.clone();
            (user_id, path, previous_path)
        };
        self.emit(SessionEvent::TurnStarted {
            user_message_id: user_id.clone(),
        });

        let request = CompletionRequest {
            system_prompt: locale.system_prompt().to_string(),
            user_prompt: prompt::build_user_prompt(locale, content, quote),
            model: self.settings.model.clone(),
            stream: self.settings.stream,
        };
        let mut stream = match self.provider.generate(request).await {
            Ok(stream) => stream,
            Err(err) => return Ok(self.fail_before_stream(err, &user_id, previous_path)),
        };

        let assistant_id = {
            let mut guard = self.write_state();
            let working = &mut guard.working;
            let assistant = Message::assistant("", &self.conversation_id, None);
            let id = assistant.id.clone();
            working.current_path = branch::attach_to_path(&mut working.messages, &user_path, assistant)?;
            id
        };
        self.transition(TurnEvent::StreamStarted {
            assistant_id: assistant_id.clone(),
        });
        self.emit(SessionEvent::AssistantCreated {
            message_id: assistant_id.clone(),
        });

        let mut usage = None;
        let stream_error = loop {
            match stream.next().await {
                Some(Ok(CompletionEvent::Delta(text))) => {
                    self.write_state()
                        .working
                        .messages
                        .append_content(&assistant_id, &text)?;
                    self.emit(SessionEvent::Delta {
                        message_id: assistant_id.clone(),
                        text,
                    });
                }
                Some(Ok(CompletionEvent::Finished(reported))) => {
                    usage = reported;
                    break None;
                }
                Some(Err(err)) => break Some(err),
                None => {
                    break Some(Error::Transport(
                        "completion stream ended before finishing".to_string(),
                    ))
                }
            }
        };

        let has_content = self
            .read_state()
            .working
            .messages
            .get(&assistant_id)
            .is_some_and(|m| !m.content.trim().is_empty());
        let (failure, replacement) = match stream_error {
            Some(err) => (Some(err), Some(locale.turn_failed_apology())),
            None if !has_content => (
                Some(Error::Provider("completion returned no content".to_string())),
                Some(locale.empty_response_fallback()),
            ),
            None => (None, None),
        };
        if let Some(text) = replacement {
            self.write_state()
                .working
                .messages
                .set_content(&assistant_id, text)?;
        }
        if let Some(err) = &failure {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                assistant_id = %assistant_id,
                error = %err,
                "turn failed while streaming"
            );
            self.transition(TurnEvent::Error {
                reason: err.to_string(),
            });
        }

        if let Err(err) = self.push_working() {
            tracing::error!(
                conversation_id = %self.conversation_id,
                error = %err,
                "turn not persisted, writes kept pending"
            );
            return Err(err);
        }

        match failure {
            None => {
                self.transition(TurnEvent::Completed);
                tracing::info!(
                    conversation_id = %self.conversation_id,
                    user_id = %user_id,
                    assistant_id = %assistant_id,
                    total_tokens = usage.map(|u| u.total_tokens),
                    "turn committed"
                );
                self.emit(SessionEvent::Committed {
                    user_message_id: user_id.clone(),
                    assistant_message_id: assistant_id.clone(),
                });
                Ok(TurnOutcome::Completed {
                    user_message_id: user_id,
                    assistant_message_id: assistant_id,
                    usage,
                })
            }
            Some(error) => {
                let notice = locale.turn_failed_apology().to_string();
                self.emit(SessionEvent::Failed {
                    notice: notice.clone(),
                    assistant_message_id: Some(assistant_id.clone()),
                });
                Ok(TurnOutcome::Failed {
                    notice,
                    error,
                    assistant_message_id: Some(assistant_id),
                })
            }
        }
    }

    /// Make the next send continue from `message_id`
    pub fn create_branch(&self, message_id: &str) -> Result<ConversationView> {
        self.set_path(|messages| branch::branch_to(messages, message_id))
    }

    /// Display the branch through `message_id`, down to its newest leaf
    pub fn select_message(&self, message_id: &str) -> Result<ConversationView> {
        self.set_path(|messages| {
            let path = tree::extend_to_leaf(messages, message_id);
            if path.is_empty() {
                return Err(Error::message_not_found(message_id));
            }
            Ok(path)
        })
    }

    fn set_path(
        &self,
        compute: impl FnOnce(&MessageStore) -> Result<Vec<String>>,
    ) -> Result<ConversationView> {
        let machine = self.lock_machine();
        if machine.state().is_busy() {
            tracing::debug!(conversation_id = %self.conversation_id, "path change ignored, turn in flight");
            return Ok(self.view());
        }

        {
            let mut guard = self.write_state();
            let path = compute(&guard.working.messages)?;
            guard.working.current_path = path;
        }

        if let Err(err) = self.push_working() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                error = %err,
                "active path not saved, kept pending"
            );
        }
        drop(machine);
        Ok(self.view())
    }

    /// Undo only this turn: drop its user node and restore the path it
    /// replaced. Writes still pending from earlier stay pending.
    fn fail_before_stream(&self, error: Error, user_id: &str, previous_path: Vec<String>) -> TurnOutcome {
        tracing::warn!(
            conversation_id = %self.conversation_id,
            error = %error,
            "completion request failed, turn rolled back"
        );
        {
            let mut guard = self.write_state();
            let working = &mut guard.working;
            if let Err(err) = working.messages.remove_leaf(user_id) {
                tracing::error!(user_id = %user_id, error = %err, "could not drop user node of failed turn");
            }
            working.current_path = previous_path;
        }
        self.transition(TurnEvent::Error {
            reason: error.to_string(),
        });

        let notice = self.settings.locale.send_failed_notice().to_string();
        self.emit(SessionEvent::Failed {
            notice: notice.clone(),
            assistant_message_id: None,
        });
        TurnOutcome::Failed {
            notice,
            error,
            assistant_message_id: None,
        }
    }

    /// Title the conversation after its root user message, when that message
    /// was just persisted for the first time or the title is still a
    /// placeholder. Failures only log.
    fn maybe_assign_title(&self, first_text: &str, was_empty: bool) {
        let current = match self.repo.get_conversation(&self.conversation_id) {
            Ok(Some(row)) => row.title,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(conversation_id = %self.conversation_id, error = %err, "title lookup failed");
                return;
            }
        };
        let is_placeholder = Locale::ALL
            .iter()
            .any(|l| l.placeholder_title() == current);
        if !was_empty && !is_placeholder {
            return;
        }

        let title = prompt::truncate_text(first_text.trim(), TITLE_MAX_CHARS);
        if let Err(err) = self.repo.update_title(&self.conversation_id, &title) {
            tracing::warn!(conversation_id = %self.conversation_id, error = %err, "title update failed");
        }
    }

    /// Push pending writes, then title the conversation if needed
    fn push_working(&self) -> Result<usize> {
        let (sent, was_empty, root_text) = {
            let mut guard = self.write_state();
            let SyncState { working, confirmed } = &mut *guard;
            let was_empty = confirmed.messages.is_empty();
            let sent = sync::push(self.repo.as_ref(), &self.conversation_id, working, confirmed)?;
            (sent, was_empty, root_user_text(&working.messages))
        };
        if let Some(text) = root_text {
            self.maybe_assign_title(&text, was_empty);
        }
        Ok(sent)
    }

    fn transition(&self, event: TurnEvent) {
        if let Err(err) = self.lock_machine().handle(event) {
            tracing::error!(conversation_id = %self.conversation_id, error = %err, "turn state out of step");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn lock_machine(&self) -> MutexGuard<'_, TurnMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SyncState> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SyncState> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn root_user_text(messages: &MessageStore) -> Option<String> {
    let root = messages.root().ok().flatten()?;
    messages
        .get(root)
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CompletionStream;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays one scripted reply per call
    struct Scripted {
        replies: Mutex<VecDeque<Result<Vec<Result<CompletionEvent>>>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Vec<Result<CompletionEvent>>>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn generate(&self, request: CompletionRequest) -> Result<CompletionStream> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Provider("script exhausted".into())))?;
            Ok(Box::pin(futures::stream::iter(reply)))
        }
    }

    fn reply(text: &str) -> Result<Vec<Result<CompletionEvent>>> {
        Ok(vec![
            Ok(CompletionEvent::Delta(text.to_string())),
            Ok(CompletionEvent::Finished(None)),
        ])
    }

    fn session_with(provider: Arc<Scripted>) -> (Arc<SqliteStore>, ConversationSession) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .create_conversation("conv", Locale::Ja.placeholder_title())
            .unwrap();
        let session =
            ConversationSession::open("conv", store.clone(), provider, SessionSettings::default())
                .unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn test_first_turn_sets_title() {
        let (store, session) = session_with(Scripted::new(vec![reply("Hi")]));
        let long = "a question that is definitely longer than thirty characters";

        let outcome = session.send_message(long, None, None).await.unwrap();
        assert!(outcome.is_completed());

        let row = store.get_conversation("conv").unwrap().unwrap();
        assert_eq!(row.title, format!("{}...", &long[..30]));
        assert!(!session.has_pending());
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_later_turn_keeps_custom_title() {
        let (store, session) = session_with(Scripted::new(vec![reply("1"), reply("2")]));
        session.send_message("first", None, None).await.unwrap();
        store.update_title("conv", "Renamed").unwrap();
        session.send_message("second", None, None).await.unwrap();

        assert_eq!(store.get_conversation("conv").unwrap().unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_rejected_request_rolls_back() {
        let (store, session) = session_with(Scripted::new(vec![
            reply("Hi"),
            Err(Error::Provider("invalid API key".into())),
        ]));
        session.send_message("Hello", None, None).await.unwrap();
        let before = session.view();

        let outcome = session.send_message("again", None, None).await.unwrap();
        match outcome {
            TurnOutcome::Failed {
                notice,
                assistant_message_id,
                ..
            } => {
                assert_eq!(notice, Locale::Ja.send_failed_notice());
                assert!(assistant_message_id.is_none());
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let after = session.view();
        assert_eq!(after.current_path, before.current_path);
        assert_eq!(after.all_messages.len(), 2);
        assert_eq!(store.load_conversation_tree("conv").unwrap().messages.len(), 2);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_empty_reply_gets_fallback_content() {
        let (_store, session) =
            session_with(Scripted::new(vec![Ok(vec![Ok(CompletionEvent::Finished(None))])]));

        let outcome = session.send_message("Hello", None, None).await.unwrap();
        let TurnOutcome::Failed {
            assistant_message_id: Some(id),
            ..
        } = outcome
        else {
            panic!("expected committed failure");
        };
        assert_eq!(
            session.view().all_messages[&id].content,
            Locale::Ja.empty_response_fallback()
        );
    }

    #[tokio::test]
    async fn test_stream_without_finish_is_transport_failure() {
        let (_store, session) = session_with(Scripted::new(vec![Ok(vec![Ok(
            CompletionEvent::Delta("partial".into()),
        )])]));

        let outcome = session.send_message("Hello", None, None).await.unwrap();
        match outcome {
            TurnOutcome::Failed { error, .. } => assert!(matches!(error, Error::Transport(_))),
            other => panic!("expected failure, got {other:?}"),
        }
        let current = session.view().current_messages;
        assert_eq!(current[1].content, Locale::Ja.turn_failed_apology());
    }

    #[tokio::test]
    async fn test_quote_changes_prompt_not_stored_content() {
        let provider = Scripted::new(vec![reply("Hi")]);
        let (_store, session) = session_with(provider.clone());
        let quote = Quote {
            text: "excerpt".into(),
            message: None,
        };

        session.send_message("why?", None, Some(&quote)).await.unwrap();

        let sent = provider.requests.lock().unwrap()[0].user_prompt.clone();
        assert!(sent.contains("\"excerpt\""));
        assert!(sent.ends_with("why?"));
        assert_eq!(session.view().current_messages[0].content, "why?");
    }

    #[tokio::test]
    async fn test_empty_content_is_validation_error() {
        let (_store, session) = session_with(Scripted::new(vec![]));
        let err = session.send_message("   ", None, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_branch_parent_is_not_found() {
        let (_store, session) = session_with(Scripted::new(vec![reply("Hi")]));
        let err = session
            .send_message("Hello", Some("msg_missing"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "message", .. }));
        assert!(session.view().all_messages.is_empty());
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_select_extends_and_branch_stops() {
        let (store, session) = session_with(Scripted::new(vec![reply("B"), reply("D")]));
        session.send_message("A", None, None).await.unwrap();
        session.send_message("C", None, None).await.unwrap();
        let path = session.view().current_path;

        let view = session.create_branch(&path[1]).unwrap();
        assert_eq!(view.current_path, path[..2].to_vec());
        assert_eq!(
            store.load_conversation_tree("conv").unwrap().current_path,
            path[..2].to_vec()
        );

        let view = session.select_message(&path[0]).unwrap();
        assert_eq!(view.current_path, path);

        assert!(matches!(
            session.select_message("msg_missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_follow_turn() {
        let (_store, session) = session_with(Scripted::new(vec![reply("Hi")]));
        let mut rx = session.subscribe();
        session.send_message("Hello", None, None).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                SessionEvent::TurnStarted { .. } => "started",
                SessionEvent::AssistantCreated { .. } => "assistant",
                SessionEvent::Delta { .. } => "delta",
                SessionEvent::Committed { .. } => "committed",
                SessionEvent::Failed { .. } => "failed",
            });
        }
        assert_eq!(kinds, vec!["started", "assistant", "delta", "committed"]);
    }
}
