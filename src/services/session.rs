use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time;

use crate::models::{NewMessage, Role, TranscriptEntry};
use crate::providers::{GeneratorError, ReplyGenerator, ReplyRequest};
use crate::services::conversation::{chat_messages, session_title};
use crate::services::identity::{IdentityProvider, IdentityState};
use crate::services::settings::SessionConfig;
use crate::services::store::{ConversationStore, StoreError};

/// Opening assistant message for every fresh session.
pub const GREETING: &str = "Hi, I'm DeepMirror — your personal reflection companion.\n\n\
    I'm here to help you explore your thoughts and feelings through gentle questions \
    and structured reflection. I'm not a therapist or doctor, but I can help you gain \
    clarity.\n\nWhat's on your mind today?";

/// Shown in place of a reply when generation fails. The user's own message
/// stays in the transcript.
const REPLY_FAILURE_MESSAGE: &str = "Sorry, something went wrong generating a reply.";

/// The session lifecycle as a single state, instead of a set of
/// independently-toggled loading flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    LoadingIdentity,
    LoadingHistory,
    Idle,
    AwaitingReply,
    /// The identity provider went away; the session can no longer resolve
    /// an actor and stops accepting work.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The exchange ran to completion: a reply or the failure notice was
    /// appended.
    Completed,
    /// Input was empty after trimming; nothing happened.
    EmptyInput,
    /// Another exchange is in flight, or the session is still loading.
    /// The submission is dropped, not queued.
    Busy,
    /// The session was reset or re-initialized while the reply was in
    /// flight; the result was discarded.
    Superseded,
}

/// The (handle, actor) pair a history fetch was performed for. Re-entrant
/// initialization with an unchanged key skips the fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadKey {
    handle: Option<String>,
    actor_id: Option<String>,
}

struct SessionState {
    phase: SessionPhase,
    session_handle: Option<String>,
    transcript: Vec<TranscriptEntry>,
    pending_tags: BTreeSet<String>,
    age_hint: Option<String>,
    epoch: u64,
    loaded: Option<LoadKey>,
}

/// Owns the in-memory state of one active conversation and keeps the
/// durable store consistent with it: optimistic transcript appends, lazy
/// conversation creation on the first successful exchange, and a tag
/// buffer that is flushed once the conversation exists.
///
/// All collaborators are injected; the manager holds no ambient globals.
/// Methods take `&self` so the manager can be shared with a UI event loop
/// behind an `Arc`; internal state is locked only between suspension
/// points.
pub struct SessionManager {
    identity: Arc<dyn IdentityProvider>,
    generator: Arc<dyn ReplyGenerator>,
    store: Arc<dyn ConversationStore>,
    config: SessionConfig,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        generator: Arc<dyn ReplyGenerator>,
        store: Arc<dyn ConversationStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identity,
            generator,
            store,
            config,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Uninitialized,
                session_handle: None,
                transcript: greeting_transcript(),
                pending_tags: BTreeSet::new(),
                age_hint: None,
                epoch: 0,
                loaded: None,
            }),
        }
    }

    /// Resume the session referenced by a locator handle, or start fresh
    /// when none is given. Suspends until the identity provider has
    /// resolved; an unknown, deleted, or foreign handle degrades to a
    /// fresh session rather than erroring. Reinitialization replaces the
    /// transcript, never appends to it.
    pub async fn initialize_from_handle(&self, handle: Option<&str>) {
        let epoch = {
            let mut state = self.state.lock().unwrap();
            state.epoch += 1;
            state.phase = SessionPhase::LoadingIdentity;
            state.epoch
        };

        let identity = match self.resolve_identity().await {
            Some(identity) => identity,
            None => {
                let mut state = self.state.lock().unwrap();
                if state.epoch == epoch {
                    state.phase = SessionPhase::Error;
                }
                return;
            }
        };

        let key = LoadKey {
            handle: handle.map(|h| h.to_string()),
            actor_id: identity.actor().map(|a| a.id.clone()),
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                return;
            }
            // One fetch per (handle, identity) change.
            if state.loaded.as_ref() == Some(&key) {
                state.phase = SessionPhase::Idle;
                return;
            }
            state.phase = SessionPhase::LoadingHistory;
        }

        let (handle, actor) = match (handle, identity.actor()) {
            (Some(handle), Some(actor)) => (handle, actor),
            // Nothing to resume: no handle, or a guest holding one. A
            // guest fetch would bypass the owner check, so it never runs.
            _ => {
                let mut state = self.state.lock().unwrap();
                if state.epoch == epoch {
                    reset_to_greeting(&mut state);
                    state.loaded = Some(key);
                    state.phase = SessionPhase::Idle;
                }
                return;
            }
        };

        let loaded = match self.store.list_messages(handle, &actor.id).await {
            Ok(rows) if !rows.is_empty() => {
                let tags = match self.store.list_tag_associations(handle).await {
                    Ok(tags) => tags,
                    Err(e) => {
                        tracing::warn!("Failed to load tag associations for {}: {}", handle, e);
                        Vec::new()
                    }
                };
                Some((rows, tags))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Failed to load conversation {}: {}", handle, e);
                None
            }
        };

        let mut state = self.state.lock().unwrap();
        if state.epoch != epoch {
            return;
        }
        match loaded {
            Some((rows, tags)) => {
                state.session_handle = Some(handle.to_string());
                state.transcript = rows.into_iter().map(TranscriptEntry::from).collect();
                state.pending_tags = tags.into_iter().collect();
            }
            None => reset_to_greeting(&mut state),
        }
        state.loaded = Some(key);
        state.phase = SessionPhase::Idle;
    }

    /// Run one reply exchange: append the user's turn immediately, call
    /// the generator with the full transcript, append exactly one
    /// assistant entry (reply or failure notice), then persist. On the
    /// first successful exchange of a session this creates the
    /// conversation, flushes buffered tags, and only then writes the two
    /// message rows.
    pub async fn submit_user_turn(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::EmptyInput;
        }

        let identity = self.identity.state();
        let (epoch, handle, request) = {
            let mut state = self.state.lock().unwrap();
            match state.phase {
                SessionPhase::Idle | SessionPhase::Uninitialized => {}
                _ => return SubmitOutcome::Busy,
            }

            // Optimistic append: the turn is visible before any network
            // round trip.
            state.transcript.push(TranscriptEntry::new(Role::User, text));
            state.phase = SessionPhase::AwaitingReply;

            let request = ReplyRequest {
                messages: chat_messages(&state.transcript),
                age_hint: state.age_hint.clone(),
                actor_email: identity.actor().and_then(|a| a.email.clone()),
            };
            (state.epoch, state.session_handle.clone(), request)
        };

        let reply = match self.generate_with_timeout(request).await {
            Ok(reply) => Some(reply.content),
            Err(e) => {
                tracing::warn!("Reply generation failed: {}", e);
                None
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            if state.epoch != epoch {
                // The session moved on while the reply was in flight; the
                // result must not leak into the new transcript.
                return SubmitOutcome::Superseded;
            }
            let content = reply.as_deref().unwrap_or(REPLY_FAILURE_MESSAGE);
            state
                .transcript
                .push(TranscriptEntry::new(Role::Assistant, content));
        }

        if let Some(reply) = &reply {
            self.persist_exchange(epoch, handle, &identity, text, reply)
                .await;
        }

        let mut state = self.state.lock().unwrap();
        if state.epoch == epoch {
            state.phase = SessionPhase::Idle;
        }
        SubmitOutcome::Completed
    }

    /// Toggle a tag for the session. The pending set is authoritative
    /// regardless of persistence state: before the conversation exists the
    /// toggle only touches the buffer, afterwards it also writes through.
    pub async fn toggle_tag(&self, tag_id: &str) {
        let (removing, handle) = {
            let mut state = self.state.lock().unwrap();
            let removing = state.pending_tags.contains(tag_id);
            if removing {
                state.pending_tags.remove(tag_id);
            } else {
                state.pending_tags.insert(tag_id.to_string());
            }
            (removing, state.session_handle.clone())
        };

        let Some(handle) = handle else { return };

        let result = if removing {
            self.with_retry("delete tag association", || {
                self.store.delete_tag_association(&handle, tag_id)
            })
            .await
        } else {
            self.with_retry("insert tag association", || {
                self.store.insert_tag_association(&handle, tag_id)
            })
            .await
        };
        if let Err(e) = result {
            tracing::warn!("Tag write for {} failed: {}", tag_id, e);
        }
    }

    /// Reset to a fresh session. Deletes nothing persisted; an in-flight
    /// reply for the old session is invalidated.
    pub fn start_new_session(&self) {
        let mut state = self.state.lock().unwrap();
        state.epoch += 1;
        reset_to_greeting(&mut state);
        state.loaded = None;
        if state.phase != SessionPhase::Error {
            state.phase = SessionPhase::Idle;
        }
    }

    pub fn set_age_hint(&self, age_hint: Option<String>) {
        self.state.lock().unwrap().age_hint = age_hint;
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state.lock().unwrap().transcript.clone()
    }

    pub fn session_handle(&self) -> Option<String> {
        self.state.lock().unwrap().session_handle.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().unwrap().phase
    }

    pub fn selected_tags(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pending_tags
            .iter()
            .cloned()
            .collect()
    }

    /// Wait until the identity provider reports something other than
    /// `Loading`. The watch receiver is the subscription handle and is
    /// released when this scope ends. Returns None if the provider is
    /// gone.
    async fn resolve_identity(&self) -> Option<IdentityState> {
        let mut rx = self.identity.watch();
        let state = rx
            .wait_for(|state| *state != IdentityState::Loading)
            .await
            .ok()?
            .clone();
        Some(state)
    }

    async fn generate_with_timeout(
        &self,
        request: ReplyRequest,
    ) -> Result<crate::providers::Reply, GeneratorError> {
        match self.config.reply_timeout_secs {
            0 => self.generator.generate(request).await,
            secs => match time::timeout(
                Duration::from_secs(secs),
                self.generator.generate(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GeneratorError::RequestFailed(format!(
                    "Reply generation timed out after {}s",
                    secs
                ))),
            },
        }
    }

    /// Persist a completed exchange. Failures are logged and swallowed:
    /// the user already saw the reply, so a lost write is accepted data
    /// loss, never a crash.
    async fn persist_exchange(
        &self,
        epoch: u64,
        handle: Option<String>,
        identity: &IdentityState,
        user_text: &str,
        reply: &str,
    ) {
        let owner: Option<String> = match identity.actor() {
            Some(actor) => Some(actor.id.clone()),
            None => {
                if !self.config.persist_guest_sessions {
                    return;
                }
                // Null-owner sentinel.
                None
            }
        };

        let conversation_id = match handle {
            Some(id) => id,
            None => {
                let title = session_title(user_text);
                let id = match self
                    .with_retry("create conversation", || {
                        self.store.create_conversation(owner.as_deref(), &title)
                    })
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!("Conversation create failed, dropping persistence: {}", e);
                        return;
                    }
                };

                // Adopt the handle and snapshot the tag buffer under one
                // lock. Association writes never precede creation: this is
                // the first point the id exists.
                let tags: Vec<String> = {
                    let mut state = self.state.lock().unwrap();
                    if state.epoch != epoch {
                        // Reset mid-flight: the buffer now belongs to the
                        // next session. Keep the rows, skip the flush.
                        Vec::new()
                    } else {
                        state.session_handle = Some(id.clone());
                        state.loaded = Some(LoadKey {
                            handle: Some(id.clone()),
                            actor_id: owner.clone(),
                        });
                        state.pending_tags.iter().cloned().collect()
                    }
                };

                for tag_id in tags {
                    if let Err(e) = self
                        .with_retry("insert tag association", || {
                            self.store.insert_tag_association(&id, &tag_id)
                        })
                        .await
                    {
                        tracing::warn!("Failed to persist tag {}: {}", tag_id, e);
                    }
                }
                id
            }
        };

        let rows = [
            NewMessage {
                role: Role::User,
                content: user_text.to_string(),
            },
            NewMessage {
                role: Role::Assistant,
                content: reply.to_string(),
            },
        ];
        if let Err(e) = self
            .with_retry("insert messages", || {
                self.store
                    .insert_messages(&conversation_id, owner.as_deref(), &rows)
            })
            .await
        {
            tracing::warn!(
                "Failed to persist exchange for {}: {}",
                conversation_id,
                e
            );
        }
    }

    async fn with_retry<T, Fut, F>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.config.persist_write_attempts.max(1);
        let delay = Duration::from_millis(self.config.persist_retry_delay_ms);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    tracing::debug!("{} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                    attempt += 1;
                    if !delay.is_zero() {
                        time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn greeting_transcript() -> Vec<TranscriptEntry> {
    vec![TranscriptEntry::new(Role::Assistant, GREETING)]
}

fn reset_to_greeting(state: &mut SessionState) {
    state.session_handle = None;
    state.transcript = greeting_transcript();
    state.pending_tags.clear();
}
