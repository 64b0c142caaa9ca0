//! Session-scoped voice journaling core.
//!
//! Bridges a host speech-recognition capability to an in-memory list of
//! timestamped journal entries. Two coordinators make up the behavioral
//! surface: the speech session (a reducer-driven state machine in
//! [`state_machine`], fed by the effect runner in [`effects`]) and the
//! entry store in [`journal`]. [`VoiceJournal`] composes both behind the
//! operations a presentation layer calls; presentation itself is out of
//! scope and consumes [`UiSnapshot`] values plus these operations.
//!
//! The capability is injected: pass `None` to [`VoiceJournal::new`] for
//! hosts without a recognition engine, or any [`SpeechRecognizer`]
//! implementation (tests use the scripted one in [`effects`]).

pub mod effects;
pub mod journal;
pub mod settings;
pub mod state_machine;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use uuid::Uuid;

use effects::{EffectRunner, RecognizerEffectRunner, SpeechRecognizer};
use journal::{EntryStore, JournalEntry};
use settings::JournalSettings;
use state_machine::{reduce, Effect, Event, SessionState};

/// Serialized user actions plus engine callbacks; sized like a UI event
/// queue, not a data pipeline.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Read-only session state published to the presentation layer on every
/// transition.
///
/// `pending` is true while microphone permission resolution is
/// outstanding; it is never true at the same time as `listening`. A UI
/// should disable start/stop when `supported` is false and disable save
/// while `currentEntry` trims to empty - mirrors of the store's own
/// invariants, not separate logic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSnapshot {
    pub current_entry: String,
    pub listening: bool,
    pub pending: bool,
    pub supported: bool,
    pub error: Option<String>,
}

fn state_to_ui(state: &SessionState) -> UiSnapshot {
    UiSnapshot {
        current_entry: state.transcript.clone(),
        listening: state.listening(),
        pending: state.pending(),
        supported: state.supported,
        error: state.error.clone(),
    }
}

/// Handle for dispatching events to the session loop.
pub struct SessionHandle {
    tx: mpsc::Sender<Event>,
}

impl SessionHandle {
    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(event).await
    }
}

/// Run the session loop: drain events, reduce, execute effects.
///
/// The loop task is the single writer of session state; every external
/// trigger serializes onto its channel. `Shutdown` is handled at the
/// edge, ending any live recognition turn before the loop terminates so
/// the microphone is released on that path too.
async fn run_session_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Option<Arc<dyn EffectRunner>>,
    ui_tx: watch::Sender<UiSnapshot>,
    mut state: SessionState,
) {
    // Publish the initial state
    let _ = ui_tx.send(state_to_ui(&state));
    log::info!("Session loop started (supported={})", state.supported);

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        match event {
            // Saves read the authoritative transcript here, in queue
            // order, so they always observe edits sent before them
            Event::SaveRequested { reply } => {
                let text = state.transcript.clone();
                if text.trim().is_empty() {
                    log::debug!("Save requested with empty transcript");
                    let _ = reply.send(None);
                } else {
                    state.transcript.clear();
                    let _ = ui_tx.send(state_to_ui(&state));
                    let _ = reply.send(Some(text));
                }
            }

            Event::Shutdown => {
                if let (Some(runner), Some(id)) = (effect_runner.as_ref(), state.attempt_id()) {
                    runner.spawn(Effect::EndRecognition { id }, tx.clone());
                }
                log::info!("Shutdown requested, ending session loop");
                break;
            }

            event => {
                let old_phase = state.phase.clone();
                let (next, effects) = reduce(&state, event);
                if old_phase != next.phase {
                    log::info!("Phase transition: {:?} -> {:?}", old_phase, next.phase);
                }
                state = next;

                for eff in effects {
                    match eff {
                        Effect::EmitUi => {
                            let _ = ui_tx.send(state_to_ui(&state));
                        }
                        other => {
                            if let Some(runner) = effect_runner.as_ref() {
                                runner.spawn(other, tx.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    log::info!("Session loop ended");
}

/// The voice journal: a speech capture session plus the entry store,
/// composed behind the operations the presentation layer calls.
///
/// Session state is owned by the loop task and only read here through
/// the watch channel; the store is mutated only through the three
/// operations below. Dropping the journal shuts the session down and
/// releases the microphone if a stream is still open.
pub struct VoiceJournal {
    handle: SessionHandle,
    ui_rx: watch::Receiver<UiSnapshot>,
    store: Mutex<EntryStore>,
}

impl VoiceJournal {
    /// Build the journal and spawn its session loop.
    ///
    /// `recognizer` is the result of probing the host for a speech
    /// capability: `None` yields a permanently unsupported session whose
    /// start operation never attempts acquisition. Must be called within
    /// a tokio runtime.
    pub fn new(recognizer: Option<Arc<dyn SpeechRecognizer>>, settings: JournalSettings) -> Self {
        let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);

        let (initial, runner): (SessionState, Option<Arc<dyn EffectRunner>>) = match recognizer {
            Some(engine) => (
                SessionState::supported(),
                Some(RecognizerEffectRunner::new(
                    engine,
                    Arc::new(Mutex::new(settings)),
                ) as Arc<dyn EffectRunner>),
            ),
            None => {
                log::warn!("No recognition capability, session is unsupported");
                (SessionState::unsupported(), None)
            }
        };

        let (ui_tx, ui_rx) = watch::channel(state_to_ui(&initial));

        let tx_for_loop = tx.clone();
        tokio::spawn(async move {
            run_session_loop(rx, tx_for_loop, runner, ui_tx, initial).await;
        });

        Self {
            handle: SessionHandle { tx },
            ui_rx,
            store: Mutex::new(EntryStore::new()),
        }
    }

    /// Begin a listening turn: clears any previous error, then acquires
    /// the microphone before opening the recognition stream.
    pub async fn start_listening(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.handle.send(Event::StartRequested).await
    }

    /// Halt the active stream, if any. Idempotent.
    pub async fn stop_listening(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.handle.send(Event::StopRequested).await
    }

    /// Overwrite the transcript buffer with directly typed text.
    pub async fn set_current_entry(
        &self,
        text: impl Into<String>,
    ) -> Result<(), mpsc::error::SendError<Event>> {
        self.handle.send(Event::TranscriptEdited { text: text.into() }).await
    }

    /// Save the current transcript as a journal entry.
    ///
    /// Returns `false` without mutating anything when the transcript
    /// trims to empty. On success the transcript buffer is cleared, the
    /// input-clearing half of the save contract. The transcript is read
    /// by the loop task in queue order, so a save sent right after an
    /// edit observes that edit.
    pub async fn save_entry(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .handle
            .send(Event::SaveRequested { reply: reply_tx })
            .await
            .is_err()
        {
            return false;
        }
        match reply_rx.await {
            Ok(Some(text)) => self.store.lock().await.save_entry(&text),
            Ok(None) | Err(_) => false,
        }
    }

    /// Remove the entry with matching id, if present.
    pub async fn delete_entry(&self, id: Uuid) {
        self.store.lock().await.delete_entry(id);
    }

    /// Remove every saved entry.
    pub async fn clear_all_entries(&self) {
        self.store.lock().await.clear_all();
    }

    /// Entries in save order, newest first.
    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.store.lock().await.entries().to_vec()
    }

    /// Latest published session state.
    pub fn session(&self) -> UiSnapshot {
        self.ui_rx.borrow().clone()
    }

    /// Watch receiver for reactive consumers; yields a fresh snapshot on
    /// every transition.
    pub fn subscribe(&self) -> watch::Receiver<UiSnapshot> {
        self.ui_rx.clone()
    }

    /// End the session loop, stopping any open recognition stream.
    pub async fn shutdown(&self) {
        let _ = self.handle.send(Event::Shutdown).await;
    }
}

impl Drop for VoiceJournal {
    fn drop(&mut self) {
        // Disposal must stop an open stream; the loop handles the rest
        if let Err(e) = self.handle.tx.try_send(Event::Shutdown) {
            log::warn!("Shutdown not delivered on drop: {}", e);
        }
    }
}
