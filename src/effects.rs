//! Effect runner for the speech session
//!
//! This module handles executing effects produced by the state machine
//! against the injected host recognition capability. Completion events
//! are sent back via the event channel, so the state machine never
//! blocks on the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::settings::JournalSettings;
use crate::state_machine::{Effect, Event, FaultCode};

/// Engine configuration for one listening turn.
#[derive(Debug, Clone)]
pub struct RecognitionConfig {
    pub locale: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl From<&JournalSettings> for RecognitionConfig {
    fn from(settings: &JournalSettings) -> Self {
        Self {
            locale: settings.locale.clone(),
            continuous: settings.continuous,
            interim_results: settings.interim_results,
        }
    }
}

/// Per-turn handle given to the recognition engine.
///
/// Its methods are the engine's result/fault/end callbacks re-expressed
/// as event injection: the engine reports through the handle, the
/// reducer decides what the report means. Reports carry the turn id, so
/// anything arriving after the turn was abandoned is dropped by the
/// stale-id guard.
#[derive(Clone)]
pub struct RecognitionTurn {
    id: Uuid,
    tx: mpsc::Sender<Event>,
}

impl RecognitionTurn {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Report a result batch: all transcript segments from this turn
    /// onward. Each batch replaces the previous one.
    pub async fn push_segments(&self, segments: Vec<String>) {
        let _ = self
            .tx
            .send(Event::SpeechResult {
                id: self.id,
                segments,
            })
            .await;
    }

    /// Report a fault. The engine is expected to close the stream after.
    pub async fn report_fault(&self, code: FaultCode) {
        let _ = self
            .tx
            .send(Event::SpeechFault { id: self.id, code })
            .await;
    }

    /// Report that the engine ended the stream on its own.
    pub async fn finish(&self) {
        let _ = self.tx.send(Event::SpeechEnded { id: self.id }).await;
    }
}

/// Host-platform speech recognition capability.
///
/// The capability probe yields `Option<Arc<dyn SpeechRecognizer>>`;
/// `None` marks the whole session unsupported. Implementations bridge a
/// real engine; tests and demos use [`ScriptedRecognizer`].
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Acquire the microphone. Blocks until the user or OS consents or
    /// refuses; the runner calls this on a blocking task.
    fn request_microphone(&self) -> Result<(), String>;

    /// Open a recognition stream for one turn. The engine reports
    /// through `turn` until `stop()` is called or the stream ends on
    /// its own. Must be called within a tokio runtime.
    fn start(&self, turn: RecognitionTurn, config: RecognitionConfig) -> Result<(), String>;

    /// Close any open stream and release the microphone. Idempotent;
    /// called on every path that leaves an active turn.
    fn stop(&self);
}

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Effect runner backed by an injected recognition capability.
pub struct RecognizerEffectRunner {
    recognizer: Arc<dyn SpeechRecognizer>,
    settings: Arc<Mutex<JournalSettings>>,
}

impl RecognizerEffectRunner {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        settings: Arc<Mutex<JournalSettings>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            recognizer,
            settings,
        })
    }
}

impl EffectRunner for RecognizerEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::RequestMicrophone { id } => {
                let recognizer = self.recognizer.clone();
                tokio::spawn(async move {
                    // Consent can block indefinitely; keep it off the runtime
                    let result =
                        tokio::task::spawn_blocking(move || recognizer.request_microphone())
                            .await;
                    match result {
                        Ok(Ok(())) => {
                            log::info!("Microphone granted for attempt {}", id);
                            let _ = tx.send(Event::MicGranted { id }).await;
                        }
                        Ok(Err(reason)) => {
                            log::error!("Microphone acquisition failed: {}", reason);
                            let _ = tx.send(Event::MicDenied { id, reason }).await;
                        }
                        Err(e) => {
                            log::error!("Microphone task failed: {}", e);
                            let _ = tx
                                .send(Event::MicDenied {
                                    id,
                                    reason: format!("microphone task failed: {}", e),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::BeginRecognition { id } => {
                let recognizer = self.recognizer.clone();
                let settings = self.settings.clone();
                tokio::spawn(async move {
                    let config = {
                        let s = settings.lock().await;
                        RecognitionConfig::from(&*s)
                    };
                    let turn = RecognitionTurn { id, tx: tx.clone() };
                    match recognizer.start(turn, config) {
                        Ok(()) => {
                            log::info!("Recognition stream opened for attempt {}", id);
                        }
                        Err(err) => {
                            log::error!("Failed to open recognition stream: {}", err);
                            let _ = tx
                                .send(Event::SpeechFault {
                                    id,
                                    code: FaultCode::Other(err),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::EndRecognition { id } => {
                let recognizer = self.recognizer.clone();
                tokio::spawn(async move {
                    recognizer.stop();
                    log::debug!("Recognition stop issued for attempt {}", id);
                });
            }

            Effect::EmitUi => {
                // Handled in the session loop, not here
                unreachable!("EmitUi should be handled in run_session_loop");
            }
        }
    }
}

/// One scripted step of a [`ScriptedRecognizer`] turn.
#[derive(Debug, Clone)]
pub enum TurnStep {
    /// Report a result batch
    Segments(Vec<String>),
    /// Report a fault and close the stream
    Fault(FaultCode),
    /// End the stream as the engine would after a silence timeout
    End,
}

/// Scripted recognition capability for tests and demos.
///
/// Plays back a fixed script of turn steps with a short delay between
/// them; `stop()` aborts playback the way a real engine drops its
/// callbacks once closed.
pub struct ScriptedRecognizer {
    mic_reply: Result<(), String>,
    mic_delay: Duration,
    script: Vec<TurnStep>,
    active: Arc<AtomicBool>,
}

impl ScriptedRecognizer {
    /// Recognizer that grants the microphone and plays `script`.
    pub fn granting(script: Vec<TurnStep>) -> Arc<Self> {
        Arc::new(Self {
            mic_reply: Ok(()),
            mic_delay: Duration::ZERO,
            script,
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Recognizer that refuses the microphone with `reason`.
    pub fn denying(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            mic_reply: Err(reason.to_string()),
            mic_delay: Duration::ZERO,
            script: Vec::new(),
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Delay permission resolution, keeping the session in its pending
    /// phase long enough for assertions.
    pub fn with_mic_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mic_reply: self.mic_reply.clone(),
            mic_delay: delay,
            script: self.script.clone(),
            active: self.active.clone(),
        })
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn request_microphone(&self) -> Result<(), String> {
        if !self.mic_delay.is_zero() {
            std::thread::sleep(self.mic_delay);
        }
        self.mic_reply.clone()
    }

    fn start(&self, turn: RecognitionTurn, config: RecognitionConfig) -> Result<(), String> {
        log::debug!(
            "Scripted turn {} starting (locale={}, continuous={}, interim={})",
            turn.id(),
            config.locale,
            config.continuous,
            config.interim_results
        );
        self.active.store(true, Ordering::SeqCst);
        let script = self.script.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            for step in script {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                match step {
                    TurnStep::Segments(segments) => turn.push_segments(segments).await,
                    TurnStep::Fault(code) => {
                        turn.report_fault(code).await;
                        break;
                    }
                    TurnStep::End => {
                        turn.finish().await;
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
