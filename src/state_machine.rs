//! State machine for the speech capture session
//!
//! This module implements the session core using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute. The host recognition
//! engine never touches state directly: its callbacks arrive here as
//! events (`SpeechResult`, `SpeechFault`, `SpeechEnded`), so tests can
//! drive the session by injecting synthetic triggers.

use tokio::sync::oneshot;
use uuid::Uuid;

/// Fixed at construction when the host exposes no recognition capability.
pub const UNSUPPORTED_MESSAGE: &str =
    "Speech recognition is not supported in this environment.";

/// Surfaced when start is requested on an unsupported session.
pub const UNAVAILABLE_MESSAGE: &str = "Speech recognition is not available";

/// Surfaced when microphone acquisition fails before recognition starts.
pub const MIC_DENIED_MESSAGE: &str =
    "Couldn't access your microphone. Please check permissions in your settings.";

const FAULT_NOT_ALLOWED_MESSAGE: &str =
    "Microphone access denied. Please allow microphone access in your settings.";
const FAULT_NO_SPEECH_MESSAGE: &str =
    "No speech detected. Please try speaking again or check your microphone.";

/// Fault categories reported by the recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCode {
    NotAllowed,
    NoSpeech,
    Other(String),
}

impl FaultCode {
    /// Map a raw engine category code to a fault.
    pub fn from_engine_code(code: &str) -> Self {
        match code {
            "not-allowed" => FaultCode::NotAllowed,
            "no-speech" => FaultCode::NoSpeech,
            other => FaultCode::Other(other.to_string()),
        }
    }

    /// Human-readable message for the session error field.
    /// Known categories get fixed text; anything else keeps the raw code
    /// for diagnostics.
    pub fn message(&self) -> String {
        match self {
            FaultCode::NotAllowed => FAULT_NOT_ALLOWED_MESSAGE.to_string(),
            FaultCode::NoSpeech => FAULT_NO_SPEECH_MESSAGE.to_string(),
            FaultCode::Other(code) => format!("Speech recognition error: {}", code),
        }
    }
}

/// Lifecycle phase of the capture session.
///
/// `RequestingMic` is the window between a start request and permission
/// resolution: not idle, but not yet listening either. Each attempt gets
/// a fresh id so completions from an abandoned attempt are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    RequestingMic { attempt_id: Uuid },
    Listening { attempt_id: Uuid },
}

/// Authoritative session state - all transitions go through the reducer.
///
/// `transcript` outlives individual listening turns: stopping does not
/// clear it, and the first result of the next turn overwrites it
/// wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub transcript: String,
    pub supported: bool,
    pub error: Option<String>,
}

impl SessionState {
    /// Initial state when the capability probe found a recognition engine.
    pub fn supported() -> Self {
        Self {
            phase: Phase::Idle,
            transcript: String::new(),
            supported: true,
            error: None,
        }
    }

    /// Initial state when the host exposes no recognition capability.
    /// Permanent for the session; start requests never attempt acquisition.
    pub fn unsupported() -> Self {
        Self {
            phase: Phase::Idle,
            transcript: String::new(),
            supported: false,
            error: Some(UNSUPPORTED_MESSAGE.to_string()),
        }
    }

    /// True only while an active recognition stream is open.
    pub fn listening(&self) -> bool {
        matches!(self.phase, Phase::Listening { .. })
    }

    /// True while permission resolution is outstanding.
    pub fn pending(&self) -> bool {
        matches!(self.phase, Phase::RequestingMic { .. })
    }

    /// Id of the in-flight attempt, if any.
    pub fn attempt_id(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Idle => None,
            Phase::RequestingMic { attempt_id } => Some(attempt_id),
            Phase::Listening { attempt_id } => Some(attempt_id),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::supported()
    }
}

/// Events that can trigger state transitions.
/// Sent from the facade (user actions) and the effect runner / engine
/// callbacks (completions).
#[derive(Debug)]
pub enum Event {
    /// User pressed start
    StartRequested,
    /// User pressed stop (idempotent)
    StopRequested,
    /// Direct user edit of the transcript buffer
    TranscriptEdited { text: String },
    /// Take the current transcript for saving. Handled at the loop edge
    /// like `Shutdown`: the loop replies with the text to persist (and
    /// clears the buffer), or `None` when it trims to empty. Queued
    /// behind any pending edits, so a save always observes the edits
    /// sent before it.
    SaveRequested {
        reply: oneshot::Sender<Option<String>>,
    },
    /// Session shutdown requested
    Shutdown,

    // Permission resolution
    MicGranted {
        id: Uuid,
    },
    MicDenied {
        id: Uuid,
        reason: String,
    },

    // Engine callbacks for the active turn
    /// Result batch: all segments from the current turn onward.
    /// Replaces the transcript wholesale - latest batch wins.
    SpeechResult {
        id: Uuid,
        segments: Vec<String>,
    },
    SpeechFault {
        id: Uuid,
        code: FaultCode,
    },
    /// Engine ended the stream on its own (e.g. silence timeout)
    SpeechEnded {
        id: Uuid,
    },
}

/// Effects to be executed after a state transition.
/// The effect runner handles these asynchronously; `EmitUi` is handled
/// by the session loop itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestMicrophone { id: Uuid },
    BeginRecognition { id: Uuid },
    EndRecognition { id: Uuid },
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state in place
/// - Ignore events with stale attempt IDs
/// - Every path that leaves an active attempt issues `EndRecognition`
///   so the microphone is released exactly once
pub fn reduce(state: &SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use Phase::*;

    let current_id = state.attempt_id();
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (&state.phase, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartRequested) if !state.supported => {
            log::warn!("Start requested without a recognition capability");
            let mut next = state.clone();
            next.error = Some(UNAVAILABLE_MESSAGE.to_string());
            (next, vec![EmitUi])
        }
        (Idle, StartRequested) => {
            let id = Uuid::new_v4();
            let mut next = state.clone();
            next.error = None;
            next.phase = RequestingMic { attempt_id: id };
            (next, vec![RequestMicrophone { id }, EmitUi])
        }
        (Idle, StopRequested) => (state.clone(), vec![]),

        // -----------------
        // RequestingMic
        // -----------------
        (RequestingMic { attempt_id }, MicGranted { id }) if *attempt_id == id => {
            let mut next = state.clone();
            next.phase = Listening { attempt_id: id };
            (next, vec![BeginRecognition { id }, EmitUi])
        }
        (RequestingMic { attempt_id }, MicDenied { id, reason }) if *attempt_id == id => {
            log::warn!("Microphone acquisition failed: {}", reason);
            let mut next = state.clone();
            next.phase = Idle;
            next.error = Some(MIC_DENIED_MESSAGE.to_string());
            (next, vec![EmitUi])
        }
        (RequestingMic { attempt_id }, StopRequested) => {
            // End recognition in case the engine started between the
            // grant and this stop
            let id = *attempt_id;
            let mut next = state.clone();
            next.phase = Idle;
            (next, vec![EndRecognition { id }, EmitUi])
        }

        // -----------------
        // Listening
        // -----------------
        (Listening { attempt_id }, SpeechResult { id, segments }) if *attempt_id == id => {
            let mut next = state.clone();
            next.transcript = segments.concat();
            (next, vec![EmitUi])
        }
        (Listening { attempt_id }, SpeechFault { id, code }) if *attempt_id == id => {
            log::warn!("Recognition fault: {:?}", code);
            let mut next = state.clone();
            next.phase = Idle;
            next.error = Some(code.message());
            (next, vec![EndRecognition { id }, EmitUi])
        }
        (Listening { attempt_id }, SpeechEnded { id }) if *attempt_id == id => {
            let mut next = state.clone();
            next.phase = Idle;
            (next, vec![EmitUi])
        }
        (Listening { attempt_id }, StopRequested) => {
            let id = *attempt_id;
            let mut next = state.clone();
            next.phase = Idle;
            (next, vec![EndRecognition { id }, EmitUi])
        }

        // Start while an attempt is already in flight - no transition
        (RequestingMic { .. }, StartRequested) | (Listening { .. }, StartRequested) => {
            (state.clone(), vec![])
        }

        // -----------------
        // Direct edits apply in any phase
        // -----------------
        (_, TranscriptEdited { text }) => {
            let mut next = state.clone();
            next.transcript = text;
            (next, vec![EmitUi])
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, MicGranted { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, MicDenied { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SpeechResult { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SpeechFault { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, SpeechEnded { id }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition (SaveRequested and Shutdown are
        // handled at the loop edge)
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listening_state(id: Uuid) -> SessionState {
        SessionState {
            phase: Phase::Listening { attempt_id: id },
            ..SessionState::supported()
        }
    }

    #[test]
    fn idle_start_transitions_to_requesting_mic() {
        let (next, effects) = reduce(&SessionState::supported(), Event::StartRequested);
        assert!(next.pending());
        assert!(!next.listening());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::RequestMicrophone { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn start_clears_previous_error() {
        let state = SessionState {
            error: Some("stale error".to_string()),
            ..SessionState::supported()
        };
        let (next, _) = reduce(&state, Event::StartRequested);
        assert_eq!(next.error, None);
    }

    #[test]
    fn unsupported_start_is_a_no_op_with_unavailable_error() {
        let state = SessionState::unsupported();
        assert_eq!(state.error.as_deref(), Some(UNSUPPORTED_MESSAGE));

        let (next, effects) = reduce(&state, Event::StartRequested);
        assert!(!next.listening());
        assert!(!next.pending());
        assert_eq!(next.error.as_deref(), Some(UNAVAILABLE_MESSAGE));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::RequestMicrophone { .. })));
    }

    #[test]
    fn mic_granted_transitions_to_listening() {
        let (pending, effects) = reduce(&SessionState::supported(), Event::StartRequested);
        let id = match effects.first() {
            Some(Effect::RequestMicrophone { id }) => *id,
            other => panic!("expected RequestMicrophone, got {:?}", other),
        };

        let (next, effects) = reduce(&pending, Event::MicGranted { id });
        assert!(next.listening());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::BeginRecognition { .. })));
    }

    #[test]
    fn mic_denied_returns_to_idle_with_fixed_message() {
        let id = Uuid::new_v4();
        let state = SessionState {
            phase: Phase::RequestingMic { attempt_id: id },
            ..SessionState::supported()
        };
        let (next, _) = reduce(
            &state,
            Event::MicDenied {
                id,
                reason: "device busy".to_string(),
            },
        );
        assert!(!next.listening());
        assert!(!next.pending());
        assert_eq!(next.error.as_deref(), Some(MIC_DENIED_MESSAGE));
    }

    #[test]
    fn result_batch_replaces_transcript_wholesale() {
        let id = Uuid::new_v4();
        let mut state = listening_state(id);
        state.transcript = "previous turn text".to_string();

        let (next, _) = reduce(
            &state,
            Event::SpeechResult {
                id,
                segments: vec!["Hello ".to_string(), "world".to_string()],
            },
        );
        assert_eq!(next.transcript, "Hello world");

        // A later batch can correct earlier interim words
        let (next, _) = reduce(
            &next,
            Event::SpeechResult {
                id,
                segments: vec!["Hello world, again".to_string()],
            },
        );
        assert_eq!(next.transcript, "Hello world, again");
    }

    #[test]
    fn fault_forces_idle_and_ends_recognition() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &listening_state(id),
            Event::SpeechFault {
                id,
                code: FaultCode::NoSpeech,
            },
        );
        assert!(!next.listening());
        assert_eq!(
            next.error.as_deref(),
            Some("No speech detected. Please try speaking again or check your microphone.")
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EndRecognition { .. })));
    }

    #[test]
    fn unknown_fault_keeps_raw_code_in_message() {
        let id = Uuid::new_v4();
        let (next, _) = reduce(
            &listening_state(id),
            Event::SpeechFault {
                id,
                code: FaultCode::from_engine_code("network"),
            },
        );
        assert_eq!(
            next.error.as_deref(),
            Some("Speech recognition error: network")
        );
    }

    #[test]
    fn engine_ended_stream_returns_to_idle_without_error() {
        let id = Uuid::new_v4();
        let mut state = listening_state(id);
        state.transcript = "kept".to_string();

        let (next, _) = reduce(&state, Event::SpeechEnded { id });
        assert!(!next.listening());
        assert_eq!(next.error, None);
        assert_eq!(next.transcript, "kept");
    }

    #[test]
    fn stop_is_idempotent() {
        let id = Uuid::new_v4();
        let (once, effects) = reduce(&listening_state(id), Event::StopRequested);
        assert!(!once.listening());
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EndRecognition { .. })));

        let (twice, effects) = reduce(&once, Event::StopRequested);
        assert_eq!(once, twice);
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_during_pending_cancels_and_ends_recognition() {
        let id = Uuid::new_v4();
        let state = SessionState {
            phase: Phase::RequestingMic { attempt_id: id },
            ..SessionState::supported()
        };
        let (next, effects) = reduce(&state, Event::StopRequested);
        assert!(!next.pending());
        // Recognition may have started between grant and stop
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::EndRecognition { .. })));
    }

    #[test]
    fn stale_result_is_ignored() {
        let id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        let state = listening_state(id);
        let (next, effects) = reduce(
            &state,
            Event::SpeechResult {
                id: stale_id,
                segments: vec!["late text".to_string()],
            },
        );
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_ended_after_stop_is_ignored() {
        let id = Uuid::new_v4();
        let (stopped, _) = reduce(&listening_state(id), Event::StopRequested);
        let (next, effects) = reduce(&stopped, Event::SpeechEnded { id });
        assert_eq!(next, stopped);
        assert!(effects.is_empty());
    }

    #[test]
    fn transcript_edit_applies_in_any_phase() {
        let (next, _) = reduce(
            &SessionState::supported(),
            Event::TranscriptEdited {
                text: "typed by hand".to_string(),
            },
        );
        assert_eq!(next.transcript, "typed by hand");

        let id = Uuid::new_v4();
        let (next, _) = reduce(
            &listening_state(id),
            Event::TranscriptEdited {
                text: "edited mid-turn".to_string(),
            },
        );
        assert!(next.listening());
        assert_eq!(next.transcript, "edited mid-turn");
    }

    #[test]
    fn restart_after_stop_keeps_prior_transcript_until_next_result() {
        let id = Uuid::new_v4();
        let mut state = listening_state(id);
        state.transcript = "first turn".to_string();

        let (stopped, _) = reduce(&state, Event::StopRequested);
        assert_eq!(stopped.transcript, "first turn");

        let (pending, effects) = reduce(&stopped, Event::StartRequested);
        assert_eq!(pending.transcript, "first turn");
        let new_id = match effects.first() {
            Some(Effect::RequestMicrophone { id }) => *id,
            other => panic!("expected RequestMicrophone, got {:?}", other),
        };

        let (listening, _) = reduce(&pending, Event::MicGranted { id: new_id });
        let (next, _) = reduce(
            &listening,
            Event::SpeechResult {
                id: new_id,
                segments: vec!["second turn".to_string()],
            },
        );
        assert_eq!(next.transcript, "second turn");
    }
}
