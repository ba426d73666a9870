//! Playback state machine

use std::fmt;

/// Engine playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Preparing,
    Ready,
    Playing,
    Paused,
    Stopped,
    Error,
}

/// Transport commands gated by the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Play,
    Pause,
    Resume,
    Stop,
    Seek,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Play => "play",
            Transport::Pause => "pause",
            Transport::Resume => "resume",
            Transport::Stop => "stop",
            Transport::Seek => "seek",
        }
    }
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Preparing => "preparing",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Error => "error",
        }
    }

    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }

    /// True when `command` is a valid transition from this state
    pub fn allows(self, command: Transport) -> bool {
        use PlaybackState::*;
        match command {
            Transport::Play => matches!(self, Ready | Stopped | Paused),
            Transport::Pause => self == Playing,
            Transport::Resume => self == Paused,
            Transport::Stop => matches!(self, Ready | Playing | Paused),
            Transport::Seek => matches!(self, Ready | Playing | Paused),
        }
    }

    /// State reached after `command`, if it is allowed
    pub fn after(self, command: Transport) -> Option<PlaybackState> {
        if !self.allows(command) {
            return None;
        }
        Some(match command {
            Transport::Play | Transport::Resume => PlaybackState::Playing,
            Transport::Pause => PlaybackState::Paused,
            Transport::Stop => PlaybackState::Stopped,
            Transport::Seek => self,
        })
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
