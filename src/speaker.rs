//! Exclusive access to the output device plus the "is speaking" state.
//!
//! The microphone side must stay muted while audio plays and for a short
//! while afterwards, otherwise it records the tail of our own voice. The
//! state lives here instead of in a global flag: sessions get the sink only
//! through [`Speaker::acquire`], and anyone else watches a [`SpeakerStatus`].

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::audio::sink::AudioSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    Idle,
    Speaking,
    /// Playback ended; capture stays gated until the deadline.
    Cooldown { until: Instant },
}

/// Read-only, cloneable view of a speaker's state.
#[derive(Debug, Clone)]
pub struct SpeakerStatus {
    state: Arc<Mutex<SpeakerState>>,
}

impl SpeakerStatus {
    fn lock(&self) -> MutexGuard<'_, SpeakerState> {
        // A panicking session must not wedge capture gating forever
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, with an expired cooldown reported as `Idle`.
    pub fn state(&self) -> SpeakerState {
        let mut state = self.lock();
        if let SpeakerState::Cooldown { until } = *state {
            if Instant::now() >= until {
                *state = SpeakerState::Idle;
            }
        }
        *state
    }

    /// True while playing or cooling down.
    pub fn is_speaking(&self) -> bool {
        self.state() != SpeakerState::Idle
    }

    fn set(&self, next: SpeakerState) {
        *self.lock() = next;
    }
}

/// Owns the sink; hands it out to one session at a time.
pub struct Speaker<S> {
    sink: S,
    cooldown: Duration,
    status: SpeakerStatus,
}

impl<S: AudioSink> Speaker<S> {
    pub fn new(sink: S, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            status: SpeakerStatus {
                state: Arc::new(Mutex::new(SpeakerState::Idle)),
            },
        }
    }

    pub fn status(&self) -> SpeakerStatus {
        self.status.clone()
    }

    pub fn is_speaking(&self) -> bool {
        self.status.is_speaking()
    }

    /// Mark the speaker busy and lend out the sink.
    ///
    /// Dropping the returned guard starts the cooldown.
    pub fn acquire(&mut self) -> SpeakerGuard<'_, S> {
        log::debug!("Speaker acquired");
        self.status.set(SpeakerState::Speaking);
        SpeakerGuard { speaker: self }
    }

    pub fn into_inner(self) -> S {
        self.sink
    }
}

pub struct SpeakerGuard<'a, S> {
    speaker: &'a mut Speaker<S>,
}

impl<S> Deref for SpeakerGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.speaker.sink
    }
}

impl<S> DerefMut for SpeakerGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.speaker.sink
    }
}

impl<S> Drop for SpeakerGuard<'_, S> {
    fn drop(&mut self) {
        let until = Instant::now() + self.speaker.cooldown;
        self.speaker.status.set(SpeakerState::Cooldown { until });
        log::debug!("Speaker released, cooldown {:?}", self.speaker.cooldown);
    }
}
