//! Hidden admin entry: a rapid triple activation opens the passphrase
//! prompt, and a correct passphrase turns on admin mode for the session.
//!
//! The server only checks passphrases; the trigger and prompt belong to the
//! client and are modelled here for its behaviour tests.

#[cfg(test)]
use std::time::{Duration, Instant};

use super::verify_passphrase;

/// Activations needed to open the prompt.
#[cfg(test)]
pub const TRIGGER_COUNT: u32 = 3;

/// Longest allowed gap between two activations of one sequence.
#[cfg(test)]
pub const TRIGGER_WINDOW: Duration = Duration::from_millis(1000);

/// Counts activations that follow each other closely enough.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct TriggerCounter {
    count: u32,
    last: Option<Instant>,
}

#[cfg(test)]
impl TriggerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an activation at `now`. Returns `true` when it completes a
    /// sequence, and starts counting from zero again.
    pub fn activate(&mut self, now: Instant) -> bool {
        let expired = self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) >= TRIGGER_WINDOW);
        if expired {
            self.count = 0;
        }

        self.count += 1;
        self.last = Some(now);

        if self.count >= TRIGGER_COUNT {
            self.count = 0;
            self.last = None;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Prompt and admin-mode state for one session. Never persisted.
#[derive(Debug)]
pub struct AdminGate {
    passphrase: String,
    #[cfg(test)]
    trigger: TriggerCounter,
    #[cfg(test)]
    prompt_open: bool,
    is_admin: bool,
}

impl AdminGate {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            #[cfg(test)]
            trigger: TriggerCounter::new(),
            #[cfg(test)]
            prompt_open: false,
            is_admin: false,
        }
    }

    /// Feed one activation of the hidden trigger.
    #[cfg(test)]
    pub fn activate(&mut self, now: Instant) {
        if self.trigger.activate(now) {
            self.prompt_open = true;
        }
    }

    /// Check a passphrase typed into the prompt. A match enables admin mode
    /// and closes the prompt; a miss leaves the prompt open.
    pub fn submit(&mut self, passphrase: &str) -> bool {
        if !verify_passphrase(passphrase, &self.passphrase) {
            tracing::debug!("Admin passphrase rejected");
            return false;
        }
        self.is_admin = true;
        #[cfg(test)]
        {
            self.prompt_open = false;
        }
        true
    }

    #[cfg(test)]
    pub fn close_prompt(&mut self) {
        self.prompt_open = false;
    }

    #[cfg(test)]
    pub fn prompt_open(&self) -> bool {
        self.prompt_open
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }
}
