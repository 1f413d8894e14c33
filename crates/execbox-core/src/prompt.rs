//! Best-effort detection of programs blocked on standard input.
//!
//! Two independent signals feed the [`Interactivity`] verdict:
//!
//! - a static scan of the submitted source for stdin-reading calls
//!   ([`classify_source`]), decided once at launch;
//! - a runtime scan of the program's most recent output line
//!   ([`PromptTracker`]), updated on every stdout chunk.
//!
//! The runtime check is deliberately permissive. Reporting "waiting" for a
//! program that is merely busy costs the caller one idle round trip, while
//! missing a real prompt leaves the program blocked until the timeout.

use crate::language::LanguageSpec;

/// Case-insensitive words that mark a prompt, across the UI languages in use.
const PROMPT_WORDS: &[&str] = &[
    "input", "enter", "nhập", "nhap", "eingabe", "entrez", "introduce", "digite",
];

/// Confidence that a program is interactive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interactivity {
    /// Runs to completion without input.
    Batch,
    /// The source reads stdin; no prompt observed yet.
    LikelyInteractive,
    /// A prompt has been observed and the program is presumed blocked.
    ConfirmedWaiting {
        /// The prompt line, verbatim.
        prompt: String,
    },
}

impl Interactivity {
    /// Any state other than [`Interactivity::Batch`].
    pub fn is_interactive(&self) -> bool {
        !matches!(self, Interactivity::Batch)
    }

    /// Whether the program is presumed blocked on input.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Interactivity::ConfirmedWaiting { .. })
    }
}

/// Static scan of `code` for the language's stdin-reading markers.
///
/// Returns [`Interactivity::Batch`] or [`Interactivity::LikelyInteractive`].
/// False negatives run an input-driven program as batch (it then reads EOF);
/// false positives keep a batch program's session alive until it exits.
pub fn classify_source(spec: &LanguageSpec, code: &str) -> Interactivity {
    if spec.input_markers.iter().any(|marker| code.contains(marker)) {
        Interactivity::LikelyInteractive
    } else {
        Interactivity::Batch
    }
}

/// Whether a single line of output looks like an input prompt.
pub fn looks_like_prompt(line: &str) -> bool {
    if line.contains('?') || line.contains(':') {
        return true;
    }
    let lower = line.to_lowercase();
    PROMPT_WORDS.iter().any(|word| lower.contains(word))
}

/// Tracks the most recent non-empty output line of a running program.
#[derive(Debug, Default, Clone)]
pub struct PromptTracker {
    /// Unterminated tail carried over between chunks.
    partial: String,
    /// Most recent non-empty line (or unterminated fragment).
    last_line: String,
    /// Whether `last_line` was ended by a newline.
    terminated: bool,
}

impl PromptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a stdout chunk.
    pub fn observe(&mut self, chunk: &str) {
        self.partial.push_str(chunk);

        while let Some(idx) = self.partial.find('\n') {
            let line = self.partial[..idx].trim_end_matches('\r');
            if !line.trim().is_empty() {
                self.last_line = line.to_string();
                self.terminated = true;
            }
            self.partial.drain(..=idx);
        }

        if !self.partial.trim().is_empty() {
            self.last_line = self.partial.clone();
            self.terminated = false;
        }
    }

    /// Forget the current prompt, e.g. after input has been written.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.last_line.clear();
        self.terminated = false;
    }

    /// Most recent non-empty line, verbatim.
    pub fn prompt(&self) -> &str {
        &self.last_line
    }

    /// Whether the last line suggests the program is waiting for input.
    pub fn is_waiting(&self) -> bool {
        if self.last_line.trim().is_empty() {
            return false;
        }
        !self.terminated || looks_like_prompt(&self.last_line)
    }

    /// Combine the launch-time classification with the runtime signal.
    pub fn verdict(&self, launch: &Interactivity) -> Interactivity {
        match launch {
            Interactivity::Batch => Interactivity::Batch,
            _ if self.is_waiting() => Interactivity::ConfirmedWaiting {
                prompt: self.last_line.clone(),
            },
            _ => Interactivity::LikelyInteractive,
        }
    }
}
