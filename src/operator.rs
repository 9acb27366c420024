//! Operator I/O.
//!
//! Multi-hour sweeps run unattended, so feedback is audible as well as
//! textual: a success cue after each recorded point, a failure cue when an
//! instrument stops responding or a write fails. The console implementation
//! uses the terminal bell for both, with distinct patterns.

use log::warn;
use std::io::{self, BufRead, Write};

/// Interactive collaborator: confirmation prompts, progress messages, and
/// hands-free audio cues.
pub trait Operator: Send + Sync {
    /// Yes/no prompt. Anything other than an explicit yes counts as no.
    fn confirm(&self, prompt: &str) -> bool;

    /// Progress/status line for the operator (not the data sink).
    fn notify(&self, message: &str);

    /// Audible cue after a successful step.
    fn signal_success(&self);

    /// Audible cue for a fault needing attention.
    fn signal_failure(&self);
}

/// Console operator: prompts on stdout/stdin, cues via the terminal bell.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl ConsoleOperator {
    pub fn new() -> Self {
        Self
    }
}

impl Operator for ConsoleOperator {
    fn confirm(&self, prompt: &str) -> bool {
        let mut line = String::new();
        loop {
            print!("{prompt} [y/n] ");
            if io::stdout().flush().is_err() {
                return false;
            }
            line.clear();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => return false, // stdin closed; treat as decline
                Ok(_) => match line.trim() {
                    "y" | "Y" | "yes" => return true,
                    "n" | "N" | "no" => return false,
                    other => {
                        warn!("unrecognized response '{other}', expected y or n");
                    }
                },
                Err(err) => {
                    warn!("failed to read confirmation: {err}");
                    return false;
                }
            }
        }
    }

    fn notify(&self, message: &str) {
        println!("{message}");
    }

    fn signal_success(&self) {
        // Single bell.
        print!("\x07");
        let _ = io::stdout().flush();
    }

    fn signal_failure(&self) {
        // Double bell, distinct from the success cue.
        print!("\x07\x07");
        let _ = io::stdout().flush();
    }
}
