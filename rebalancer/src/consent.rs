//! Run-scoped consent state and the interactive decision protocol.
//!
//! One decision function serves stale-order cancellation, extra-position
//! cancellation, and bulk cancel-all. Consent choices ("cancel all",
//! "skip all XFRA", ...) mutate a single `ConsentState` that sticks for
//! the remainder of the run.

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};

/// Reads one line of user input for a decision point.
pub trait Prompt {
    fn ask(&mut self, text: &str) -> Result<String>;
}

/// Interactive prompt on the controlling terminal.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, text: &str) -> Result<String> {
        dialoguer::Input::<String>::new()
            .with_prompt(text)
            .allow_empty(true)
            .interact_text()
            .map_err(|e| Error::Prompt(e.to_string()))
    }
}

/// Scripted prompt for tests: answers are consumed front to back, and
/// an exhausted script answers with an empty line (which every decision
/// point treats as skip).
#[derive(Default)]
pub struct ScriptedPrompt {
    replies: std::collections::VecDeque<String>,
    pub asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, text: &str) -> Result<String> {
        self.asked.push(text.to_string());
        Ok(self.replies.pop_front().unwrap_or_default())
    }
}

/// Consent decisions accumulated over a run. Mutated only by
/// `resolve_cancel_decision` and the order loop; never cleared.
#[derive(Debug, Default, Clone)]
pub struct ConsentState {
    pub confirm_all: bool,
    pub skip_all: bool,
    pub confirm_exchanges: FxHashSet<String>,
    pub skip_exchanges: FxHashSet<String>,
}

impl ConsentState {
    pub fn auto_skip(&self, mic: &str) -> bool {
        self.skip_all || self.skip_exchanges.contains(mic)
    }

    pub fn auto_confirm(&self, mic: &str) -> bool {
        self.confirm_all || self.confirm_exchanges.contains(mic)
    }

    /// Carry skip consent into a forced-manual pass: earlier
    /// "confirm all" choices must not leak in.
    pub fn skips_only(&self) -> Self {
        Self {
            confirm_all: false,
            skip_all: self.skip_all,
            confirm_exchanges: FxHashSet::default(),
            skip_exchanges: self.skip_exchanges.clone(),
        }
    }
}

/// Outcome of a cancel decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDecision {
    Cancel {
        /// Decided without prompting (prior "all" consent).
        auto: bool,
    },
    Keep {
        auto: bool,
    },
}

impl CancelDecision {
    pub fn is_cancel(self) -> bool {
        matches!(self, CancelDecision::Cancel { .. })
    }
}

/// Decide whether to cancel one order, prompting when no standing
/// consent applies.
///
/// Resolution order: not actionable → keep; skip consent → keep;
/// confirm consent → cancel; otherwise prompt. Unrecognized input
/// defaults to keep. `header` lines are shown only when the decision is
/// interactive.
pub fn resolve_cancel_decision(
    mic: &str,
    actionable: bool,
    state: &mut ConsentState,
    header: Option<&str>,
    prompt: &mut dyn Prompt,
) -> Result<CancelDecision> {
    if !actionable {
        return Ok(CancelDecision::Keep { auto: true });
    }
    if state.auto_skip(mic) {
        return Ok(CancelDecision::Keep { auto: true });
    }
    if state.auto_confirm(mic) {
        return Ok(CancelDecision::Cancel { auto: true });
    }

    if let Some(header) = header {
        println!("{header}");
    }

    let mic_label = if mic.is_empty() { "?" } else { mic };
    let choice = prompt.ask(&format!(
        "  [Y] Cancel  [A] Cancel All  [E] Cancel All {mic_label}  \
         [S] Skip  [X] Skip All {mic_label}  [N] Skip All "
    ))?;

    Ok(match choice.trim().to_uppercase().as_str() {
        "Y" => CancelDecision::Cancel { auto: false },
        "A" => {
            state.confirm_all = true;
            CancelDecision::Cancel { auto: false }
        }
        "E" => {
            state.confirm_exchanges.insert(mic.to_string());
            CancelDecision::Cancel { auto: false }
        }
        "X" => {
            state.skip_exchanges.insert(mic.to_string());
            CancelDecision::Keep { auto: false }
        }
        "N" => {
            state.skip_all = true;
            CancelDecision::Keep { auto: false }
        }
        // "S" and anything unrecognized.
        _ => CancelDecision::Keep { auto: false },
    })
}
