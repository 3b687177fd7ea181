//! Suggestion gating.
//!
//! Decides whether a proactive suggestion may be shown right now. The checks
//! run in a fixed order and the first failing one wins:
//!
//! 1. an overlay is already on screen
//! 2. suggestions are disabled
//! 3. the trigger threshold is not positive
//! 4. the session is younger than the trigger threshold
//! 5. the foreground app has not been stable long enough
//! 6. the cooldown since the last decision has not elapsed
//!
//! Threshold comparisons are inclusive: reaching a threshold exactly allows the
//! suggestion.

use serde::{Deserialize, Serialize};

use crate::settings::SessionSettings;

const MILLIS_PER_SECOND: i64 = 1_000;

/// Suggestion cooldown state of one live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSuggestionGate {
    /// Session-relative elapsed time of the most recent decision.
    pub last_decision_elapsed_millis: Option<i64>,
}

/// Everything the engine needs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionInput<'a> {
    pub elapsed_millis: i64,
    pub since_foreground_millis: i64,
    pub settings: &'a SessionSettings,
    pub last_decision_elapsed_millis: Option<i64>,
    pub is_overlay_shown: bool,
}

/// Why a suggestion was held back, or that it may be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionVerdict {
    Show,
    OverlayShown,
    Disabled,
    NoTrigger,
    TooEarly,
    ForegroundUnstable,
    CoolingDown,
}

impl SuggestionVerdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::OverlayShown => "overlay_shown",
            Self::Disabled => "disabled",
            Self::NoTrigger => "no_trigger",
            Self::TooEarly => "too_early",
            Self::ForegroundUnstable => "foreground_unstable",
            Self::CoolingDown => "cooling_down",
        }
    }
}

/// Evaluates the gating rules and reports which one decided.
pub fn evaluate(input: &SuggestionInput<'_>) -> SuggestionVerdict {
    let settings = input.settings;
    if input.is_overlay_shown {
        return SuggestionVerdict::OverlayShown;
    }
    if !settings.suggestion_enabled {
        return SuggestionVerdict::Disabled;
    }
    if settings.suggestion_trigger_seconds <= 0 {
        return SuggestionVerdict::NoTrigger;
    }
    let trigger_ms = settings
        .suggestion_trigger_seconds
        .saturating_mul(MILLIS_PER_SECOND);
    if input.elapsed_millis < trigger_ms {
        return SuggestionVerdict::TooEarly;
    }
    let stable_ms = settings
        .suggestion_foreground_stable_seconds
        .saturating_mul(MILLIS_PER_SECOND);
    if input.since_foreground_millis < stable_ms {
        return SuggestionVerdict::ForegroundUnstable;
    }
    if let Some(last_decision) = input.last_decision_elapsed_millis {
        let cooldown_ms = settings
            .suggestion_cooldown_seconds
            .saturating_mul(MILLIS_PER_SECOND);
        if input.elapsed_millis.saturating_sub(last_decision) < cooldown_ms {
            return SuggestionVerdict::CoolingDown;
        }
    }
    SuggestionVerdict::Show
}

/// Whether a suggestion should be shown.
pub fn should_show(input: &SuggestionInput<'_>) -> bool {
    evaluate(input) == SuggestionVerdict::Show
}
