//! Safety policy selection.
//!
//! Every outbound generation call carries a safety tier. The tier is picked
//! by an age gate: relaxed filtering requires both the human and the persona
//! to have a known age at or above the adult threshold. Anything else,
//! including an unknown age on either side, gets strict filtering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default adult threshold in years
pub const DEFAULT_ADULT_AGE: u32 = 18;

/// Filtering policy requested from the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// Provider default filtering or stricter
    #[default]
    Strict,
    /// Reduced filtering for adult-only conversations
    Relaxed,
}

impl SafetyTier {
    /// Stable name used in queue keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyTier::Strict => "strict",
            SafetyTier::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Age gate deciding the safety tier for a conversation pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeGate {
    /// Minimum age (inclusive) considered adult
    pub adult_age: u32,
}

impl Default for AgeGate {
    fn default() -> Self {
        Self {
            adult_age: DEFAULT_ADULT_AGE,
        }
    }
}

impl AgeGate {
    /// Create a gate with a custom threshold
    pub fn new(adult_age: u32) -> Self {
        Self { adult_age }
    }

    /// Check a single age against the threshold; unknown is never adult
    pub fn is_adult(&self, age: Option<u32>) -> bool {
        age.is_some_and(|a| a >= self.adult_age)
    }

    /// Pick the tier for a human/persona pair
    pub fn tier_for(&self, human_age: Option<u32>, persona_age: Option<u32>) -> SafetyTier {
        if self.is_adult(human_age) && self.is_adult(persona_age) {
            SafetyTier::Relaxed
        } else {
            SafetyTier::Strict
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_adults_relaxed() {
        let gate = AgeGate::default();
        assert_eq!(gate.tier_for(Some(18), Some(30)), SafetyTier::Relaxed);
    }

    #[test]
    fn test_minor_or_unknown_is_strict() {
        let gate = AgeGate::default();
        assert_eq!(gate.tier_for(Some(17), Some(30)), SafetyTier::Strict);
        assert_eq!(gate.tier_for(Some(30), Some(16)), SafetyTier::Strict);
        assert_eq!(gate.tier_for(None, Some(30)), SafetyTier::Strict);
        assert_eq!(gate.tier_for(Some(30), None), SafetyTier::Strict);
        assert_eq!(gate.tier_for(None, None), SafetyTier::Strict);
    }

    #[test]
    fn test_custom_threshold() {
        let gate = AgeGate::new(21);
        assert_eq!(gate.tier_for(Some(20), Some(25)), SafetyTier::Strict);
        assert_eq!(gate.tier_for(Some(21), Some(25)), SafetyTier::Relaxed);
    }

    #[test]
    fn test_tier_ordering_and_names() {
        assert!(SafetyTier::Relaxed > SafetyTier::Strict);
        assert_eq!(SafetyTier::Relaxed.to_string(), "relaxed");
    }
}
