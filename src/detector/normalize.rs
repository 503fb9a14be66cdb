//! State token normalisation.
//!
//! Sensor firmware publishes human-language state strings whose spelling
//! varies by locale and firmware revision ("interrompida", "INTERRUPTED ",
//! "livre", "clear").  The normaliser folds them onto [`CanonicalState`].
//!
//! | Rule                                  | Result        |
//! |---------------------------------------|---------------|
//! | starts with an interrupted prefix     | `Interrupted` |
//! | equals a clear token                  | `Clear`       |
//! | anything else, or missing             | `Unknown`     |
//!
//! Matching is case-insensitive and ignores surrounding whitespace.

use serde::{Deserialize, Serialize};

/// The two logical barrier states plus the "unrecognised" bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalState {
    /// Beam blocked: an object is inside the barrier.
    Interrupted,
    /// Beam restored.
    Clear,
    #[default]
    Unknown,
}

impl CanonicalState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted",
            Self::Clear => "clear",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl core::fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recognised tokens per canonical state.
///
/// Interrupted tokens are matched as prefixes ("interrompid" covers both
/// "interrompido" and "interrompida"); clear tokens must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSet {
    pub interrupted_prefixes: Vec<String>,
    pub clear_tokens: Vec<String>,
}

impl Default for TokenSet {
    fn default() -> Self {
        Self {
            interrupted_prefixes: vec!["interrompid".into(), "interrupted".into()],
            clear_tokens: vec!["livre".into(), "clear".into()],
        }
    }
}

impl TokenSet {
    /// Both lists must be non-empty and free of blank entries.
    pub fn is_valid(&self) -> bool {
        let non_blank = |v: &[String]| !v.is_empty() && v.iter().all(|t| !t.trim().is_empty());
        non_blank(&self.interrupted_prefixes) && non_blank(&self.clear_tokens)
    }
}

/// Maps raw state tokens to [`CanonicalState`].
#[derive(Debug, Clone)]
pub struct StateNormalizer {
    interrupted_prefixes: Vec<String>,
    clear_tokens: Vec<String>,
}

impl Default for StateNormalizer {
    fn default() -> Self {
        Self::new(&TokenSet::default())
    }
}

impl StateNormalizer {
    /// Build a normaliser; tokens are trimmed and lower-cased once here.
    pub fn new(tokens: &TokenSet) -> Self {
        let fold = |v: &[String]| -> Vec<String> {
            v.iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        };
        Self {
            interrupted_prefixes: fold(&tokens.interrupted_prefixes),
            clear_tokens: fold(&tokens.clear_tokens),
        }
    }

    /// Normalise a raw token.  Never fails.
    pub fn normalize(&self, raw: Option<&str>) -> CanonicalState {
        let Some(raw) = raw else {
            return CanonicalState::Unknown;
        };
        let token = raw.trim().to_lowercase();
        if token.is_empty() {
            return CanonicalState::Unknown;
        }
        if self
            .interrupted_prefixes
            .iter()
            .any(|p| token.starts_with(p.as_str()))
        {
            return CanonicalState::Interrupted;
        }
        if self.clear_tokens.iter().any(|c| *c == token) {
            return CanonicalState::Clear;
        }
        CanonicalState::Unknown
    }
}
