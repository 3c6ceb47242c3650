//! Identifier extraction from unstructured CLI and log output.
//!
//! Ledger tools print ids either embedded in chatter or alone on the last
//! line. Callers pick an ordered list of [`Extraction`] strategies and take
//! the first that yields something.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

static HEX64_TOKEN: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"\b([0-9a-f]{64})\b")
        .case_insensitive(true)
        .build()
        .expect("hex64 token pattern")
});

static HEX64_EXACT: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^[0-9a-f]{64}$")
        .case_insensitive(true)
        .build()
        .expect("hex64 exact pattern")
});

/// One way of pulling an identifier out of text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extraction {
    /// First 64-hex token anywhere, lower-cased.
    FirstHex64,
    /// Last non-blank line, only if it is itself a 64-hex id (lower-cased).
    LastLineHex64,
    /// Last non-blank line, verbatim.
    LastLine,
}

/// `open-chain` prints the new chain id amid other output.
pub const CHAIN_ID_STRATEGIES: &[Extraction] = &[Extraction::FirstHex64, Extraction::LastLineHex64];
/// `create-application` prints the application id alone on its last line.
pub const APP_ID_STRATEGIES: &[Extraction] = &[Extraction::LastLine];
/// `publish-*` commands; prefer a clean hex id, else the last line.
pub const PUBLISH_STRATEGIES: &[Extraction] = &[Extraction::FirstHex64, Extraction::LastLine];

impl Extraction {
    pub fn apply(self, text: &str) -> Option<String> {
        match self {
            Extraction::FirstHex64 => first_hex64(text),
            Extraction::LastLineHex64 => {
                let line = last_non_empty_line(text);
                is_hex64(line).then(|| line.to_ascii_lowercase())
            }
            Extraction::LastLine => {
                let line = last_non_empty_line(text);
                (!line.is_empty()).then(|| line.to_string())
            }
        }
    }
}

/// Run `strategies` in order and return the first hit.
pub fn extract(text: &str, strategies: &[Extraction]) -> Option<String> {
    strategies.iter().find_map(|s| s.apply(text))
}

pub fn first_hex64(text: &str) -> Option<String> {
    HEX64_TOKEN
        .captures(text)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Every 64-hex token in order of appearance, lower-cased.
pub fn all_hex64(text: &str) -> Vec<String> {
    HEX64_TOKEN
        .captures_iter(text)
        .map(|caps| caps[1].to_ascii_lowercase())
        .collect()
}

pub fn is_hex64(candidate: &str) -> bool {
    HEX64_EXACT.is_match(candidate)
}

pub fn last_non_empty_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("")
}

/// Value of an `export NAME="value"` line.
pub fn env_assignment(log_text: &str, name: &str) -> Option<String> {
    let pattern = format!(r#"export {}="([^"]+)""#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    log_text
        .lines()
        .filter(|line| line.contains(name))
        .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
}
