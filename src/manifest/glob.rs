//! manifest::glob
//!
//! Image name matching with `*` as the only wildcard.
//!
//! A pattern without `*` matches only an identical string. A pattern with
//! `*` is translated into an anchored regular expression: every literal
//! segment is escaped and every `*` becomes an unbounded wildcard. Matching
//! is always full-string; `app` never matches `app-foo`.

use regex::Regex;

/// Match an image name against a single pattern.
///
/// # Example
///
/// ```
/// use capstan::manifest::glob::fnmatch;
///
/// assert!(fnmatch("app-*", "app-foo"));
/// assert!(fnmatch("app", "app"));
/// assert!(!fnmatch("app", "app-foo"));
/// ```
pub fn fnmatch(pattern: &str, input: &str) -> bool {
    // Shortcut for when no globbing is required
    if !pattern.contains('*') {
        return input == pattern;
    }
    let quoted: Vec<String> = pattern.split('*').map(regex::escape).collect();
    // Anchored at both ends; Regex::is_match is a search, not a full match
    let anchored = format!("^{}$", quoted.join(".*"));
    // The pattern is built entirely from escaped literals and `.*`, so
    // compilation cannot fail on user input.
    Regex::new(&anchored)
        .map(|re| re.is_match(input))
        .unwrap_or(false)
}

/// Match an image name against any of the configured patterns.
pub fn matches_any(patterns: &[String], input: &str) -> bool {
    patterns.iter().any(|p| fnmatch(p, input))
}
