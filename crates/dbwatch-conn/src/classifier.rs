//! Kill detection: deciding whether a failed probe means the server
//! terminated the connection.
//!
//! A killed connection is evicted and recreated; any other failure keeps the
//! cached connection so it can recover. The decision is driven by server
//! error numbers, transport error kinds and message patterns, all of which
//! are configurable, plus an optional caller-supplied predicate.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::sync::Arc;

use regex::{RegexSet, RegexSetBuilder};

use crate::config::KillDetectionConfig;
use crate::error::BackendError;

/// Caller-supplied kill predicate, consulted after the built-in checks.
pub type KillPredicate = Arc<dyn Fn(&BackendError) -> bool + Send + Sync>;

/// Transport failures that leave the socket unusable.
const DEAD_SOCKET_KINDS: [ErrorKind; 4] = [
    ErrorKind::ConnectionReset,
    ErrorKind::ConnectionAborted,
    ErrorKind::BrokenPipe,
    ErrorKind::UnexpectedEof,
];

#[derive(Clone)]
pub struct KillClassifier {
    codes: HashSet<u16>,
    patterns: RegexSet,
    predicate: Option<KillPredicate>,
}

impl KillClassifier {
    /// Build a classifier from error numbers and case-insensitive patterns.
    pub fn new<I, S>(codes: I, patterns: &[S]) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = u16>,
        S: AsRef<str>,
    {
        let patterns = RegexSetBuilder::new(patterns.iter().map(AsRef::as_ref))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            codes: codes.into_iter().collect(),
            patterns,
            predicate: None,
        })
    }

    /// A classifier that never reports a kill unless a predicate is added.
    pub fn empty() -> Self {
        Self {
            codes: HashSet::new(),
            patterns: RegexSet::empty(),
            predicate: None,
        }
    }

    /// Add a custom predicate, OR-ed with the built-in checks.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BackendError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_killed(&self, err: &BackendError) -> bool {
        if err.code.is_some_and(|code| self.codes.contains(&code)) {
            return true;
        }
        if err.io_kind.is_some_and(|kind| DEAD_SOCKET_KINDS.contains(&kind)) {
            return true;
        }
        if self.patterns.is_match(&err.message) {
            return true;
        }
        self.predicate.as_ref().is_some_and(|predicate| predicate(err))
    }
}

impl Default for KillClassifier {
    fn default() -> Self {
        let config = KillDetectionConfig::default();
        // The built-in patterns are literals known to compile.
        Self::new(config.error_codes, &config.message_patterns).unwrap_or_else(|_| Self::empty())
    }
}

impl std::fmt::Debug for KillClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillClassifier")
            .field("codes", &self.codes)
            .field("patterns", &self.patterns.patterns())
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
