//! The remote subtitle database as seen by the batch runner.
//! This module defines the session handle and the service trait; the
//! XML-RPC implementation lives in [`opensubtitles`].

use crate::scan::VideoFile;
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod opensubtitles;

/// One search result as returned by the service, field name to value.
pub type RawRecord = BTreeMap<String, String>;

/// Subtitle languages the tool can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Eng,
    Spa,
}

impl Language {
    /// ISO 639-2 code understood by the search call.
    pub fn code(self) -> &'static str {
        match self {
            Language::Eng => "eng",
            Language::Spa => "spa",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Proof of a successful login, required by every later call.
/// `logout` consumes it so a session cannot be used once closed.
pub struct Session {
    token: String,
}

impl Session {
    /// Wrap the token handed out by a successful login.
    /// Only service implementations and test doubles should build one.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Opaque token handed out by the service.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// A downloaded subtitle, still base64 encoded and gzip compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSubtitle {
    pub file_id: String,
    pub data: String,
}

/// Failures reported by the remote service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("{method} returned status {status}")]
    Status { method: &'static str, status: String },
    #[error("{method} returned an unexpected response: {reason}")]
    Malformed { method: &'static str, reason: String },
    #[error("{method} call failed: {message}")]
    Transport { method: &'static str, message: String },
}

/// Operations of a subtitle database.
/// Implementations are called strictly one at a time by the batch runner.
pub trait SubtitleService {
    /// Open a session with the given credentials.
    fn login(&self, username: &str, password: &str) -> Result<Session>;

    /// Look up subtitles in `language` for the fingerprint of `video`.
    fn search(
        &self,
        session: &Session,
        language: Language,
        video: &VideoFile,
    ) -> Result<Vec<RawRecord>>;

    /// Fetch the payloads of all `file_ids` in one call.
    fn download(&self, session: &Session, file_ids: &[String]) -> Result<Vec<EncodedSubtitle>>;

    /// Close the session.
    fn logout(&self, session: Session) -> Result<()>;
}
