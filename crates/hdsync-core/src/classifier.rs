//! Response classification
//!
//! Maps a transport status plus an optional adapter verdict on the body
//! into an [`Outcome`] the fetch loop acts on.
//!
//! | status            | outcome        |
//! |-------------------|----------------|
//! | 2xx               | `Success`      |
//! | 401, 403          | `AuthExpired`  |
//! | 409, 429          | `RateLimited`  |
//! | other / no reply  | `Transient`    |
//!
//! Adapters parameterize the table with per-status overrides and may
//! report body-embedded error codes, which is how `Fatal` arises.

use std::collections::BTreeMap;

use crate::error::Error;

/// Classification of one provider exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Parse the page
    Success,
    /// A successful exchange carrying no records (e.g. an empty repository)
    Empty,
    /// Credentials are no longer valid
    AuthExpired,
    /// Back off and retry the same page
    RateLimited,
    /// Abort this endpoint, retry on a later cycle
    Transient(String),
    /// Abort this endpoint, do not retry
    Fatal(String),
}

/// Provider-parameterized classifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseClassifier {
    overrides: BTreeMap<u16, Outcome>,
}

impl ResponseClassifier {
    /// The default status table without overrides
    pub fn standard() -> Self {
        Self::default()
    }

    /// Force `status` to classify as `outcome`
    pub fn with_override(mut self, status: u16, outcome: Outcome) -> Self {
        self.overrides.insert(status, outcome);
        self
    }

    /// Classify a received response
    ///
    /// `body_verdict` is the adapter's reading of the payload, if it
    /// recognized an embedded status.
    pub fn classify(&self, status: u16, body_verdict: Option<Outcome>) -> Outcome {
        if let Some(outcome) = self.overrides.get(&status) {
            return outcome.clone();
        }

        match status {
            200..=299 => body_verdict.unwrap_or(Outcome::Success),
            401 | 403 => Outcome::AuthExpired,
            409 | 429 => Outcome::RateLimited,
            _ => match body_verdict {
                Some(Outcome::Success) | Some(Outcome::Empty) | None => {
                    Outcome::Transient(format!("HTTP {}", status))
                }
                Some(verdict) => verdict,
            },
        }
    }

    /// Classify a request that produced no response
    pub fn classify_failure(&self, error: &Error) -> Outcome {
        Outcome::Transient(error.to_string())
    }
}
