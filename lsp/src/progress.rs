//! Work-done progress bookkeeping.

use std::collections::HashMap;

use parley_types::ProgressToken;
use parley_types::progress::WorkDoneProgress;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Begun,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("progress token {token:?} already in use")]
    DuplicateToken { token: ProgressToken },
    #[error("progress token {token:?} already began")]
    AlreadyBegun { token: ProgressToken },
    #[error("progress token {token:?} has not begun")]
    NotBegun { token: ProgressToken },
}

/// Enforces `begin (report)* end` per token.
///
/// Tokens the server created via `window/workDoneProgress/create` start in
/// the created phase. Tokens supplied by the client in request params are not
/// registered and may `begin` directly.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    tokens: HashMap<ProgressToken, Phase>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, token: ProgressToken) -> Result<(), ProgressError> {
        if self.tokens.contains_key(&token) {
            return Err(ProgressError::DuplicateToken { token });
        }
        self.tokens.insert(token, Phase::Created);
        Ok(())
    }

    /// Drop a created token that was never begun, e.g. after the client refused it.
    pub fn discard(&mut self, token: &ProgressToken) {
        if self.tokens.get(token) == Some(&Phase::Created) {
            self.tokens.remove(token);
        }
    }

    /// Validate one notification and advance the token's phase.
    pub fn advance(
        &mut self,
        token: &ProgressToken,
        value: &WorkDoneProgress,
    ) -> Result<(), ProgressError> {
        let phase = self.tokens.get(token).copied();
        match (value, phase) {
            (WorkDoneProgress::Begin(_), None | Some(Phase::Created)) => {
                self.tokens.insert(token.clone(), Phase::Begun);
                Ok(())
            }
            (WorkDoneProgress::Begin(_), Some(Phase::Begun)) => Err(ProgressError::AlreadyBegun {
                token: token.clone(),
            }),
            (WorkDoneProgress::Report(_), Some(Phase::Begun)) => Ok(()),
            (WorkDoneProgress::End(_), Some(Phase::Begun)) => {
                self.tokens.remove(token);
                Ok(())
            }
            (WorkDoneProgress::Report(_) | WorkDoneProgress::End(_), _) => {
                Err(ProgressError::NotBegun {
                    token: token.clone(),
                })
            }
        }
    }

    #[must_use]
    pub fn is_active(&self, token: &ProgressToken) -> bool {
        self.tokens.get(token) == Some(&Phase::Begun)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
