pub(crate) mod audit;
pub(crate) mod rounds;
pub(crate) mod scoring;
pub(crate) mod sessions;
pub(crate) mod shortlist;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub(crate) enum ExamError {
    #[error("no round has been started")]
    NoActiveRound,
    #[error("round {0} not found")]
    RoundNotFound(i32),
    #[error("round {0} is not running")]
    RoundNotRunning(i32),
    #[error("submission window for round {0} has closed")]
    SubmissionClosed(i32),
    #[error("no exam session for this candidate in round {0}")]
    NoSession(i32),
    #[error("candidate is not eligible for round {0}")]
    NotEligible(i32),
    #[error("candidate is disqualified in round {0}")]
    Disqualified(i32),
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
