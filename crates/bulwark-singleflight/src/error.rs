use thiserror::Error;

/// Error returned to every caller sharing one computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SingleFlightError<E> {
    /// The shared computation returned an error.
    #[error("computation failed: {0}")]
    Compute(E),
    /// The computation panicked or its task was aborted before producing a
    /// result.
    #[error("computation was abandoned before producing a result")]
    Abandoned,
}

impl<E> SingleFlightError<E> {
    /// Returns the computation's own error, if that is what happened.
    pub fn into_compute(self) -> Option<E> {
        match self {
            SingleFlightError::Compute(e) => Some(e),
            SingleFlightError::Abandoned => None,
        }
    }

    /// Returns true if the computation never produced a result.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, SingleFlightError::Abandoned)
    }
}
