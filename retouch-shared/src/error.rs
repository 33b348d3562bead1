/// Common error types for the Retouch core
///
/// Every component in this crate returns `CoreResult<T>`. Variants are split
/// between client-facing outcomes (validation, credits, conflicts) and server
/// faults (ledger integrity, storage, database) so the API layer can map them
/// without guessing.
///
/// # Example
///
/// ```
/// use retouch_shared::error::{CoreError, CoreResult};
///
/// fn check_size(len: usize, max: usize) -> CoreResult<()> {
///     if len > max {
///         return Err(CoreError::Validation(format!("asset exceeds {} bytes", max)));
///     }
///     Ok(())
/// }
///
/// assert!(check_size(10, 5).is_err());
/// ```

use crate::models::reservation::ReservationState;
use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Core result type alias
pub type CoreResult<T> = Result<T, CoreError>;

/// Error taxonomy of the enhancement and accounting core
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input (wrong type, oversize, unknown mode, malformed event)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Neither a free slot nor a credit is available
    #[error("Insufficient credits for user {user_id}")]
    InsufficientCredits { user_id: Uuid },

    /// Duplicate or overlapping operation on the same photo
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Entity does not exist (or is not visible to the caller)
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Reservation was not HELD when it was resolved
    ///
    /// This is a ledger-integrity violation, never the user's fault.
    #[error("Reservation {reservation_id} is {state:?}, expected held")]
    InvalidReservationState {
        reservation_id: Uuid,
        state: ReservationState,
    },

    /// A free slot was released for a user with none consumed
    #[error("No consumed free enhancement to restore for user {user_id}")]
    FreeSlotUnderflow { user_id: Uuid },

    /// Webhook signature did not verify
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Asset storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CoreError {
    /// Shorthand for a missing entity
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the error is the caller's fault (4xx-equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::InsufficientCredits { .. }
                | CoreError::Conflict(_)
                | CoreError::NotFound { .. }
                | CoreError::InvalidSignature
        )
    }

    /// Whether the error signals a broken accounting invariant
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidReservationState { .. } | CoreError::FreeSlotUnderflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Validation("empty asset".to_string());
        assert_eq!(err.to_string(), "Validation failed: empty asset");

        let err = CoreError::not_found("photo", Uuid::nil());
        assert_eq!(
            err.to_string(),
            "photo not found: 00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(CoreError::InsufficientCredits { user_id: Uuid::nil() }.is_client_error());
        assert!(CoreError::Conflict("busy".to_string()).is_client_error());
        assert!(CoreError::InvalidSignature.is_client_error());

        let integrity = CoreError::InvalidReservationState {
            reservation_id: Uuid::nil(),
            state: ReservationState::Committed,
        };
        assert!(!integrity.is_client_error());
        assert!(integrity.is_integrity_violation());
        assert!(CoreError::FreeSlotUnderflow { user_id: Uuid::nil() }.is_integrity_violation());
    }
}
