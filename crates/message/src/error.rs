/// Result codes for every broker operation. Success is the `Ok` arm of
/// `Result<T, QueueError>`; the variants below carry the stable non-success
/// codes of the wire taxonomy (1..=20).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue not found: '{0}'")]
    QueueNotFound(String),
    #[error("queue '{0}' is full")]
    QueueFull(String),
    #[error("message of {size} bytes exceeds the queue limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("consumer not found: '{0}'")]
    ConsumerNotFound(String),
    #[error("producer not found: '{0}'")]
    ProducerNotFound(String),
    #[error("subscription not found: '{0}'")]
    SubscriptionNotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation timed out")]
    Timeout,
    #[error("serialization error: {0}")]
    SerializationError(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("storage error: {0}")]
    StorageError(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("message not found: {0}")]
    MessageNotFound(u64),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(u64),
    #[error("consumer limit exceeded for queue '{0}'")]
    ConsumerLimitExceeded(String),
}

impl QueueError {
    /// The stable numeric code of this error. Zero is reserved for success
    /// and never produced here.
    pub fn code(&self) -> u8 {
        match self {
            QueueError::QueueNotFound(_) => 1,
            QueueError::QueueFull(_) => 2,
            QueueError::MessageTooLarge { .. } => 3,
            QueueError::ConsumerNotFound(_) => 4,
            QueueError::ProducerNotFound(_) => 5,
            QueueError::SubscriptionNotFound(_) => 6,
            QueueError::PermissionDenied => 7,
            QueueError::Timeout => 8,
            QueueError::SerializationError(_) => 9,
            QueueError::NetworkError(_) => 10,
            QueueError::StorageError(_) => 11,
            QueueError::InvalidParameter(_) => 12,
            QueueError::InternalError(_) => 13,
            QueueError::MessageNotFound(_) => 14,
            QueueError::NotImplemented(_) => 15,
            QueueError::InvalidConfig(_) => 16,
            QueueError::InvalidState(_) => 17,
            QueueError::OperationFailed(_) => 18,
            QueueError::TransactionNotFound(_) => 19,
            QueueError::ConsumerLimitExceeded(_) => 20,
        }
    }

    /// Whether a caller can reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::Timeout | QueueError::NetworkError(_) | QueueError::QueueFull(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(QueueError::QueueNotFound("q".into()).code(), 1);
        assert_eq!(QueueError::Timeout.code(), 8);
        assert_eq!(QueueError::TransactionNotFound(7).code(), 19);
        assert_eq!(QueueError::ConsumerLimitExceeded("q".into()).code(), 20);
    }

    #[test]
    fn retryable_classification() {
        assert!(QueueError::Timeout.is_retryable());
        assert!(QueueError::QueueFull("q".into()).is_retryable());
        assert!(!QueueError::InvalidParameter("x".into()).is_retryable());
    }
}
