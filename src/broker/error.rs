use thiserror::Error;

/// Error type for broker round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The connection was lost after it was acquired.
    #[error("connection closed")]
    Disconnected,
    /// No connection could be established.
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("no such exchange: {0}")]
    UnknownExchange(String),
    #[error("no such queue: {0}")]
    UnknownQueue(String),
    /// Ack or reject for a delivery this connection does not hold.
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),
    /// The broker refused the operation (e.g. redeclare with other settings).
    #[error("rejected: {0}")]
    Rejected(String),
}
