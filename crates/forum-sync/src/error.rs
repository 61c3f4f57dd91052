use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Live channel is down. Callers fall back to periodic fetches.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// The store declined a create or mutation.
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// The target no longer exists; treat the mutation as already applied.
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("viewer is not a member of this event's forum")]
    NotAMember,

    /// A push frame or response body could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPush(String),

    #[error("room is closed")]
    RoomClosed,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedPush(e.to_string())
        } else {
            Self::TransportUnavailable
        }
    }
}
