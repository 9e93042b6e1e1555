use shared::error::StoreError;
use thiserror::Error;

/// Why a direct message target was refused before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DmRejection {
    #[error("cannot open a direct message with yourself")]
    SelfTarget,
    #[error("automated participants are only reachable from public rooms")]
    AutomatedTarget,
    #[error("direct messages are disabled for this session")]
    DirectMessagesDisabled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("no room is active")]
    NoActiveRoom,
    #[error("message text is empty")]
    EmptyMessage,
    #[error("sending is disabled while the conversation is blocked")]
    Blocked,
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("direct message rejected: {0}")]
    DirectMessageRejected(#[from] DmRejection),
    #[error("message was not sent: {0}")]
    SendFailed(#[source] StoreError),
    #[error("block list update failed: {0}")]
    Block(#[source] StoreError),
}
