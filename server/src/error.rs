//! Error kinds raised while serving a connection.
//!
//! Only [`UpstreamError`] and [`ConnectionFault`] end a connection; every other
//! kind is reported to the client in an `ERROR` frame.

use crate::store::StoreError;
use shared::FrameFormatError;
use thiserror::Error;

/// A well-formed frame that cannot be served in the connection's phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid command")]
    InvalidCommand,
    #[error("malformed {0} payload")]
    MalformedPayload(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("wrong password")]
    WrongPassword,
    #[error("user not found")]
    UserNotFound,
    #[error("username is taken")]
    UsernameTaken,
    #[error("user already logged in")]
    AlreadyLoggedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerFormatError {
    #[error("error reading answer data")]
    MalformedAnswer,
    #[error("invalid answer identifier")]
    InvalidDigestWidth,
    #[error("unknown question")]
    UnknownQuestion,
    #[error("question was not asked")]
    QuestionNotAsked,
}

/// The user store or the worker that called it failed.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("user store failure: {0}")]
    Store(#[from] StoreError),
    #[error("upstream worker failed: {0}")]
    Worker(String),
}

/// Everything a request handler can fail with.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Answer(#[from] AnswerFormatError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        HandlerError::Upstream(UpstreamError::Store(err))
    }
}

/// Reasons a connection is torn down by the multiplexer.
#[derive(Debug, Error)]
pub enum ConnectionFault {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("undecodable frame")]
    Frame(#[from] FrameFormatError),
    #[error("peer closed the connection")]
    Closed,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_client_readable() {
        assert_eq!(ProtocolError::InvalidCommand.to_string(), "invalid command");
        assert_eq!(
            ProtocolError::MalformedPayload("login").to_string(),
            "malformed login payload"
        );
        assert_eq!(AuthError::AlreadyLoggedIn.to_string(), "user already logged in");
        assert_eq!(
            HandlerError::from(AnswerFormatError::InvalidDigestWidth).to_string(),
            "invalid answer identifier"
        );
    }

    #[test]
    fn test_store_error_becomes_upstream() {
        let err = HandlerError::from(StoreError::Unavailable("offline".into()));
        assert!(matches!(err, HandlerError::Upstream(UpstreamError::Store(_))));
    }
}
