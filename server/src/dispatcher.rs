//! Routing of decoded frames by connection phase.
//!
//! Everything here runs on the event loop. Requests that need the user store
//! are handed back as [`Dispatch::Deferred`] and their results come back
//! through [`complete`].

use crate::connection_manager::ConnectionId;
use crate::error::{AnswerFormatError, AuthError, HandlerError, ProtocolError, UpstreamError};
use crate::game::{get_logged_users, AnswerSubmission, Credentials, Response, UpstreamRequest};
use crate::outbound::OutboundQueue;
use crate::session::SessionRegistry;
use log::{debug, warn};
use shared::{Command, Frame, DELIMITER, MAX_DATA_LENGTH};
use std::fmt;

/// Loop-owned state shared by every connection.
#[derive(Debug, Default)]
pub struct ServerContext {
    pub sessions: SessionRegistry,
    pub outbound: OutboundQueue,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `frame` and queues it for `connection`. A frame that cannot
    /// be encoded is replaced by an `ERROR` naming the reason.
    pub fn reply(&mut self, connection: ConnectionId, frame: Frame) {
        match frame.encode() {
            Ok(bytes) => {
                self.outbound.push(connection, bytes);
                debug!(
                    "Queued {} for {} ({} pending)",
                    frame.command,
                    connection,
                    self.outbound.pending_len(connection)
                );
            }
            Err(_) => {
                let reason = encode_failure(&frame);
                warn!(
                    "Reply {} for {} cannot be encoded: {} ({} payload bytes)",
                    frame.command,
                    connection,
                    reason,
                    frame.payload.len()
                );
                if let Ok(bytes) = Frame::new(Command::Error, reason).encode() {
                    self.outbound.push(connection, bytes);
                }
            }
        }
    }

    pub fn reply_error(&mut self, connection: ConnectionId, error: &impl fmt::Display) {
        self.reply(connection, Frame::new(Command::Error, error.to_string()));
    }

    /// Drops the session and queued output of a closed connection.
    pub fn forget(&mut self, connection: ConnectionId) {
        if let Some(identity) = self.sessions.revoke(connection) {
            debug!("Session of {} on {} revoked", identity.username, connection);
        }
        let dropped = self.outbound.purge(connection);
        if dropped > 0 {
            debug!("Discarded {} unsent frames for {}", dropped, connection);
        }
    }
}

fn encode_failure(frame: &Frame) -> &'static str {
    if frame.payload.len() > MAX_DATA_LENGTH {
        "reply too large"
    } else if frame.payload.contains(DELIMITER) {
        "reply contains a frame delimiter"
    } else {
        "reply cannot be encoded"
    }
}

/// What the loop has to do after a frame was dispatched.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// A reply, if any, is already queued.
    Replied,
    /// Run this on the worker pool and feed the result to [`complete`].
    Deferred(UpstreamRequest),
    /// Close the connection without a reply.
    Disconnect,
}

pub fn dispatch(
    ctx: &mut ServerContext,
    connection: ConnectionId,
    command: Command,
    payload: &str,
) -> Dispatch {
    debug!("{} sent {}", connection, command);
    if !command.is_client_command() {
        warn!("{} sent server verb {}", connection, command);
        ctx.reply_error(connection, &ProtocolError::InvalidCommand);
        return Dispatch::Replied;
    }
    if ctx.sessions.contains(connection) {
        dispatch_authenticated(ctx, connection, command, payload)
    } else {
        dispatch_unauthenticated(ctx, connection, command, payload)
    }
}

fn dispatch_unauthenticated(
    ctx: &mut ServerContext,
    connection: ConnectionId,
    command: Command,
    payload: &str,
) -> Dispatch {
    match command {
        Command::Login => match Credentials::parse(payload, "login") {
            Ok(credentials) if ctx.sessions.is_logged_in(&credentials.username) => {
                ctx.reply_error(connection, &AuthError::AlreadyLoggedIn);
                Dispatch::Replied
            }
            Ok(credentials) => Dispatch::Deferred(UpstreamRequest::Login(credentials)),
            Err(err) => {
                ctx.reply_error(connection, &err);
                Dispatch::Replied
            }
        },
        Command::Signup => match Credentials::parse(payload, "signup") {
            Ok(credentials) => Dispatch::Deferred(UpstreamRequest::Signup(credentials)),
            Err(err) => {
                ctx.reply_error(connection, &err);
                Dispatch::Replied
            }
        },
        _ => {
            ctx.reply_error(connection, &ProtocolError::InvalidCommand);
            Dispatch::Replied
        }
    }
}

fn dispatch_authenticated(
    ctx: &mut ServerContext,
    connection: ConnectionId,
    command: Command,
    payload: &str,
) -> Dispatch {
    let Some(identity) = ctx.sessions.lookup(connection).cloned() else {
        return dispatch_unauthenticated(ctx, connection, command, payload);
    };

    match command {
        Command::Logout => Dispatch::Disconnect,
        Command::MyScore => Dispatch::Deferred(UpstreamRequest::Score(identity)),
        Command::Highscore => Dispatch::Deferred(UpstreamRequest::Highscore(identity)),
        Command::GetQuestion => Dispatch::Deferred(UpstreamRequest::Question(identity)),
        Command::Logged => {
            let frame = get_logged_users(&ctx.sessions);
            ctx.reply(connection, frame);
            Dispatch::Replied
        }
        Command::SendAnswer => {
            let submission = match AnswerSubmission::parse(payload) {
                Ok(submission) => submission,
                Err(err) => {
                    ctx.reply_error(connection, &err);
                    return Dispatch::Replied;
                }
            };
            if !ctx
                .sessions
                .claim_outstanding_question(connection, &submission.question_id)
            {
                ctx.reply_error(connection, &AnswerFormatError::QuestionNotAsked);
                return Dispatch::Replied;
            }
            Dispatch::Deferred(UpstreamRequest::Answer(identity, submission))
        }
        _ => {
            ctx.reply_error(connection, &ProtocolError::InvalidCommand);
            Dispatch::Replied
        }
    }
}

/// Applies the result of a deferred request to a connection that is still
/// live. An upstream failure is handed back so the caller closes it.
pub fn complete(
    ctx: &mut ServerContext,
    connection: ConnectionId,
    result: Result<Response, HandlerError>,
) -> Result<(), UpstreamError> {
    match result {
        Ok(Response::Authenticated(identity)) => {
            // Another connection may have logged in as the same user while
            // the credentials were being checked.
            if ctx.sessions.is_logged_in(&identity.username) {
                ctx.reply_error(connection, &AuthError::AlreadyLoggedIn);
            } else if ctx.sessions.authenticate(connection, identity).is_err() {
                ctx.reply_error(connection, &ProtocolError::InvalidCommand);
            } else {
                ctx.reply(connection, Frame::empty(Command::LoginOk));
            }
        }
        Ok(Response::Reply(frame)) => ctx.reply(connection, frame),
        Ok(Response::Question { question_id, frame }) => {
            ctx.sessions.serve_question(connection, question_id);
            ctx.reply(connection, frame);
        }
        Err(HandlerError::Upstream(err)) => return Err(err),
        Err(err) => ctx.reply_error(connection, &err),
    }
    Ok(())
}
