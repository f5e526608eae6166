//! Wire protocol shared by the trivia server and its clients.
//!
//! Every message is a single text frame with a fixed-width header:
//!
//! ```text
//! <command, space-padded to 16>|<length, 4 digits>|<payload>
//! ```
//!
//! Payloads carrying several values separate them with `#`.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const CMD_FIELD_LENGTH: usize = 16;
pub const LENGTH_FIELD_LENGTH: usize = 4;
pub const MAX_DATA_LENGTH: usize = 9999;
pub const MSG_HEADER_LENGTH: usize = CMD_FIELD_LENGTH + 1 + LENGTH_FIELD_LENGTH + 1;
pub const MAX_MSG_LENGTH: usize = MSG_HEADER_LENGTH + MAX_DATA_LENGTH;
pub const DELIMITER: char = '|';
pub const DATA_DELIMITER: char = '#';
/// Width of a hex-encoded SHA-256 answer digest.
pub const DIGEST_HEX_LENGTH: usize = 64;

/// Every verb the protocol knows, client and server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Login,
    Signup,
    Logout,
    MyScore,
    Highscore,
    GetQuestion,
    SendAnswer,
    Logged,

    LoginOk,
    SignUpOk,
    YourScore,
    AllScore,
    YourQuestion,
    CorrectAnswer,
    WrongAnswer,
    LoggedAnswer,
    FinishedAnswer,
    Error,
}

impl Command {
    pub const CLIENT: [Command; 8] = [
        Command::Login,
        Command::Signup,
        Command::Logout,
        Command::MyScore,
        Command::Highscore,
        Command::GetQuestion,
        Command::SendAnswer,
        Command::Logged,
    ];

    pub const SERVER: [Command; 10] = [
        Command::LoginOk,
        Command::SignUpOk,
        Command::YourScore,
        Command::AllScore,
        Command::YourQuestion,
        Command::CorrectAnswer,
        Command::WrongAnswer,
        Command::LoggedAnswer,
        Command::FinishedAnswer,
        Command::Error,
    ];

    /// The verb as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Login => "LOGIN",
            Command::Signup => "SIGNUP",
            Command::Logout => "LOGOUT",
            Command::MyScore => "MY_SCORE",
            Command::Highscore => "HIGHSCORE",
            Command::GetQuestion => "GET_QUESTION",
            Command::SendAnswer => "SEND_ANSWER",
            Command::Logged => "LOGGED",
            Command::LoginOk => "LOGIN_OK",
            Command::SignUpOk => "SIGN_UP_OK",
            Command::YourScore => "YOUR_SCORE",
            Command::AllScore => "ALL_SCORE",
            Command::YourQuestion => "YOUR_QUESTION",
            Command::CorrectAnswer => "CORRECT_ANSWER",
            Command::WrongAnswer => "WRONG_ANSWER",
            Command::LoggedAnswer => "LOGGED_ANSWER",
            Command::FinishedAnswer => "FINISHED_ANSWER",
            Command::Error => "ERROR",
        }
    }

    /// Whether clients may send this verb; servers send the rest.
    pub fn is_client_command(&self) -> bool {
        Self::CLIENT.contains(self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = FrameFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CLIENT
            .iter()
            .chain(Self::SERVER.iter())
            .find(|command| command.as_str() == s)
            .copied()
            .ok_or(FrameFormatError)
    }
}

/// Single failure value for anything that is not a well-formed frame.
///
/// Callers cannot tell which check failed; that distinction is deliberately
/// not made at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("malformed protocol frame")]
pub struct FrameFormatError;

/// A payload did not contain the expected number of `#` delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} sub-field delimiters, found {found}")]
pub struct ArityError {
    pub expected: usize,
    pub found: usize,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: String,
}

impl Frame {
    pub fn new(command: Command, payload: impl Into<String>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// A frame whose payload is empty, e.g. `LOGIN_OK`.
    pub fn empty(command: Command) -> Self {
        Self::new(command, String::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameFormatError> {
        encode_frame(self.command.as_str(), &self.payload)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameFormatError> {
        let (command, payload) = decode_frame(bytes)?;
        Ok(Self { command, payload })
    }
}

/// Builds the wire form of a message.
///
/// Fails if `command` is not a protocol verb, if the payload is longer than
/// [`MAX_DATA_LENGTH`] bytes, or if the payload contains the frame delimiter
/// (such a frame could never be decoded again).
pub fn encode_frame(command: &str, payload: &str) -> Result<Vec<u8>, FrameFormatError> {
    if command.len() > CMD_FIELD_LENGTH {
        return Err(FrameFormatError);
    }
    command.parse::<Command>()?;

    if payload.len() > MAX_DATA_LENGTH || payload.contains(DELIMITER) {
        return Err(FrameFormatError);
    }

    let message = format!(
        "{:<cmd_width$}{}{:0len_width$}{}{}",
        command,
        DELIMITER,
        payload.len(),
        DELIMITER,
        payload,
        cmd_width = CMD_FIELD_LENGTH,
        len_width = LENGTH_FIELD_LENGTH,
    );
    Ok(message.into_bytes())
}

/// Parses one complete frame out of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<(Command, String), FrameFormatError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FrameFormatError)?;
    let parts: Vec<&str> = text.split(DELIMITER).collect();
    let [command, length, payload] = parts.as_slice() else {
        return Err(FrameFormatError);
    };

    if length.len() != LENGTH_FIELD_LENGTH || !length.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameFormatError);
    }
    let declared: usize = length.parse().map_err(|_| FrameFormatError)?;

    let command: Command = command.trim().parse()?;

    if payload.len() != declared {
        return Err(FrameFormatError);
    }

    Ok((command, (*payload).to_owned()))
}

/// Splits a payload into its `#`-separated fields, requiring exactly
/// `expected_delimiters` separators.
pub fn split_subfields(
    payload: &str,
    expected_delimiters: usize,
) -> Result<Vec<String>, ArityError> {
    let fields: Vec<String> = payload.split(DATA_DELIMITER).map(str::to_owned).collect();
    let found = fields.len() - 1;
    if found != expected_delimiters {
        return Err(ArityError {
            expected: expected_delimiters,
            found,
        });
    }
    Ok(fields)
}

pub fn join_subfields<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(&DATA_DELIMITER.to_string())
}

/// Hex-encoded SHA-256 of an answer's text.
///
/// Clients submit this instead of the answer itself; the server compares it
/// against the digest of the correct answer.
pub fn answer_digest(answer: &str) -> String {
    hex::encode(Sha256::digest(answer.as_bytes()))
}
