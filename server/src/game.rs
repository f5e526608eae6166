//! Game rules and the request handlers that run against the user store.
//!
//! Everything here is synchronous. Handlers that touch the store are reached
//! through [`GameController::execute`] on the worker pool; the event loop only
//! calls [`get_logged_users`] directly.

use crate::error::{AnswerFormatError, AuthError, HandlerError, ProtocolError};
use crate::questions::QuestionPool;
use crate::session::{SessionRegistry, UserIdentity};
use crate::store::{FieldUpdate, StoreError, UserRecord, UserStore};
use log::{debug, info};
use rand::Rng;
use shared::{split_subfields, Command, Frame, DIGEST_HEX_LENGTH};
use std::fmt::Write;
use std::sync::Arc;

pub const DEFAULT_QUESTION_QUOTA: usize = 500;
/// Points added to the score for each correct answer.
pub const DEFAULT_CORRECT_REWARD: u32 = 5;
/// Rows listed under the caller's rank in `ALL_SCORE`.
pub const HIGHSCORE_TABLE_SIZE: usize = 50;
pub const MAX_USERNAME_LENGTH: usize = 32;

/// Tunables of a game, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    /// Distinct questions a user may be served before the game is finished.
    pub question_quota: usize,
    /// Points added per correct answer.
    pub correct_reward: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            question_quota: DEFAULT_QUESTION_QUOTA,
            correct_reward: DEFAULT_CORRECT_REWARD,
        }
    }
}

/// `username#password` as sent with `LOGIN` and `SIGNUP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Splits `payload` into exactly two non-empty fields. Usernames must fit
    /// in [`MAX_USERNAME_LENGTH`] bytes and may not contain `,`, which
    /// separates names in `LOGGED_ANSWER`. `command` names the request in the
    /// resulting error.
    pub fn parse(payload: &str, command: &'static str) -> Result<Self, ProtocolError> {
        let fields =
            split_subfields(payload, 1).map_err(|_| ProtocolError::MalformedPayload(command))?;
        let [username, password] = <[String; 2]>::try_from(fields)
            .map_err(|_| ProtocolError::MalformedPayload(command))?;

        let valid_username = !username.is_empty()
            && username.len() <= MAX_USERNAME_LENGTH
            && !username.contains(',');
        if !valid_username || password.is_empty() {
            return Err(ProtocolError::MalformedPayload(command));
        }

        Ok(Self { username, password })
    }
}

/// `question_id#answer_digest` as sent with `SEND_ANSWER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSubmission {
    pub question_id: String,
    pub digest: String,
}

impl AnswerSubmission {
    /// Requires exactly two fields, the second a hex SHA-256 digest.
    pub fn parse(payload: &str) -> Result<Self, AnswerFormatError> {
        let fields = split_subfields(payload, 1).map_err(|_| AnswerFormatError::MalformedAnswer)?;
        let [question_id, digest] =
            <[String; 2]>::try_from(fields).map_err(|_| AnswerFormatError::MalformedAnswer)?;

        if digest.len() != DIGEST_HEX_LENGTH {
            return Err(AnswerFormatError::InvalidDigestWidth);
        }
        Ok(Self {
            question_id,
            digest,
        })
    }
}

/// Work that has to go through the user store, run off the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamRequest {
    Login(Credentials),
    Signup(Credentials),
    Score(UserIdentity),
    Highscore(UserIdentity),
    Question(UserIdentity),
    Answer(UserIdentity, AnswerSubmission),
}

/// Result of an upstream request, applied back on the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Credentials checked out; the loop still has to register the session.
    Authenticated(UserIdentity),
    /// Frame to send back as is.
    Reply(Frame),
    /// A question was served and recorded in the user's history.
    Question { question_id: String, frame: Frame },
}

/// Question selection, answer checking and scoring against the user store.
#[derive(Clone)]
pub struct GameController {
    store: Arc<dyn UserStore>,
    pool: Arc<QuestionPool>,
    rules: GameRules,
}

impl GameController {
    pub fn new(store: Arc<dyn UserStore>, pool: Arc<QuestionPool>, rules: GameRules) -> Self {
        Self { store, pool, rules }
    }

    /// The questions this controller serves from.
    pub fn pool(&self) -> &QuestionPool {
        &self.pool
    }

    /// Runs one upstream request to completion. Blocks on the store.
    pub fn execute(&self, request: UpstreamRequest) -> Result<Response, HandlerError> {
        match request {
            UpstreamRequest::Login(credentials) => {
                self.login(&credentials).map(Response::Authenticated)
            }
            UpstreamRequest::Signup(credentials) => self.signup(&credentials).map(Response::Reply),
            UpstreamRequest::Score(identity) => self.get_score(&identity).map(Response::Reply),
            UpstreamRequest::Highscore(identity) => {
                self.get_highscore(&identity).map(Response::Reply)
            }
            UpstreamRequest::Question(identity) => self.get_question(&identity),
            UpstreamRequest::Answer(identity, submission) => self
                .submit_answer(&identity, &submission)
                .map(Response::Reply),
        }
    }

    /// Checks `credentials` against the stored user. Does not register a
    /// session.
    pub fn login(&self, credentials: &Credentials) -> Result<UserIdentity, HandlerError> {
        let user = self
            .store
            .find_by_username(&credentials.username)?
            .ok_or(AuthError::UserNotFound)?;

        if user.password != credentials.password {
            return Err(AuthError::WrongPassword.into());
        }

        Ok(UserIdentity {
            user_id: user.id,
            username: user.username,
        })
    }

    /// Creates a user with a zero score, replying `SIGN_UP_OK`.
    pub fn signup(&self, credentials: &Credentials) -> Result<Frame, HandlerError> {
        if self.store.find_by_username(&credentials.username)?.is_some() {
            return Err(AuthError::UsernameTaken.into());
        }

        match self.store.create(&credentials.username, &credentials.password) {
            Ok(user) => {
                info!("Registered user {} as {}", user.username, user.id);
                Ok(Frame::empty(Command::SignUpOk))
            }
            Err(StoreError::DuplicateUsername(_)) => Err(AuthError::UsernameTaken.into()),
            Err(err) => Err(err.into()),
        }
    }

    /// `YOUR_SCORE` with the stored score in decimal.
    pub fn get_score(&self, identity: &UserIdentity) -> Result<Frame, HandlerError> {
        let user = self.load_user(identity)?;
        Ok(Frame::new(Command::YourScore, user.score.to_string()))
    }

    /// The caller's rank in the full ranking followed by the top entries.
    pub fn get_highscore(&self, identity: &UserIdentity) -> Result<Frame, HandlerError> {
        let ranked = self.store.top_n_by_score(usize::MAX)?;
        let rank = ranked
            .iter()
            .position(|user| user.id == identity.user_id)
            .ok_or_else(|| StoreError::MissingUser(identity.user_id.clone()))?
            + 1;

        let mut table = format!("Your current rank: {}\n\n", rank);
        for (position, user) in ranked.iter().take(HIGHSCORE_TABLE_SIZE).enumerate() {
            let _ = writeln!(table, "{}. {}: {}", position + 1, user.username, user.score);
        }
        Ok(Frame::new(Command::AllScore, table))
    }

    /// [`get_question_with`](Self::get_question_with) using the thread RNG.
    pub fn get_question(&self, identity: &UserIdentity) -> Result<Response, HandlerError> {
        self.get_question_with(identity, &mut rand::thread_rng())
    }

    /// Serves a question the user has not seen yet and records it in their
    /// history. Once the quota is reached, or the pool has nothing new left,
    /// only `FINISHED_ANSWER` is sent.
    pub fn get_question_with<R: Rng + ?Sized>(
        &self,
        identity: &UserIdentity,
        rng: &mut R,
    ) -> Result<Response, HandlerError> {
        let user = self.load_user(identity)?;
        let finished = Response::Reply(Frame::empty(Command::FinishedAnswer));

        if user.asked_question_ids.len() >= self.rules.question_quota {
            debug!("{} reached the question quota", identity.username);
            return Ok(finished);
        }

        let Some(question) = self.pool.pick_unasked(&user.asked_question_ids, rng) else {
            debug!("{} has seen every question in the pool", identity.username);
            return Ok(finished);
        };

        let mut asked = user.asked_question_ids;
        asked.insert(question.id.clone());
        self.store
            .update_field(&identity.user_id, FieldUpdate::AskedQuestions(asked))?;

        Ok(Response::Question {
            question_id: question.id.clone(),
            frame: Frame::new(Command::YourQuestion, question.to_payload(rng)),
        })
    }

    /// Checks the submitted digest against the question's correct answer.
    /// A match adds [`GameRules::correct_reward`] to the score in a single
    /// store write; a miss replies `WRONG_ANSWER` with the correct answer.
    pub fn submit_answer(
        &self,
        identity: &UserIdentity,
        submission: &AnswerSubmission,
    ) -> Result<Frame, HandlerError> {
        let question = self
            .pool
            .get(&submission.question_id)
            .ok_or(AnswerFormatError::UnknownQuestion)?;

        if !question.matches_digest(&submission.digest) {
            return Ok(Frame::new(
                Command::WrongAnswer,
                question.correct_answer.clone(),
            ));
        }

        self.store.update_field(
            &identity.user_id,
            FieldUpdate::AddScore(self.rules.correct_reward),
        )?;
        debug!(
            "{} answered {} correctly, +{}",
            identity.username, question.id, self.rules.correct_reward
        );

        Ok(Frame::empty(Command::CorrectAnswer))
    }

    fn load_user(&self, identity: &UserIdentity) -> Result<UserRecord, HandlerError> {
        self.store
            .find_by_id(&identity.user_id)?
            .ok_or_else(|| StoreError::MissingUser(identity.user_id.clone()).into())
    }
}

/// Names of everyone currently logged in, comma separated.
pub fn get_logged_users(sessions: &SessionRegistry) -> Frame {
    Frame::new(Command::LoggedAnswer, sessions.usernames().join(","))
}
