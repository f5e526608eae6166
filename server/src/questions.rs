//! Trivia questions: loading them once at startup and serving them read-only.

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Deserialize;
use shared::{answer_digest, join_subfields, DATA_DELIMITER, DELIMITER};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_QUESTIONS_URL: &str = "https://opentdb.com/api.php";
pub const INCORRECT_ANSWER_COUNT: usize = 3;

/// Hex digits of the text digest kept as a question id.
const QUESTION_ID_LENGTH: usize = 16;

/// One question as delivered by the source, still HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawQuestion {
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenTdbResponse {
    response_code: u32,
    results: Vec<RawQuestion>,
}

/// Question files may hold either a saved API response or a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionFile {
    Response(OpenTdbResponse),
    List(Vec<RawQuestion>),
}

#[derive(Debug, Error)]
pub enum QuestionSourceError {
    #[error("question request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not read question file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid question data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("question API answered with response code {0}")]
    Api(u32),
}

/// Where the pool is fetched from at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionSource {
    OpenTdb { url: String, amount: u32 },
    File(PathBuf),
}

impl QuestionSource {
    pub async fn fetch(&self) -> Result<Vec<RawQuestion>, QuestionSourceError> {
        match self {
            QuestionSource::OpenTdb { url, amount } => {
                info!("Fetching {} questions from {}", amount, url);
                let request = format!("{}?amount={}&type=multiple", url, amount);
                let response: OpenTdbResponse = reqwest::get(request)
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;

                if response.response_code != 0 {
                    return Err(QuestionSourceError::Api(response.response_code));
                }
                Ok(response.results)
            }
            QuestionSource::File(path) => {
                info!("Loading questions from {}", path.display());
                let contents = tokio::fs::read_to_string(path).await?;
                parse_question_file(&contents)
            }
        }
    }
}

fn parse_question_file(contents: &str) -> Result<Vec<RawQuestion>, QuestionSourceError> {
    let file: QuestionFile = serde_json::from_str(contents)?;
    match file {
        QuestionFile::Response(response) if response.response_code != 0 => {
            Err(QuestionSourceError::Api(response.response_code))
        }
        QuestionFile::Response(response) => Ok(response.results),
        QuestionFile::List(questions) => Ok(questions),
    }
}

/// Id of a question, derived from its text.
pub fn question_id(text: &str) -> String {
    answer_digest(text)[..QUESTION_ID_LENGTH].to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        correct_answer: impl Into<String>,
        incorrect_answers: Vec<String>,
    ) -> Self {
        let text = text.into();
        Self {
            id: question_id(&text),
            text,
            correct_answer: correct_answer.into(),
            incorrect_answers,
        }
    }

    /// All four answers in a fresh random order.
    pub fn shuffled_choices<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<String> {
        let mut choices = self.incorrect_answers.clone();
        choices.push(self.correct_answer.clone());
        choices.shuffle(rng);
        choices
    }

    /// `id#text#choice#choice#choice#choice`
    pub fn to_payload<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let mut fields = vec![self.id.clone(), self.text.clone()];
        fields.extend(self.shuffled_choices(rng));
        join_subfields(&fields)
    }

    pub fn matches_digest(&self, digest: &str) -> bool {
        answer_digest(&self.correct_answer).eq_ignore_ascii_case(digest)
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.incorrect_answers.len() != INCORRECT_ANSWER_COUNT {
            return Err("does not have exactly three incorrect answers");
        }
        let fields = std::iter::once(&self.text)
            .chain(std::iter::once(&self.correct_answer))
            .chain(self.incorrect_answers.iter());
        for field in fields {
            if field.trim().is_empty() {
                return Err("has an empty field");
            }
            if field.contains(DELIMITER) || field.contains(DATA_DELIMITER) {
                return Err("contains a protocol delimiter");
            }
        }
        Ok(())
    }
}

impl From<RawQuestion> for Question {
    fn from(raw: RawQuestion) -> Self {
        Question::new(
            unescape_html(&raw.question),
            unescape_html(&raw.correct_answer),
            raw.incorrect_answers
                .iter()
                .map(|answer| unescape_html(answer))
                .collect(),
        )
    }
}

/// Immutable set of servable questions with unique ids.
#[derive(Debug, Default)]
pub struct QuestionPool {
    questions: Vec<Question>,
    index: HashMap<String, usize>,
}

impl QuestionPool {
    pub fn from_raw(raw: Vec<RawQuestion>) -> Self {
        Self::from_questions(raw.into_iter().map(Question::from).collect())
    }

    /// Builds the pool, skipping questions that cannot be carried by the
    /// protocol and any whose id is already taken.
    pub fn from_questions(questions: Vec<Question>) -> Self {
        let mut pool = Self::default();
        for question in questions {
            if let Err(reason) = question.validate() {
                warn!("Skipping question {:?}: {}", question.text, reason);
                continue;
            }
            if pool.index.contains_key(&question.id) {
                warn!("Skipping duplicate question {:?}", question.text);
                continue;
            }
            pool.index.insert(question.id.clone(), pool.questions.len());
            pool.questions.push(question);
        }
        pool
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.index.get(id).map(|&position| &self.questions[position])
    }

    /// Uniformly picks a question whose id is not in `asked`.
    pub fn pick_unasked<R: Rng + ?Sized>(
        &self,
        asked: &BTreeSet<String>,
        rng: &mut R,
    ) -> Option<&Question> {
        let candidates: Vec<&Question> = self
            .questions
            .iter()
            .filter(|question| !asked.contains(&question.id))
            .collect();
        candidates.choose(rng).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Decodes the HTML entities the question API escapes its text with,
/// including legacy ones written without a trailing `;`.
pub fn unescape_html(input: &str) -> String {
    htmlize::unescape(input).into_owned()
}
