//! Command line configuration of the server binary.

use crate::game::{GameRules, DEFAULT_CORRECT_REWARD, DEFAULT_QUESTION_QUOTA};
use crate::network::{ServerOptions, DEFAULT_MAX_CONNECTIONS, DEFAULT_WORKERS};
use crate::questions::{QuestionSource, DEFAULT_QUESTIONS_URL};
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 5678;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct ServerArgs {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Connections kept open at the same time
    #[clap(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,
    /// Upstream requests run concurrently
    #[clap(short, long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
    /// Load questions from this JSON file instead of the question API
    #[clap(long)]
    pub questions_file: Option<PathBuf>,
    /// Questions fetched from the question API
    #[clap(long, default_value_t = 50)]
    pub question_amount: u32,
    /// Question API endpoint
    #[clap(long, default_value = DEFAULT_QUESTIONS_URL)]
    pub questions_url: String,
    /// Persist users to this JSON file; users are kept in memory otherwise
    #[clap(long)]
    pub users_file: Option<PathBuf>,
    /// Questions a user may be served in total
    #[clap(long, default_value_t = DEFAULT_QUESTION_QUOTA)]
    pub question_quota: usize,
    /// Points awarded for a correct answer
    #[clap(long, default_value_t = DEFAULT_CORRECT_REWARD)]
    pub correct_reward: u32,
}

impl ServerArgs {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rules(&self) -> GameRules {
        GameRules {
            question_quota: self.question_quota,
            correct_reward: self.correct_reward,
        }
    }

    /// A question file takes precedence over the question API.
    pub fn question_source(&self) -> QuestionSource {
        match &self.questions_file {
            Some(path) => QuestionSource::File(path.clone()),
            None => QuestionSource::OpenTdb {
                url: self.questions_url.clone(),
                amount: self.question_amount,
            },
        }
    }

    pub fn options(&self) -> ServerOptions {
        ServerOptions {
            max_connections: self.max_connections,
            workers: self.workers,
        }
    }
}
