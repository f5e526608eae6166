//! # Trivia Client Library
//!
//! This library provides a client for the trivia game protocol. It wraps a
//! single TCP connection and exposes one async method per server request.
//!
//! ## Protocol Usage
//!
//! The server answers every request with exactly one frame, except `LOGOUT`,
//! which it answers by closing the connection. [`network::TriviaClient`]
//! therefore sends a request and reads its reply before doing anything else,
//! and never pipelines requests on one connection.
//!
//! ### Answers
//! Answers are never sent in plain text. The client submits the SHA-256 digest
//! of the chosen answer; a wrong answer is met with the correct one.
//!
//! ### Errors
//! An `ERROR` reply is surfaced as [`network::ClientError::Server`] carrying
//! the server's message. The connection stays usable afterwards.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{AnswerOutcome, TriviaClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = TriviaClient::connect("127.0.0.1:5678").await?;
//!     client.login("alice", "secret").await?;
//!
//!     while let Some(question) = client.next_question().await? {
//!         println!("{}", question.text);
//!         match client.answer(&question.id, &question.choices[0]).await? {
//!             AnswerOutcome::Correct => println!("Correct!"),
//!             AnswerOutcome::Wrong { correct_answer } => {
//!                 println!("Wrong, it was {}", correct_answer)
//!             }
//!         }
//!     }
//!
//!     println!("Final score: {}", client.score().await?);
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
