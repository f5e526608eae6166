//! # Trivia Server Library
//!
//! This library provides the server side of the multiplayer trivia game. It
//! accepts many TCP clients at once, authenticates them against a user store,
//! serves questions from a pool loaded at startup and keeps every user's score.
//!
//! ## Core Responsibilities
//!
//! ### Connection Multiplexing
//! A single event loop owns every connection. Each iteration waits until the
//! listener, a connection or the worker pool becomes ready, and then:
//! - Accepts new connections, up to a configured limit
//! - Reads and decodes exactly one frame per readable connection
//! - Applies results coming back from the worker pool
//! - Flushes queued replies to writable connections
//!
//! ### Sessions
//! A connection starts unauthenticated and may only `LOGIN` or `SIGNUP`. A
//! successful login binds a session to it; a username holds at most one
//! session across all connections. Closing the connection ends the session.
//!
//! ### Game Rules
//! Users are served questions they have not seen before, up to a quota.
//! Answers arrive as a SHA-256 digest of the chosen text; a correct answer
//! adds a fixed reward to the score, a wrong one reveals the correct answer.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! Sessions, outbound queues and connections are only touched by the loop, so
//! they need no locking. Teardown of a connection removes all three in one
//! step, before anything else can observe a half-closed connection.
//!
//! ### Worker Pool
//! User-store calls may block. They run on a bounded pool of blocking tasks
//! and post a completion back to the loop. A connection with a request in
//! flight is not read from until its completion has been applied, which keeps
//! replies in request order.
//!
//! ## Module Organization
//!
//! ### Connection Manager Module (`connection_manager`)
//! Connection ids, capacity and per-connection loop state.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Routes decoded frames by connection phase and applies completions.
//!
//! ### Game Module (`game`)
//! Login, signup, scores, highscores, question selection and answer checking.
//!
//! ### Network Module (`network`)
//! The event loop itself.
//!
//! ### Questions, Session, Store, Outbound and Worker Modules
//! The question pool and its sources, the session registry, the user store
//! trait with its in-memory and JSON-file implementations, per-connection
//! reply queues and the upstream worker pool.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::{GameController, GameRules};
//! use server::network::{Server, ServerOptions};
//! use server::questions::{QuestionPool, QuestionSource};
//! use server::store::MemoryUserStore;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let questions = QuestionSource::File(PathBuf::from("questions.json"))
//!         .fetch()
//!         .await?;
//!     let controller = GameController::new(
//!         Arc::new(MemoryUserStore::new()),
//!         Arc::new(QuestionPool::from_raw(questions)),
//!         GameRules::default(),
//!     );
//!
//!     let mut server =
//!         Server::bind("127.0.0.1:5678", controller, ServerOptions::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_manager;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod network;
pub mod outbound;
pub mod questions;
pub mod session;
pub mod store;
pub mod worker;
