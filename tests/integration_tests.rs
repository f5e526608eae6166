//! Integration tests for the trivia server and client
//!
//! These tests run a real server on a loopback listener and talk to it through
//! the client library or raw sockets.

use client::network::{AnswerOutcome, ClientError, TriviaClient};
use server::game::{GameController, GameRules};
use server::network::{Server, ServerOptions};
use server::questions::{Question, QuestionPool};
use server::store::MemoryUserStore;
use shared::{Command, Frame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

const QUESTIONS: [(&str, &str, [&str; 3]); 3] = [
    ("Largest planet?", "Jupiter", ["Mars", "Venus", "Earth"]),
    ("Smallest prime?", "2", ["1", "3", "5"]),
    ("Capital of France?", "Paris", ["Rome", "Madrid", "Berlin"]),
];

async fn start_server(rules: GameRules, options: ServerOptions) -> SocketAddr {
    let pool = QuestionPool::from_questions(
        QUESTIONS
            .iter()
            .map(|(text, correct, wrong)| {
                Question::new(*text, *correct, wrong.iter().map(|w| w.to_string()).collect())
            })
            .collect(),
    );
    let controller = GameController::new(Arc::new(MemoryUserStore::new()), Arc::new(pool), rules);

    let mut server = Server::bind("127.0.0.1:0", controller, options)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

async fn default_server() -> SocketAddr {
    start_server(GameRules::default(), ServerOptions::default()).await
}

fn correct_answer(text: &str) -> &'static str {
    QUESTIONS
        .iter()
        .find(|(question, _, _)| *question == text)
        .map(|(_, correct, _)| *correct)
        .unwrap()
}

async fn logged_in(addr: SocketAddr, username: &str) -> TriviaClient {
    let mut client = assert_ok!(TriviaClient::connect(addr).await);
    assert_ok!(client.signup(username, "pw").await);
    assert_ok!(client.login(username, "pw").await);
    client
}

/// Waits until the server closes `stream`, failing after a second.
async fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(1), stream.read_to_end(&mut rest)).await;
    assert!(read.is_ok(), "server did not close the connection");
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests the exact bytes of a reply to a hand-written request
    #[tokio::test]
    async fn raw_frames_on_the_wire() {
        let addr = default_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"SIGNUP          |0006|bob#pw").await.unwrap();
        let mut reply = vec![0u8; 22];
        stream.read_exact(&mut reply).await.unwrap();

        assert_eq!(reply, b"SIGN_UP_OK      |0000|");
    }

    /// Tests that an undecodable frame closes the connection without a reply
    #[tokio::test]
    async fn malformed_frame_disconnects() {
        let addr = default_server().await;

        for garbage in [
            &b"hello there"[..],
            b"LOGIN           |0010|bob#pw",
            b"NOT_A_COMMAND   |0000|",
            b"LOGIN           |06|bob#pw",
        ] {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(garbage).await.unwrap();

            let mut rest = Vec::new();
            timeout(Duration::from_secs(1), stream.read_to_end(&mut rest))
                .await
                .expect("server did not close the connection")
                .unwrap();
            assert!(rest.is_empty());
        }
    }

    /// Tests that a server-side verb sent by a client is rejected but tolerated
    #[tokio::test]
    async fn server_verb_from_client_is_invalid() {
        let addr = default_server().await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        let err = assert_err!(client.request(Command::LoginOk, "").await);
        assert!(matches!(err, ClientError::Server(message) if message == "invalid command"));

        assert_ok!(client.signup("alice", "pw").await);
    }
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Tests that only LOGIN and SIGNUP are served before authentication
    #[tokio::test]
    async fn commands_require_login() {
        let addr = default_server().await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        for command in [
            Command::MyScore,
            Command::Highscore,
            Command::GetQuestion,
            Command::Logged,
        ] {
            let err = assert_err!(client.request(command, "").await);
            assert!(matches!(err, ClientError::Server(message) if message == "invalid command"));
        }

        assert_ok!(client.signup("alice", "pw").await);
        let err = assert_err!(client.score().await);
        assert!(matches!(err, ClientError::Server(_)));

        assert_ok!(client.login("alice", "pw").await);
        assert_eq!(assert_ok!(client.score().await), 0);
    }

    /// Tests login failures reported as errors
    #[tokio::test]
    async fn login_failures() {
        let addr = default_server().await;
        let mut client = TriviaClient::connect(addr).await.unwrap();

        let err = assert_err!(client.login("ghost", "pw").await);
        assert!(matches!(err, ClientError::Server(message) if message == "user not found"));

        assert_ok!(client.signup("alice", "pw").await);
        let err = assert_err!(client.login("alice", "nope").await);
        assert!(matches!(err, ClientError::Server(message) if message == "wrong password"));

        let err = assert_err!(client.signup("alice", "other").await);
        assert!(matches!(err, ClientError::Server(message) if message == "username is taken"));
    }

    /// Tests that a user holds at most one session across connections
    #[tokio::test]
    async fn one_session_per_user() {
        let addr = default_server().await;
        let first = logged_in(addr, "alice").await;

        let mut second = TriviaClient::connect(addr).await.unwrap();
        let err = assert_err!(second.login("alice", "pw").await);
        assert!(matches!(err, ClientError::Server(message) if message == "user already logged in"));

        // Logout completes once the server has closed the connection, which is
        // also when the session is gone.
        assert_ok!(first.logout().await);
        assert_ok!(second.login("alice", "pw").await);
    }

    /// Tests that dropping a connection ends its session
    #[tokio::test]
    async fn disconnect_revokes_session() {
        let addr = default_server().await;
        let first = logged_in(addr, "alice").await;
        drop(first);

        let mut second = TriviaClient::connect(addr).await.unwrap();
        let mut succeeded = false;
        for _ in 0..50 {
            if second.login("alice", "pw").await.is_ok() {
                succeeded = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(succeeded);
    }

    /// Tests the list of logged in users
    #[tokio::test]
    async fn logged_users_follow_sessions() {
        let addr = default_server().await;
        let mut alice = logged_in(addr, "alice").await;
        let bob = logged_in(addr, "bob").await;

        assert_eq!(
            assert_ok!(alice.logged_users().await),
            vec!["alice", "bob"]
        );

        assert_ok!(bob.logout().await);
        assert_eq!(assert_ok!(alice.logged_users().await), vec!["alice"]);
    }

    /// Tests that connections beyond the limit are closed
    #[tokio::test]
    async fn connection_limit() {
        let options = ServerOptions {
            max_connections: 1,
            ..ServerOptions::default()
        };
        let addr = start_server(GameRules::default(), options).await;

        let mut first = TriviaClient::connect(addr).await.unwrap();
        assert_ok!(first.signup("alice", "pw").await);

        let mut second = TcpStream::connect(addr).await.unwrap();
        assert_closed(&mut second).await;

        assert_ok!(first.login("alice", "pw").await);
    }
}

/// GAMEPLAY TESTS
mod game_tests {
    use super::*;

    /// Tests a full game: every question once, correct answers scored
    #[tokio::test]
    async fn play_until_finished() {
        let addr = default_server().await;
        let mut client = logged_in(addr, "alice").await;

        let mut seen = Vec::new();
        while let Some(question) = assert_ok!(client.next_question().await) {
            assert_eq!(question.choices.len(), 4);
            assert!(question.choices.iter().any(|c| c == correct_answer(&question.text)));
            assert!(!seen.contains(&question.id));

            let outcome =
                assert_ok!(client.answer(&question.id, correct_answer(&question.text)).await);
            assert_eq!(outcome, AnswerOutcome::Correct);
            seen.push(question.id);
        }

        assert_eq!(seen.len(), QUESTIONS.len());
        assert_eq!(assert_ok!(client.score().await), 15);
    }

    /// Tests that a wrong answer reveals the correct one and scores nothing
    #[tokio::test]
    async fn wrong_answer() {
        let addr = default_server().await;
        let mut client = logged_in(addr, "alice").await;

        let question = assert_ok!(client.next_question().await).unwrap();
        let outcome = assert_ok!(client.answer(&question.id, "not an option").await);

        assert_eq!(
            outcome,
            AnswerOutcome::Wrong {
                correct_answer: correct_answer(&question.text).to_string()
            }
        );
        assert_eq!(assert_ok!(client.score().await), 0);
    }

    /// Tests that a question can be answered only once
    #[tokio::test]
    async fn answers_cannot_be_repeated() {
        let addr = default_server().await;
        let mut client = logged_in(addr, "alice").await;

        let question = assert_ok!(client.next_question().await).unwrap();
        let answer = correct_answer(&question.text);
        assert_ok!(client.answer(&question.id, answer).await);

        let err = assert_err!(client.answer(&question.id, answer).await);
        assert!(matches!(err, ClientError::Server(message) if message == "question was not asked"));
        assert_eq!(assert_ok!(client.score().await), 5);
    }

    /// Tests that the quota ends the game early
    #[tokio::test]
    async fn quota_finishes_game() {
        let rules = GameRules {
            question_quota: 1,
            ..GameRules::default()
        };
        let addr = start_server(rules, ServerOptions::default()).await;
        let mut client = logged_in(addr, "alice").await;

        assert!(assert_ok!(client.next_question().await).is_some());
        assert!(assert_ok!(client.next_question().await).is_none());
    }

    /// Tests that question history survives a new login
    #[tokio::test]
    async fn history_persists_across_sessions() {
        let addr = default_server().await;
        let mut client = logged_in(addr, "alice").await;
        let first = assert_ok!(client.next_question().await).unwrap();
        assert_ok!(client.logout().await);

        let mut client = TriviaClient::connect(addr).await.unwrap();
        assert_ok!(client.login("alice", "pw").await);
        while let Some(question) = assert_ok!(client.next_question().await) {
            assert_ne!(question.id, first.id);
        }
    }

    /// Tests the highscore table and the caller's rank
    #[tokio::test]
    async fn highscore_ranks_players() {
        let addr = default_server().await;
        let mut alice = logged_in(addr, "alice").await;
        let mut bob = logged_in(addr, "bob").await;

        let question = assert_ok!(bob.next_question().await).unwrap();
        assert_ok!(bob.answer(&question.id, correct_answer(&question.text)).await);

        let table = assert_ok!(alice.highscore().await);
        assert_eq!(table, "Your current rank: 2\n\n1. bob: 5\n2. alice: 0\n");
        let table = assert_ok!(bob.highscore().await);
        assert!(table.starts_with("Your current rank: 1\n"));
    }

    /// Tests that replies are plain frames a raw reader can parse
    #[tokio::test]
    async fn reply_frames_decode() {
        let addr = default_server().await;
        let mut client = logged_in(addr, "alice").await;

        client.send(Command::Logged, "").await.unwrap();
        let frame = client.receive().await.unwrap();
        assert_eq!(frame, Frame::new(Command::LoggedAnswer, "alice"));
    }
}
