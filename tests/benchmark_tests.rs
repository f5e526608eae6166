//! Performance benchmarks for the codec and the server under load

use client::network::{AnswerOutcome, TriviaClient};
use server::game::{GameController, GameRules};
use server::network::{Server, ServerOptions};
use server::questions::{Question, QuestionPool};
use server::store::MemoryUserStore;
use shared::{answer_digest, decode_frame, encode_frame};
use std::sync::Arc;
use std::time::Instant;

/// Benchmarks frame encoding and decoding
#[test]
fn benchmark_frame_codec() {
    let payload = "alice#".to_string() + &"x".repeat(200);
    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = encode_frame("SEND_ANSWER", &payload).unwrap();
        let _ = decode_frame(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Frame codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks answer digest computation
#[test]
fn benchmark_answer_digest() {
    let iterations = 50_000;
    let start = Instant::now();

    for i in 0..iterations {
        let digest = answer_digest(&format!("answer {}", i));
        assert_eq!(digest.len(), 64);
    }

    let duration = start.elapsed();
    println!(
        "Answer digest: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks many clients playing full games at the same time
#[tokio::test]
async fn benchmark_concurrent_games() {
    let questions: Vec<Question> = (0..20)
        .map(|i| {
            Question::new(
                format!("Question {}?", i),
                format!("right {}", i),
                vec![
                    format!("wrong {}a", i),
                    format!("wrong {}b", i),
                    format!("wrong {}c", i),
                ],
            )
        })
        .collect();
    let controller = GameController::new(
        Arc::new(MemoryUserStore::new()),
        Arc::new(QuestionPool::from_questions(questions)),
        GameRules::default(),
    );
    let mut server = Server::bind("127.0.0.1:0", controller, ServerOptions::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });

    let clients = 25;
    let start = Instant::now();

    let games: Vec<_> = (0..clients)
        .map(|i| {
            tokio::spawn(async move {
                let username = format!("player{}", i);
                let mut client = TriviaClient::connect(addr).await.unwrap();
                client.signup(&username, "pw").await.unwrap();
                client.login(&username, "pw").await.unwrap();

                let mut answered = 0;
                while let Some(question) = client.next_question().await.unwrap() {
                    let number = question
                        .text
                        .trim_start_matches("Question ")
                        .trim_end_matches('?');
                    let outcome = client
                        .answer(&question.id, &format!("right {}", number))
                        .await
                        .unwrap();
                    assert_eq!(outcome, AnswerOutcome::Correct);
                    answered += 1;
                }

                let score = client.score().await.unwrap();
                client.logout().await.unwrap();
                (answered, score)
            })
        })
        .collect();

    for game in games {
        let (answered, score) = game.await.unwrap();
        assert_eq!(answered, 20);
        assert_eq!(score, 100);
    }

    let duration = start.elapsed();
    println!(
        "Concurrent games: {} clients x 20 questions in {:?}",
        clients, duration
    );

    // Should complete in under 10 seconds
    assert!(duration.as_secs() < 10);
}
