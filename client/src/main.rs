use clap::{Parser, Subcommand};
use client::network::{AnswerOutcome, ClientError, TriviaClient};
use log::info;
use rand::seq::SliceRandom;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5678")]
    server: String,

    #[arg(short = 'u', long)]
    username: String,

    #[arg(short = 'p', long)]
    password: String,

    /// Register the user before logging in
    #[arg(long)]
    signup: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Answer questions at random
    Play {
        #[arg(short = 'r', long, default_value = "10")]
        rounds: u32,
    },
    /// Print your score
    Score,
    /// Print the highscore table
    Highscore,
    /// List logged in users
    Logged,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Connecting to: {}", args.server);

    let mut client = TriviaClient::connect(&args.server).await?;
    if args.signup {
        client.signup(&args.username, &args.password).await?;
        info!("Signed up as {}", args.username);
    }
    client.login(&args.username, &args.password).await?;

    match args.action {
        Action::Play { rounds } => play(&mut client, rounds).await?,
        Action::Score => println!("Your score: {}", client.score().await?),
        Action::Highscore => println!("{}", client.highscore().await?),
        Action::Logged => println!("Logged in: {}", client.logged_users().await?.join(", ")),
    }

    client.logout().await?;
    Ok(())
}

async fn play(client: &mut TriviaClient, rounds: u32) -> Result<(), ClientError> {
    for round in 1..=rounds {
        let Some(question) = client.next_question().await? else {
            println!("No more questions for you");
            break;
        };

        let choice = question
            .choices
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        println!("{}. {}", round, question.text);
        println!("   answering: {}", choice);

        match client.answer(&question.id, &choice).await? {
            AnswerOutcome::Correct => println!("   correct!"),
            AnswerOutcome::Wrong { correct_answer } => {
                println!("   wrong, the answer was {}", correct_answer)
            }
        }
    }

    println!("Your score: {}", client.score().await?);
    Ok(())
}
