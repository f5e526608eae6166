use clap::Parser;
use log::{info, warn};
use server::config::ServerArgs;
use server::game::GameController;
use server::network::Server;
use server::questions::QuestionPool;
use server::store::{JsonFileUserStore, MemoryUserStore, UserStore};
use std::sync::Arc;

/// Parses the command line, loads the question pool and the user store, then
/// runs the server until Ctrl+C.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ServerArgs::parse();

    // The event loop is single-threaded; upstream work runs on blocking tasks.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args))
}

async fn serve(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let pool = QuestionPool::from_raw(args.question_source().fetch().await?);
    if pool.is_empty() {
        return Err("no usable questions were loaded".into());
    }
    info!("Question pool holds {} questions", pool.len());

    let store: Arc<dyn UserStore> = match &args.users_file {
        Some(path) => Arc::new(JsonFileUserStore::open(path)?),
        None => {
            warn!("No users file given, users are kept in memory only");
            Arc::new(MemoryUserStore::new())
        }
    };

    let controller = GameController::new(store, Arc::new(pool), args.rules());
    let mut server = Server::bind(args.address(), controller, args.options()).await?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
