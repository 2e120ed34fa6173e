use std::process::ExitCode;
use std::sync::Arc;

use lean_repl_host::config::Config;
use lean_repl_host::http::AppHandler;
use lean_repl_host::orchestrator;
use lean_repl_host::pool::Pool;
use maker_web::Server;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(addr = %config.bind_addr, "lean-repl-host starting");

    let pool = Arc::new(Pool::new(
        config.max_repls,
        config.max_uses,
        config.max_mem_mib,
        config.interpreter_path.clone(),
        config.interpreter_cwd.clone(),
    ));

    orchestrator::warm_start(pool.clone(), &config.init_repls).await;

    let listener = match TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, "failed to bind listener: {e}");
            pool.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    let server = Server::builder().listener(listener).handler(AppHandler::new(pool.clone())).build();

    tokio::select! {
        _ = server.launch() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    tracing::info!("lean-repl-host shutting down");
    pool.shutdown().await;

    ExitCode::SUCCESS
}
