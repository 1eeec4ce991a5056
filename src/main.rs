use std::{process, sync::Arc};

use pagecache::{
    cache::{CacheConfig, CacheState, PageCache},
    config,
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, RequestContextPatch},
        origin::OriginClient,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => run_check_config(&settings),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    if !cache_config.population_enabled() {
        warn!("page cache population is disabled; every request goes to the origin");
    }

    let cache = Arc::new(PageCache::new(cache_config));
    let state = CacheState::new(cache, Arc::new(RequestContextPatch));
    let origin = OriginClient::new(&settings.origin)?;
    let router = http::build_router(state, origin);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;

    info!(
        addr = %settings.server.addr,
        origin = %settings.origin.url,
        decoded_capacity = settings.cache.decoded_capacity.get(),
        compressed_capacity = settings.cache.compressed_capacity.get(),
        "page cache listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("page cache stopped");
    Ok(())
}

fn run_check_config(settings: &config::Settings) -> Result<(), AppError> {
    let cache = &settings.cache;
    println!("listen address:      {}", settings.server.addr);
    println!("origin:              {}", settings.origin.url);
    println!("population enabled:  {}", !cache.disable_population);
    println!("decoded capacity:    {}", cache.decoded_capacity);
    println!("compressed capacity: {}", cache.compressed_capacity);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
