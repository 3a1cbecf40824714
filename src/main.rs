use std::{process, sync::Arc};

use revalidator::{
    clock::{Clock, SystemClock},
    config::{self, Command, RevalidateArgs, Settings},
    context::{RequestContext, run_with_request_context},
    infra::{
        bootstrap,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
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

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Revalidate(args) => run_revalidate(settings, args).await,
        Command::Tags(_) => run_tags(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), InfraError> {
    let state = bootstrap::build_http_state(&settings)?;
    serve_http(&settings, state).await
}

async fn serve_http(settings: &Settings, state: HttpState) -> Result<(), InfraError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr).await?;
    info!(addr = %settings.server.addr, "listening");

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown({
        let shutdown = Arc::clone(&shutdown);
        async move { shutdown.notified().await }
    });
    let mut server = std::pin::pin!(server.into_future());

    tokio::select! {
        result = &mut server => return result.map_err(InfraError::from),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "failed to listen for ctrl-c; shutting down");
            }
        }
    }

    let grace = settings.server.graceful_shutdown;
    info!(grace_secs = grace.as_secs(), "shutdown requested; draining connections");
    shutdown.notify_one();

    match tokio::time::timeout(grace, server).await {
        Ok(result) => result.map_err(InfraError::from),
        Err(_) => {
            warn!("graceful shutdown timed out; dropping remaining connections");
            Ok(())
        }
    }
}

async fn run_revalidate(settings: Settings, args: RevalidateArgs) -> Result<(), InfraError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handler = bootstrap::build_cli_handler(&settings, clock, !args.no_purge)?;

    let context = Arc::new(RequestContext::new(format!("cli-{}", Uuid::new_v4())));
    let result =
        run_with_request_context(Arc::clone(&context), handler.revalidate_tags(&args.tags)).await;
    context.background().settle().await;
    result?;

    info!(tags = ?args.tags, purge = !args.no_purge, "revalidation complete");
    Ok(())
}

async fn run_tags(settings: Settings) -> Result<(), InfraError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handler = bootstrap::build_cli_handler(&settings, clock, false)?;
    let entries = handler.tag_manifest().entries().await?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
