use anyhow::{Context, Result};
use moments_client::{
    config::{AppConfig, Command},
    models::{
        media::{MediaReference, SelectedFile},
        preview::PreviewState,
    },
    routes::routes::{self, HostState},
    services::{
        backend::{BackendApi, HttpBackend},
        config_cache::AddressResolver,
        object_urls::ObjectUrlRegistry,
        preview::{MediaPreviewPipeline, PreviewSlot},
        timeline::TimelineSession,
        transcode::ImageTranscoder,
    },
};
use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting moments client with config: {:?}", cfg);

    // --- Wire services ---
    let backend: Arc<dyn BackendApi> = Arc::new(HttpBackend::new(cfg.backend_url.clone()));
    let resolver = Arc::new(AddressResolver::for_mode(
        cfg.address_mode,
        Arc::clone(&backend),
    ));
    let session = TimelineSession::new(
        Arc::clone(&backend),
        Arc::clone(&resolver),
        cfg.poll_options(),
    );

    match command {
        Command::Events => {
            session.refresh().await?;
            print_feed(&session).await;
        }
        Command::Post { text } => {
            let event = session.submit_text(&text).await?;
            println!("submitted moment #{}", event.id);
            follow(&session).await;
        }
        Command::Upload { path, caption } => {
            let file = SelectedFile::from_path(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let event = session.submit_media(&file, &caption).await?;
            println!("uploaded moment #{}", event.id);
            follow(&session).await;
        }
        Command::Preview { paths, hold } => {
            preview(&cfg, backend, paths, hold).await?;
        }
        Command::Resolve { keys } => {
            for key in keys {
                let reference = MediaReference::new(key)?;
                println!("{} -> {}", reference, resolver.resolve_address(&reference).await);
            }
        }
        Command::Watch => {
            session.refresh().await?;
            session.start_polling();
            follow(&session).await;
        }
        Command::Truncate => {
            session.truncate().await?;
            println!("timeline truncated");
        }
    }

    Ok(())
}

async fn print_feed(session: &TimelineSession) {
    let events = session.events();
    if events.is_empty() {
        println!("(no moments yet)");
    }
    for event in &events {
        println!("{}", session.render_line(event).await);
    }
}

/// Print the feed every time it changes until polling ends or Ctrl-C.
async fn follow(session: &TimelineSession) {
    let mut feed = session.feed();
    print_feed(session).await;

    let mut idle_check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("--- timeline updated ---");
                print_feed(session).await;
            }
            _ = tokio::signal::ctrl_c() => {
                session.stop_polling();
                break;
            }
            _ = idle_check.tick() => {
                if !session.is_polling() {
                    tracing::info!("polling window closed");
                    break;
                }
            }
        }
    }
}

async fn preview(
    cfg: &AppConfig,
    backend: Arc<dyn BackendApi>,
    paths: Vec<PathBuf>,
    hold: bool,
) -> Result<()> {
    let listener = bind(cfg).await?;
    let origin = format!("http://{}", listener.local_addr()?);
    let registry = ObjectUrlRegistry::new(origin.clone());
    let pipeline = Arc::new(MediaPreviewPipeline::new(
        registry.clone(),
        Arc::new(ImageTranscoder),
        cfg.preview_options(),
    ));
    let slot = PreviewSlot::new(pipeline);

    let mut selections = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = SelectedFile::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        selections.push(slot.select(file));
    }
    for selection in selections {
        selection.await?;
    }

    match slot.state() {
        PreviewState::Ready { url } => {
            println!("preview ready: {url}");
            if let Some(http_url) = slot.displayed_http_url() {
                println!("open: {http_url}");
            }
        }
        PreviewState::Failed { family, reason } => {
            println!("preview failed ({family}): {reason}");
        }
        other => println!("preview state: {other:?}"),
    }

    if hold {
        let app = routes::routes().with_state(HostState { registry, backend });
        tracing::info!("Preview host listening on {}", origin);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    slot.close();
    Ok(())
}

/// Bind the preview host, falling back to loopback when a wildcard bind is refused.
async fn bind(cfg: &AppConfig) -> Result<TcpListener> {
    let addr = cfg.addr();
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            Ok(TcpListener::bind(&fallback_addr).await?)
        }
        Err(err) => Err(err.into()),
    }
}
