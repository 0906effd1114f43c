//! A small web service that takes a posted download form, fetches the
//! requested file to disk and answers with redirect-after-post.

use std::sync::Arc;

use log::info;
use reqwest::Client;
use tokio::net::TcpListener;

pub mod download;
pub mod error;
pub mod flash;
pub mod form;
pub mod handler;
pub mod helper;
pub mod init_env;
pub mod routes;
pub mod session;
pub mod state;
pub mod view;

pub use error::{Error, Result};
pub use handler::{FormSubmissionHandler, Outcome, FLASH_KEY};
pub use init_env::Config;
pub use routes::create_router;
pub use state::AppState;

use download::UrlDownloadFormFactory;
use flash::MemoryFlashStore;
use routes::FILES_PATH;
use view::HtmlViewRenderer;

/// Wires the default collaborators: URL downloads, in-memory flash store,
/// built-in HTML views.
pub fn build_state(config: Config) -> Result<AppState> {
    let client = Client::builder().timeout(config.fetch_timeout).build()?;
    let forms = Arc::new(UrlDownloadFormFactory::new(
        client,
        config.download_dir.clone(),
        config.max_download_bytes,
    ));
    let handler = FormSubmissionHandler::new(
        forms,
        Arc::new(MemoryFlashStore::with_ttl(config.flash_ttl)),
    );

    Ok(AppState::new(
        Arc::new(handler),
        Arc::new(HtmlViewRenderer::new(FILES_PATH)),
        Arc::new(config),
    ))
}

pub async fn serve(config: Config) -> Result<()> {
    tokio::fs::create_dir_all(&config.download_dir).await?;
    let bind_address = config.bind_address;
    let app = create_router(build_state(config)?);

    let listener = TcpListener::bind(bind_address).await?;
    info!("Starting server at http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Server(e.to_string()))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}
