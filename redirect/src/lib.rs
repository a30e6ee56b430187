//! Storefront front door: sends visitors to the URL prefix of their
//! country's region and forwards all other traffic to the storefront.

pub mod config;
pub mod decision;
pub mod errors;
pub mod matcher;
pub mod metrics_defs;
pub mod resolve;
mod service;

pub use errors::RedirectError;
pub use service::RedirectService;

use regions::RegionCache;
use shared::admin_service::AdminService;
use tokio::net::TcpListener;

/// Runs the public and admin listeners until either fails.
pub async fn run(config: config::Config, cache: RegionCache) -> Result<(), RedirectError> {
    let public = TcpListener::bind(config.listener.addr()).await?;
    let admin = TcpListener::bind(config.admin_listener.addr()).await?;
    tracing::info!(
        public = %config.listener.addr(),
        admin = %config.admin_listener.addr(),
        "Listening"
    );
    serve(&config, cache, public, admin).await
}

/// Like [`run`] on already bound listeners.
pub async fn serve(
    config: &config::Config,
    cache: RegionCache,
    public: TcpListener,
    admin: TcpListener,
) -> Result<(), RedirectError> {
    let service = RedirectService::new(config, cache.clone())?;

    // Readiness follows the first load, not the first visitor
    cache.warm();

    let ready_cache = cache.clone();
    let admin_service: AdminService<_, RedirectError> =
        AdminService::new(move || ready_cache.is_ready());

    tokio::try_join!(
        shared::http::serve(public, service),
        shared::http::serve(admin, admin_service),
    )?;
    Ok(())
}
