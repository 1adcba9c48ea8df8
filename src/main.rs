use anyhow::Context;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use questa_server::media::{LocalFsObjectStore, MemoryObjectStore, ObjectStore};
use questa_server::store::Store;
use questa_server::{AppState, Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let purged = store.purge_expired(Utc::now())?;
    if purged > 0 {
        info!(purged, "dropped expired sessions and challenges");
    }

    for username in &config.admin_users {
        match store.find_user_by_login(username)? {
            Some(user) if !user.is_admin => {
                store.set_admin(user.id, true)?;
                info!(username = %username, "promoted to admin");
            }
            Some(_) => {}
            None => info!(username = %username, "admin user not registered yet"),
        }
    }

    let media: Arc<dyn ObjectStore> = match &config.media_root {
        Some(root) => Arc::new(LocalFsObjectStore::new(root.clone())),
        None => {
            warn!("no media root configured, uploads are kept in memory");
            Arc::new(MemoryObjectStore::new())
        }
    };
    if config.admin_token.is_none() {
        warn!("QUESTA_ADMIN_TOKEN is not set, only admin users can manage questions");
    }

    let bind = config.bind;
    let state = AppState::new(store, media, config);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
