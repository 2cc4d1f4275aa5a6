//! # Mask Binary
//!
//! Loads settings, picks a document store backend, and serves the space API.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context};
use mk_api::middleware::{cors_policy, standard_middleware};
use mk_api::{configure_routes, AppState};
use mk_config::{LogSettings, Settings, StoreBackend, StoreSettings};
use mk_core::DocumentStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings.log);

    let store = open_store(&settings.store).await?;
    let state = web::Data::new(AppState::new(store, settings.server.public_origin.clone()));

    let (host, port) = settings.bind_addr();
    info!(%host, port, backend = ?settings.store.backend, "mask starting");

    HttpServer::new(move || {
        App::new()
            .wrap(cors_policy())
            .wrap(standard_middleware())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))
    .with_context(|| format!("binding {host}:{port}"))?
    .run()
    .await?;

    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(settings: &StoreSettings) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match settings.backend {
        #[cfg(feature = "store-memory")]
        StoreBackend::Memory => Ok(Arc::new(
            mk_store_memory::MemoryDocumentStore::with_capacity(settings.broadcast_capacity),
        )),
        #[cfg(feature = "store-sqlite")]
        StoreBackend::Sqlite => {
            let store = mk_store_sqlite::SqliteDocumentStore::with_capacity(
                &settings.sqlite_url,
                settings.broadcast_capacity,
            )
            .await
            .with_context(|| format!("opening {}", settings.sqlite_url))?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => bail!("store backend {other:?} is not compiled into this build"),
    }
}
