//! mview: REST semantics over declared entity collections
//!
//! Wires the configuration, schema registry, store, interceptor chain and the
//! HTTP server into one runnable service.
//!
//! # Features
//!
//! - **Query translation** - ids, field filters, field selection, aggregates, paging
//! - **Graph serialization** - depth-bounded, cycle-safe, hyperlinked documents
//! - **Writes** - create, bulk create, filtered and bulk update, delete
//! - **Interceptors** - allowed methods and permission levels per resource

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use mview_common as common;
pub use mview_rest as rest;

use std::sync::Arc;
use tracing::info;

use mview_common::config::MviewConfig;
use mview_common::error::Result;
use mview_rest::{
    BearerClaimsResolver, EntityStore, InMemoryStore, InterceptorChain, ModelView, RestServer,
    RestState, SchemaRegistry, ViewSettings,
};

/// Main mview server
pub struct MviewServer {
    config: MviewConfig,
    rest_server: Arc<RestServer>,
}

impl MviewServer {
    /// Create a server from configuration
    ///
    /// # Errors
    /// Returns `ConfigError` if the resource declarations do not validate.
    pub fn new(config: MviewConfig) -> Result<Self> {
        info!("Initializing mview");
        let state = build_state(&config)?;
        let rest_server = Arc::new(RestServer::new(&config.rest, state));
        Ok(Self {
            config,
            rest_server,
        })
    }

    /// Get reference to the REST server
    #[must_use]
    pub fn rest(&self) -> &RestServer {
        &self.rest_server
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &MviewConfig {
        &self.config
    }

    /// Start serving
    ///
    /// # Errors
    /// Returns an error if the REST server fails to start.
    pub async fn run(&self) -> Result<()> {
        info!(
            "  - REST service: http://{}:{}",
            self.config.rest.host, self.config.rest.port
        );
        self.rest_server.run().await
    }

    /// Shutdown gracefully
    ///
    /// # Errors
    /// Returns an error if shutdown fails.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down mview");
        Ok(())
    }
}

/// Build the shared request state described by `config`
///
/// With no declared resources the sample schema and its data are served.
///
/// # Errors
/// Returns `ConfigError` if the resource declarations do not validate.
pub fn build_state(config: &MviewConfig) -> Result<RestState> {
    let (registry, store) = if config.resources.is_empty() {
        info!("No resources configured; serving the sample schema");
        let registry = SchemaRegistry::with_sample_schema();
        let store = InMemoryStore::new().with_sample_data(&registry)?;
        (registry, store)
    } else {
        let registry = SchemaRegistry::new(config.resources.clone())?;
        (registry, InMemoryStore::new())
    };

    for info in registry.resources() {
        info!(
            "  - /{}/ ({})",
            info.path.as_deref().unwrap_or(&info.name).trim_matches('/'),
            info.name
        );
    }

    let store: Arc<dyn EntityStore> = Arc::new(store);
    let view = ModelView::new(
        Arc::new(registry),
        store,
        ViewSettings::from(&config.rest),
        config.auth.levels.clone(),
    );
    Ok(RestState::new(
        view,
        InterceptorChain::standard(config.auth.levels.clone()),
        Arc::new(BearerClaimsResolver),
    ))
}
