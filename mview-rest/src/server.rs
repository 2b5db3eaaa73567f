//! REST API server implementation

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use mview_common::config::RestConfig;
use mview_common::error::Result;

use crate::handlers::{self, RestState};

/// Register the service routes; model resources are served by the fallback
pub fn configure(state: Arc<RestState>, max_body_bytes: usize) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(state))
            .app_data(web::PayloadConfig::new(max_body_bytes))
            .route("/health", web::get().to(handlers::health_handler))
            .route("/discovery", web::get().to(handlers::discovery_handler))
            .route("/discovery/", web::get().to(handlers::discovery_handler))
            .default_service(web::to(handlers::resource_handler));
    }
}

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Cors::permissive();
    }
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .expose_headers(["allow"])
}

/// Model-backed REST API server
pub struct RestServer {
    config: RestConfig,
    state: Arc<RestState>,
}

impl RestServer {
    pub fn new(config: &RestConfig, state: RestState) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<RestState> {
        self.state.clone()
    }

    /// Run the REST server
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn run(&self) -> Result<()> {
        let state = self.state.clone();
        let host = self.config.host.clone();
        let port = self.config.port;
        let origins = self.config.cors_origins.clone();
        let max_body_bytes = self.config.max_body_bytes;

        info!("Starting REST API server on {}:{}", host, port);
        info!(
            "  Hyperlinks: {}, single results unwrapped: {}",
            self.config.hyperlink_values, self.config.return_singles
        );

        HttpServer::new(move || {
            App::new()
                .wrap(cors(&origins))
                .wrap(middleware::Compress::default())
                .wrap(middleware::Logger::default())
                .configure(configure(state.clone(), max_body_bytes))
        })
        .workers(self.config.workers.max(1))
        .bind(format!("{}:{}", host, port))?
        .run()
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{BearerClaimsResolver, InterceptorChain};
    use crate::schema::SchemaRegistry;
    use crate::service::{ModelView, ViewSettings};
    use crate::store::InMemoryStore;
    use actix_web::test;
    use std::collections::HashMap;

    fn state() -> RestState {
        let registry = Arc::new(SchemaRegistry::with_sample_schema());
        let store = InMemoryStore::new().with_sample_data(&registry).unwrap();
        let view = ModelView::new(
            registry,
            Arc::new(store),
            ViewSettings::default(),
            HashMap::new(),
        );
        RestState::new(
            view,
            InterceptorChain::standard(HashMap::new()),
            Arc::new(BearerClaimsResolver),
        )
    }

    #[actix_web::test]
    async fn test_health_route() {
        let server = RestServer::new(&RestConfig::default(), state());
        let app = test::init_service(App::new().configure(configure(server.state(), 1024))).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_unknown_path_is_not_found() {
        let app = test::init_service(App::new().configure(configure(Arc::new(state()), 1024))).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/nowhere/").to_request()).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
