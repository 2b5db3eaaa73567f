//! HTTP handlers for model-backed resources

use actix_web::http::{header, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

use mview_common::error::{Error, Result};
use mview_common::types::{ErrorBody, Principal};

use crate::auth::{InterceptorChain, PrincipalResolver, RequestContext};
use crate::query::{parse_params, translate, QuerySpec};
use crate::schema::EntitySchema;
use crate::service::ModelView;
use crate::write::read_body;

/// Shared REST API state
pub struct RestState {
    pub view: ModelView,
    pub chain: InterceptorChain,
    pub resolver: Arc<dyn PrincipalResolver>,
}

impl RestState {
    pub fn new(
        view: ModelView,
        chain: InterceptorChain,
        resolver: Arc<dyn PrincipalResolver>,
    ) -> Self {
        Self {
            view,
            chain,
            resolver,
        }
    }
}

/// Outcome of the blocking part of a request
enum Outcome {
    Document(StatusCode, Value),
    NoContent,
}

/// Map an error onto its status and `{"err": ...}` body
pub fn error_response(error: &Error) -> HttpResponse {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(code = error.error_code(), "Request failed: {}", error);
    } else {
        warn!(code = error.error_code(), "Request rejected: {}", error);
    }
    HttpResponse::build(status).json(ErrorBody::from(error))
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// Any method on `/{resource path}/{ids...}/`
pub async fn resource_handler(
    state: web::Data<Arc<RestState>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    match dispatch(state.get_ref().clone(), &req, &body).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

async fn dispatch(state: Arc<RestState>, req: &HttpRequest, body: &[u8]) -> Result<HttpResponse> {
    let (schema, ids) = state
        .view
        .registry()
        .resolve(req.path())
        .ok_or_else(|| Error::ResourceNotFound(req.path().to_string()))?;

    let method = req.method().as_str().to_ascii_lowercase();
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let principal = state.resolver.resolve(authorization)?;

    state.chain.run(&RequestContext {
        method: &method,
        schema: &schema,
        principal: &principal,
    })?;

    match method.as_str() {
        "head" => return Ok(HttpResponse::Ok().finish()),
        "options" => {
            return Ok(HttpResponse::Ok()
                .insert_header((header::ALLOW, ModelView::allow_header(&schema)))
                .json(state.view.options(&schema)))
        }
        _ => {}
    }

    let params = parse_params(req.query_string());
    let spec = translate(&params, &schema, &ids)?;
    let body = read_body(body)?;
    let root_url = if state.view.settings().hyperlink_values {
        let conn = req.connection_info();
        format!("{}://{}", conn.scheme(), conn.host())
    } else {
        String::new()
    };

    let outcome = web::block(move || {
        execute(&state, &method, &schema, &spec, body, &principal, &root_url)
    })
    .await
    .map_err(|e| Error::StoreError(e.to_string()))??;

    Ok(match outcome {
        Outcome::Document(status, doc) => HttpResponse::build(status).json(doc),
        Outcome::NoContent => HttpResponse::NoContent().finish(),
    })
}

fn execute(
    state: &RestState,
    method: &str,
    schema: &EntitySchema,
    spec: &QuerySpec,
    body: Option<Value>,
    principal: &Principal,
    root_url: &str,
) -> Result<Outcome> {
    match method {
        "get" => Ok(Outcome::Document(
            StatusCode::OK,
            state.view.get(schema, spec, root_url)?,
        )),
        "post" => Ok(Outcome::Document(
            StatusCode::CREATED,
            state.view.post(schema, spec, body, principal, root_url)?,
        )),
        "put" => {
            state.view.put(schema, spec, body)?;
            Ok(Outcome::NoContent)
        }
        "delete" => {
            state.view.delete(schema, spec)?;
            Ok(Outcome::NoContent)
        }
        other => Err(Error::MethodNotAllowed(other.to_uppercase())),
    }
}

/// GET /discovery/ - List declared resources
pub async fn discovery_handler(state: web::Data<Arc<RestState>>) -> HttpResponse {
    HttpResponse::Ok().json(state.view.discovery())
}

/// Health check
pub async fn health_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "rest",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
