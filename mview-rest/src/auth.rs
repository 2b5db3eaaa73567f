//! Request interceptors and principal resolution
//!
//! Interceptors run in order before any query translation and stop at the
//! first denial. Principals come from a [`PrincipalResolver`]; token
//! verification is the job of the authentication service in front of this
//! layer, so the bundled resolver only reads claims. Credentials it cannot
//! read resolve to the anonymous principal and are left to the permission
//! gate.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use mview_common::error::{Error, Result};
use mview_common::types::Principal;

use crate::schema::EntitySchema;

/// What an interceptor gets to see about a request
pub struct RequestContext<'a> {
    /// Lowercase HTTP method
    pub method: &'a str,
    pub schema: &'a EntitySchema,
    pub principal: &'a Principal,
}

pub trait Interceptor: Send + Sync {
    /// # Errors
    /// Returns the denial to send back to the client.
    fn check(&self, ctx: &RequestContext<'_>) -> Result<()>;
}

/// Rejects methods the resource does not allow
pub struct MethodGate;

impl Interceptor for MethodGate {
    fn check(&self, ctx: &RequestContext<'_>) -> Result<()> {
        let allowed = &ctx.schema.info().allowed_methods;
        if allowed.iter().any(|m| m.eq_ignore_ascii_case(ctx.method)) {
            Ok(())
        } else {
            Err(Error::MethodNotAllowed(ctx.method.to_uppercase()))
        }
    }
}

/// Enforces the per-method level requirements declared in `perms`
pub struct PermissionGate {
    levels: HashMap<String, i64>,
}

impl PermissionGate {
    pub fn new(levels: HashMap<String, i64>) -> Self {
        Self { levels }
    }
}

impl Interceptor for PermissionGate {
    fn check(&self, ctx: &RequestContext<'_>) -> Result<()> {
        let Some(required) = ctx.schema.info().perms.get(ctx.method) else {
            return Ok(());
        };
        if !ctx.principal.is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        let Some(level) = self.levels.get(required) else {
            warn!(
                "Permission level '{}' on {} is not configured; skipping",
                required, ctx.schema.name
            );
            return Ok(());
        };
        if ctx.principal.level >= *level {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "Unauthorized. You do not have permission '{}' or above.",
                required
            )))
        }
    }
}

/// Ordered list of interceptors
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method gate followed by the permission gate
    pub fn standard(levels: HashMap<String, i64>) -> Self {
        Self::new()
            .with(MethodGate)
            .with(PermissionGate::new(levels))
    }

    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Run every interceptor, stopping at the first denial
    ///
    /// # Errors
    /// Returns the first interceptor's denial.
    pub fn run(&self, ctx: &RequestContext<'_>) -> Result<()> {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.check(ctx) {
                debug!(
                    method = ctx.method,
                    resource = %ctx.schema.name,
                    code = e.error_code(),
                    "Request denied"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Establishes the caller from the `Authorization` header
pub trait PrincipalResolver: Send + Sync {
    /// # Errors
    /// Returns an error only when the resolver itself cannot run; unreadable
    /// credentials are the anonymous principal.
    fn resolve(&self, authorization: Option<&str>) -> Result<Principal>;
}

#[derive(Deserialize)]
struct BearerClaims {
    #[serde(default)]
    sub: serde_json::Value,
    #[serde(default)]
    level: i64,
}

/// Reads `sub` and `level` from the claims of a bearer JWT
///
/// The signature, expiry and audience are not checked.
pub struct BearerClaimsResolver;

impl BearerClaimsResolver {
    fn claims(token: &str) -> Option<BearerClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        match decode::<BearerClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!("Unreadable bearer token: {}", e);
                None
            }
        }
    }
}

impl PrincipalResolver for BearerClaimsResolver {
    fn resolve(&self, authorization: Option<&str>) -> Result<Principal> {
        let Some(header) = authorization else {
            return Ok(Principal::anonymous());
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            debug!("Ignoring non-bearer authorization header");
            return Ok(Principal::anonymous());
        };

        match Self::claims(token.trim()) {
            Some(claims) if !claims.sub.is_null() => {
                Ok(Principal::authenticated(claims.sub, claims.level))
            }
            Some(_) => {
                warn!("Bearer token has no subject; treating caller as anonymous");
                Ok(Principal::anonymous())
            }
            None => Ok(Principal::anonymous()),
        }
    }
}
