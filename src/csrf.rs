use actix_web::cookie::{Cookie, SameSite};
use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, ResponseError};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

use crate::config::ProcessConfig;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "X-CSRFToken";

const NONCE_BYTES: usize = 16;

/// Signed double-submit tokens: `<nonce>.<hmac(secret, nonce)>`, both hex.
/// Unsafe requests must echo the `csrf_token` cookie in `X-CSRFToken`.
#[derive(Clone)]
pub struct CsrfProtect {
    key: Arc<[u8]>,
    pub enabled: bool,
}

impl CsrfProtect {
    pub fn new(cfg: &ProcessConfig) -> Self {
        Self {
            key: Arc::from(cfg.secret_key.expose().as_bytes()),
            enabled: cfg.csrf_enabled,
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size")
    }

    pub fn issue(&self) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        format!("{nonce}.{}", hex::encode(mac.finalize().into_bytes()))
    }

    pub fn verify(&self, token: &str) -> bool {
        let Some((nonce, sig)) = token.split_once('.') else { return false };
        let Ok(sig) = hex::decode(sig) else { return false };
        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        mac.verify_slice(&sig).is_ok()
    }

    /// Readable by page scripts so they can copy it into the header.
    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build(CSRF_COOKIE, token)
            .path("/")
            .http_only(false)
            .same_site(SameSite::Strict)
            .finish()
    }

    fn check(&self, req: &ServiceRequest) -> bool {
        if !self.enabled || req.method().is_safe() {
            return true;
        }
        let header = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok());
        let cookie = req.cookie(CSRF_COOKIE);
        match (header, cookie) {
            (Some(h), Some(c)) => h == c.value() && self.verify(h),
            _ => false,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CsrfProtect
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = CsrfMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CsrfMiddleware {
            service: Rc::new(service),
            csrf: self.clone(),
        }))
    }
}

pub struct CsrfMiddleware<S> {
    service: Rc<S>,
    csrf: CsrfProtect,
}

impl<S, B> Service<ServiceRequest> for CsrfMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !self.csrf.check(&req) {
            debug!(path = %req.path(), method = %req.method(), "csrf check failed");
            let res = req.into_response(ApiError::Forbidden.error_response());
            return Box::pin(async move { Ok(res.map_into_right_body()) });
        }
        let fut = self.service.call(req);
        Box::pin(async move { fut.await.map(|res| res.map_into_left_body()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn protect(secret: &str) -> CsrfProtect {
        let env = HashMap::from([("APP_ENV", "development"), ("SECRET_KEY", secret)]);
        CsrfProtect::new(&ProcessConfig::from_source(&env).unwrap())
    }

    #[test]
    fn issued_tokens_verify_and_differ() {
        let csrf = protect("csrf-secret");
        let a = csrf.issue();
        let b = csrf.issue();
        assert_ne!(a, b);
        assert!(csrf.verify(&a));
        assert!(csrf.verify(&b));
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let csrf = protect("csrf-secret");
        let token = csrf.issue();
        let (nonce, sig) = token.split_once('.').unwrap();
        assert!(!csrf.verify(&format!("{nonce}0.{sig}")));
        assert!(!csrf.verify("no-dot"));
        assert!(!csrf.verify(&format!("{nonce}.zz")));
        assert!(!protect("other-secret").verify(&token));
    }
}
