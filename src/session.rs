use actix_web::cookie::{Cookie, SameSite as CookieSameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

use crate::config::{CookiePolicy, ProcessConfig, SameSite};
use crate::container::AppState;
use crate::error::ApiError;

pub const SESSION_COOKIE: &str = "session";
/// Where unauthenticated users are sent.
pub const LOGIN_VIEW: &str = "/auth/login";

const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub sid: String,
    pub exp: usize,
}

/// Issues and validates signed session tokens carried in the session cookie.
#[derive(Clone)]
pub struct SessionManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie_policy: CookiePolicy,
}

impl SessionManager {
    pub fn new(cfg: &ProcessConfig) -> Self {
        let secret = cfg.secret_key.expose().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            cookie_policy: cfg.cookie_policy,
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = (chrono::Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS)).timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            sid: uuid::Uuid::new_v4().to_string(),
            exp: expiration,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }

    /// Session cookie carrying `token`, with the configured cookie flags.
    pub fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build(SESSION_COOKIE, token)
            .path("/")
            .http_only(self.cookie_policy.http_only)
            .same_site(match self.cookie_policy.same_site {
                SameSite::Strict => CookieSameSite::Strict,
                SameSite::Lax => CookieSameSite::Lax,
                SameSite::None => CookieSameSite::None,
            })
            .secure(self.cookie_policy.secure)
            .finish()
    }

    pub fn logout_cookie(&self) -> Cookie<'static> {
        let mut cookie = self.cookie(String::new());
        cookie.make_removal();
        cookie
    }
}

/// Extractor yielding the claims of a valid session cookie.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(ApiError::Internal));
        };
        let result = req
            .cookie(SESSION_COOKIE)
            .ok_or(ApiError::Unauthorized)
            .and_then(|c| state.sessions.verify(c.value()).map_err(|_| ApiError::Unauthorized))
            .map(Auth);
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager(secret: &str) -> SessionManager {
        let env = HashMap::from([("APP_ENV", "development"), ("SECRET_KEY", secret)]);
        SessionManager::new(&ProcessConfig::from_source(&env).unwrap())
    }

    #[test]
    fn token_roundtrip() {
        let sessions = manager("session-test-secret");
        let token = sessions.issue("7").unwrap();
        let claims = sessions.verify(&token).unwrap();
        assert_eq!(claims.sub, "7");
        assert!(!claims.sid.is_empty());
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = manager("first-secret").issue("7").unwrap();
        assert!(manager("second-secret").verify(&token).is_err());
    }

    #[test]
    fn cookie_follows_policy() {
        let cookie = manager("k").cookie("tok".into());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(CookieSameSite::Lax));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.path(), Some("/"));
    }
}
