use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, ResponseError};
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::{EnvSource, REDIS_URL_ENV};
use crate::error::{ApiError, ConfigError};

pub const RL_DEFAULT_LIMIT_ENV: &str = "RL_DEFAULT_LIMIT";
pub const RL_DEFAULT_WINDOW_ENV: &str = "RL_DEFAULT_WINDOW";

/// Stale keys are swept after this many checks.
const SWEEP_EVERY: u64 = 1024;

/// Sliding window in-memory rate limiter (pod local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    calls: Arc<AtomicU64>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), calls: Arc::new(AtomicU64::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let allowed = {
            let mut entry = self.store.entry(key.to_string()).or_default();
            prune(&mut entry, now, window);
            if entry.len() < limit {
                entry.push_back(now);
                true
            } else {
                false
            }
        };
        if self.calls.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(window);
        }
        allowed
    }

    /// Drops every key whose window has fully expired.
    pub fn sweep(&self, window: Duration) {
        let now = Instant::now();
        self.store.retain(|_, hits| {
            prune(hits, now, window);
            !hits.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(front) = hits.front() {
        if now.duration_since(*front) >= window { hits.pop_front(); } else { break; }
    }
}

// Sorted-set sliding window; the member is only added when under the limit.
const SLIDING_WINDOW_LUA: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
if redis.call('ZCARD', key) < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  return 1
end
return 0
";

/// Sliding window shared by every replica through Redis. The connection is
/// opened on first use with a single retry, so a dead Redis costs a request
/// at most one short backoff.
#[derive(Clone)]
pub struct RedisRateLimiter {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    script: redis::Script,
}

impl RedisRateLimiter {
    pub fn open(location: &str) -> Result<Self, ConfigError> {
        let client = redis::Client::open(location)
            .map_err(|_| ConfigError::configuration(REDIS_URL_ENV, "invalid redis location"))?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            script: redis::Script::new(SLIDING_WINDOW_LUA),
        })
    }

    async fn connection(&self) -> redis::RedisResult<ConnectionManager> {
        self.conn
            .get_or_try_init(|| ConnectionManager::new_with_backoff(self.client.clone(), 2, 100, 1))
            .await
            .cloned()
    }

    pub async fn check(&self, key: &str, limit: usize, window: Duration) -> redis::RedisResult<bool> {
        let mut conn = self.connection().await?;
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
        let allowed: i32 = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window.as_millis() as u64)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }
}

/// Counter storage named by the rate limit backend location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Redis { location: String },
}

impl RateLimitBackend {
    pub fn from_location(location: &str) -> Result<Self, ConfigError> {
        let url = url::Url::parse(location)
            .map_err(|e| ConfigError::configuration(REDIS_URL_ENV, format!("invalid location: {e}")))?;
        match url.scheme() {
            "memory" => Ok(RateLimitBackend::Memory),
            "redis" | "rediss" => Ok(RateLimitBackend::Redis { location: location.to_string() }),
            other => Err(ConfigError::configuration(REDIS_URL_ENV, format!("unsupported scheme '{other}'"))),
        }
    }
}

/// Default per-client limit, overridable from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub default_limit: usize,
    pub default_window: Duration,
}

impl RateLimitConfig {
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let positive = |name: &'static str, default: u64| -> Result<u64, ConfigError> {
            match env.var(name) {
                None => Ok(default),
                Some(v) => match v.parse::<u64>() {
                    Ok(0) => Err(ConfigError::configuration(name, "must be greater than zero")),
                    Ok(n) => Ok(n),
                    Err(_) => Err(ConfigError::configuration(name, format!("not a number: '{v}'"))),
                },
            }
        };
        Ok(Self {
            default_limit: positive(RL_DEFAULT_LIMIT_ENV, 200)? as usize,
            default_window: Duration::from_secs(positive(RL_DEFAULT_WINDOW_ENV, 60)?),
        })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { default_limit: 200, default_window: Duration::from_secs(60) }
    }
}

#[derive(Clone)]
enum Store {
    Memory(InMemoryRateLimiter),
    Redis(RedisRateLimiter),
}

/// High level guard shared by the middleware and handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    store: Store,
    pub cfg: RateLimitConfig,
    pub backend: RateLimitBackend,
}

impl RateLimiterFacade {
    pub fn from_location(location: &str, cfg: RateLimitConfig) -> Result<Self, ConfigError> {
        let backend = RateLimitBackend::from_location(location)?;
        let store = match &backend {
            RateLimitBackend::Memory => {
                info!("rate limiter using in-process storage");
                Store::Memory(InMemoryRateLimiter::new(true))
            }
            RateLimitBackend::Redis { location } => {
                info!("rate limiter using redis storage");
                Store::Redis(RedisRateLimiter::open(location)?)
            }
        };
        Ok(Self { store, cfg, backend })
    }

    /// An unreachable Redis lets the request through.
    pub async fn allow(&self, client: &str) -> bool {
        let key = format!("ratelimit:default:{client}");
        match &self.store {
            Store::Memory(limiter) => limiter.check(&key, self.cfg.default_limit, self.cfg.default_window),
            Store::Redis(limiter) => {
                match limiter.check(&key, self.cfg.default_limit, self.cfg.default_window).await {
                    Ok(allowed) => allowed,
                    Err(e) => {
                        warn!(error = %e, "rate limit store unavailable, allowing request");
                        true
                    }
                }
            }
        }
    }
}

/// Applies the default limit to every request, keyed by peer address.
#[derive(Clone)]
pub struct RateLimit(pub RateLimiterFacade);

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service: Rc::new(service),
            facade: self.0.clone(),
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: Rc<S>,
    facade: RateLimiterFacade,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
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
        let client = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".into());
        let svc = self.service.clone();
        let facade = self.facade.clone();
        Box::pin(async move {
            if !facade.allow(&client).await {
                let res = ApiError::TooManyRequests.error_response();
                return Ok(req.into_response(res).map_into_right_body());
            }
            svc.call(req).await.map(|res| res.map_into_left_body())
        })
    }
}
