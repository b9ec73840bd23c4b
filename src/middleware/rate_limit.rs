use actix_web::{
    Error, HttpResponse, Result,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web::Data,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::future::LocalBoxFuture;
use std::{net::IpAddr, rc::Rc, sync::Arc};
use uuid::Uuid;

use crate::{config::Config, handlers::shared::ApiResponse, services::auth::Claims};

/// Above this many tracked clients, expired windows are swept on the next request.
const MAX_TRACKED_CLIENTS: usize = 10_000;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: i64,
    /// Returned with the 429 response.
    pub message: String,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_seconds: i64) -> Self {
        Self {
            max_requests,
            window_seconds,
            message: "Rate limit exceeded. Please try again later.".to_string(),
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ClientKey {
    Ip(IpAddr),
    User(Uuid),
}

#[derive(Debug, Clone)]
struct RequestTracker {
    count: u32,
    window_start: DateTime<Utc>,
}

impl RequestTracker {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Utc::now(),
        }
    }

    fn is_expired(&self, window_seconds: i64) -> bool {
        let window = Duration::try_seconds(window_seconds).unwrap_or(Duration::seconds(60));
        Utc::now() > self.window_start + window
    }
}

/// Fixed-window counters keyed by client address or authenticated user.
#[derive(Clone, Default)]
pub struct RateLimitStore {
    trackers: Arc<DashMap<ClientKey, RequestTracker>>,
}

impl RateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_and_update(&self, key: ClientKey, config: &RateLimitConfig) -> bool {
        let mut tracker = self.trackers.entry(key).or_insert_with(RequestTracker::new);

        if tracker.is_expired(config.window_seconds) {
            tracker.count = 1;
            tracker.window_start = Utc::now();
            true
        } else if tracker.count >= config.max_requests {
            false
        } else {
            tracker.count += 1;
            true
        }
    }

    pub fn cleanup_expired(&self, window_seconds: i64) {
        self.trackers
            .retain(|_, tracker| !tracker.is_expired(window_seconds));
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

/// Limits by peer address, and additionally by user when the request carries
/// a valid bearer token.
pub struct RateLimitMiddleware {
    store: RateLimitStore,
    config: RateLimitConfig,
}

impl RateLimitMiddleware {
    pub fn with_store(config: RateLimitConfig, store: RateLimitStore) -> Self {
        Self { store, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = futures_util::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        futures_util::future::ready(Ok(RateLimitService {
            service: Rc::new(service),
            store: self.store.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    store: RateLimitStore,
    config: RateLimitConfig,
}

fn bearer_user(req: &ServiceRequest) -> Option<Uuid> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))?;
    let config = req.app_data::<Data<Config>>()?;

    Claims::decode(token, &config.jwt_secret)
        .ok()
        .map(|claims| claims.user_id())
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let store = self.store.clone();
        let config = self.config.clone();

        Box::pin(async move {
            let client_ip = req
                .peer_addr()
                .map(|addr| addr.ip())
                .or_else(|| {
                    req.connection_info()
                        .realip_remote_addr()
                        .and_then(|ip| ip.parse::<IpAddr>().ok())
                });

            let mut keys = Vec::with_capacity(2);
            if let Some(ip) = client_ip {
                keys.push(ClientKey::Ip(ip));
            }
            if let Some(user_id) = bearer_user(&req) {
                keys.push(ClientKey::User(user_id));
            }

            if store.len() > MAX_TRACKED_CLIENTS {
                store.cleanup_expired(config.window_seconds);
            }

            for key in keys {
                if !store.check_and_update(key, &config) {
                    log::warn!("Rate limit exceeded for {:?} on {}", key, req.path());
                    let response = HttpResponse::TooManyRequests()
                        .json(ApiResponse::<()>::error(&config.message));
                    return Ok(req.into_response(response).map_into_right_body());
                }
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

/// Limits for the write endpoints. Build one per process and hand clones to
/// every worker so they all count against the same windows.
#[derive(Clone, Default)]
pub struct RateLimiter {
    chat: RateLimitStore,
    join_requests: RateLimitStore,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat(&self) -> RateLimitMiddleware {
        RateLimitMiddleware::with_store(
            RateLimitConfig::new(30, 60)
                .with_message("You are sending messages too quickly. Please slow down."),
            self.chat.clone(),
        )
    }

    pub fn join_requests(&self) -> RateLimitMiddleware {
        RateLimitMiddleware::with_store(
            RateLimitConfig::new(10, 60)
                .with_message("Too many join requests. Please try again in a minute."),
            self.join_requests.clone(),
        )
    }
}
