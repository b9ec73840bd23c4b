use actix_web::{
    Error as ActixError, FromRequest, HttpRequest, dev::Payload, error::ErrorUnauthorized,
    web::Data,
};
use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::future::{Ready, ready};
use uuid::Uuid;

use crate::config::Config;

/// Access-token claims. Tokens are issued by the auth provider and signed
/// with the shared `JWT_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // user id
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize, // expiration time
}

impl Claims {
    pub fn new(user_id: Uuid, email: Option<String>, valid_for: Duration) -> Self {
        Self {
            sub: user_id,
            email,
            exp: (Utc::now() + valid_for).timestamp() as usize,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.sub
    }

    pub fn encode(&self, secret: &str) -> Result<String> {
        Ok(encode(
            &Header::default(),
            self,
            &EncodingKey::from_secret(secret.as_ref()),
        )?)
    }

    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }
}

impl FromRequest for Claims {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "));

        let Some(token) = token else {
            return ready(Err(ErrorUnauthorized(
                "Missing or invalid authorization header",
            )));
        };

        let Some(config) = req.app_data::<Data<Config>>() else {
            log::error!("Config missing from app data; cannot verify tokens");
            return ready(Err(ErrorUnauthorized("Invalid token")));
        };

        match Claims::decode(token, &config.jwt_secret) {
            Ok(claims) => ready(Ok(claims)),
            Err(err) => {
                log::debug!("Rejected bearer token: {}", err);
                ready(Err(ErrorUnauthorized("Invalid token")))
            }
        }
    }
}
