use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};

use crate::config::Config;
use crate::error::ApiError;

/// Proof that the request carried the configured static API key in the
/// `X-Api-Key` header. Every authenticated handler takes this extractor.
#[derive(Debug)]
pub struct ApiKey;

impl FromRequest for ApiKey {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(check_key(req))
    }
}

fn check_key(req: &HttpRequest) -> Result<ApiKey, ApiError> {
    let config = req.app_data::<Data<Config>>().ok_or(ApiError::Internal)?;

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if provided != config.api_key {
        return Err(ApiError::Unauthorized);
    }
    Ok(ApiKey)
}
