//! Actor extraction
//!
//! Session authentication lives upstream; the gateway in front of this
//! service injects the authenticated identity as `x-actor-id` /
//! `x-actor-role` headers. This extractor turns them into the engine's
//! actor union so handlers never branch on role strings.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use settlement_engine::models::Actor;
use uuid::Uuid;

/// Authenticated caller identity
pub struct ActorIdentity(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for ActorIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get("x-actor-role")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized("missing x-actor-role header"))?;

        if role == "system" {
            return Ok(Self(Actor::System));
        }

        let id = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(ApiError::Unauthorized("missing or invalid x-actor-id header"))?;

        let actor = match role {
            "client" => Actor::Client(id),
            "freelancer" => Actor::Freelancer(id),
            "admin" => Actor::Admin(id),
            _ => return Err(ApiError::Unauthorized("unrecognized x-actor-role")),
        };

        Ok(Self(actor))
    }
}
