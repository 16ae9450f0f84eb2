//! Magic-link tokens.
//!
//! The raw token only ever travels in the notification; the store keeps its
//! SHA-256 hash, bound to one (alert, task, resource) and valid until the
//! end of the deadline day in UTC.

use chrono::{TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{Alert, ResourceId, ResponseToken};

/// Hex-encoded SHA-256 of a raw token.
#[must_use]
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Issues a token answering `alert` on behalf of `resource` and returns the
/// raw value.
pub(crate) fn issue_token(
    ctx: &ServiceContext,
    alert: &Alert,
    resource: &ResourceId,
) -> Result<String> {
    let raw = ctx.id_gen.generate_token();
    let now = ctx.clock.now();
    let expires_at = alert
        .deadline
        .and_hms_opt(23, 59, 59)
        .map_or(now, |end_of_day| Utc.from_utc_datetime(&end_of_day));
    ctx.store.insert_token(ResponseToken {
        token_hash: hash_token(&raw),
        alert_id: alert.id.clone(),
        task_id: alert.task_id.clone(),
        resource_id: resource.clone(),
        expires_at,
        used_at: None,
        revoked: false,
        created_at: now,
    })?;
    Ok(raw)
}

/// Looks up a presented token and rejects unknown, used and expired ones.
/// Does not claim it.
pub(crate) fn check_token(ctx: &ServiceContext, raw: &str) -> Result<ResponseToken> {
    let token = ctx.store.token(&hash_token(raw))?.ok_or(Error::TokenNotFound)?;
    if token.revoked || token.used_at.is_some() {
        return Err(Error::TokenAlreadyUsed);
    }
    if ctx.clock.now() > token.expires_at {
        return Err(Error::TokenExpired);
    }
    Ok(token)
}
