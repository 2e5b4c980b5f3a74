//! Flat token authentication.
//!
//! A bearer-style `Authorization: token <value>` header is matched against
//! stored user records. This is a lookup, not an identity system: the first
//! user whose stored token equals the presented value is the caller.

use lc_core::error::{LcError, LcResult};
use lc_core::model::{EntityType, User};
use lc_core::store::ObjectStore;

/// Resolve the caller's identity from an Authorization header value.
///
/// Returns `Ok(None)` when no header was sent. A header that is present but
/// malformed or matches no user is a permission failure, so gated actions
/// fail the same way for a bad token as for a missing one.
pub async fn identify(store: &ObjectStore, header: Option<&str>) -> LcResult<Option<String>> {
    let Some(header) = header else {
        return Ok(None);
    };

    let token = header
        .strip_prefix("token ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            LcError::Permission("malformed Authorization header (expected 'token <value>')".into())
        })?;

    for name in store.list(EntityType::User).await? {
        let user: User = match store.load(EntityType::User, &name).await {
            Ok(user) => user,
            Err(_) => continue,
        };
        if user.token == token {
            return Ok(Some(user.name));
        }
    }
    Err(LcError::Permission("unknown authorization token".into()))
}

/// Require an authenticated caller for a gated action.
pub fn require(caller: Option<&str>, action: &str) -> LcResult<String> {
    caller
        .map(str::to_string)
        .ok_or_else(|| LcError::Permission(format!("action '{}' requires authentication", action)))
}
