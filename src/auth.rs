/// Cookie authentication for browser clients
///
/// Browsers carry `token`, `passHash` and optionally `passHashOld` cookies.
/// Federated peers carry none of these, which is how a key query learns
/// which trust mode it runs under.
use crate::{
    context::AppContext,
    directory::{SqliteDirectory, UserRecord},
    error::{ServerError, ServerResult},
    federation::TrustMode,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::CookieJar;

/// A signed-in user
#[derive(Debug, Clone, PartialEq)]
pub struct UserId {
    pub token: String,
    pub public_hash: String,
}

impl From<UserRecord> for UserId {
    fn from(record: UserRecord) -> Self {
        Self {
            token: record.token,
            public_hash: record.public_hash,
        }
    }
}

/// Optional authenticated context - does not fail if no auth provided
#[derive(Debug, Clone)]
pub struct OptionalAuthContext {
    pub user: Option<UserId>,
}

impl OptionalAuthContext {
    pub fn trust_mode(&self) -> TrustMode {
        match self.user {
            Some(_) => TrustMode::Client,
            None => TrustMode::Peer,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuthContext {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let (Some(token), Some(pass_hash)) = (jar.get("token"), jar.get("passHash")) else {
            return Ok(OptionalAuthContext { user: None });
        };
        let pass_hash_old = jar.get("passHashOld").map(|c| c.value()).unwrap_or("");

        let user = authenticate_user_pass(&state.directory, token.value(), pass_hash.value(), pass_hash_old).await?;

        if user.is_none() {
            tracing::debug!("Cookie authentication failed for token {}", token.value());
        }

        Ok(OptionalAuthContext { user })
    }
}

/// Check a token against its current or previous password hash.
///
/// Empty hashes never match.
pub async fn authenticate_user_pass(
    directory: &SqliteDirectory,
    token: &str,
    pass_hash: &str,
    pass_hash_old: &str,
) -> ServerResult<Option<UserId>> {
    let Some(record) = directory.load_user(token).await? else {
        return Ok(None);
    };

    let current = !pass_hash.is_empty() && pass_hash == record.password_hash;
    let previous = !pass_hash_old.is_empty() && record.password_hash_old.as_deref() == Some(pass_hash_old);

    if current || previous {
        Ok(Some(record.into()))
    } else {
        Ok(None)
    }
}
