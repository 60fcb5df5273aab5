//! Static identity adapters for single-node deployments and tests.

use crate::domain::StoreError;
use crate::ports::{Authenticator, SessionResolver};
use async_trait::async_trait;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone)]
struct Principal {
    user_id: String,
    session_id: Option<String>,
}

/// Fixed token table. Also resolves the session bound to each token.
///
/// Lookups compare against every registered token in constant time.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    tokens: Vec<(String, Principal)>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` for `user_id`, optionally bound to a session.
    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        let token = token.into();
        let principal = Principal {
            user_id: user_id.into(),
            session_id,
        };
        match self.tokens.iter_mut().find(|(known, _)| *known == token) {
            Some(entry) => entry.1 = principal,
            None => self.tokens.push((token, principal)),
        }
        self
    }

    /// Parse `token:user[:session]` entries separated by commas.
    /// Malformed entries are skipped.
    pub fn from_list(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .fold(Self::new(), |auth, entry| {
                let mut parts = entry.splitn(3, ':');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(token), Some(user), session) if !token.is_empty() && !user.is_empty() => {
                        auth.with_token(token, user, session.map(String::from))
                    }
                    _ => auth,
                }
            })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn principal(&self, token: &str) -> Option<&Principal> {
        // No early exit, every entry is compared
        self.tokens.iter().fold(None, |found, (known, principal)| {
            if constant_time_compare(known, token) {
                Some(principal)
            } else {
                found
            }
        })
    }
}

/// Constant-time string comparison; unequal lengths never match.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, bearer_token: &str) -> Option<String> {
        self.principal(bearer_token).map(|p| p.user_id.clone())
    }
}

#[async_trait]
impl SessionResolver for StaticAuthenticator {
    async fn resolve_session(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .principal(access_token)
            .filter(|p| p.user_id == user_id)
            .and_then(|p| p.session_id.clone()))
    }
}

/// Resolver for deployments without auth sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionResolver;

#[async_trait]
impl SessionResolver for NoSessionResolver {
    async fn resolve_session(
        &self,
        _user_id: &str,
        _access_token: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}
