//! Access gate: who is asking, and may they ask again.
//!
//! Authentication happens upstream; this module only reads the identity it left
//! on the request and charges an injected `UsageLedger`. A rejection here stops
//! the request before the controller sees it.
//!
//! Client-supplied headers are not trusted on their own. `x-user-id` and
//! `x-forwarded-for` count only when the request carries the proxy secret
//! configured under `[gate]`. Otherwise anonymous callers are keyed by their
//! peer address, so rotating `x-session-id` does not reset the allowance.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
  async_trait,
  extract::{ConnectInfo, FromRequestParts},
  http::{request::Parts, HeaderMap},
};
use tracing::{debug, warn};

use crate::error::TutorError;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const PROXY_SECRET_HEADER: &str = "x-proxy-secret";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
  pub key: String,
  pub authenticated: bool,
}

impl Identity {
  pub fn anonymous(key: impl Into<String>) -> Self {
    Self { key: key.into(), authenticated: false }
  }

  /// Resolve the caller.
  ///
  /// Order: trusted user id, client address, session id, then `anonymous`.
  /// The address comes from `x-forwarded-for` when the proxy is trusted or no
  /// peer address is known, else from the socket peer.
  pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, trusted_secret: Option<&str>) -> Self {
    let header = |name: &str| {
      headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    };

    let trusted = match (trusted_secret, header(PROXY_SECRET_HEADER)) {
      (Some(secret), Some(given)) => !secret.is_empty() && secret == given,
      _ => false,
    };

    if let Some(user) = header(USER_ID_HEADER) {
      if trusted {
        return Self { key: format!("user:{}", user), authenticated: true };
      }
      debug!(target: "tutor_backend", "Ignoring x-user-id from an untrusted request");
    }

    let forwarded = || {
      header(FORWARDED_FOR_HEADER)
        .and_then(|addr| addr.split(',').next().map(|a| a.trim().to_string()))
        .filter(|a| !a.is_empty())
    };
    let addr = match peer {
      Some(peer) if !trusted => Some(peer.ip().to_string()),
      _ => forwarded().or_else(|| peer.map(|p| p.ip().to_string())),
    };
    if let Some(addr) = addr {
      return Self::anonymous(format!("addr:{}", addr));
    }
    if let Some(session) = header(SESSION_ID_HEADER) {
      return Self::anonymous(format!("session:{}", session));
    }
    Self::anonymous("anonymous")
  }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
  type Rejection = Infallible;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    Ok(Identity::resolve(&parts.headers, peer, state.gate.trusted_proxy_secret.as_deref()))
  }
}

/// Remaining-usage counter keyed by identity.
pub trait UsageLedger: Send + Sync {
  /// Charge one question. Returns the remaining allowance, or the rejection.
  fn consume(&self, identity: &Identity) -> Result<u32, TutorError>;

  /// Remaining allowance without charging.
  fn remaining(&self, identity: &Identity) -> u32;
}

/// Caps anonymous identities at `limit` questions; authenticated ones are unlimited.
pub struct InMemoryUsageLedger {
  limit: u32,
  used: Mutex<HashMap<String, u32>>,
}

impl InMemoryUsageLedger {
  pub fn new(limit: u32) -> Self {
    Self { limit, used: Mutex::new(HashMap::new()) }
  }
}

impl UsageLedger for InMemoryUsageLedger {
  fn consume(&self, identity: &Identity) -> Result<u32, TutorError> {
    if identity.authenticated {
      return Ok(u32::MAX);
    }
    let mut used = self.used.lock().unwrap_or_else(|p| p.into_inner());
    let count = used.entry(identity.key.clone()).or_insert(0);
    if *count >= self.limit {
      warn!(target: "tutor_backend", identity = %identity.key, limit = self.limit, "Usage limit reached");
      return Err(TutorError::UsageLimitExceeded { identity: identity.key.clone() });
    }
    *count += 1;
    let remaining = self.limit - *count;
    debug!(target: "tutor_backend", identity = %identity.key, remaining, "Usage charged");
    Ok(remaining)
  }

  fn remaining(&self, identity: &Identity) -> u32 {
    if identity.authenticated {
      return u32::MAX;
    }
    let used = self.used.lock().unwrap_or_else(|p| p.into_inner());
    self.limit.saturating_sub(used.get(&identity.key).copied().unwrap_or(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  const SECRET: Option<&str> = Some("s3cret");

  fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut h = HeaderMap::new();
    for (k, v) in pairs {
      h.insert(*k, HeaderValue::from_static(v));
    }
    h
  }

  #[test]
  fn user_id_needs_the_proxy_secret() {
    let forged = headers(&[(USER_ID_HEADER, "42"), (FORWARDED_FOR_HEADER, "10.0.0.7")]);
    let id = Identity::resolve(&forged, None, SECRET);
    assert!(!id.authenticated);
    assert_eq!(id.key, "addr:10.0.0.7");

    let wrong = headers(&[(USER_ID_HEADER, "42"), (PROXY_SECRET_HEADER, "guess")]);
    assert!(!Identity::resolve(&wrong, None, SECRET).authenticated);

    // Nothing configured: nothing is trusted.
    let any = headers(&[(USER_ID_HEADER, "42"), (PROXY_SECRET_HEADER, "")]);
    assert!(!Identity::resolve(&any, None, None).authenticated);

    let proxied = headers(&[(USER_ID_HEADER, "42"), (PROXY_SECRET_HEADER, "s3cret")]);
    let id = Identity::resolve(&proxied, None, SECRET);
    assert!(id.authenticated);
    assert_eq!(id.key, "user:42");
  }

  #[test]
  fn address_outranks_session_id() {
    let h = headers(&[(SESSION_ID_HEADER, "abc"), (FORWARDED_FOR_HEADER, "10.0.0.7, 172.16.0.1")]);
    assert_eq!(Identity::resolve(&h, None, None).key, "addr:10.0.0.7");

    let h = headers(&[(SESSION_ID_HEADER, "abc")]);
    assert_eq!(Identity::resolve(&h, None, None), Identity::anonymous("session:abc"));
    assert_eq!(Identity::resolve(&HeaderMap::new(), None, None).key, "anonymous");
  }

  #[test]
  fn peer_address_wins_over_untrusted_forwarded_for() {
    let peer: SocketAddr = "192.0.2.9:51000".parse().unwrap();
    let h = headers(&[(FORWARDED_FOR_HEADER, "10.0.0.7"), (SESSION_ID_HEADER, "abc")]);
    assert_eq!(Identity::resolve(&h, Some(peer), None).key, "addr:192.0.2.9");

    let trusted = headers(&[(FORWARDED_FOR_HEADER, "10.0.0.7"), (PROXY_SECRET_HEADER, "s3cret")]);
    assert_eq!(Identity::resolve(&trusted, Some(peer), SECRET).key, "addr:10.0.0.7");
  }

  #[test]
  fn anonymous_usage_is_capped_per_identity() {
    let ledger = InMemoryUsageLedger::new(2);
    let a = Identity::anonymous("a");
    let b = Identity::anonymous("b");

    assert_eq!(ledger.consume(&a).unwrap(), 1);
    assert_eq!(ledger.consume(&a).unwrap(), 0);
    assert!(matches!(ledger.consume(&a), Err(TutorError::UsageLimitExceeded { .. })));
    assert_eq!(ledger.remaining(&a), 0);
    assert_eq!(ledger.remaining(&b), 2);
  }

  #[test]
  fn authenticated_usage_is_unlimited() {
    let ledger = InMemoryUsageLedger::new(0);
    let user = Identity { key: "user:1".into(), authenticated: true };
    assert!(ledger.consume(&user).is_ok());
    assert_eq!(ledger.remaining(&user), u32::MAX);
  }
}
