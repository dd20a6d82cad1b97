//! Authenticated caller identity.
//!
//! An [`IdentityContext`] is produced once per request by an
//! [`Authenticator`](crate::auth::Authenticator) and then only read. It has no
//! setters; build it through [`IdentityContext::builder`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Immutable description of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityContext {
    user_id: i64,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    user_level: i32,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    remote_id: Option<String>,
    #[serde(default)]
    roles: BTreeSet<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    claims: BTreeMap<String, serde_json::Value>,
}

impl IdentityContext {
    /// Start building an identity for the given user id.
    pub fn builder(user_id: i64) -> IdentityBuilder {
        IdentityBuilder {
            inner: IdentityContext {
                user_id,
                user_name: String::new(),
                user_level: 0,
                session_id: None,
                remote_id: None,
                roles: BTreeSet::new(),
                email: None,
                claims: BTreeMap::new(),
            },
        }
    }

    /// Numeric user id. Used as the key for every policy lookup.
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    /// Privilege level as assigned by the credential store.
    pub fn user_level(&self) -> i32 {
        self.user_level
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Address or identifier of the remote peer the identity was issued to.
    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Extensible claims carried alongside the fixed attributes.
    pub fn claims(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.claims
    }

    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }

    /// Copy of this identity bound to a different session.
    ///
    /// Used by authenticators when issuing a token for a verified identity.
    pub fn with_session(&self, session_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.session_id = Some(session_id.into());
        next
    }

    /// Copy of this identity bound to a different remote peer.
    pub fn with_remote_id(&self, remote_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.remote_id = Some(remote_id.into());
        next
    }
}

/// Builder for [`IdentityContext`].
#[derive(Debug, Clone)]
pub struct IdentityBuilder {
    inner: IdentityContext,
}

impl IdentityBuilder {
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.inner.user_name = name.into();
        self
    }

    pub fn user_level(mut self, level: i32) -> Self {
        self.inner.user_level = level;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.inner.session_id = Some(session_id.into());
        self
    }

    pub fn remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.inner.remote_id = Some(remote_id.into());
        self
    }

    /// Add a role. Duplicates collapse.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.inner.roles.insert(role.into());
        self
    }

    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.inner.email = Some(email.into());
        self
    }

    pub fn claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.inner.claims.insert(name.into(), value);
        self
    }

    pub fn build(self) -> IdentityContext {
        self.inner
    }
}
