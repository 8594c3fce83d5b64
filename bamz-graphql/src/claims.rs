//! Per-request role resolution.
//!
//! Verified identity claims are projected into Postgres session settings
//! (`jwt.<domain>.<claim>`) and pick the active database role. Claim keys
//! become part of a setting name, so anything that is not a plain
//! identifier is dropped.

use bamz_tenancy::ANONYMOUS_ROLE;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Trust domain of platform-level identities.
pub const PLATFORM_DOMAIN: &str = "bamz";

/// Longest claim key projected into a setting name.
pub const MAX_CLAIM_KEY_LEN: usize = 52;

static CLAIM_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid claim key pattern"));

/// Whether `key` may be projected into a session setting name.
pub fn is_valid_claim_key(key: &str) -> bool {
    key.len() <= MAX_CLAIM_KEY_LEN && CLAIM_KEY.is_match(key)
}

/// Verified claims of a request, one claim set per trust domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestIdentity {
    pub tokens: BTreeMap<String, Map<String, Value>>,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub host: Option<String>,
}

impl RequestIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the claims verified for `domain`.
    pub fn with_claims(mut self, domain: impl Into<String>, claims: Map<String, Value>) -> Self {
        self.tokens.insert(domain.into(), claims);
        self
    }

    /// Shorthand for a claim set holding only `role`.
    pub fn with_role(self, domain: impl Into<String>, role: impl Into<String>) -> Self {
        let mut claims = Map::new();
        claims.insert("role".to_string(), Value::String(role.into()));
        self.with_claims(domain, claims)
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// `role` claim of `domain`, when it is a string.
    pub fn role(&self, domain: &str) -> Option<&str> {
        self.tokens
            .get(domain)
            .and_then(|claims| claims.get("role"))
            .and_then(Value::as_str)
    }

    /// Whether the request was made from a plugin's own page.
    pub fn from_plugin_page(&self) -> bool {
        self.referer
            .as_deref()
            .map(|referer| referer_path(referer, self.origin.as_deref()))
            .is_some_and(|path| path.starts_with("/plugin/"))
    }
}

fn referer_path<'a>(referer: &'a str, origin: Option<&str>) -> &'a str {
    if let Some(rest) = origin.and_then(|origin| referer.strip_prefix(origin)) {
        return rest;
    }
    match referer.find("://") {
        Some(scheme) => {
            let after = &referer[scheme + 3..];
            after.find('/').map_or("", |slash| &after[slash..])
        }
        None => referer,
    }
}

/// Session settings applied to the connection running a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgSettings {
    values: BTreeMap<String, String>,
}

impl PgSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Active database role.
    pub fn role(&self) -> &str {
        self.get("role").unwrap_or(ANONYMOUS_ROLE)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn project(&mut self, domain: &str, claims: &Map<String, Value>) {
        for (key, value) in claims {
            if value.is_null() || !is_valid_claim_key(key) {
                continue;
            }
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.set(format!("jwt.{}.{}", domain, key), value);
        }
    }
}

/// Settings for a request against tenant `code`.
///
/// The platform role applies first; a tenant role overrides it unless the
/// request comes from a plugin page. `force_role` overrides both.
pub fn resolve_tenant_settings(
    identity: &RequestIdentity,
    code: &str,
    force_role: Option<&str>,
) -> PgSettings {
    let mut settings = PgSettings::new();
    for (domain, claims) in &identity.tokens {
        settings.project(domain, claims);
    }

    let mut role = ANONYMOUS_ROLE;
    if let Some(platform) = identity.role(PLATFORM_DOMAIN) {
        role = platform;
    }
    if let Some(tenant) = identity.role(code)
        && !identity.from_plugin_page()
    {
        role = tenant;
    }
    if let Some(forced) = force_role {
        role = forced;
    }

    settings.set("role", role);
    if let Some(host) = &identity.host {
        settings.set("req.host", host.clone());
    }
    settings
}

/// Settings for a request against the platform itself.
pub fn resolve_platform_settings(identity: &RequestIdentity) -> PgSettings {
    let mut settings = PgSettings::new();
    if let Some(claims) = identity.tokens.get(PLATFORM_DOMAIN) {
        settings.project(PLATFORM_DOMAIN, claims);
    }
    settings.set("role", identity.role(PLATFORM_DOMAIN).unwrap_or(ANONYMOUS_ROLE));
    if let Some(host) = &identity.host {
        settings.set("req.host", host.clone());
    }
    settings
}
