//! Response cookies.
//!
//! The wire form of a cookie is produced by the [`cookie`] crate once, when the cookie is
//! set, and stored next to the structured fields.

use std::time::SystemTime;

use cookie::time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        }
    }
}

/// Serialization attributes of a [`Cookie`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    /// lifetime in seconds
    pub max_age: Option<i64>,
    pub expires: Option<SystemTime>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    options: CookieOptions,
    serialized: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, options: CookieOptions) -> Self {
        let (name, value) = (name.into(), value.into());
        let serialized = serialize(&name, &value, &options);
        Self { name, value, options, serialized }
    }

    /// A cookie that instructs the client to drop `name`.
    pub fn expired(name: impl Into<String>, options: CookieOptions) -> Self {
        Self::new(name, "", options.max_age(0).expires(SystemTime::UNIX_EPOCH))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// The `Set-Cookie` header value.
    pub fn serialized(&self) -> &str {
        &self.serialized
    }
}

fn serialize(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut builder = cookie::Cookie::build((name.to_owned(), value.to_owned()));
    if let Some(path) = &options.path {
        builder = builder.path(path.clone());
    }
    if let Some(domain) = &options.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(seconds) = options.max_age {
        builder = builder.max_age(Duration::seconds(seconds));
    }
    if let Some(at) = options.expires {
        builder = builder.expires(OffsetDateTime::from(at));
    }
    if options.http_only {
        builder = builder.http_only(true);
    }
    if options.secure {
        builder = builder.secure(true);
    }
    if let Some(same_site) = options.same_site {
        builder = builder.same_site(same_site.into());
    }
    builder.build().to_string()
}
