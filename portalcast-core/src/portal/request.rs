//! Request handles, option dictionaries and portal object paths

use std::collections::BTreeMap;

/// Well-known bus name of the portal
pub const DESKTOP_BUS_NAME: &str = "org.freedesktop.portal.Desktop";
/// Object path of the portal
pub const DESKTOP_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";
/// ScreenCast interface
pub const SCREENCAST_INTERFACE: &str = "org.freedesktop.portal.ScreenCast";
/// Request interface carrying `Response`
pub const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";
/// Session interface carrying `Closed`
pub const SESSION_INTERFACE: &str = "org.freedesktop.portal.Session";
/// Base path of request objects
pub const REQUEST_BASE_PATH: &str = "/org/freedesktop/portal/desktop/request";

const TOKEN_PREFIX: &str = "portalcast";

/// Fresh handle token, unique per process and hard to guess
pub fn new_token() -> String {
    format!("{}_{}", TOKEN_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Turn a unique connection name into a path element
///
/// `:1.42` becomes `1_42`.
pub fn sanitize_sender(unique_name: &str) -> String {
    unique_name.trim_start_matches(':').replace('.', "_")
}

/// Identity of one in-flight portal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHandle {
    sender: String,
    token: String,
}

impl RequestHandle {
    /// New handle for a request sent from `unique_name`
    pub fn new(unique_name: &str) -> Self {
        Self::with_token(unique_name, new_token())
    }

    /// Handle with an explicit token
    pub fn with_token(unique_name: &str, token: impl Into<String>) -> Self {
        Self {
            sender: sanitize_sender(unique_name),
            token: token.into(),
        }
    }

    /// The `handle_token` option value
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Object path the portal will emit `Response` on
    pub fn path(&self) -> String {
        format!("{}/{}/{}", REQUEST_BASE_PATH, self.sender, self.token)
    }
}

/// Value in a request's `a{sv}` options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Str(String),
    U32(u32),
    Bool(bool),
}

/// Options dictionary sent with a portal request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions(BTreeMap<&'static str, OptionValue>);

impl RequestOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string option
    pub fn str(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(key, OptionValue::Str(value.into()));
        self
    }

    /// Add a u32 option
    pub fn u32(mut self, key: &'static str, value: u32) -> Self {
        self.0.insert(key, OptionValue::U32(value));
        self
    }

    /// Add a boolean option
    pub fn bool(mut self, key: &'static str, value: bool) -> Self {
        self.0.insert(key, OptionValue::Bool(value));
        self
    }

    /// Look up an option
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Whether an option is present
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &OptionValue)> {
        self.0.iter().map(|(key, value)| (*key, value))
    }
}
