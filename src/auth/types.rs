// Authentication types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Principal type a credential set or refresh call applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Platform administrator, stored under `kp_tokens`
    Admin,

    /// Branch/collections employee, stored under `kp_employee_tokens`
    Employee,
}

impl Scope {
    /// Storage key holding this scope's credential set
    pub fn storage_key(self) -> &'static str {
        match self {
            Scope::Admin => "kp_tokens",
            Scope::Employee => "kp_employee_tokens",
        }
    }

    /// Refresh endpoint, relative to the base URL
    pub fn refresh_path(self) -> &'static str {
        match self {
            Scope::Admin => "/auth/refresh",
            Scope::Employee => "/employee/auth/refresh",
        }
    }

    /// Login endpoint, relative to the base URL
    pub fn login_path(self) -> &'static str {
        match self {
            Scope::Admin => "/auth/login",
            Scope::Employee => "/employee/auth/login",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Admin => "admin",
            Scope::Employee => "employee",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored credential set
///
/// Fields written at login other than the two tokens are kept in `extra`
/// and written back unchanged when the access token is replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    #[serde(default, deserialize_with = "lenient_token")]
    pub access_token: String,

    #[serde(default, deserialize_with = "lenient_token")]
    pub refresh_token: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CredentialSet {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            extra: Map::new(),
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Same set with the access token replaced
    pub fn with_access_token(&self, access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..self.clone()
        }
    }
}

/// Token field that reads `null` or any non-string value as empty
fn lenient_token<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(token) => Ok(token),
        _ => Ok(String::new()),
    }
}

/// Credential set active for authorization
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Admin(CredentialSet),
    Employee(CredentialSet),
    None,
}

impl Session {
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Session::Admin(_) => Some(Scope::Admin),
            Session::Employee(_) => Some(Scope::Employee),
            Session::None => None,
        }
    }

    pub fn credentials(&self) -> Option<&CredentialSet> {
        match self {
            Session::Admin(creds) | Session::Employee(creds) => Some(creds),
            Session::None => None,
        }
    }

    /// Bearer token to attach, if any
    pub fn access_token(&self) -> Option<&str> {
        match self {
            Session::Admin(creds) | Session::Employee(creds) => Some(creds.access_token.as_str()),
            Session::None => None,
        }
    }
}

/// Refresh request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// `{ data: { accessToken, refreshToken } }` envelope returned by auth endpoints
#[derive(Debug, Default, Deserialize)]
pub struct TokenEnvelope {
    #[serde(default)]
    pub data: Option<TokenPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenEnvelope {
    /// Non-empty `data.accessToken`
    pub fn access_token(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.access_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Non-empty `data.refreshToken`
    pub fn refresh_token(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.refresh_token.as_deref())
            .filter(|t| !t.is_empty())
    }
}
