// Authentication types

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Claims decoded from an access token
///
/// Every field is optional: tokens minted by the refresh endpoint may omit
/// the user and role fields that the login token carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, usually the user's email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Unique user id
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Numeric role id; some issuers send it as a string
    #[serde(
        default,
        deserialize_with = "role_id_from_number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub role_id: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Expiry, epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Check if the token expires within `threshold_secs` of `now`
    ///
    /// Claims without an expiry are treated as expired.
    pub fn is_expiring_at(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        match self.expires_at() {
            None => true,
            Some(exp) => now >= exp - Duration::seconds(threshold_secs),
        }
    }

    /// Fill user and role fields missing here from `other`
    pub fn carry_over_identity(&mut self, other: &Claims) {
        if self.uuid.is_none() {
            self.uuid = other.uuid.clone();
        }
        if self.role_id.is_none() {
            self.role_id = other.role_id;
        }
        if self.role_name.is_none() {
            self.role_name = other.role_name.clone();
        }
    }

    /// Best available identity for display
    pub fn subject(&self) -> Option<&str> {
        self.email.as_deref().or(self.sub.as_deref())
    }
}

fn role_id_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RoleIdRepr {
        Number(u32),
        Text(String),
    }

    match Option::<RoleIdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RoleIdRepr::Number(id)) => Ok(Some(id)),
        Some(RoleIdRepr::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid role_id: {:?}", text))),
    }
}

/// User roles as assigned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Guest,
}

impl Role {
    /// Map a server role id; anything unknown is a guest
    pub fn from_id(role_id: Option<u32>) -> Self {
        match role_id {
            Some(1) => Role::Admin,
            Some(2) => Role::Teacher,
            Some(3) => Role::Student,
            _ => Role::Guest,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            Role::Admin => 1,
            Role::Teacher => 2,
            Role::Student => 3,
            Role::Guest => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
            Role::Guest => "Guest",
        }
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    pub fn is_teacher(self) -> bool {
        self == Role::Teacher
    }

    pub fn is_student(self) -> bool {
        self == Role::Student
    }

    pub fn is_guest(self) -> bool {
        self == Role::Guest
    }

    /// Teachers and admins may manage classes and grade work
    pub fn has_teacher_permissions(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }

    pub fn has_admin_permissions(self) -> bool {
        self == Role::Admin
    }
}

/// Access token together with the claims decoded from it
///
/// Kept as one value so a token is never paired with claims from
/// another session.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub email: Option<String>,
    pub claims: Claims,
}

/// Refresh request body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response body
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
