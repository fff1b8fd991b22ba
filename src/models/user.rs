use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::iso;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
    #[serde(default)]
    pub avatar_url: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub const COLLECTION: &'static str = "users";
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Student,
    Instructor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Instructor => "instructor",
            UserRole::Admin => "admin",
        }
    }

    /// Role granted at signup. Only `instructor` may be requested; `admin`
    /// is never self-assigned.
    pub fn for_signup(requested: Option<&str>) -> Self {
        match requested.map(|r| r.trim().to_ascii_lowercase()) {
            Some(r) if r == "instructor" => UserRole::Instructor,
            _ => UserRole::Student,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Deserialize, Validate)]
pub struct SignupDto {
    #[serde(default)]
    #[validate(length(min = 1, message = "Missing fields"))]
    pub name: String,
    #[serde(default)]
    #[validate(
        length(min = 1, message = "Missing fields"),
        email(message = "Invalid email")
    )]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Missing fields"))]
    pub password: String,
    pub role: Option<String>,
}

impl SignupDto {
    /// Trims name and email so whitespace-only values count as missing.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.email = normalize_email(&self.email);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct SigninDto {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileDto {
    #[validate(length(min = 1, message = "Name cannot be empty"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub about_me: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// Full profile minus the credential hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub phone: String,
    pub location: String,
    pub about_me: String,
    pub avatar_url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name,
            email: user.email,
            role: user.role,
            phone: user.phone,
            location: user.location,
            about_me: user.about_me,
            avatar_url: user.avatar_url,
            created_at: iso(user.created_at),
            updated_at: iso(user.updated_at),
        }
    }
}
