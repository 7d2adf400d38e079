use serde::{Deserialize, Serialize};

/// Credentials presented at login.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub student_id: String,
    pub password: String,
}

/// A new voter registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub student_id: String,
    pub name: String,
    pub password: String,
}

/// A password change for the signed-in user.
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordChangeRequest {
    pub old_password: String,
    pub new_password: String,
}

/// What the presentation layer needs to know about a signed-in user.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub has_voted: bool,
    pub is_admin: bool,
}
