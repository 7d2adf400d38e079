use std::ops::{Deref, DerefMut};

use mongodb::bson::doc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::{Coll, Id};

/// Fixed identifier of the bootstrap administrator account. Its password is
/// generated at provisioning time, never fixed.
pub const DEFAULT_ADMIN_STUDENT_ID: &str = "admin";

/// Core user data, as stored in the database. A user is a voter unless
/// `is_admin` is set.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    /// Unique, immutable student ID.
    pub student_id: String,
    /// Display name.
    pub name: String,
    /// Argon2-encoded password hash; the cleartext password is never stored.
    pub password_hash: String,
    /// Flipped false-to-true exactly once, inside a successful ballot
    /// transaction; only an administrative reset reverts it.
    pub has_voted: bool,
    pub is_admin: bool,
}

impl UserCore {
    /// Create a new voter, hashing the given password.
    pub fn voter(
        student_id: impl Into<String>,
        name: impl Into<String>,
        password: &str,
    ) -> Result<Self> {
        Ok(Self {
            student_id: student_id.into(),
            name: name.into(),
            password_hash: hash_password(password)?,
            has_voted: false,
            is_admin: false,
        })
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // Unwrap safe because users are only ever created via `hash_password`,
        // so the stored hash is always well-formed.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap()
    }

    /// Replace the password hash with one for the given password.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }
}

/// Hash a password with a fresh random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt: [u8; 16] = rand::random();
    Ok(argon2::hash_encoded(
        password.as_bytes(),
        &salt,
        &argon2::Config::default(),
    )?)
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with their unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}

/// A [`User`] authenticated with voter rights.
pub struct Voter(pub User);

/// A [`User`] authenticated with administrator rights.
pub struct Admin(pub User);

impl Deref for Voter {
    type Target = User;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for Admin {
    type Target = User;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Ensure at least one administrator account exists, provisioning the
/// bootstrap one with a freshly generated password if not.
///
/// The credential is logged exactly once and is expected to be changed after
/// first login.
pub async fn ensure_admin_exists(users: &Coll<NewUser>) -> Result<()> {
    let existing = users.find_one(doc! {"is_admin": true}, None).await?;
    if existing.is_some() {
        return Ok(());
    }

    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    let mut admin = UserCore::voter(DEFAULT_ADMIN_STUDENT_ID, "Election Administrator", &password)?;
    admin.is_admin = true;
    users.insert_one(admin, None).await?;
    warn!(
        "No administrator account found; provisioned '{DEFAULT_ADMIN_STUDENT_ID}' \
         with password '{password}'. Change it after first login."
    );
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_verify() {
        let user = UserCore::voter("2019-12345", "Test Voter", "hunter2").unwrap();
        assert!(user.verify_password("hunter2"));
        assert!(!user.verify_password("hunter3"));
        // The cleartext must not be recoverable from the stored form.
        assert_ne!(user.password_hash, "hunter2");
    }

    #[test]
    fn passwords_can_change() {
        let mut user = UserCore::voter("2019-12345", "Test Voter", "old-password").unwrap();
        user.set_password("new-password").unwrap();
        assert!(!user.verify_password("old-password"));
        assert!(user.verify_password("new-password"));
    }
}
