//! Password verification and permission resolution.
//!
//! Passwords are compared only through their SHA-256 digest. Nothing here
//! holds login state: a [`User`] is rebuilt from credentials on every call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::Action;
use crate::store::{Account, AccountStore};
use crate::{GradebookError, Result};

/// Access level of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Every action.
    Admin,
    /// Read-only access, own record and own password.
    User,
    /// A stored role that maps to neither; grants nothing.
    #[serde(other)]
    Unknown,
}

impl Permission {
    /// Resolves a stored role string.
    pub fn from_role(role: &str) -> Permission {
        match role {
            "admin" => Permission::Admin,
            "user" => Permission::User,
            _ => Permission::Unknown,
        }
    }

    /// The role string stored for this permission.
    pub fn as_role(self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::User => "user",
            Permission::Unknown => "unknown",
        }
    }

    /// Whether this permission may invoke `action` at all.
    ///
    /// Record-level restrictions (a user may only view their own record)
    /// are checked by the dispatcher.
    pub fn permits(self, action: Action) -> bool {
        match self {
            Permission::Admin => action != Action::Unknown,
            Permission::User => matches!(
                action,
                Action::Login
                    | Action::GetStudent
                    | Action::ListStudents
                    | Action::GetStatistics
                    | Action::ChangePassword
            ),
            Permission::Unknown => false,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Login name.
    pub username: String,
    /// Resolved access level.
    pub permission: Permission,
}

/// Hashes a password to lowercase hex SHA-256.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies credentials and changes passwords against an [`AccountStore`].
#[derive(Clone)]
pub struct AuthService<S: AccountStore> {
    store: S,
}

impl<S: AccountStore> AuthService<S> {
    /// Creates a service over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Checks `password` against the stored hash for `username`.
    ///
    /// An unknown user and a wrong password are indistinguishable to the
    /// caller. The returned user may carry [`Permission::Unknown`]; callers
    /// must treat that as no access.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let account = self
            .store
            .account(username)?
            .ok_or(GradebookError::InvalidCredentials)?;
        if account.password_hash != hash_password(password) {
            return Err(GradebookError::InvalidCredentials);
        }
        Ok(User {
            username: account.username,
            permission: Permission::from_role(&account.role),
        })
    }

    /// Replaces a password after re-verifying the old one.
    pub fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<User> {
        let user = match self.authenticate(username, old_password) {
            Ok(user) => user,
            Err(GradebookError::InvalidCredentials) => {
                return Err(GradebookError::InvalidOldPassword)
            }
            Err(e) => return Err(e),
        };
        if user.permission == Permission::Unknown {
            return Err(GradebookError::PermissionDenied(
                Action::ChangePassword.name().to_owned(),
            ));
        }
        if new_password.is_empty() {
            return Err(GradebookError::InvalidField {
                field: "new_password".to_owned(),
                expected: "must not be empty",
            });
        }
        if !self
            .store
            .set_password_hash(username, hash_password(new_password))?
        {
            return Err(GradebookError::AccountNotFound(username.to_owned()));
        }
        Ok(user)
    }

    /// Creates or replaces an account.
    pub fn create_account(
        &self,
        username: &str,
        password: &str,
        permission: Permission,
    ) -> Result<()> {
        self.store.put_account(Account {
            username: username.to_owned(),
            password_hash: hash_password(password),
            role: permission.as_role().to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> AuthService<MemoryStore> {
        let auth = AuthService::new(MemoryStore::new());
        auth.create_account("admin", "secret", Permission::Admin)
            .unwrap();
        auth.create_account("s100", "pw", Permission::User).unwrap();
        auth
    }

    #[test]
    fn hash_is_sha256_hex() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn authenticate_resolves_permission() {
        let auth = service();
        let user = auth.authenticate("admin", "secret").unwrap();
        assert_eq!(user.permission, Permission::Admin);
        let user = auth.authenticate("s100", "pw").unwrap();
        assert_eq!(user.permission, Permission::User);
    }

    #[test]
    fn wrong_password_and_unknown_user_fail_alike() {
        let auth = service();
        assert!(matches!(
            auth.authenticate("admin", "wrong"),
            Err(GradebookError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.authenticate("ghost", "secret"),
            Err(GradebookError::InvalidCredentials)
        ));
    }

    #[test]
    fn odd_role_grants_nothing() {
        let store = MemoryStore::new();
        store
            .put_account(Account {
                username: "odd".to_owned(),
                password_hash: hash_password("pw"),
                role: "superuser".to_owned(),
            })
            .unwrap();
        let auth = AuthService::new(store);
        let user = auth.authenticate("odd", "pw").unwrap();
        assert_eq!(user.permission, Permission::Unknown);
        for action in Action::CATALOG {
            assert!(!user.permission.permits(action));
        }
        assert!(matches!(
            auth.change_password("odd", "pw", "new"),
            Err(GradebookError::PermissionDenied(_))
        ));
    }

    #[test]
    fn user_permission_is_read_only() {
        assert!(Permission::User.permits(Action::ListStudents));
        assert!(Permission::User.permits(Action::ChangePassword));
        assert!(!Permission::User.permits(Action::AddStudent));
        assert!(!Permission::User.permits(Action::DeleteStudent));
        assert!(!Permission::User.permits(Action::UpdateStudent));
        assert!(Permission::Admin.permits(Action::DeleteStudent));
    }

    #[test]
    fn change_password_requires_old_password() {
        let auth = service();
        assert!(matches!(
            auth.change_password("s100", "nope", "next"),
            Err(GradebookError::InvalidOldPassword)
        ));
        auth.authenticate("s100", "pw").unwrap();

        auth.change_password("s100", "pw", "next").unwrap();
        assert!(auth.authenticate("s100", "pw").is_err());
        auth.authenticate("s100", "next").unwrap();
    }

    #[test]
    fn permission_wire_form() {
        assert_eq!(serde_json::to_string(&Permission::Admin).unwrap(), "\"admin\"");
        let p: Permission = serde_json::from_str("\"root\"").unwrap();
        assert_eq!(p, Permission::Unknown);
    }
}
