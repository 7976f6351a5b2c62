use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::users::repo_types::{Role, User, UserUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("invalid user ID")]
    InvalidId,
    #[error("user not found")]
    NotFound,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("name is required")]
    InvalidName,
    #[error("email already exists")]
    EmailExists,
}

/// Operations the HTTP layer needs from a user store.
///
/// Every returned [`User`] is an owned copy; changing it never touches the
/// stored record.
pub trait UserStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> Result<User, UserError>;
    fn get_all(&self) -> Vec<User>;
    fn create(&self, email: &str, name: &str) -> Result<User, UserError>;
    fn update(&self, id: &str, changes: UserUpdate) -> Result<User, UserError>;
    fn delete(&self, id: &str) -> Result<(), UserError>;
    fn count(&self) -> usize;
}

/// In-memory user directory.
///
/// A single lock covers the whole record map. Writers hold it across the
/// email uniqueness scan and the commit, so two concurrent creates for the
/// same email can never both succeed.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory preloaded with two demo accounts.
    pub fn with_demo_users() -> Self {
        let now = OffsetDateTime::now_utc();
        let seed = [
            ("john.doe@example.com", "John Doe", Role::Admin, now - Duration::days(1)),
            ("jane.smith@example.com", "Jane Smith", Role::User, now - Duration::days(2)),
        ];
        let users = seed
            .into_iter()
            .map(|(email, name, role, created_at)| {
                let id = Uuid::new_v4().to_string();
                let user = User {
                    id: id.clone(),
                    email: email.into(),
                    name: name.into(),
                    role,
                    created_at,
                };
                (id, user)
            })
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }
}

fn email_taken(users: &HashMap<String, User>, email: &str, except: Option<&str>) -> bool {
    users
        .values()
        .any(|u| u.email == email && Some(u.id.as_str()) != except)
}

impl UserStore for UserDirectory {
    fn get_by_id(&self, id: &str) -> Result<User, UserError> {
        if id.is_empty() {
            return Err(UserError::InvalidId);
        }
        self.users.read().get(id).cloned().ok_or(UserError::NotFound)
    }

    fn get_all(&self) -> Vec<User> {
        self.users.read().values().cloned().collect()
    }

    fn create(&self, email: &str, name: &str) -> Result<User, UserError> {
        if email.is_empty() {
            return Err(UserError::InvalidEmail);
        }
        if name.is_empty() {
            return Err(UserError::InvalidName);
        }

        let mut users = self.users.write();
        if email_taken(&users, email, None) {
            return Err(UserError::EmailExists);
        }

        let mut id = Uuid::new_v4().to_string();
        while users.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        let user = User {
            id: id.clone(),
            email: email.to_string(),
            name: name.to_string(),
            role: Role::default(),
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    fn update(&self, id: &str, changes: UserUpdate) -> Result<User, UserError> {
        if id.is_empty() {
            return Err(UserError::InvalidId);
        }

        let UserUpdate { name, email, role } = changes;
        let name = name.filter(|n| !n.is_empty());
        let email = email.filter(|e| !e.is_empty());

        let mut users = self.users.write();
        if !users.contains_key(id) {
            return Err(UserError::NotFound);
        }
        // all checks happen before the first field is written
        if let Some(email) = email.as_deref() {
            if email_taken(&users, email, Some(id)) {
                return Err(UserError::EmailExists);
            }
        }

        let user = users.get_mut(id).ok_or(UserError::NotFound)?;
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(role) = role {
            user.role = role;
        }
        Ok(user.clone())
    }

    fn delete(&self, id: &str) -> Result<(), UserError> {
        if id.is_empty() {
            return Err(UserError::InvalidId);
        }
        self.users
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or(UserError::NotFound)
    }

    fn count(&self) -> usize {
        self.users.read().len()
    }
}
