use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, FieldErrors},
    users::{
        repo_types::{Role, User, UserUpdate},
        services::{is_valid_email, is_valid_name, MAX_NAME_LEN},
    },
};

/// Request body for `POST /users`.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let mut fields = FieldErrors::new();
        if self.email.is_empty() {
            fields.insert("email".into(), "email is required".into());
        } else if !is_valid_email(&self.email) {
            fields.insert("email".into(), "must be a valid email address".into());
        }
        if self.name.trim().is_empty() {
            fields.insert("name".into(), "name is required".into());
        } else if !is_valid_name(&self.name) {
            fields.insert("name".into(), format!("must be at most {MAX_NAME_LEN} characters"));
        }
        into_result(fields)
    }
}

/// Request body for `PUT`/`PATCH /users/:id`. Omitted or empty fields are left as they are.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UpdateUserRequest {
    /// Validates the non-empty fields and turns the request into a sparse update.
    pub fn into_update(self) -> Result<UserUpdate, ApiError> {
        let mut fields = FieldErrors::new();
        let email = self.email.filter(|e| !e.is_empty());
        let name = self.name.filter(|n| !n.is_empty());

        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                fields.insert("email".into(), "must be a valid email address".into());
            }
        }
        if let Some(name) = name.as_deref() {
            if !is_valid_name(name) {
                fields.insert(
                    "name".into(),
                    format!("must be 1 to {MAX_NAME_LEN} non-blank characters"),
                );
            }
        }
        let role = match self.role.as_deref().filter(|r| !r.is_empty()) {
            Some(raw) => match raw.parse::<Role>() {
                Ok(role) => Some(role),
                Err(_) => {
                    let allowed: Vec<String> = Role::ALL.iter().map(Role::to_string).collect();
                    fields.insert("role".into(), format!("must be one of: {}", allowed.join(", ")));
                    None
                }
            },
            None => None,
        };

        into_result(fields)?;
        Ok(UserUpdate { name, email, role })
    }
}

fn into_result(fields: FieldErrors) -> Result<(), ApiError> {
    if fields.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(fields))
    }
}

/// Response body for `GET /users`.
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub count: usize,
}
