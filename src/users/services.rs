use std::{collections::BTreeMap, sync::Arc};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::users::{
    repo::{UserError, UserStore},
    repo_types::{User, UserUpdate},
};

pub(crate) const MAX_NAME_LEN: usize = 100;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty() && name.chars().count() <= MAX_NAME_LEN
}

/// Label used when counting the result of a store call.
fn outcome_label<T>(res: &Result<T, UserError>) -> &'static str {
    match res {
        Ok(_) => "success",
        Err(UserError::InvalidId) => "invalid_id",
        Err(UserError::NotFound) => "not_found",
        Err(UserError::InvalidEmail) => "invalid_email",
        Err(UserError::InvalidName) => "invalid_name",
        Err(UserError::EmailExists) => "duplicate",
    }
}

/// Per-operation outcome counters, keyed by `(operation, outcome)`.
#[derive(Debug, Default)]
pub struct UserOpCounters {
    counts: Mutex<BTreeMap<(&'static str, &'static str), u64>>,
}

impl UserOpCounters {
    pub fn record(&self, operation: &'static str, outcome: &'static str) {
        *self.counts.lock().entry((operation, outcome)).or_insert(0) += 1;
    }

    #[cfg(test)]
    pub fn get(&self, operation: &str, outcome: &str) -> u64 {
        self.counts
            .lock()
            .iter()
            .find(|((op, out), _)| *op == operation && *out == outcome)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Counters flattened to `"operation.outcome" -> count`.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|((op, out), n)| (format!("{op}.{out}"), *n))
            .collect()
    }
}

/// Wraps a store and counts every call's outcome.
pub struct AccountedStore<S> {
    inner: S,
    counters: Arc<UserOpCounters>,
}

impl<S: UserStore> AccountedStore<S> {
    pub fn new(inner: S, counters: Arc<UserOpCounters>) -> Self {
        Self { inner, counters }
    }

    fn observe<T>(&self, operation: &'static str, res: Result<T, UserError>) -> Result<T, UserError> {
        let outcome = outcome_label(&res);
        self.counters.record(operation, outcome);
        debug!(operation, outcome, "user store call");
        res
    }
}

impl<S: UserStore> UserStore for AccountedStore<S> {
    fn get_by_id(&self, id: &str) -> Result<User, UserError> {
        self.observe("get", self.inner.get_by_id(id))
    }

    fn get_all(&self) -> Vec<User> {
        let users = self.inner.get_all();
        self.counters.record("list", "success");
        debug!(operation = "list", count = users.len(), "user store call");
        users
    }

    fn create(&self, email: &str, name: &str) -> Result<User, UserError> {
        self.observe("create", self.inner.create(email, name))
    }

    fn update(&self, id: &str, changes: UserUpdate) -> Result<User, UserError> {
        self.observe("update", self.inner.update(id, changes))
    }

    fn delete(&self, id: &str) -> Result<(), UserError> {
        self.observe("delete", self.inner.delete(id))
    }

    fn count(&self) -> usize {
        self.inner.count()
    }
}
