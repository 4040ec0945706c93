//! Blacklisted contacts.
//!
//! Checked by the dispatcher at admission; a blacklisted conversation never
//! reaches trigger matching.

use chatflow_common::util::normalize_contact_id;
use std::collections::HashSet;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct Blacklist {
    numbers: RwLock<HashSet<String>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blacklist seeded from configuration.
    pub fn from_numbers<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let numbers = numbers
            .into_iter()
            .map(|n| normalize_contact_id(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect();
        Self {
            numbers: RwLock::new(numbers),
        }
    }

    /// Block a contact. Returns false if it was already blocked or has no digits.
    pub async fn add(&self, number: &str) -> bool {
        let id = normalize_contact_id(number);
        if id.is_empty() {
            return false;
        }
        let added = self.numbers.write().await.insert(id.clone());
        if added {
            tracing::info!(conversation_id = %id, "Added to blacklist");
        }
        added
    }

    /// Unblock a contact. Returns false if it was not blocked.
    pub async fn remove(&self, number: &str) -> bool {
        let id = normalize_contact_id(number);
        let removed = self.numbers.write().await.remove(&id);
        if removed {
            tracing::info!(conversation_id = %id, "Removed from blacklist");
        }
        removed
    }

    pub async fn contains(&self, number: &str) -> bool {
        self.numbers
            .read()
            .await
            .contains(&normalize_contact_id(number))
    }

    /// Blocked ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut numbers: Vec<String> = self.numbers.read().await.iter().cloned().collect();
        numbers.sort();
        numbers
    }
}
