use serde::{Deserialize, Serialize};

/// A person; deduped on `email` by the persistence port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub name: String,
}
