use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of an account. Rows are written by the auth provider at
/// signup; this service only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

impl Profile {
    /// Placeholder used when a referenced account has no profile row.
    pub fn unknown(user_id: Uuid) -> Self {
        Self {
            user_id,
            name: "Unknown".to_string(),
            email: String::new(),
        }
    }
}
