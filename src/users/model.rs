use serde::{Deserialize, Serialize};

/// A user row in the local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    /// Identity-provider subject, when the user came from the identity side
    pub external_id: Option<String>,
    pub email: String,
    pub name: String,
}

/// A user that has not been assigned an id yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: Option<String>,
    pub email: String,
    pub name: String,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: None,
            email: email.into(),
            name: name.into(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub(crate) fn with_id(self, id: i64) -> User {
        User {
            id,
            external_id: self.external_id,
            email: self.email,
            name: self.name,
        }
    }
}
