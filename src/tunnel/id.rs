// Transfer identifiers
// (c) 2024 Ross Younger

use std::fmt::Display;

use uuid::Uuid;

/// Opaque identifier naming one pending transfer.
///
/// Identifiers we mint are 128-bit random values (UUID v4). Identifiers that arrive from a
/// receiver are accepted as-is; they only ever serve as registry lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferId(String);

impl TransferId {
    /// Mints a fresh random identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// String accessor
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TransferId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransferId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
