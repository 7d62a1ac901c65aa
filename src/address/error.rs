use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("malformed address: {}", reasons.join("; "))]
    Malformed { reasons: Vec<String> },
}

impl AddressError {
    pub(crate) fn malformed(reasons: Vec<String>) -> Self {
        Self::Malformed { reasons }
    }

    /// Short human-readable reason, used as the outcome reason.
    pub fn reason(&self) -> String {
        match self {
            Self::Empty => "address is empty".to_string(),
            Self::Malformed { reasons } => reasons
                .first()
                .cloned()
                .unwrap_or_else(|| "malformed address".to_string()),
        }
    }
}
