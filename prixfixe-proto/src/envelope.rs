//! Transaction and envelope data carried between `MAIL FROM` and DATA completion.

use chrono::{DateTime, Utc};

/// Mutable record accumulated across one mail exchange, from accepted
/// `MAIL FROM` through DATA completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub reverse_path: Option<String>,
    pub recipients: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl Transaction {
    #[must_use]
    pub fn new(reverse_path: Option<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            reverse_path,
            recipients: Vec::new(),
            started_at,
        }
    }
}

/// The envelope half of a completed DATA phase: sender and non-empty
/// recipient list, independent of the body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub reverse_path: Option<String>,
    pub recipients: Vec<String>,
}

impl From<Transaction> for Envelope {
    fn from(txn: Transaction) -> Self {
        Self {
            reverse_path: txn.reverse_path,
            recipients: txn.recipients,
        }
    }
}

/// The complete output of a successful DATA phase, handed to the host's
/// message handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub envelope: Envelope,
    pub body: Vec<u8>,
}
