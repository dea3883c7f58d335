//! Object revisions and transaction records
//!
//! An [`ObjectState`] is one immutable revision of one object: the payload
//! bytes a transaction committed for an oid, keyed by (oid, tid). The states
//! of one oid form a strictly tid-ordered chain linked through `prev_tid`.
//! A [`TransactionRecord`] is the durable footprint of one committed
//! transaction.

use crate::types::{Oid, Tid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One immutable revision of an object
///
/// Created at transaction finish, destroyed only by packing. The payload is
/// opaque to the engine: serialization is owned by the surrounding
/// persistence framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectState {
    /// Object this revision belongs to
    pub oid: Oid,
    /// Transaction that committed this revision
    pub tid: Tid,
    /// Tid of the previous revision, None for the first revision
    pub prev_tid: Option<Tid>,
    /// Serialized object payload
    pub data: Arc<[u8]>,
}

impl ObjectState {
    /// Build a revision from its parts
    pub fn new(oid: Oid, tid: Tid, prev_tid: Option<Tid>, data: impl Into<Arc<[u8]>>) -> Self {
        ObjectState {
            oid,
            tid,
            prev_tid,
            data: data.into(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Caller-supplied metadata recorded with a committed transaction
///
/// Mirrors the transaction metadata table: a user identity, a free-form
/// description, and an opaque extension payload owned by the framework.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Identity of the committing user, empty when anonymous
    pub user: String,
    /// Human-readable description of the change
    pub description: String,
    /// Opaque framework extension data
    pub extension: Vec<u8>,
}

impl TransactionMetadata {
    /// Metadata with a description and nothing else
    pub fn described(description: impl Into<String>) -> Self {
        TransactionMetadata {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Durable record of one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Tid this transaction committed as
    pub tid: Tid,
    /// Metadata supplied at finish
    pub metadata: TransactionMetadata,
    /// Oids whose state this transaction changed, ascending
    pub changed: Vec<Oid>,
}

/// Summary row describing one revision, as reported by history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionInfo {
    /// Transaction that committed the revision
    pub tid: Tid,
    /// Payload size in bytes
    pub len: usize,
    /// Previous revision's tid, None for the first
    pub prev_tid: Option<Tid>,
}

/// Mapping row tying a large binary payload to a revision
///
/// The engine records only this mapping; blob file lifecycle is owned by an
/// external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Backend-meaningful locator for the blob payload
    pub locator: String,
    /// Payload size in bytes
    pub len: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_holds_payload() {
        let state = ObjectState::new(
            Oid::from_u64(7),
            Tid::from_u64(100),
            None,
            b"payload".to_vec(),
        );
        assert_eq!(state.len(), 7);
        assert!(!state.is_empty());
        assert_eq!(&state.data[..], b"payload");
    }

    #[test]
    fn test_state_chain_link() {
        let first = ObjectState::new(Oid::ROOT, Tid::from_u64(10), None, Vec::new());
        let second = ObjectState::new(
            Oid::ROOT,
            Tid::from_u64(20),
            Some(first.tid),
            b"x".to_vec(),
        );
        assert_eq!(second.prev_tid, Some(Tid::from_u64(10)));
        assert!(first.is_empty());
    }

    #[test]
    fn test_metadata_described() {
        let meta = TransactionMetadata::described("initial import");
        assert_eq!(meta.description, "initial import");
        assert!(meta.user.is_empty());
        assert!(meta.extension.is_empty());
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let record = TransactionRecord {
            tid: Tid::from_u64(42),
            metadata: TransactionMetadata::described("test"),
            changed: vec![Oid::from_u64(1), Oid::from_u64(2)],
        };
        let text = serde_json::to_string(&record).unwrap();
        let back: TransactionRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
