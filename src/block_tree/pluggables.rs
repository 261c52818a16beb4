/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable Block Tree persistence.
//!
//! Block trees are kept in memory; [`save_to`](super::BlockTree::save_to) and
//! [`load_from`](super::BlockTree::load_from) move them into and out of any key-value store that
//! implements [`KVStore`]. Payload bodies are not part of a block tree's stored state: they are
//! handed back on load through a [`PayloadsProvider`].

use std::{collections::HashMap, convert::Infallible, fmt::Display};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::BorshDeserialize;

use crate::types::data_types::PayloadId;

use super::{
    persistence::StoredBlockIndex,
    variables::{self, concat},
};

pub trait KVStore: KVGet {
    type WriteBatch: WriteBatch;

    fn write(&mut self, wb: Self::WriteBatch);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Every key-value pair whose key starts with `prefix`, in any order.
    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /* ↓↓↓ Blocks ↓↓↓ */

    /// Every block of `chain`, keyed by the raw bytes of its hash.
    fn stored_blocks(&self, chain: &'static str) -> Result<Vec<(Vec<u8>, StoredBlockIndex)>, KVGetError> {
        let prefix = concat(&variables::BLOCKS, chain.as_bytes());
        self.prefix_iter(&prefix)
            .into_iter()
            .map(|(key, bytes)| {
                let hash = key[prefix.len()..].to_vec();
                match StoredBlockIndex::deserialize(&mut &*bytes) {
                    Ok(stored) => Ok((hash, stored)),
                    Err(err) => Err(KVGetError::DeserializeValueError {
                        key: Key::Block { chain, hash },
                        source: err,
                    }),
                }
            })
            .collect()
    }

    /* ↓↓↓ Tip ↓↓↓ */

    fn stored_tip<K: BorshDeserialize>(&self, chain: &'static str) -> Result<Option<K>, KVGetError> {
        match self.get(&variables::tip_key(chain)) {
            Some(bytes) => Ok(Some(K::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::Tip { chain },
                    source: err,
                }
            })?)),
            None => Ok(None),
        }
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

#[derive(Debug)]
pub enum Key {
    Block { chain: &'static str, hash: Vec<u8> },
    Tip { chain: &'static str },
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self {
            &Key::Block { chain, hash } => {
                write!(f, "{} Block {}", chain, STANDARD_NO_PAD.encode(hash))
            }
            &Key::Tip { chain } => write!(f, "{} Tip", chain),
        }
    }
}

/// Error when loading a block tree from a key-value store.
#[derive(Debug)]
pub enum BlockTreeError {
    /// Error when trying to get a value from the underlying [key value store][KVStore].
    KVGetError(KVGetError),

    /// The store holds blocks, but the tree to load them into is already bootstrapped.
    AlreadyBootstrapped { chain: &'static str },

    /// A stored block failed its stateless checks, does not connect to the blocks stored before it,
    /// or its payloads could not be restored.
    InvalidStoredBlock { chain: &'static str, hash: Vec<u8>, reason: String },

    /// A stored block carries a payload the [`PayloadsProvider`] does not know.
    PayloadNotFound { chain: &'static str, id: PayloadId },

    /// The active chain can not be moved to the stored tip, for example because the protecting
    /// tree lacks blocks the tip's chain refers to.
    InvalidStoredTip { chain: &'static str, hash: Vec<u8>, reason: String },
}

impl From<KVGetError> for BlockTreeError {
    fn from(value: KVGetError) -> Self {
        BlockTreeError::KVGetError(value)
    }
}

impl Display for BlockTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTreeError::KVGetError(KVGetError::DeserializeValueError { key, source }) => {
                write!(f, "can not deserialize {}: {}", key, source)
            }
            BlockTreeError::KVGetError(KVGetError::ValueExpectedButNotFound { key }) => {
                write!(f, "{} is missing", key)
            }
            BlockTreeError::AlreadyBootstrapped { chain } => {
                write!(f, "{} tree is already bootstrapped", chain)
            }
            BlockTreeError::InvalidStoredBlock { chain, hash, reason } => write!(
                f,
                "{} block {} can not be restored: {}",
                chain,
                STANDARD_NO_PAD.encode(hash),
                reason
            ),
            BlockTreeError::PayloadNotFound { chain, id } => {
                write!(f, "payload {} of a {} block is missing", id, chain)
            }
            BlockTreeError::InvalidStoredTip { chain, hash, reason } => write!(
                f,
                "{} tip {} can not be restored: {}",
                chain,
                STANDARD_NO_PAD.encode(hash),
                reason
            ),
        }
    }
}

impl std::error::Error for BlockTreeError {}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Looks up payload bodies by id when a block tree is loaded.
pub trait PayloadsProvider<P> {
    fn get_payload(&self, id: &PayloadId) -> Option<P>;
}

impl<P: Clone> PayloadsProvider<P> for HashMap<PayloadId, P> {
    fn get_payload(&self, id: &PayloadId) -> Option<P> {
        self.get(id).cloned()
    }
}

/// Provider that reads the payload bodies of `chain` written by
/// [`save_payloads_to`](super::BlockTree::save_payloads_to).
pub struct StoredPayloads<'a, K: KVGet> {
    kv: &'a K,
    chain: &'static str,
}

impl<'a, K: KVGet> StoredPayloads<'a, K> {
    pub fn new(kv: &'a K, chain: &'static str) -> StoredPayloads<'a, K> {
        StoredPayloads { kv, chain }
    }
}

impl<'a, K: KVGet, P: BorshDeserialize> PayloadsProvider<P> for StoredPayloads<'a, K> {
    fn get_payload(&self, id: &PayloadId) -> Option<P> {
        let bytes = self.kv.get(&variables::payload_key(self.chain, id.as_ref()))?;
        match P::deserialize(&mut &*bytes) {
            Ok(payload) => Some(payload),
            Err(err) => {
                log::warn!("{} payload {} can not be deserialized: {}", self.chain, id, err);
                None
            }
        }
    }
}

/// Provider for trees whose blocks carry no payloads.
pub struct NoPayloads;

impl PayloadsProvider<Infallible> for NoPayloads {
    fn get_payload(&self, _id: &PayloadId) -> Option<Infallible> {
        None
    }
}
