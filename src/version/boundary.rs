//! File boundary values and the pluggable extraction of their auxiliary data.
//!
//! Each file remembers a smallest and largest boundary. Besides the internal
//! key, a boundary carries:
//!
//! - the min (smallest) or max (largest) sequence number seen in the file,
//! - tagged user values, ordered by the extractor that produced them,
//! - an optional user frontier, an out-of-band progress marker such as the
//!   replicated op id and hybrid time covered by the file.
//!
//! The version edit code never interprets user values or frontiers; it only
//! merges, encodes and compares them through the traits below.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::types::{InternalKey, OpId, SequenceNumber, MAX_SEQUENCE_NUMBER};
use crate::util::coding::{decode_varint64, decode_varint_signed, encode_varint64, encode_varint_signed};
use crate::{Error, Result};

/// Tag identifying the kind of a user boundary value.
pub type UserBoundaryTag = u32;

/// Which side of a boundary pair an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateUserValueType {
    Smallest,
    Largest,
}

/// Which boundaries [`FileMetaData::update_boundaries_except_key`] refreshes.
///
/// [`FileMetaData::update_boundaries_except_key`]: super::FileMetaData::update_boundaries_except_key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateBoundariesType {
    All,
    Smallest,
    Largest,
}

impl UpdateBoundariesType {
    pub(crate) fn includes_smallest(self) -> bool {
        self != UpdateBoundariesType::Largest
    }

    pub(crate) fn includes_largest(self) -> bool {
        self != UpdateBoundariesType::Smallest
    }
}

/// A tagged value derived from the keys of a file.
///
/// Values with the same tag must be totally ordered by [`compare`].
///
/// [`compare`]: UserBoundaryValue::compare
pub trait UserBoundaryValue: fmt::Debug + Send + Sync {
    /// Tag of this value.
    fn tag(&self) -> UserBoundaryTag;

    /// Persisted form, handed back to [`BoundaryValuesExtractor::decode`].
    fn encode(&self) -> Bytes;

    /// Compare with another value of the same tag.
    fn compare(&self, other: &dyn UserBoundaryValue) -> Ordering;
}

/// Shared handle to a user boundary value.
pub type UserBoundaryValueRef = Arc<dyn UserBoundaryValue>;

/// User values of one boundary, at most one per tag.
pub type UserBoundaryValues = Vec<UserBoundaryValueRef>;

/// Merge `value` into `values`, keeping the smaller (or larger) one per tag.
pub fn update_user_value(
    values: &mut UserBoundaryValues,
    value: &UserBoundaryValueRef,
    kind: UpdateUserValueType,
) {
    let tag = value.tag();
    match values.iter_mut().find(|existing| existing.tag() == tag) {
        None => values.push(Arc::clone(value)),
        Some(existing) => {
            let replace = match kind {
                UpdateUserValueType::Smallest => value.compare(&**existing) == Ordering::Less,
                UpdateUserValueType::Largest => value.compare(&**existing) == Ordering::Greater,
            };
            if replace {
                *existing = Arc::clone(value);
            }
        }
    }
}

/// Out-of-band progress marker carried by file boundaries.
pub trait UserFrontier: fmt::Debug + Send + Sync {
    /// Clone into a new box.
    fn clone_box(&self) -> Box<dyn UserFrontier>;

    /// Widen this frontier by `rhs` towards the smallest or largest side.
    fn update(&mut self, rhs: &dyn UserFrontier, kind: UpdateUserValueType);

    /// Persisted form, handed back to [`BoundaryValuesExtractor::decode_frontier`].
    fn encode(&self) -> Bytes;

    /// Structured rendering for diagnostic dumps.
    fn to_json(&self) -> serde_json::Value;

    /// Downcast support for [`update`](UserFrontier::update) implementations.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn UserFrontier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Merge `source` into `target`, taking a copy when `target` is unset.
pub fn update_frontier(
    target: &mut Option<Box<dyn UserFrontier>>,
    source: Option<&dyn UserFrontier>,
    kind: UpdateUserValueType,
) {
    let Some(source) = source else {
        return;
    };
    match target {
        Some(existing) => existing.update(source, kind),
        None => *target = Some(source.clone_box()),
    }
}

/// Strategy that derives and decodes boundary auxiliary values.
///
/// Supplied both when a file's boundaries are built from its keys and when
/// persisted edits are decoded, so the edit format stays independent of the
/// concrete value types.
pub trait BoundaryValuesExtractor: Send + Sync {
    /// Decode a persisted user value. `Ok(None)` drops a tag the extractor
    /// does not know.
    fn decode(&self, tag: UserBoundaryTag, data: &[u8]) -> Result<Option<UserBoundaryValueRef>>;

    /// Derive user values for an entry written to a file.
    fn extract(&self, user_key: &[u8], value: &[u8], values: &mut UserBoundaryValues) -> Result<()>;

    /// Decode a persisted user frontier.
    fn decode_frontier(&self, data: &[u8]) -> Result<Box<dyn UserFrontier>>;
}

/// Auxiliary values of a boundary, without the key.
///
/// This is what callers pass as the source when widening a file's bounds.
#[derive(Debug, Clone)]
pub struct BoundaryValuesBase {
    pub seqno: SequenceNumber,
    pub user_values: UserBoundaryValues,
    pub user_frontier: Option<Box<dyn UserFrontier>>,
}

impl BoundaryValuesBase {
    /// Source carrying only a sequence number.
    pub fn with_seqno(seqno: SequenceNumber) -> Self {
        Self {
            seqno,
            user_values: Vec::new(),
            user_frontier: None,
        }
    }
}

/// Smallest or largest boundary of a file.
#[derive(Debug, Clone)]
pub struct FileBoundaryValues {
    /// Boundary key; `None` until the first key reaches the file.
    pub key: Option<InternalKey>,
    pub seqno: SequenceNumber,
    pub user_values: UserBoundaryValues,
    pub user_frontier: Option<Box<dyn UserFrontier>>,
}

impl FileBoundaryValues {
    /// Boundary that any seqno will narrow on the smallest side.
    pub fn smallest_unset() -> Self {
        Self::empty(MAX_SEQUENCE_NUMBER)
    }

    /// Boundary that any seqno will widen on the largest side.
    pub fn largest_unset() -> Self {
        Self::empty(0)
    }

    fn empty(seqno: SequenceNumber) -> Self {
        Self {
            key: None,
            seqno,
            user_values: Vec::new(),
            user_frontier: None,
        }
    }

    /// Boundary with a key and the key's sequence number.
    pub fn from_key(key: InternalKey) -> Self {
        let seqno = key.sequence();
        Self {
            key: Some(key),
            seqno,
            user_values: Vec::new(),
            user_frontier: None,
        }
    }

    /// User value with the given tag, if present.
    pub fn user_value_with_tag(&self, tag: UserBoundaryTag) -> Option<&UserBoundaryValueRef> {
        self.user_values.iter().find(|v| v.tag() == tag)
    }
}

impl PartialEq for FileBoundaryValues {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.seqno == other.seqno
            && self.user_values.len() == other.user_values.len()
            && self
                .user_values
                .iter()
                .zip(&other.user_values)
                .all(|(a, b)| a.tag() == b.tag() && a.encode() == b.encode())
            && match (&self.user_frontier, &other.user_frontier) {
                (None, None) => true,
                (Some(a), Some(b)) => a.encode() == b.encode(),
                _ => false,
            }
    }
}

/// User value compared bytewise on its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytewiseBoundaryValue {
    tag: UserBoundaryTag,
    data: Bytes,
}

impl BytewiseBoundaryValue {
    pub fn new(tag: UserBoundaryTag, data: impl Into<Bytes>) -> Self {
        Self {
            tag,
            data: data.into(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl UserBoundaryValue for BytewiseBoundaryValue {
    fn tag(&self) -> UserBoundaryTag {
        self.tag
    }

    fn encode(&self) -> Bytes {
        self.data.clone()
    }

    fn compare(&self, other: &dyn UserBoundaryValue) -> Ordering {
        self.data.as_ref().cmp(other.encode().as_ref())
    }
}

/// Replicated-log progress covered by a file: op id and hybrid time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsensusFrontier {
    pub op_id: OpId,
    pub hybrid_time: u64,
}

impl ConsensusFrontier {
    pub fn new(op_id: OpId, hybrid_time: u64) -> Self {
        Self { op_id, hybrid_time }
    }

    /// Decode the form produced by [`UserFrontier::encode`].
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let term = decode_varint_signed(&mut data);
        let index = decode_varint_signed(&mut data);
        let hybrid_time = decode_varint64(&mut data);
        match (term, index, hybrid_time) {
            (Some(term), Some(index), Some(hybrid_time)) if data.is_empty() => Ok(Self {
                op_id: OpId::new(term, index),
                hybrid_time,
            }),
            _ => Err(Error::corruption("malformed consensus frontier")),
        }
    }
}

impl UserFrontier for ConsensusFrontier {
    fn clone_box(&self) -> Box<dyn UserFrontier> {
        Box::new(*self)
    }

    /// # Panics
    ///
    /// Panics when `rhs` is not a consensus frontier.
    fn update(&mut self, rhs: &dyn UserFrontier, kind: UpdateUserValueType) {
        let Some(rhs) = rhs.as_any().downcast_ref::<ConsensusFrontier>() else {
            panic!("cannot merge {:?} into a consensus frontier", rhs);
        };
        match kind {
            UpdateUserValueType::Smallest => {
                self.op_id = self.op_id.min(rhs.op_id);
                self.hybrid_time = self.hybrid_time.min(rhs.hybrid_time);
            }
            UpdateUserValueType::Largest => {
                self.op_id = self.op_id.max(rhs.op_id);
                self.hybrid_time = self.hybrid_time.max(rhs.hybrid_time);
            }
        }
    }

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        encode_varint_signed(&mut buf, self.op_id.term);
        encode_varint_signed(&mut buf, self.op_id.index);
        encode_varint64(&mut buf, self.hybrid_time);
        buf.freeze()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "OpId": self.op_id.to_string(),
            "HybridTime": self.hybrid_time,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extractor for stores without custom boundary values.
///
/// Decodes every tag as a [`BytewiseBoundaryValue`] and every frontier as a
/// [`ConsensusFrontier`]; extracts nothing from keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBoundaryValuesExtractor;

impl BoundaryValuesExtractor for DefaultBoundaryValuesExtractor {
    fn decode(&self, tag: UserBoundaryTag, data: &[u8]) -> Result<Option<UserBoundaryValueRef>> {
        Ok(Some(Arc::new(BytewiseBoundaryValue::new(
            tag,
            Bytes::copy_from_slice(data),
        ))))
    }

    fn extract(&self, _user_key: &[u8], _value: &[u8], _values: &mut UserBoundaryValues) -> Result<()> {
        Ok(())
    }

    fn decode_frontier(&self, data: &[u8]) -> Result<Box<dyn UserFrontier>> {
        Ok(Box::new(ConsensusFrontier::decode(data)?))
    }
}
