//! Partition ownership predicates.
//!
//! A process owns partition `partition_id` out of `partition_count`; a document
//! belongs to it when `abs(hash(routing_key)) % partition_count + 1 == partition_id`.
//! The hash is the JVM `hashCode` of the routing value so that ownership agrees
//! with hosts computing the same assignment elsewhere.

use crate::core::{Document, MirrorError, Result};
use crate::mirror::RoutingKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// The partition this process serves. Partitions are 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPartition {
    pub partition_id: u32,
    pub partition_count: u32,
}

impl ClusterPartition {
    pub fn new(partition_id: u32, partition_count: u32) -> Result<Self> {
        let partition = Self {
            partition_id,
            partition_count,
        };
        partition.validate()?;
        Ok(partition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition_count == 0 {
            return Err(MirrorError::IllegalArgument(
                "partition_count must be >= 1".to_string(),
            ));
        }
        if self.partition_id == 0 || self.partition_id > self.partition_count {
            return Err(MirrorError::IllegalArgument(format!(
                "partition_id {} is outside [1, {}]",
                self.partition_id, self.partition_count
            )));
        }
        Ok(())
    }
}

/// A partition-shaped filter over raw documents.
///
/// Collections may push this down as a store-side query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPartition {
    pub routing: RoutingKey,
    pub partition: ClusterPartition,
}

impl DocumentPartition {
    pub fn new(routing: RoutingKey, partition: ClusterPartition) -> Self {
        Self { routing, partition }
    }

    /// Returns whether the document's routing value maps to this partition.
    pub fn contains(&self, document: &Document) -> Result<bool> {
        let routing_value = self.routing.extract(document).ok_or_else(|| {
            MirrorError::IllegalArgument(format!(
                "document {:?} has no routing value in field '{}'",
                document.id(),
                self.routing.field()
            ))
        })?;
        let partition = partition_for(
            routing_hash_code(&routing_value),
            self.partition.partition_count,
        );
        Ok(partition == self.partition.partition_id)
    }
}

/// Decides whether a loaded object belongs to the current process.
pub enum PartitionFilter<T> {
    AcceptAll,
    Partition(DocumentPartition),
    Custom(Arc<dyn Fn(&T) -> bool + Send + Sync>),
}

impl<T> Clone for PartitionFilter<T> {
    fn clone(&self) -> Self {
        match self {
            Self::AcceptAll => Self::AcceptAll,
            Self::Partition(partition) => Self::Partition(partition.clone()),
            Self::Custom(predicate) => Self::Custom(predicate.clone()),
        }
    }
}

impl<T> std::fmt::Debug for PartitionFilter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcceptAll => f.write_str("AcceptAll"),
            Self::Partition(partition) => f.debug_tuple("Partition").field(partition).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl<T> PartitionFilter<T> {
    pub fn accept_all() -> Self {
        Self::AcceptAll
    }

    pub fn partition(routing: RoutingKey, partition: ClusterPartition) -> Self {
        Self::Partition(DocumentPartition::new(routing, partition))
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// The store-side form of this filter, when it has one.
    pub fn document_partition(&self) -> Option<&DocumentPartition> {
        match self {
            Self::Partition(partition) => Some(partition),
            _ => None,
        }
    }

    /// Evaluates the filter against a converted object and the document it came from.
    pub fn accepts(&self, document: &Document, object: &T) -> Result<bool> {
        match self {
            Self::AcceptAll => Ok(true),
            Self::Partition(partition) => partition.contains(document),
            Self::Custom(predicate) => Ok(predicate(object)),
        }
    }
}

/// Maps a hash to its 1-indexed partition.
pub fn partition_for(hash: i32, partition_count: u32) -> u32 {
    if partition_count == 0 {
        return 0;
    }
    (safe_abs(hash) as u32) % partition_count + 1
}

/// `abs` that maps `i32::MIN` to `i32::MAX` instead of overflowing.
pub fn safe_abs(value: i32) -> i32 {
    if value == i32::MIN {
        i32::MAX
    } else {
        value.abs()
    }
}

/// JVM-compatible `hashCode` of a routing value.
pub fn routing_hash_code(value: &Value) -> i32 {
    match value {
        Value::Null => 0,
        Value::Bool(true) => 1231,
        Value::Bool(false) => 1237,
        Value::String(text) => string_hash_code(text),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                if let Ok(small) = i32::try_from(int) {
                    small
                } else {
                    (int ^ ((int as u64) >> 32) as i64) as i32
                }
            } else if let Some(unsigned) = number.as_u64() {
                (unsigned ^ (unsigned >> 32)) as i32
            } else {
                let bits = number.as_f64().unwrap_or_default().to_bits();
                (bits ^ (bits >> 32)) as i32
            }
        }
        other => string_hash_code(&other.to_string()),
    }
}

/// `String.hashCode` over UTF-16 code units.
pub fn string_hash_code(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}
