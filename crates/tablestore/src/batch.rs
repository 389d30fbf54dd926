//! Batch (entity group transaction) builder.
//!
//! A [`TableBatch`] collects operations against a single partition that the
//! service applies atomically. The builder enforces composition rules as
//! operations are added; limits that depend on the whole batch are checked
//! when it is submitted.

use std::ops::Index;

use crate::entity::TableEntity;
use crate::error::{TableError, TableResult, ValidationError};
use crate::operation::{TableOperation, TableOperationType};

/// Maximum number of operations in one batch.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// Maximum size of a batch request body accepted by the service.
pub const MAX_BATCH_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

const RETRIEVE_MUST_BE_ALONE: &str =
    "A batch transaction with a retrieve operation cannot contain any other operations.";
const PARTITION_KEY_MISMATCH: &str =
    "All entities in a given batch must have the same partition key.";

/// An ordered set of operations on one partition.
///
/// The partition key is locked by the first operation added and released
/// when the batch becomes empty again.
#[derive(Debug, Clone, Default)]
pub struct TableBatch {
    operations: Vec<TableOperation>,
    locked_partition_key: Option<String>,
    has_query: bool,
}

impl TableBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::Argument` if the operation targets another
    /// partition, or if it would mix a retrieve with any other operation.
    pub fn add(&mut self, operation: TableOperation) -> TableResult<()> {
        self.check_insertable(&operation)?;
        self.accept(&operation);
        self.operations.push(operation);
        Ok(())
    }

    /// Inserts an operation at `index`, shifting later operations.
    ///
    /// # Errors
    ///
    /// As [`TableBatch::add`]; also `InvalidArgument` if `index > len()`.
    pub fn insert_at(&mut self, index: usize, operation: TableOperation) -> TableResult<()> {
        if index > self.operations.len() {
            return Err(TableError::invalid_argument(
                "index",
                format!("index {index} is out of range for a batch of {}", self.len()),
            ));
        }
        self.check_insertable(&operation)?;
        self.accept(&operation);
        self.operations.insert(index, operation);
        Ok(())
    }

    /// Replacing an operation in place is not supported.
    ///
    /// # Errors
    ///
    /// Always returns `UnsupportedOperation`.
    pub fn set(&mut self, _index: usize, _operation: TableOperation) -> TableResult<()> {
        Err(ValidationError::UnsupportedOperation {
            operation: "TableBatch::set".to_string(),
        }
        .into())
    }

    /// Removes and returns the operation at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `index` is out of range.
    pub fn remove_at(&mut self, index: usize) -> TableResult<TableOperation> {
        if index >= self.operations.len() {
            return Err(TableError::invalid_argument(
                "index",
                format!("index {index} is out of range for a batch of {}", self.len()),
            ));
        }
        let removed = self.operations.remove(index);
        self.after_removal();
        Ok(removed)
    }

    /// Removes the first operation with the same kind and key as `operation`.
    /// Returns whether one was removed.
    pub fn remove(&mut self, operation: &TableOperation) -> bool {
        match self.operations.iter().position(|op| op.same_target(operation)) {
            Some(index) => {
                self.operations.remove(index);
                self.after_removal();
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.after_removal();
    }

    pub fn contains(&self, operation: &TableOperation) -> bool {
        self.operations.iter().any(|op| op.same_target(operation))
    }

    pub fn get(&self, index: usize) -> Option<&TableOperation> {
        self.operations.get(index)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TableOperation> {
        self.operations.iter()
    }

    /// The partition every operation in the batch targets.
    pub fn partition_key(&self) -> Option<&str> {
        self.locked_partition_key.as_deref()
    }

    /// Whether the batch holds a retrieve.
    pub fn has_query(&self) -> bool {
        self.has_query
    }

    pub fn insert<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::insert(entity))
    }

    pub fn insert_with_echo<T: TableEntity>(
        &mut self,
        entity: &T,
        echo_content: bool,
    ) -> TableResult<()> {
        self.add(TableOperation::insert_with_echo(entity, echo_content))
    }

    pub fn delete<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::delete(entity)?)
    }

    pub fn replace<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::replace(entity)?)
    }

    pub fn merge<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::merge(entity)?)
    }

    pub fn insert_or_replace<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::insert_or_replace(entity))
    }

    pub fn insert_or_merge<T: TableEntity>(&mut self, entity: &T) -> TableResult<()> {
        self.add(TableOperation::insert_or_merge(entity))
    }

    pub fn retrieve(
        &mut self,
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> TableResult<()> {
        self.add(TableOperation::retrieve(partition_key, row_key))
    }

    /// Checks the limits that only apply to a complete batch.
    pub(crate) fn validate_for_execution(&self) -> TableResult<()> {
        if self.operations.is_empty() {
            return Err(TableError::invalid_operation(
                "Cannot execute an empty batch operation.",
            ));
        }
        if self.operations.len() > MAX_BATCH_OPERATIONS {
            return Err(TableError::invalid_operation(format!(
                "The batch exceeded maximum number of operations ({MAX_BATCH_OPERATIONS})."
            )));
        }
        Ok(())
    }

    pub(crate) fn operations(&self) -> &[TableOperation] {
        &self.operations
    }

    fn check_insertable(&self, operation: &TableOperation) -> TableResult<()> {
        let is_retrieve = operation.kind() == TableOperationType::Retrieve;
        if self.has_query || (is_retrieve && !self.operations.is_empty()) {
            return Err(ValidationError::Argument {
                message: RETRIEVE_MUST_BE_ALONE.to_string(),
            }
            .into());
        }
        if let Some(locked) = &self.locked_partition_key
            && locked != operation.partition_key()
        {
            return Err(ValidationError::Argument {
                message: PARTITION_KEY_MISMATCH.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn accept(&mut self, operation: &TableOperation) {
        if self.locked_partition_key.is_none() {
            self.locked_partition_key = Some(operation.partition_key().to_string());
        }
        if operation.kind() == TableOperationType::Retrieve {
            self.has_query = true;
        }
    }

    fn after_removal(&mut self) {
        if self.operations.is_empty() {
            self.locked_partition_key = None;
        }
        self.has_query = self
            .operations
            .iter()
            .any(|op| op.kind() == TableOperationType::Retrieve);
    }
}

impl Index<usize> for TableBatch {
    type Output = TableOperation;

    fn index(&self, index: usize) -> &TableOperation {
        &self.operations[index]
    }
}

impl<'a> IntoIterator for &'a TableBatch {
    type Item = &'a TableOperation;
    type IntoIter = std::slice::Iter<'a, TableOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}
