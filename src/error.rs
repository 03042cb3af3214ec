// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error as DeriveError;

/// Errors surfaced by [`crate::Region`] and [`crate::Transaction`] operations.
///
/// There are no retries inside the engine: a failure always means the calling
/// transaction has already been destroyed, and the caller is expected to start
/// a fresh one with [`crate::Region::begin`].
#[derive(Debug, DeriveError, PartialEq, Eq)]
pub enum TmError {
    /// Size/alignment constraints were violated, or a caller tried to free the
    /// region's base segment.
    #[error("invalid argument: size/alignment constraint violated")]
    InvalidArgument,

    /// The host allocator could not satisfy an allocation request. Unlike the
    /// other variants this does not always imply the transaction died; see
    /// [`crate::transaction::AllocOutcome::NoMem`].
    #[error("out of memory")]
    OutOfMemory,

    /// A concurrent writer invalidated this transaction's view of memory,
    /// either during a read, or during commit validation.
    #[error("transaction conflict")]
    Conflict,

    /// The transaction handle was already consumed by a prior failure or by
    /// `end`.
    #[error("transaction already used")]
    TransactionUsed,
}

pub type Result<T> = core::result::Result<T, TmError>;
