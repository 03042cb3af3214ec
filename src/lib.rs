// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # TL2 software transactional memory
//!
//! A lock-and-version optimistic concurrency protocol (TL2) layered over a
//! raw, word-addressed shared memory [`Region`]. Transactions buffer their
//! reads and writes privately and only become visible to other transactions
//! at commit, which locks the write set, stamps a new global version, and
//! validates the read set before publishing.
//!
//! ```
//! use tl2_stm::Region;
//!
//! let region = Region::create(64, 8).expect("valid region geometry");
//! let dst = region.start();
//!
//! let mut tx = region.begin(false);
//! let value: u64 = 10;
//! unsafe { tx.write(&value as *const u64 as *const u8, 8, dst).unwrap() };
//! assert!(tx.end());
//!
//! let mut tx = region.begin(true);
//! let mut out: u64 = 0;
//! unsafe { tx.read(dst, 8, &mut out as *mut u64 as *mut u8).unwrap() };
//! assert!(tx.end());
//! assert_eq!(out, 10);
//! ```

mod lock;
mod lock_table;
mod segment;

pub mod error;
pub mod ffi;
pub mod region;
pub mod transaction;

pub use error::{Result, TmError};
pub use region::Region;
pub use transaction::{AllocOutcome, Transaction};
