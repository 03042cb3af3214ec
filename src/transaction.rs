// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction state and the TL2 read/write/commit protocol: read set,
//! write set, allocation and free sets, and the two-phase commit that
//! publishes a read-write transaction's effects atomically.

use std::collections::{BTreeMap, BTreeSet};
use std::ptr;

use log::info;

use crate::error::{Result, TmError};
use crate::lock::VersionedLock;
use crate::region::Region;
use crate::segment::Segment;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Destroyed,
}

/// Outcome of [`Transaction::alloc`], mirroring the three-way result the
/// engine's allocator can produce.
#[derive(Debug, PartialEq, Eq)]
pub enum AllocOutcome {
    /// The segment was allocated; its address is the payload.
    Success(*mut u8),
    /// The host allocator failed; the transaction is still valid.
    NoMem,
}

/// A transaction's private view of a [`Region`]: the read set, the buffered
/// write set, and the allocations/frees pending publication at commit.
///
/// Every operation that can fail destroys the transaction on failure (private
/// buffers and sets are dropped, any segments allocated but never published
/// are freed). Rust cannot enforce "don't call anything else on a destroyed
/// handle" across FFI the way the original does by convention, so instead of
/// leaving that case as undefined behavior, every method first checks
/// [`State::Destroyed`] and returns [`TmError::TransactionUsed`].
pub struct Transaction<'r> {
    region: &'r Region,
    mode: Mode,
    state: State,
    rv: u64,
    read_set: BTreeSet<usize>,
    write_set: BTreeMap<usize, Box<[u8]>>,
    alloc_set: Vec<Segment>,
    free_set: Vec<usize>,
}

impl<'r> Transaction<'r> {
    pub(crate) fn new(region: &'r Region, read_only: bool, rv: u64) -> Self {
        Self {
            region,
            mode: if read_only { Mode::ReadOnly } else { Mode::ReadWrite },
            state: State::Active,
            rv,
            read_set: BTreeSet::new(),
            write_set: BTreeMap::new(),
            alloc_set: Vec::new(),
            free_set: Vec::new(),
        }
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            State::Active => Ok(()),
            State::Destroyed => Err(TmError::TransactionUsed),
        }
    }

    /// Drops every private buffer and un-published segment. Called on any
    /// failed operation and at the end of a successful `end`.
    fn destroy(&mut self) {
        self.read_set.clear();
        self.write_set.clear();
        self.alloc_set.clear(); // Segment::drop frees the unpublished memory
        self.free_set.clear();
        self.state = State::Destroyed;
    }

    /// Copies `size` bytes starting at `src` (in the region) into `dst` (in
    /// caller-private memory).
    ///
    /// # Safety
    ///
    /// `src` must designate `size` readable, aligned bytes belonging to a
    /// segment of this transaction's region, and `dst` must designate `size`
    /// writable private bytes. `size` must be a positive multiple of
    /// [`Region::align`].
    pub unsafe fn read(&mut self, src: *const u8, size: usize, dst: *mut u8) -> Result<()> {
        self.check_active()?;

        let align = self.region.align();
        if size == 0 || size % align != 0 {
            self.destroy();
            return Err(TmError::InvalidArgument);
        }

        for i in 0..(size / align) {
            let src_word = src.add(i * align);
            let dst_word = dst.add(i * align);
            let addr = src_word as usize;
            let lock = self.region.lock_table().get(addr);

            if !lock.validate(self.rv, true) {
                info!("read: pre-sample conflict at {:p}", src_word);
                self.destroy();
                return Err(TmError::Conflict);
            }

            match (self.mode, self.write_set.get(&addr)) {
                (Mode::ReadWrite, Some(buffered)) => {
                    ptr::copy_nonoverlapping(buffered.as_ptr(), dst_word, align);
                }
                _ => {
                    ptr::copy_nonoverlapping(src_word, dst_word, align);
                }
            }

            if !lock.validate(self.rv, true) {
                info!("read: post-sample conflict at {:p}", src_word);
                self.destroy();
                return Err(TmError::Conflict);
            }

            if self.mode == Mode::ReadWrite {
                self.read_set.insert(addr);
            }
        }

        Ok(())
    }

    /// Buffers `size` bytes starting at `src` (private) to be written to
    /// `dst` (in the region) at commit. Does not touch shared memory.
    ///
    /// # Safety
    ///
    /// `src` must designate `size` readable private bytes, and `dst` must
    /// designate `size` writable, aligned bytes belonging to a segment of
    /// this transaction's region. `size` must be a positive multiple of
    /// [`Region::align`].
    pub unsafe fn write(&mut self, src: *const u8, size: usize, dst: *mut u8) -> Result<()> {
        self.check_active()?;

        if self.mode == Mode::ReadOnly {
            self.destroy();
            return Err(TmError::InvalidArgument);
        }

        let align = self.region.align();
        if size == 0 || size % align != 0 {
            self.destroy();
            return Err(TmError::InvalidArgument);
        }

        for i in 0..(size / align) {
            let src_word = src.add(i * align);
            let dst_word = dst.add(i * align);

            let mut buffer = vec![0u8; align].into_boxed_slice();
            ptr::copy_nonoverlapping(src_word, buffer.as_mut_ptr(), align);

            // A prior entry for this address, if any, is dropped here and its
            // private buffer freed.
            self.write_set.insert(dst_word as usize, buffer);
        }

        Ok(())
    }

    /// Allocates an aligned, zero-initialized segment of `size` bytes,
    /// pending publication into the region's segment list at commit.
    pub fn alloc(&mut self, size: usize) -> Result<AllocOutcome> {
        self.check_active()?;

        let align = self.region.align();
        if size == 0 || size % align != 0 || (size >> 48) != 0 {
            self.destroy();
            return Err(TmError::InvalidArgument);
        }

        match Segment::alloc_zeroed(size, align) {
            Ok(segment) => {
                let ptr = segment.start();
                self.alloc_set.push(segment);
                Ok(AllocOutcome::Success(ptr))
            }
            Err(TmError::OutOfMemory) => Ok(AllocOutcome::NoMem),
            Err(other) => {
                self.destroy();
                Err(other)
            }
        }
    }

    /// Schedules `target` for removal from the region. The base segment can
    /// never be freed.
    pub fn free(&mut self, target: *mut u8) -> Result<()> {
        self.check_active()?;

        if target as usize == self.region.start() as usize {
            self.destroy();
            return Err(TmError::InvalidArgument);
        }

        if let Some(pos) = self.alloc_set.iter().position(|s| s.start() == target) {
            // Not yet visible outside this transaction: drop it immediately.
            self.alloc_set.remove(pos);
        } else {
            self.free_set.push(target as usize);
        }

        Ok(())
    }

    /// Commits a read-write transaction, or releases a read-only one.
    /// Consumes the handle: it cannot be used again either way.
    pub fn end(mut self) -> bool {
        if self.check_active().is_err() {
            return false;
        }

        if self.mode == Mode::ReadOnly {
            self.destroy();
            return true;
        }

        // 1. Lock the write set. Several addresses may hash to the same
        // lock, so dedup to unique locks first, then acquire in a fixed
        // global order (by lock address) to stay deadlock-free.
        let mut locks: Vec<&VersionedLock> =
            self.write_set.keys().map(|&addr| self.region.lock_table().get(addr)).collect();
        locks.sort_by_key(|l| *l as *const VersionedLock as usize);
        locks.dedup_by_key(|l| *l as *const VersionedLock as usize);

        let mut acquired: Vec<&VersionedLock> = Vec::with_capacity(locks.len());
        for lock in &locks {
            if lock.try_acquire() {
                acquired.push(lock);
            } else {
                for held in &acquired {
                    held.release();
                }
                self.destroy();
                return false;
            }
        }

        // 2. Bump the global clock.
        let wv = self.region.bump_clock();

        // 3. Validate the read set, unless no interleaving committer could
        // have run between this transaction's rv and wv.
        if wv != self.rv + 1 {
            for addr in &self.read_set {
                let lock = self.region.lock_table().get(*addr);
                let ok = if self.write_set.contains_key(addr) {
                    // We hold this lock ourselves; only the version matters.
                    lock.version() <= self.rv
                } else {
                    lock.validate(self.rv, true)
                };
                if !ok {
                    for held in &acquired {
                        held.release();
                    }
                    self.destroy();
                    return false;
                }
            }
        }

        // 4. Publish writes into shared memory.
        for (&addr, value) in &self.write_set {
            unsafe { ptr::copy_nonoverlapping(value.as_ptr(), addr as *mut u8, value.len()) };
        }

        // 5. Release every held lock with the new write version.
        for lock in &acquired {
            lock.release_with_version(wv);
        }

        // 6. Publish allocations and frees.
        let alloc_set = std::mem::take(&mut self.alloc_set);
        self.region.publish(alloc_set, &self.free_set);

        self.destroy();
        true
    }
}

impl<'r> Drop for Transaction<'r> {
    fn drop(&mut self) {
        if self.state == State::Active {
            // Dropped without calling `end`: treat as an abort, not a commit.
            self.destroy();
        }
    }
}
