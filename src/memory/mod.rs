//! Paged virtual memory (spec §4.2).
//!
//! A [`MemoryUnit`] partitions a 40-bit virtual address space into
//! non-overlapping [`Context`]s, each up to 4 GB, and hands out ephemeral
//! accessors onto them. The UNPROTECTED/PROTECTED distinction from the
//! spec is a compile-time type-state: [`MemoryUnit<Unprotected>`] is the
//! only state that can create or destroy contexts, and
//! [`MemoryUnit<Protected>`] is the only state that can mint accessors.
//! There is no runtime mode flag to get out of sync — the two halves of
//! the API simply do not exist on the wrong type.

use crate::error::MemoryError;
use std::collections::HashMap;
use std::marker::PhantomData;

/// Physical blocks are allocated on demand in 4 KB chunks (spec §4.2).
pub const BLOCK_SIZE: u64 = 4096;

/// The virtual address space is 40 bits wide; the upper 24 bits of every
/// vaddr must be zero.
pub const VADDR_BITS: u32 = 40;
const VADDR_LIMIT: u64 = 1 << VADDR_BITS;

/// A single context may not exceed 4 GB (`2**32` bytes).
pub const MAX_CONTEXT_SIZE: u64 = 1 << 32;

/// Opaque identifier for a context, unique within one [`MemoryUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

/// Whether an accessor permits writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// A contiguous, isolated region of the virtual address space.
///
/// Physical pages are allocated lazily: a block that has never been
/// written reads back as all zero and occupies no memory (spec §4.2,
/// "Physical block cache").
pub struct Context {
    base: u64,
    size: u64,
    current_page: u16,
    blocks: HashMap<u32, Box<[u8; BLOCK_SIZE as usize]>>,
}

impl Context {
    fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            current_page: 0,
            blocks: HashMap::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn current_page(&self) -> u16 {
        self.current_page
    }

    pub fn set_current_page(&mut self, page: u16) {
        self.current_page = page;
    }

    fn block_mut(&mut self, index: u32) -> &mut [u8; BLOCK_SIZE as usize] {
        self.blocks
            .entry(index)
            .or_insert_with(|| Box::new([0; BLOCK_SIZE as usize]))
    }

    fn block(&self, index: u32) -> Option<&[u8; BLOCK_SIZE as usize]> {
        self.blocks.get(&index)
    }

    fn check_bounds(&self, address: u32, len: u32) -> Result<(), MemoryError> {
        let end = u64::from(address) + u64::from(len);
        if end > self.size {
            return Err(MemoryError::OutOfBounds {
                address: u64::from(address),
                size: self.size,
            });
        }
        Ok(())
    }

    fn read_byte(&self, address: u32) -> Result<u8, MemoryError> {
        self.check_bounds(address, 1)?;
        let index = address / BLOCK_SIZE as u32;
        let offset = (address % BLOCK_SIZE as u32) as usize;
        Ok(self.block(index).map_or(0, |block| block[offset]))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.check_bounds(address, 1)?;
        let index = address / BLOCK_SIZE as u32;
        let offset = (address % BLOCK_SIZE as u32) as usize;
        self.block_mut(index)[offset] = value;
        Ok(())
    }

    fn read_bytes(&self, address: u32, out: &mut [u8]) -> Result<(), MemoryError> {
        self.check_bounds(address, out.len() as u32)?;
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.read_byte(address + i as u32)?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.check_bounds(address, data.len() as u32)?;
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(address + i as u32, byte)?;
        }
        Ok(())
    }

    /// Pre-allocates every block up to `size`, zero-filled, so that later
    /// writes (e.g. stack pushes) cannot fault (spec §4.2, stack accessor).
    fn preallocate(&mut self) {
        let blocks = self.size.div_ceil(BLOCK_SIZE);
        for index in 0..blocks {
            self.block_mut(index as u32);
        }
    }
}

/// Marker type: contexts may be created and destroyed, but no accessor
/// may be minted.
pub struct Unprotected;

/// Marker type: accessors may be minted and used, but the context list is
/// frozen.
pub struct Protected;

/// Owner of every [`Context`] in one 40-bit address space.
pub struct MemoryUnit<State> {
    contexts: HashMap<ContextId, Context>,
    next_vaddr: u64,
    next_id: u32,
    _state: PhantomData<State>,
}

impl MemoryUnit<Unprotected> {
    pub fn new() -> Self {
        Self {
            contexts: HashMap::new(),
            next_vaddr: 0,
            next_id: 0,
            _state: PhantomData,
        }
    }

    /// Allocates a new context of `size` bytes at the next free vaddr.
    ///
    /// Fails with [`MemoryError::Exhausted`] if the remaining vaddr space
    /// cannot fit `size`, or if `size` exceeds [`MAX_CONTEXT_SIZE`]. A
    /// zero-size request is permitted and yields a degenerate, always-empty
    /// context.
    pub fn create_context(&mut self, size: u64) -> Result<ContextId, MemoryError> {
        if size > MAX_CONTEXT_SIZE || self.next_vaddr.checked_add(size).map_or(true, |end| end > VADDR_LIMIT) {
            return Err(MemoryError::Exhausted { requested: size });
        }
        let id = ContextId(self.next_id);
        self.next_id += 1;
        let base = self.next_vaddr;
        self.next_vaddr += size;
        self.contexts.insert(id, Context::new(base, size));
        Ok(id)
    }

    /// Destroys a context, freeing its id for bookkeeping purposes (the
    /// vaddr range itself is never reclaimed by the bump allocator).
    pub fn destroy_context(&mut self, id: ContextId) -> Result<(), MemoryError> {
        self.contexts
            .remove(&id)
            .map(|_| ())
            .ok_or(MemoryError::OutOfBounds { address: 0, size: 0 })
    }

    /// Transitions into PROTECTED mode, where accessors may be created.
    pub fn protect(self) -> MemoryUnit<Protected> {
        MemoryUnit {
            contexts: self.contexts,
            next_vaddr: self.next_vaddr,
            next_id: self.next_id,
            _state: PhantomData,
        }
    }
}

impl Default for MemoryUnit<Unprotected> {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUnit<Protected> {
    /// Transitions back into UNPROTECTED mode, where the context list may
    /// change again. Any accessors borrowed from `self` must already have
    /// been dropped — this is enforced by the borrow checker, since
    /// accessors borrow `self` for their lifetime.
    pub fn unprotect(self) -> MemoryUnit<Unprotected> {
        MemoryUnit {
            contexts: self.contexts,
            next_vaddr: self.next_vaddr,
            next_id: self.next_id,
            _state: PhantomData,
        }
    }

    fn context_mut(&mut self, id: ContextId) -> Result<&mut Context, MemoryError> {
        self.contexts
            .get_mut(&id)
            .ok_or(MemoryError::OutOfBounds { address: 0, size: 0 })
    }

    pub fn context(&self, id: ContextId) -> Result<&Context, MemoryError> {
        self.contexts
            .get(&id)
            .ok_or(MemoryError::OutOfBounds { address: 0, size: 0 })
    }

    /// Mints a paged accessor: address = `page * 2**16 + offset`.
    pub fn paged_accessor(
        &mut self,
        id: ContextId,
        mode: AccessMode,
    ) -> Result<PagedAccessor<'_>, MemoryError> {
        let context = self.context_mut(id)?;
        Ok(PagedAccessor { context, mode })
    }

    /// Mints a stack accessor over a flat 32-bit address, pre-allocating
    /// every physical block so that pushes cannot fault.
    pub fn stack_accessor(&mut self, id: ContextId) -> Result<StackAccessor<'_>, MemoryError> {
        let context = self.context_mut(id)?;
        context.preallocate();
        Ok(StackAccessor { context })
    }
}

/// A view onto a [`Context`] addressed by `(page, offset)`.
pub struct PagedAccessor<'a> {
    context: &'a mut Context,
    mode: AccessMode,
}

impl PagedAccessor<'_> {
    fn addr(page: u16, offset: u16) -> u32 {
        (u32::from(page) << 16) | u32::from(offset)
    }

    fn check_writable(&self) -> Result<(), MemoryError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(MemoryError::ReadOnlyViolation);
        }
        Ok(())
    }

    pub fn read_byte(&self, page: u16, offset: u16) -> Result<u8, MemoryError> {
        self.context.read_byte(Self::addr(page, offset))
    }

    pub fn write_byte(&mut self, page: u16, offset: u16, value: u8) -> Result<(), MemoryError> {
        self.check_writable()?;
        self.context.write_byte(Self::addr(page, offset), value)
    }

    pub fn read_word(&self, page: u16, offset: u16) -> Result<u16, MemoryError> {
        let low = self.read_byte(page, offset)?;
        let high = self.read_byte(page, offset.wrapping_add(1))?;
        Ok(u16::from(low) | (u16::from(high) << 8))
    }

    pub fn write_word(&mut self, page: u16, offset: u16, value: u16) -> Result<(), MemoryError> {
        self.write_byte(page, offset, (value & 0xFF) as u8)?;
        self.write_byte(page, offset.wrapping_add(1), (value >> 8) as u8)
    }

    pub fn read_bytes(&self, page: u16, offset: u16, out: &mut [u8]) -> Result<(), MemoryError> {
        self.context.read_bytes(Self::addr(page, offset), out)
    }

    pub fn write_bytes(&mut self, page: u16, offset: u16, data: &[u8]) -> Result<(), MemoryError> {
        self.check_writable()?;
        self.context.write_bytes(Self::addr(page, offset), data)
    }

    pub fn set_page(&mut self, page: u16) {
        self.context.set_current_page(page);
    }

    pub fn current_page(&self) -> u16 {
        self.context.current_page()
    }
}

/// A view onto a [`Context`] addressed by a flat 32-bit offset, used by the
/// data stack and the CPU's return stack.
pub struct StackAccessor<'a> {
    context: &'a mut Context,
}

impl StackAccessor<'_> {
    pub fn read_byte(&self, address: u32) -> Result<u8, MemoryError> {
        self.context.read_byte(address)
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), MemoryError> {
        self.context.write_byte(address, value)
    }

    pub fn read_word(&self, address: u32) -> Result<u16, MemoryError> {
        let low = self.read_byte(address)?;
        let high = self.read_byte(address + 1)?;
        Ok(u16::from(low) | (u16::from(high) << 8))
    }

    pub fn write_word(&mut self, address: u32, value: u16) -> Result<(), MemoryError> {
        self.write_byte(address, (value & 0xFF) as u8)?;
        self.write_byte(address + 1, (value >> 8) as u8)
    }

    pub fn size(&self) -> u64 {
        self.context.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_round_trips() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(BLOCK_SIZE * 2).unwrap();
        let mut memory = memory.protect();
        let mut accessor = memory.paged_accessor(id, AccessMode::ReadWrite).unwrap();
        accessor.write_word(0, 10, 0xBEEF).unwrap();
        assert_eq!(accessor.read_word(0, 10).unwrap(), 0xBEEF);
    }

    #[test]
    fn unwritten_bytes_read_as_zero() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(BLOCK_SIZE).unwrap();
        let mut memory = memory.protect();
        let accessor = memory.paged_accessor(id, AccessMode::ReadOnly).unwrap();
        assert_eq!(accessor.read_byte(0, 42).unwrap(), 0);
    }

    #[test]
    fn read_only_accessor_rejects_writes() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(BLOCK_SIZE).unwrap();
        let mut memory = memory.protect();
        let mut accessor = memory.paged_accessor(id, AccessMode::ReadOnly).unwrap();
        assert_eq!(
            accessor.write_byte(0, 0, 1),
            Err(MemoryError::ReadOnlyViolation)
        );
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(4).unwrap();
        let mut memory = memory.protect();
        let accessor = memory.paged_accessor(id, AccessMode::ReadOnly).unwrap();
        assert!(accessor.read_byte(0, 100).is_err());
    }

    #[test]
    fn zero_size_context_is_permitted() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(0).unwrap();
        let mut memory = memory.protect();
        let accessor = memory.paged_accessor(id, AccessMode::ReadOnly).unwrap();
        assert!(accessor.read_byte(0, 0).is_err());
    }

    #[test]
    fn stack_accessor_preallocates_so_pushes_cannot_fault() {
        let mut memory = MemoryUnit::<Unprotected>::new();
        let id = memory.create_context(BLOCK_SIZE * 3).unwrap();
        let mut memory = memory.protect();
        let mut accessor = memory.stack_accessor(id).unwrap();
        accessor.write_word(BLOCK_SIZE as u32 * 2 + 10, 0x1234).unwrap();
        assert_eq!(accessor.read_word(BLOCK_SIZE as u32 * 2 + 10).unwrap(), 0x1234);
    }
}
