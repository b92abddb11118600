//! Guest GPU-visible memory as seen by the shader front end and the object cache.
//!
//! The emulator core provides an implementation backed by its address space; tests use
//! [`VecGuestMemory`].

use core::fmt;
use std::cell::{Ref, RefCell};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestMemoryError {
    pub addr: u64,
    pub len: usize,
}

impl fmt::Display for GuestMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guest memory access out of bounds: addr=0x{:x}, len=0x{:x}",
            self.addr, self.len
        )
    }
}

impl std::error::Error for GuestMemoryError {}

/// Minimal guest memory interface.
///
/// `write` takes `&self` so a single guest memory handle can be shared between the command
/// processor and the object cache; implementations use interior mutability.
pub trait GuestMemory {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError>;
    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError>;
}

/// One contiguous guest allocation backing (part of) a GPU object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuestRange {
    pub vaddr: u64,
    pub size: u64,
}

impl GuestRange {
    pub fn new(vaddr: u64, size: u64) -> Self {
        Self { vaddr, size }
    }

    pub fn end(&self) -> u64 {
        self.vaddr.saturating_add(self.size)
    }

    pub fn overlaps(&self, other: &GuestRange) -> bool {
        self.vaddr < other.end() && other.vaddr < self.end()
    }

    pub fn contains(&self, other: &GuestRange) -> bool {
        other.vaddr >= self.vaddr && other.end() <= self.end()
    }
}

pub fn read_u32s(mem: &dyn GuestMemory, addr: u64, count: usize) -> Result<Vec<u32>, GuestMemoryError> {
    let mut bytes = vec![0u8; count * 4];
    mem.read(addr, &mut bytes)?;
    Ok(bytemuck::pod_collect_to_vec::<u8, u32>(&bytes)
        .into_iter()
        .map(u32::from_le)
        .collect())
}

pub fn read_u64(mem: &dyn GuestMemory, addr: u64) -> Result<u64, GuestMemoryError> {
    let mut bytes = [0u8; 8];
    mem.read(addr, &mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Reads every range back to back into one buffer.
pub fn read_ranges(mem: &dyn GuestMemory, ranges: &[GuestRange]) -> Result<Vec<u8>, GuestMemoryError> {
    let total: u64 = ranges.iter().map(|r| r.size).sum();
    let mut out = vec![0u8; total as usize];
    let mut offset = 0usize;
    for range in ranges {
        let len = range.size as usize;
        mem.read(range.vaddr, &mut out[offset..offset + len])?;
        offset += len;
    }
    Ok(out)
}

/// Scatters `data` back over `ranges`; the inverse of [`read_ranges`].
pub fn write_ranges(mem: &dyn GuestMemory, ranges: &[GuestRange], data: &[u8]) -> Result<(), GuestMemoryError> {
    let mut offset = 0usize;
    for range in ranges {
        let len = (range.size as usize).min(data.len().saturating_sub(offset));
        mem.write(range.vaddr, &data[offset..offset + len])?;
        offset += len;
    }
    Ok(())
}

/// Contiguous guest RAM starting at `base`, for tests and tools.
#[derive(Clone, Debug)]
pub struct VecGuestMemory {
    base: u64,
    mem: RefCell<Vec<u8>>,
}

impl VecGuestMemory {
    pub fn new(base: u64, size_bytes: usize) -> Self {
        Self {
            base,
            mem: RefCell::new(vec![0u8; size_bytes]),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mem.borrow(), |v| v.as_slice())
    }

    pub fn write_u32s(&self, addr: u64, words: &[u32]) -> Result<(), GuestMemoryError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        GuestMemory::write(self, addr, &bytes)
    }

    fn span(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, GuestMemoryError> {
        let err = GuestMemoryError { addr, len };
        let start = addr.checked_sub(self.base).ok_or(err.clone())?;
        let start = usize::try_from(start).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or(err.clone())?;
        if end > self.mem.borrow().len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl GuestMemory for VecGuestMemory {
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<(), GuestMemoryError> {
        let span = self.span(addr, dst.len())?;
        dst.copy_from_slice(&self.mem.borrow()[span]);
        Ok(())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<(), GuestMemoryError> {
        let span = self.span(addr, src.len())?;
        self.mem.borrow_mut()[span].copy_from_slice(src);
        Ok(())
    }
}
