//! RAM-backed flash with NOR semantics.
//!
//! Useful on a host, to receive an image into memory, and in tests.  Erase sets bytes to
//! `0xFF`.  Programming a byte that is not erased is refused rather than silently ANDed,
//! so a writer that programs twice without an erase is caught.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::FlashHal;

pub const ERASED: u8 = 0xFF;

/// [`RamFlash`] errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFlashError {
    /// Range is not wholly inside the flash
    OutOfBounds,
    /// Programming would overwrite a byte that has not been erased
    NotErased { addr: u32 },
}

/// `N` bytes of simulated flash at absolute address `base`.
pub struct RamFlash<const N: usize> {
    base: u32,
    mem: [u8; N],
    erases: u32,
    programs: u32,
}

impl<const N: usize> RamFlash<N> {
    /// Create a flash whose contents start out as zeros, i.e. fully programmed.
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            mem: [0; N],
            erases: 0,
            programs: 0,
        }
    }

    /// Read back `len` bytes at absolute address `addr`.
    pub fn read(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = self.index(addr, len)?;
        Some(&self.mem[start..start + len])
    }

    /// Entire contents
    pub fn as_slice(&self) -> &[u8] {
        &self.mem
    }

    /// Number of erase operations performed
    pub fn erase_count(&self) -> u32 {
        self.erases
    }

    /// Number of program operations performed
    pub fn program_count(&self) -> u32 {
        self.programs
    }

    fn index(&self, addr: u32, len: usize) -> Option<usize> {
        let start = addr.checked_sub(self.base)? as usize;
        let end = start.checked_add(len)?;
        (end <= N).then_some(start)
    }
}

impl<const N: usize> FlashHal for RamFlash<N> {
    type Error = RamFlashError;

    fn erase(&mut self, addr: u32, len: u32) -> Result<(), RamFlashError> {
        let start = self
            .index(addr, len as usize)
            .ok_or(RamFlashError::OutOfBounds)?;
        self.mem[start..start + len as usize].fill(ERASED);
        self.erases += 1;
        trace!("RAM flash erased {len} bytes at {addr:#010X}");
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), RamFlashError> {
        let start = self
            .index(addr, data.len())
            .ok_or(RamFlashError::OutOfBounds)?;
        let target = &mut self.mem[start..start + data.len()];
        if let Some(pos) = target.iter().position(|b| *b != ERASED) {
            return Err(RamFlashError::NotErased {
                addr: addr + pos as u32,
            });
        }
        target.copy_from_slice(data);
        self.programs += 1;
        Ok(())
    }
}
