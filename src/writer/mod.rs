//! Flash-backed writer - commits received image data to the boot partition
//!
//! A transfer is a [`FlashWriter`] session:
//!
//! 1. [`open_destination()`](FlashWriter::open_destination) with [`OpenMode::Create`]
//!    erases the whole [`Region`] and puts the write cursor at its base
//! 2. [`write_chunk()`](FlashWriter::write_chunk) programs data at the cursor and advances
//!    it, refusing to run past the end of the region
//! 3. [`close_destination()`](FlashWriter::close_destination) ends the session and reports
//!    whether the image is complete
//!
//! Nothing is rolled back.  A transfer cancelled by the sender, or one that hit a program
//! failure, leaves a partial image in flash, and whoever acts on [`CloseStatus::Partial`]
//! must stop the bootloader from trying it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod ram;
pub mod sync;

pub use ram::{ERASED, RamFlash, RamFlashError};
pub use sync::FlashWriter;

use crate::{Error, Result};

/// The flash range receiving the image.  A deployment constant:
///
/// ```rust
/// use flashrx::writer::Region;
///
/// const BOOT_PARTITION: Region = Region::new(0x0800_8000, 0x0001_8000);
/// assert_eq!(BOOT_PARTITION.end(), 0x0802_0000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Absolute address of the first byte
    pub base: u32,

    /// Size in bytes
    pub size: u32,
}

impl Region {
    pub const fn new(base: u32, size: u32) -> Self {
        Self { base, size }
    }

    /// One past the last address.  May be `1 << 32` for a region ending at the top of the
    /// address space.
    pub const fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    /// Whether `len` bytes starting at `addr` lie wholly inside the region.
    pub fn contains(&self, addr: u32, len: usize) -> bool {
        addr >= self.base && addr as u64 + len as u64 <= self.end()
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.size == 0 || self.end() > 1 << 32 {
            Err(Error::InvalidRegion)
        } else {
            Ok(())
        }
    }
}

/// How the protocol engine wants the destination opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open for reading, to send a file.  Not supported
    Input,
    /// Create a fresh image
    Create,
    /// Append to an existing image.  Not supported
    Append,
}

impl TryFrom<u8> for OpenMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(OpenMode::Input),
            2 => Ok(OpenMode::Create),
            3 => Ok(OpenMode::Append),
            _ => Err(Error::NotSupported),
        }
    }
}

/// File attributes announced by the sender.
///
/// The name and date are accepted and ignored - there is only one destination.  A
/// declared size is checked against the region before anything is erased.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest<'a> {
    pub name: &'a [u8],
    pub size: Option<u32>,
    pub date: Option<&'a [u8]>,
}

impl<'a> OpenRequest<'a> {
    pub const fn new(name: &'a [u8]) -> Self {
        Self {
            name,
            size: None,
            date: None,
        }
    }

    pub const fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Date as sent by the peer, e.g. `b"20250208 14:00:00"`
    pub const fn with_date(mut self, date: &'a [u8]) -> Self {
        self.date = Some(date);
        self
    }
}

/// Which side of the transfer is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    Input,
    Output,
}

impl TryFrom<u8> for CloseMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(CloseMode::Input),
            2 | 3 => Ok(CloseMode::Output),
            _ => Err(Error::NotSupported),
        }
    }
}

/// How the sender ended the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// All data sent
    Complete,
    /// Cancelled mid-stream
    Discarded,
}

impl From<u8> for Completion {
    /// `b'D'` in the end-of-file packet data field means discard.
    fn from(value: u8) -> Self {
        if value == b'D' {
            Completion::Discarded
        } else {
            Completion::Complete
        }
    }
}

/// Outcome of closing the destination.  Closing never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Nothing was open
    NotOpen,
    /// The image is complete
    Complete { bytes: u32 },
    /// The image is incomplete and must not be booted
    Partial { bytes: u32 },
}

/// Per-transfer write counters.  Tick values come from the writer's
/// [`Clock`](crate::io::Clock) and bracket each program operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Successful chunks programmed
    pub chunks: u32,
    /// Bytes programmed
    pub bytes: u32,
    /// Duration of the most recent program operation
    pub last_ticks: u32,
    /// Longest program operation this transfer
    pub max_ticks: u32,
}
