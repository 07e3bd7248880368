//! Transport-to-flash bridge for firmware update receivers.
//!
//! This crate sits between a serial-style byte transport and the flash partition that a
//! bootloader will later boot from.  It pulls bytes from the transport, extracts delimited
//! packets from the stream, and commits payload bytes sequentially into the boot partition.
//!
//! `no_std`.  Requires `alloc` for async traits, typically used where the transport is
//! driven by an async executor.
//!
//! ## Architecture
//!
//! Two components form a one-directional pipeline:
//!
//! - **Packet framer** - consumes the raw byte stream one byte at a time, discards noise
//!   until a start marker, and yields the payload up to the end marker (or a line-feed,
//!   accepted as an alias for terminal compatibility).
//! - **Flash writer** - erases the destination region once when a transfer is opened,
//!   then programs payloads contiguously at an internally tracked write cursor.
//!
//! The file-transfer protocol engine (packet types, sequence numbers, checksums, escaping)
//! is not part of this crate.  It owns a [`framer::FramingContext`] and drives both
//! components:
//!
//! ```text
//!   transport --bytes--> Framer --payload--> protocol engine --data--> FlashWriter --> flash
//! ```
//!
//! Only a single flow of control is assumed.  Every operation blocks (or, for the async
//! framer, awaits) until it completes.  The only suspension point is the per-byte read in
//! the framer, and that is bounded by a caller-supplied [`io::Deadline`], so a stalled link
//! can always be recovered from.
//!
//! ## Modules
//!
//! - [`io`] - Capability traits for the transport, the flash HAL, a monotonic clock and
//!   read deadlines, plus trivial implementations
//! - [`framer`] - Framing context and packet framer, in blocking and async flavours
//! - [`writer`] - Destination region, transfer session and a RAM-backed flash
//!
//! ## Getting Started
//!
//! **Platform setup**:
//! 1. Implement [`io::ByteTransport`] (and the no-op [`io::TransportLifecycle`]) for the
//!    UART, or [`io::AsyncByteTransport`] for an async driver
//! 2. Implement [`io::FlashHal`] for the flash controller, or wrap an
//!    `embedded-storage` [`NorFlash`](embedded_storage::nor_flash::NorFlash) in
//!    [`io::NorFlashHal`]
//! 3. Declare the boot partition as a `const` [`writer::Region`]
//!
//! **Per transfer**:
//! 1. Create a [`framer::Framer`] over the transport and a [`writer::FlashWriter`] over the
//!    flash
//! 2. Call [`writer::FlashWriter::open_destination()`] with [`writer::OpenMode::Create`],
//!    which erases the region
//! 3. Loop on [`framer::Framer::read_packet()`], hand each payload to the protocol engine,
//!    and pass decoded file data to [`writer::FlashWriter::write_chunk()`]
//! 4. Finish with [`writer::FlashWriter::close_destination()`], and act on the returned
//!    [`writer::CloseStatus`] - a partial image must not be booted
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async framer and [`io::AsyncByteTransport`] (requires `alloc`).
//!
//! Compile with `--no-default-features` for a target-only build.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod framer;
pub mod io;
pub mod writer;

/// Receiver errors.  All of these are fatal to the operation that returned them.
///
/// The one retryable condition, an oversized packet, is not an error: the framer reports
/// it as an empty packet so the protocol engine can ask for a retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Transport reported a permanent failure while receiving
    Disconnected,
    /// Read deadline expired or the read was cancelled
    Timeout,
    /// Remote operator interrupted the session with `^C^C^C`
    Interrupted,
    /// Receive buffer has no capacity
    BufferTooSmall,
    /// Transport failed to send
    Io,
    /// Open mode is not supported - only `Create` is
    NotSupported,
    /// Destination is not open for writing
    NotOpen,
    /// A previous program failed, the transfer must be restarted
    Faulted,
    /// Flash erase failed
    EraseFailed,
    /// Flash program failed
    ProgramFailed,
    /// Write would run past the end of the destination region
    RegionOverflow,
    /// Declared image size exceeds the destination region
    ImageTooLarge,
    /// Region is empty or wraps the address space
    InvalidRegion,
}

/// Type to represent the result of a receiver operation
pub type Result<T> = core::result::Result<T, Error>;
