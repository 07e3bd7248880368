//! Capability traits for the receiver's collaborators.
//!
//! This module contains the seams between the receiver core and the platform:
//!
//! - [`ByteTransport`] / [`AsyncByteTransport`] - raw byte source and sink, typically a
//!   UART, with no framing knowledge
//! - [`TransportLifecycle`] - device open/close and packet mode, all no-ops by default
//! - [`FlashHal`] - erase and program primitives over absolute flash addresses
//! - [`Clock`] - a free-running monotonic tick counter, used for write timing and
//!   deadlines
//! - [`Deadline`] - bounds the framer's wait for the next byte
//!
//! # Address Space
//!
//! [`FlashHal`] methods use absolute addresses as they appear in the target's memory map,
//! e.g. `0x0800_8000` for a boot partition on an STM32.  [`NorFlashHal`] translates these
//! to the offsets `embedded-storage` drivers expect.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "async")]
use alloc::boxed::Box;
#[cfg(feature = "async")]
use async_trait::async_trait;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::Result;

/// Device-level lifecycle of a transport.
///
/// For a dumb serial port with no login attached every one of these is a no-op, which is
/// what the defaults provide.  A platform that needs to reconfigure the line for the
/// duration of a transfer overrides the relevant methods.
pub trait TransportLifecycle {
    /// Open the communications device.
    fn open(&mut self, _device: &str) -> Result<()> {
        Ok(())
    }

    /// Enter (`true`) or leave (`false`) raw packet mode.
    fn packet_mode(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    /// Apply a platform-specific settings string, saving the previous settings.
    fn apply_settings(&mut self, _settings: &str) -> Result<()> {
        Ok(())
    }

    /// Restore settings saved by [`Self::apply_settings()`].
    fn restore(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the device, leaving it the way [`Self::open()`] found it.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Blocking byte transport.
///
/// `receive` must not block indefinitely.  It returns `Ok(0)` when no byte is ready, which
/// lets the framer check its [`Deadline`] between bytes.  Any `Err` is taken as a permanent
/// disconnect.
pub trait ByteTransport: TransportLifecycle {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Receive up to `buf.len()` bytes, returning how many were received.
    fn receive(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error>;

    /// Send all of `data`.
    fn send(&mut self, data: &[u8]) -> core::result::Result<(), Self::Error>;

    /// Number of bytes that can be read without blocking, or `None` if the transport can't
    /// tell without consuming them.
    fn input_waiting(&mut self) -> Option<usize> {
        None
    }
}

/// Async byte transport.
///
/// Same contract as [`ByteTransport`]: `receive()` returns `Ok(0)` as soon as no byte is
/// ready, rather than awaiting one.  [`AsyncFramer`](crate::framer::AsyncFramer) then
/// checks its [`Deadline`] and yields to the executor before polling again, so an idle
/// link neither starves other tasks nor outlives the deadline.
///
/// A `receive()` that awaits the next byte also works, but the framer's deadline is then
/// only consulted when a byte arrives.  Bound such a read by dropping its future instead,
/// e.g. by racing it against a timer.
#[cfg(feature = "async")]
#[async_trait(?Send)]
pub trait AsyncByteTransport: TransportLifecycle {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Receive up to `buf.len()` bytes, returning how many were received.
    async fn receive(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error>;

    /// Send all of `data`.
    async fn send(&mut self, data: &[u8]) -> core::result::Result<(), Self::Error>;

    /// Number of bytes that can be read without blocking, if known.
    fn input_waiting(&mut self) -> Option<usize> {
        None
    }
}

/// Flash hardware abstraction.
///
/// Each call is treated as atomic: a failure anywhere in the range is reported as a single
/// error with no partial progress.
pub trait FlashHal {
    /// The error type returned by erase and program operations.
    type Error: core::fmt::Debug;

    /// Erase `len` bytes starting at the absolute address `addr`.
    fn erase(&mut self, addr: u32, len: u32) -> core::result::Result<(), Self::Error>;

    /// Program `data` at the absolute address `addr`.  The range must have been erased.
    fn program(&mut self, addr: u32, data: &[u8]) -> core::result::Result<(), Self::Error>;
}

/// [`FlashHal`] over an `embedded-storage` [`NorFlash`] driver.
///
/// The driver addresses flash by offset, so `base` is the absolute address of the driver's
/// offset zero.  Alignment rules are the driver's: the destination region must be aligned
/// to `F::ERASE_SIZE` and chunks to `F::WRITE_SIZE`.
pub struct NorFlashHal<F: NorFlash> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> NorFlashHal<F> {
    /// Wrap `flash`, whose offset zero lives at absolute address `base`.
    pub fn new(flash: F, base: u32) -> Self {
        Self { flash, base }
    }

    /// Access the underlying driver
    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Release the underlying driver
    pub fn into_inner(self) -> F {
        self.flash
    }

    fn offset(&self, addr: u32) -> core::result::Result<u32, NorFlashErrorKind> {
        addr.checked_sub(self.base)
            .ok_or(NorFlashErrorKind::OutOfBounds)
    }
}

impl<F: NorFlash> FlashHal for NorFlashHal<F> {
    type Error = NorFlashErrorKind;

    fn erase(&mut self, addr: u32, len: u32) -> core::result::Result<(), Self::Error> {
        let from = self.offset(addr)?;
        let to = from
            .checked_add(len)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        self.flash.erase(from, to).map_err(|e| e.kind())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> core::result::Result<(), Self::Error> {
        let offset = self.offset(addr)?;
        self.flash.write(offset, data).map_err(|e| e.kind())
    }
}

/// Free-running monotonic tick counter, e.g. an RTC `CNT` register.
///
/// Ticks wrap; consumers only ever look at wrapping differences.
pub trait Clock {
    fn ticks(&mut self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn ticks(&mut self) -> u32 {
        (**self).ticks()
    }
}

/// Clock for platforms without a counter.  Write timings read as zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClock;

impl Clock for NoClock {
    fn ticks(&mut self) -> u32 {
        0
    }
}

/// Bounds the framer's wait for the next byte.
///
/// Polled each time the transport returns no data.  Once it reports expiry the read fails
/// with [`crate::Error::Timeout`], exactly as a disconnect would.
pub trait Deadline {
    fn expired(&mut self) -> bool;
}

impl<D: Deadline + ?Sized> Deadline for &mut D {
    fn expired(&mut self) -> bool {
        (**self).expired()
    }
}

/// Never expires.  The framer waits for as long as the transport stays up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Forever;

impl Deadline for Forever {
    fn expired(&mut self) -> bool {
        false
    }
}

/// Expires once the shared flag is set, e.g. from an interrupt handler or another task.
#[derive(Debug, Clone, Copy)]
pub struct CancelToken<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CancelToken<'a> {
    pub fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

impl Deadline for CancelToken<'_> {
    fn expired(&mut self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Expires `limit` ticks of `clock` after creation.
pub struct TickDeadline<C: Clock> {
    clock: C,
    start: u32,
    limit: u32,
}

impl<C: Clock> TickDeadline<C> {
    pub fn new(mut clock: C, limit: u32) -> Self {
        let start = clock.ticks();
        Self {
            clock,
            start,
            limit,
        }
    }

    /// Restart the countdown, typically after each received packet.
    pub fn reset(&mut self) {
        self.start = self.clock.ticks();
    }
}

impl<C: Clock> Deadline for TickDeadline<C> {
    fn expired(&mut self) -> bool {
        self.clock.ticks().wrapping_sub(self.start) >= self.limit
    }
}
