//! Packet framer - extracts delimited packets from a raw byte stream
//!
//! A packet is everything between a start marker and an end marker.  Bytes before the
//! first start marker are noise and are dropped, which is how the framer resynchronizes
//! after line noise or a packet interrupted part way through.  A line-feed is accepted as
//! an alias for the end marker, for terminal programs that insist on sending one.
//!
//! [`read_packet`](sync::Framer::read_packet) returns:
//! - `Ok(n)` - a packet with an `n` byte payload, now in the caller's buffer
//! - `Ok(0)` - an empty packet, or one too long for the buffer or the context's maximum
//!   length.  The caller should ask for a retransmission
//! - `Err(_)` - a fatal condition: disconnect, deadline expiry or operator interrupt
//!
//! The framer does no escaping or checksum handling - that belongs to the protocol engine
//! which owns the [`FramingContext`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use self::futures::AsyncFramer;
pub use sync::Framer;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Kermit start-of-header
pub const SOH: u8 = 0x01;

/// Kermit default end-of-message
pub const CR: u8 = 0x0D;

/// Accepted as an end marker regardless of the context's end marker, unless disabled
pub const LINE_FEED: u8 = 0x0A;

/// Three of these in a row interrupt a remote-mode read
pub const CTRL_C: u8 = 0x03;

/// Default maximum payload length
pub const DEFAULT_MAX_LEN: usize = 94;

/// Typical receive buffer length, leaving headroom over the maximum payload
pub const RECV_BUF_LEN: usize = 128;

const CTRL_C_ABORT_COUNT: u8 = 3;

/// Per-transfer framing state, owned by the protocol engine.
///
/// Holds no buffer of its own.  Re-use the same context for every packet of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingContext {
    /// Start marker
    pub start: u8,

    /// End marker
    pub end: u8,

    /// Maximum payload length
    pub max_len: usize,

    /// Accept a line-feed as an end marker
    pub line_feed_alias: bool,

    /// Remote mode - `^C^C^C` aborts a read
    pub ctrl_c_abort: bool,

    in_packet: bool,
}

impl Default for FramingContext {
    fn default() -> Self {
        Self::new(SOH, CR, DEFAULT_MAX_LEN)
    }
}

impl FramingContext {
    pub const fn new(start: u8, end: u8, max_len: usize) -> Self {
        Self {
            start,
            end,
            max_len,
            line_feed_alias: true,
            ctrl_c_abort: false,
            in_packet: false,
        }
    }

    pub const fn with_line_feed_alias(mut self, on: bool) -> Self {
        self.line_feed_alias = on;
        self
    }

    pub const fn with_ctrl_c_abort(mut self, on: bool) -> Self {
        self.ctrl_c_abort = on;
        self
    }

    /// Whether a start marker has been seen and the packet is not yet finished.
    ///
    /// Only ever true while a read is in progress, or after one was abandoned part way
    /// through by a fatal error.
    pub fn in_packet(&self) -> bool {
        self.in_packet
    }

    fn is_end(&self, byte: u8) -> bool {
        byte == self.end || (self.line_feed_alias && byte == LINE_FEED)
    }
}

/// Byte-at-a-time deframing state machine shared by [`Framer`] and [`AsyncFramer`].
pub(crate) struct Deframer<'c> {
    ctx: &'c mut FramingContext,
    limit: usize,
    len: usize,
    ctrl_c: u8,
}

impl<'c> Deframer<'c> {
    pub(crate) fn new(ctx: &'c mut FramingContext, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::BufferTooSmall);
        }
        ctx.in_packet = false;
        let limit = ctx.max_len.min(capacity);
        Ok(Self {
            ctx,
            limit,
            len: 0,
            ctrl_c: 0,
        })
    }

    /// Feed one byte.  Returns `None` while the packet is incomplete.
    pub(crate) fn push(&mut self, byte: u8, buf: &mut [u8]) -> Option<Result<usize>> {
        if self.ctx.ctrl_c_abort {
            if byte == CTRL_C {
                self.ctrl_c += 1;
                if self.ctrl_c >= CTRL_C_ABORT_COUNT {
                    debug!("Read interrupted by ^C^C^C");
                    return Some(Err(Error::Interrupted));
                }
            } else {
                self.ctrl_c = 0;
            }
        }

        if byte == self.ctx.start {
            if self.ctx.in_packet {
                debug!("Start marker inside packet, dropping {} bytes", self.len);
            }
            self.ctx.in_packet = true;
            self.len = 0;
            return None;
        }

        if !self.ctx.in_packet {
            return None;
        }

        if self.ctx.is_end(byte) {
            self.ctx.in_packet = false;
            trace!("Received packet, {} byte payload", self.len);
            return Some(Ok(self.len));
        }

        if self.len >= self.limit {
            self.ctx.in_packet = false;
            warn!("Packet exceeds {} bytes, discarding", self.limit);
            return Some(Ok(0));
        }

        buf[self.len] = byte;
        self.len += 1;
        None
    }
}
