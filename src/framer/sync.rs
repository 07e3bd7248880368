//! Blocking Framer - typically used on the Target, polling a UART.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::framer::{Deframer, FramingContext};
use crate::io::{ByteTransport, Deadline};
use crate::{Error, Result};

/// Packet framer over a blocking [`ByteTransport`].
///
/// Holds no state between packets beyond the caller's [`FramingContext`], so it is cheap to
/// create one per transfer, or per packet.
pub struct Framer<'a, T: ByteTransport> {
    transport: &'a mut T,
}

impl<'a, T: ByteTransport> Framer<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Read the next packet into `buf`.
    ///
    /// Arguments:
    /// - `ctx` - Framing context for this transfer
    /// - `buf` - Receive buffer.  Payload bytes are never written past
    ///   `min(ctx.max_len, buf.len())`
    /// - `deadline` - Polled whenever the transport has no byte ready.  Pass
    ///   [`Forever`](crate::io::Forever) to wait as long as the link is up
    ///
    /// Returns the payload length.  `Ok(0)` means an empty or oversized packet - ask the
    /// sender to retransmit.
    ///
    /// Errors:
    /// - [`Error::Disconnected`] - the transport failed
    /// - [`Error::Timeout`] - `deadline` expired
    /// - [`Error::Interrupted`] - `^C^C^C` in remote mode
    /// - [`Error::BufferTooSmall`] - `buf` is empty
    pub fn read_packet<D: Deadline>(
        &mut self,
        ctx: &mut FramingContext,
        buf: &mut [u8],
        mut deadline: D,
    ) -> Result<usize> {
        let mut deframer = Deframer::new(ctx, buf.len())?;
        let mut byte = [0u8; 1];

        loop {
            match self.transport.receive(&mut byte) {
                Ok(0) => {
                    if deadline.expired() {
                        debug!("Read deadline expired");
                        return Err(Error::Timeout);
                    }
                }
                Ok(_) => {
                    if let Some(result) = deframer.push(byte[0], buf) {
                        return result;
                    }
                }
                Err(e) => {
                    debug!("Transport receive failed: {e:?}");
                    return Err(Error::Disconnected);
                }
            }
        }
    }

    /// Send `data` as-is, typically a packet built by the protocol engine.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(data).map_err(|e| {
            debug!("Transport send failed: {e:?}");
            Error::Io
        })
    }

    /// Bytes that can be read without blocking, if the transport can tell.
    pub fn input_waiting(&mut self) -> Option<usize> {
        self.transport.input_waiting()
    }

    /// Open the underlying device.
    pub fn open_device(&mut self, device: &str) -> Result<()> {
        debug!("Opening device {device}");
        self.transport.open(device)
    }

    /// Put the underlying device into (`true`) or out of (`false`) packet mode.
    pub fn packet_mode(&mut self, on: bool) -> Result<()> {
        self.transport.packet_mode(on)
    }

    /// Close the underlying device.
    pub fn close_device(&mut self) -> Result<()> {
        debug!("Closing device");
        self.transport.close()
    }
}
