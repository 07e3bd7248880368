//! Asynchronous Framer - used where the transport is driven by an executor.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use embassy_futures::yield_now;

use crate::framer::{Deframer, FramingContext};
use crate::io::{AsyncByteTransport, Deadline};
use crate::{Error, Result};

/// Packet framer over an [`AsyncByteTransport`].
///
/// Behaves exactly like [`Framer`](crate::framer::Framer), except that it yields to the
/// executor each time the transport reports no byte ready.  In addition, dropping the
/// future returned by [`Self::read_packet()`] abandons the read; the context is then left
/// mid-packet and the next read resynchronizes on the following start marker.
pub struct AsyncFramer<'a, T: AsyncByteTransport> {
    transport: &'a mut T,
}

impl<'a, T: AsyncByteTransport> AsyncFramer<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Read the next packet into `buf`.
    ///
    /// See [`Framer::read_packet()`](crate::framer::Framer::read_packet) for arguments
    /// and return values.
    pub async fn read_packet<D: Deadline>(
        &mut self,
        ctx: &mut FramingContext,
        buf: &mut [u8],
        mut deadline: D,
    ) -> Result<usize> {
        let mut deframer = Deframer::new(ctx, buf.len())?;
        let mut byte = [0u8; 1];

        loop {
            match self.transport.receive(&mut byte).await {
                Ok(0) => {
                    if deadline.expired() {
                        debug!("Read deadline expired");
                        return Err(Error::Timeout);
                    }
                    yield_now().await;
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

    /// Send `data` as-is.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(data).await.map_err(|e| {
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
