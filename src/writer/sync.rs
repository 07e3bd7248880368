//! Flash writer session.  Flash programming is not reentrant, so there is no async
//! flavour: a pipeline that overlaps receiving and programming must still serialize every
//! [`FlashWriter::write_chunk()`] call, which `&mut self` enforces.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::{Clock, FlashHal, NoClock};
use crate::writer::{
    CloseMode, CloseStatus, Completion, OpenMode, OpenRequest, Region, WriteStats,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Closed,
    Open,
    /// A program failed.  Only a fresh open clears this.
    Faulted,
}

/// One transfer's worth of state over a [`FlashHal`]: the destination region, how far into
/// it the transfer has written, and timing counters.
///
/// The cursor only means something between a successful
/// [`open_destination()`](Self::open_destination) and the matching
/// [`close_destination()`](Self::close_destination).
pub struct FlashWriter<'a, F: FlashHal, C: Clock = NoClock> {
    flash: &'a mut F,
    clock: C,
    region: Region,
    written: u32,
    session: Session,
    stats: WriteStats,
}

impl<'a, F: FlashHal> FlashWriter<'a, F, NoClock> {
    /// Create a writer for `region` without write timing.
    pub fn new(flash: &'a mut F, region: Region) -> Result<Self> {
        Self::with_clock(flash, region, NoClock)
    }
}

impl<'a, F: FlashHal, C: Clock> FlashWriter<'a, F, C> {
    /// Create a writer for `region`, timing each program operation with `clock`.
    ///
    /// Arguments:
    /// - `flash` - Object implementing [`FlashHal`]
    /// - `region` - Destination region, normally the boot partition constant
    /// - `clock` - Monotonic tick counter
    pub fn with_clock(flash: &'a mut F, region: Region, clock: C) -> Result<Self> {
        region.check()?;
        Ok(Self {
            flash,
            clock,
            region,
            written: 0,
            session: Session::Closed,
            stats: WriteStats::default(),
        })
    }

    /// Open the destination for a new transfer.
    ///
    /// Only [`OpenMode::Create`] is supported.  It erases the whole region and resets the
    /// write cursor to the region's base.  Opening again, e.g. when the sender restarts a
    /// transfer, erases again and leaves nothing of the previous attempt behind.
    ///
    /// Any transfer in progress ends here, whether or not the open succeeds.
    ///
    /// Errors:
    /// - [`Error::NotSupported`] - `mode` is `Input` or `Append`
    /// - [`Error::ImageTooLarge`] - `request` declares more bytes than the region holds.
    ///   Nothing is erased
    /// - [`Error::EraseFailed`] - the flash HAL failed
    ///
    /// On error the destination is left closed.
    pub fn open_destination(&mut self, mode: OpenMode, request: &OpenRequest<'_>) -> Result<()> {
        if self.session != Session::Closed {
            debug!("Ending previous transfer after {} bytes", self.written);
        }
        self.session = Session::Closed;

        if mode != OpenMode::Create {
            warn!("Open mode {mode:?} not supported");
            return Err(Error::NotSupported);
        }

        if let Some(size) = request.size.filter(|size| *size > self.region.size) {
            warn!(
                "Image of {size} bytes does not fit {} byte region",
                self.region.size
            );
            return Err(Error::ImageTooLarge);
        }

        debug!(
            "Erasing {} bytes at {:#010X}",
            self.region.size, self.region.base
        );
        self.flash
            .erase(self.region.base, self.region.size)
            .map_err(|e| {
                error!("Erase failed: {e:?}");
                Error::EraseFailed
            })?;

        self.written = 0;
        self.stats = WriteStats::default();
        self.session = Session::Open;

        Ok(())
    }

    /// Program `data` at the write cursor and advance the cursor past it.
    ///
    /// On any error the cursor is unchanged.  Errors are fatal to the transfer - a failed
    /// program can't be retried without erasing, which would lose the data already
    /// written.
    ///
    /// Errors:
    /// - [`Error::NotOpen`] - no successful open this transfer.  Flash is not touched
    /// - [`Error::Faulted`] - an earlier chunk failed to program
    /// - [`Error::RegionOverflow`] - `data` would run past the end of the region.  Flash is
    ///   not touched
    /// - [`Error::ProgramFailed`] - the flash HAL failed
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        match self.session {
            Session::Open => {}
            Session::Closed => return Err(Error::NotOpen),
            Session::Faulted => return Err(Error::Faulted),
        }

        let room = self.region.size - self.written;
        if data.len() as u64 > room as u64 {
            warn!(
                "Chunk of {} bytes at offset {:#X} overruns {} byte region",
                data.len(),
                self.written,
                self.region.size
            );
            return Err(Error::RegionOverflow);
        }

        if data.is_empty() {
            return Ok(());
        }

        // written < size here, so this stays below the region's end
        let addr = self.region.base + self.written;
        let t0 = self.clock.ticks();
        let result = self.flash.program(addr, data);
        let dt = self.clock.ticks().wrapping_sub(t0);

        self.stats.last_ticks = dt;
        self.stats.max_ticks = self.stats.max_ticks.max(dt);

        if let Err(e) = result {
            error!(
                "Program of {} bytes at {:#010X} failed: {e:?}",
                data.len(),
                addr
            );
            self.session = Session::Faulted;
            return Err(Error::ProgramFailed);
        }

        // Fits in the room left, so neither can overflow
        let len = data.len() as u32;
        self.written += len;
        self.stats.chunks += 1;
        self.stats.bytes += len;
        trace!(
            "Programmed {len} bytes at {addr:#010X} in {dt} ticks, {} written",
            self.written
        );

        Ok(())
    }

    /// End the transfer.
    ///
    /// Never fails.  Closing when nothing is open, or closing the input side, is a no-op
    /// that reports [`CloseStatus::NotOpen`].  Nothing already programmed is rolled back:
    /// if the sender discarded the transfer, or a program failed, the result is
    /// [`CloseStatus::Partial`] and the image must not be booted.
    pub fn close_destination(&mut self, completion: Completion, mode: CloseMode) -> CloseStatus {
        if mode == CloseMode::Input {
            trace!("Close of input side ignored");
            return CloseStatus::NotOpen;
        }

        let bytes = self.written();
        let status = match (self.session, completion) {
            (Session::Closed, _) => CloseStatus::NotOpen,
            (Session::Open, Completion::Complete) => CloseStatus::Complete { bytes },
            (Session::Open, Completion::Discarded) => {
                warn!("Transfer discarded by sender after {bytes} bytes");
                CloseStatus::Partial { bytes }
            }
            (Session::Faulted, _) => {
                warn!("Closing faulted transfer after {bytes} bytes");
                CloseStatus::Partial { bytes }
            }
        };
        self.session = Session::Closed;

        debug!("Closed destination: {status:?}");
        status
    }

    /// Whether a transfer is open and has not faulted.
    pub fn is_open(&self) -> bool {
        self.session == Session::Open
    }

    /// Next address to be programmed, while a transfer is in progress.
    ///
    /// Once a region ending at the top of the address space is full this is `1 << 32`.
    pub fn cursor(&self) -> Option<u64> {
        match self.session {
            Session::Closed => None,
            Session::Open | Session::Faulted => Some(self.region.base as u64 + self.written as u64),
        }
    }

    /// Bytes programmed this transfer.
    pub fn written(&self) -> u32 {
        self.written
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ERASED, RamFlash};
    use std::vec::Vec;

    const BASE: u32 = 0x0800_8000;
    const REGION: Region = Region::new(BASE, 256);

    /// Flash with room either side of the region, to catch writes that escape it.
    type TestFlash = RamFlash<512>;

    fn flash() -> TestFlash {
        RamFlash::new(BASE - 128)
    }

    /// Expected cursor `offset` bytes into the test region.
    fn at(offset: u32) -> Option<u64> {
        Some(u64::from(BASE + offset))
    }

    fn create() -> OpenRequest<'static> {
        OpenRequest::new(b"image.bin")
    }

    #[derive(Debug)]
    struct Broken;

    /// Fails every program at or after `fail_from`.
    struct FailingFlash {
        inner: TestFlash,
        fail_from: u32,
        erase_fails: bool,
    }

    impl FlashHal for FailingFlash {
        type Error = Broken;

        fn erase(&mut self, addr: u32, len: u32) -> core::result::Result<(), Broken> {
            if self.erase_fails {
                return Err(Broken);
            }
            self.inner.erase(addr, len).map_err(|_| Broken)
        }

        fn program(&mut self, addr: u32, data: &[u8]) -> core::result::Result<(), Broken> {
            if addr >= self.fail_from {
                return Err(Broken);
            }
            self.inner.program(addr, data).map_err(|_| Broken)
        }
    }

    struct TenTicks(u32);

    impl Clock for TenTicks {
        fn ticks(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(10);
            self.0
        }
    }

    #[test]
    fn rejects_invalid_region() {
        let mut flash = flash();
        assert!(matches!(
            FlashWriter::new(&mut flash, Region::new(BASE, 0)),
            Err(Error::InvalidRegion)
        ));
    }

    #[test]
    fn hello_is_written_at_base() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(b"HELLO").unwrap();
            assert_eq!(writer.cursor(), at(5));
        }
        assert_eq!(flash.read(BASE, 5), Some(&b"HELLO"[..]));
    }

    #[test]
    fn chunks_are_contiguous() {
        let chunks: [&[u8]; 4] = [b"abc", b"", b"defgh", b"i"];
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            for chunk in chunks {
                writer.write_chunk(chunk).unwrap();
            }
            let total: usize = chunks.iter().map(|c| c.len()).sum();
            assert_eq!(writer.cursor(), at(total as u32));
            assert_eq!(writer.written(), total as u32);
            assert_eq!(writer.stats().chunks, 3);
            assert_eq!(writer.stats().bytes, total as u32);
        }
        let expected: Vec<u8> = chunks.concat();
        assert_eq!(flash.read(BASE, expected.len()), Some(&expected[..]));
        assert_eq!(flash.read(BASE + expected.len() as u32, 1), Some(&[ERASED][..]));
    }

    #[test]
    fn open_erases_whole_region_only() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
        }
        assert!(flash.read(BASE, 256).unwrap().iter().all(|b| *b == ERASED));
        assert_eq!(flash.read(BASE - 128, 128), Some(&[0u8; 128][..]));
        assert_eq!(flash.read(BASE + 256, 128), Some(&[0u8; 128][..]));
    }

    #[test]
    fn write_before_open_fails_without_touching_flash() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            assert_eq!(writer.write_chunk(b"data"), Err(Error::NotOpen));
            assert_eq!(writer.cursor(), None);
            assert!(!writer.is_open());
        }
        assert_eq!(flash.erase_count(), 0);
        assert_eq!(flash.program_count(), 0);
    }

    #[test]
    fn reopen_leaves_no_residue() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(b"first attempt").unwrap();

            writer.open_destination(OpenMode::Create, &create()).unwrap();
            assert_eq!(writer.cursor(), at(0));
            assert_eq!(writer.stats(), WriteStats::default());

            // Would be refused by the RAM flash if the erase had not happened
            writer.write_chunk(b"second").unwrap();
        }
        assert_eq!(flash.erase_count(), 2);
        assert_eq!(flash.read(BASE, 6), Some(&b"second"[..]));
        assert!(flash.read(BASE + 6, 250).unwrap().iter().all(|b| *b == ERASED));
    }

    #[test]
    fn unsupported_modes_are_refused() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            assert_eq!(
                writer.open_destination(OpenMode::Input, &create()),
                Err(Error::NotSupported)
            );
            assert_eq!(
                writer.open_destination(OpenMode::Append, &create()),
                Err(Error::NotSupported)
            );
            assert!(!writer.is_open());
        }
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn oversized_image_is_refused_before_erase() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            let req = create().with_size(257);
            assert_eq!(
                writer.open_destination(OpenMode::Create, &req),
                Err(Error::ImageTooLarge)
            );
            let req = create().with_size(256).with_date(b"20250101 00:00:00");
            assert_eq!(writer.open_destination(OpenMode::Create, &req), Ok(()));
        }
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn write_past_region_end_is_refused() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(&[0x11; 250]).unwrap();
            assert_eq!(writer.write_chunk(&[0x22; 7]), Err(Error::RegionOverflow));
            assert_eq!(writer.cursor(), at(250));
            writer.write_chunk(&[0x33; 6]).unwrap();
            assert_eq!(writer.cursor(), at(256));
            assert_eq!(writer.write_chunk(&[0x44]), Err(Error::RegionOverflow));
            assert_eq!(writer.write_chunk(&[]), Ok(()));
        }
        assert_eq!(flash.read(BASE + 256, 128), Some(&[0u8; 128][..]));
    }

    #[test]
    fn region_at_top_of_address_space_fills_completely() {
        const TOP: u32 = 0xFFFF_FFF0;
        let mut flash = RamFlash::<16>::new(TOP);
        {
            let mut writer = FlashWriter::new(&mut flash, Region::new(TOP, 16)).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(&[0x11; 10]).unwrap();
            writer.write_chunk(&[0x22; 6]).unwrap();
            assert_eq!(writer.cursor(), Some(1 << 32));
            assert_eq!(writer.written(), 16);
            assert_eq!(writer.write_chunk(&[0x33]), Err(Error::RegionOverflow));
            assert_eq!(writer.write_chunk(&[]), Ok(()));
            assert_eq!(
                writer.close_destination(Completion::Complete, CloseMode::Output),
                CloseStatus::Complete { bytes: 16 }
            );
        }
        assert_eq!(flash.read(TOP + 10, 6), Some(&[0x22; 6][..]));
    }

    #[test]
    fn failed_reopen_ends_previous_transfer() {
        let mut flash = flash();
        {
            let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(b"old transfer").unwrap();

            assert_eq!(
                writer.open_destination(OpenMode::Create, &create().with_size(9999)),
                Err(Error::ImageTooLarge)
            );
            assert!(!writer.is_open());
            assert_eq!(writer.cursor(), None);
            assert_eq!(writer.write_chunk(b"new"), Err(Error::NotOpen));

            writer.open_destination(OpenMode::Create, &create()).unwrap();
            writer.write_chunk(b"old transfer").unwrap();
            assert_eq!(
                writer.open_destination(OpenMode::Append, &create()),
                Err(Error::NotSupported)
            );
            assert_eq!(writer.write_chunk(b"new"), Err(Error::NotOpen));
            assert_eq!(
                writer.close_destination(Completion::Complete, CloseMode::Output),
                CloseStatus::NotOpen
            );
        }
        assert_eq!(flash.erase_count(), 2);
        assert_eq!(flash.read(BASE + 12, 3), Some(&[ERASED; 3][..]));
    }

    #[test]
    fn program_failure_faults_the_transfer() {
        let mut flash = FailingFlash {
            inner: flash(),
            fail_from: BASE + 8,
            erase_fails: false,
        };
        let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
        writer.open_destination(OpenMode::Create, &create()).unwrap();
        writer.write_chunk(b"12345678").unwrap();
        assert_eq!(writer.write_chunk(b"9"), Err(Error::ProgramFailed));
        assert_eq!(writer.cursor(), at(8));
        assert_eq!(writer.write_chunk(b"9"), Err(Error::Faulted));
        assert_eq!(
            writer.close_destination(Completion::Complete, CloseMode::Output),
            CloseStatus::Partial { bytes: 8 }
        );
    }

    #[test]
    fn erase_failure_leaves_destination_closed() {
        let mut flash = FailingFlash {
            inner: flash(),
            fail_from: u32::MAX,
            erase_fails: true,
        };
        let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();
        assert_eq!(
            writer.open_destination(OpenMode::Create, &create()),
            Err(Error::EraseFailed)
        );
        assert_eq!(writer.write_chunk(b"x"), Err(Error::NotOpen));
    }

    #[test]
    fn close_reports_outcome() {
        let mut flash = flash();
        let mut writer = FlashWriter::new(&mut flash, REGION).unwrap();

        assert_eq!(
            writer.close_destination(Completion::Complete, CloseMode::Output),
            CloseStatus::NotOpen
        );

        writer.open_destination(OpenMode::Create, &create()).unwrap();
        writer.write_chunk(b"abcd").unwrap();
        assert_eq!(
            writer.close_destination(Completion::Complete, CloseMode::Input),
            CloseStatus::NotOpen
        );
        assert!(writer.is_open());
        assert_eq!(
            writer.close_destination(Completion::Complete, CloseMode::Output),
            CloseStatus::Complete { bytes: 4 }
        );
        assert_eq!(writer.write_chunk(b"e"), Err(Error::NotOpen));

        writer.open_destination(OpenMode::Create, &create()).unwrap();
        writer.write_chunk(b"ab").unwrap();
        assert_eq!(
            writer.close_destination(Completion::from(b'D'), CloseMode::Output),
            CloseStatus::Partial { bytes: 2 }
        );
        assert_eq!(
            writer.close_destination(Completion::Complete, CloseMode::Output),
            CloseStatus::NotOpen
        );
    }

    #[test]
    fn write_timing_is_recorded() {
        let mut flash = flash();
        let mut writer = FlashWriter::with_clock(&mut flash, REGION, TenTicks(0)).unwrap();
        writer.open_destination(OpenMode::Create, &create()).unwrap();
        writer.write_chunk(b"abc").unwrap();
        let stats = writer.stats();
        assert_eq!(stats.last_ticks, 10);
        assert_eq!(stats.max_ticks, 10);
        assert_eq!(writer.region(), REGION);
    }
}
