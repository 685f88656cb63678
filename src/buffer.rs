//! Deferred raster line emission.
//!
//! Encoded rows are not written to the device as they are produced: the
//! per-page print-information command has to announce the exact number
//! of lines that follow, so rows accumulate in an arena until the page
//! ends or memory pressure forces a flush.  Each arena entry is a tagged
//! packet: `G`/`g` with a two-byte length prefix and an RLE body, or a
//! single `Z` for an empty line.

use std::io::Write;

use log::error;

use crate::error::Error;
use crate::options::{JobOptions, PixelXfer};
use crate::page::PageHeader;
use crate::rle;
use crate::sequencer::emit_print_information;

/// Hard cap on the arena size.  Beyond it the buffer flushes to the sink
/// and keeps going.
pub const ARENA_CAP: usize = 1_000_000;

/// Everything a flush needs to know about the page being emitted.
pub struct PageCtx<'a> {
    pub job: &'a JobOptions,
    pub page: &'a PageHeader,
    /// 0 = first page, 1 = middle, 2 = flagged last page.
    pub which_page: u8,
}

/// Row arena with geometric growth, reused across pages.
pub struct RowBuffer {
    arena: Vec<u8>,
    /// Reserved size the arena may grow into without a new allocation
    /// decision.
    alloced: usize,
    lines_waiting: u32,
    /// Flush threshold; effectively unbounded unless a test lowers it.
    max_lines_waiting: u32,
    /// Scratch line for uncompressed/bit-image expansion.
    scratch: Vec<u8>,
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RowBuffer {
    pub fn new() -> Self {
        RowBuffer {
            arena: Vec::new(),
            alloced: 0,
            lines_waiting: 0,
            max_lines_waiting: u32::MAX,
            scratch: Vec::new(),
        }
    }

    /// Number of rows currently waiting for a flush.
    pub fn lines_waiting(&self) -> u32 {
        self.lines_waiting
    }

    /// Lower the flush threshold.  Only useful to force mid-page flushes
    /// in tests.
    pub fn set_max_lines_waiting(&mut self, max: u32) {
        self.max_lines_waiting = max;
    }

    /// Drop everything buffered without emitting it.  Capacity is kept.
    pub fn reset(&mut self) {
        self.arena.clear();
        self.lines_waiting = 0;
    }

    /// Make room for `bytes` more arena bytes, growing geometrically up
    /// to [`ARENA_CAP`] and flushing to the sink when the cap is hit.
    fn ensure<W: Write>(&mut self, bytes: usize, ctx: &PageCtx, out: &mut W) -> Result<(), Error> {
        if self.arena.len() + bytes <= self.alloced {
            return Ok(());
        }
        let grown = (self.alloced * 2 + 0x4000).max(self.arena.len() + bytes);
        if grown <= ARENA_CAP {
            self.arena.reserve(grown - self.arena.len());
            self.alloced = grown;
            return Ok(());
        }
        self.flush(ctx, out)?;
        if bytes > self.alloced {
            return Err(Error::OutOfBuffer {
                needed: bytes,
                available: self.alloced,
            });
        }
        Ok(())
    }

    /// Append one transformed row.
    ///
    /// A row whose every byte equals a zero background is stored as the
    /// one-byte `Z` token.  The shortcut is keyed on the final wire
    /// value: under negative printing the background is `0xFF`, the
    /// device token still prints zeros, so nothing collapses to `Z`.
    pub fn store_row<W: Write>(
        &mut self,
        row: &[u8],
        xor_mask: u8,
        ctx: &PageCtx,
        out: &mut W,
    ) -> Result<(), Error> {
        self.ensure(3 + rle::max_encoded_len(row.len()), ctx, out)?;
        if xor_mask == 0 && row.iter().all(|&b| b == 0) {
            self.arena.push(b'Z');
        } else {
            let at = self.arena.len();
            self.arena.extend_from_slice(&[0; 3]);
            let body_len = rle::encode_into(row, &mut self.arena);
            self.arena[at] = ctx.job.raster_letter();
            let len = ctx.job.raster_len_bytes(body_len as u16);
            self.arena[at + 1] = len[0];
            self.arena[at + 2] = len[1];
        }
        self.lines_waiting += 1;
        if self.lines_waiting >= self.max_lines_waiting {
            self.flush(ctx, out)?;
        }
        Ok(())
    }

    /// Append `count` empty rows.
    ///
    /// With a zero background these are `Z` tokens.  The device token
    /// does not honor negative printing, so an inverted background is
    /// materialized as full rows of repeat runs instead.
    pub fn store_empty_rows<W: Write>(
        &mut self,
        count: u32,
        xor_mask: u8,
        ctx: &PageCtx,
        out: &mut W,
    ) -> Result<(), Error> {
        if count == 0 {
            return Ok(());
        }
        if xor_mask == 0 {
            self.ensure(count as usize, ctx, out)?;
            self.arena.resize(self.arena.len() + count as usize, b'Z');
        } else {
            let bpl = ctx.job.bytes_per_line as usize;
            let runs = bpl.div_ceil(129);
            self.ensure(count as usize * (3 + 2 * runs), ctx, out)?;
            for _ in 0..count {
                let at = self.arena.len();
                self.arena.extend_from_slice(&[0; 3]);
                let mut left = bpl;
                while left > 0 {
                    let rep = left.min(129);
                    self.arena.push((1 - rep as i32) as i8 as u8);
                    self.arena.push(xor_mask);
                    left -= rep;
                }
                let body_len = (self.arena.len() - at - 3) as u16;
                self.arena[at] = ctx.job.raster_letter();
                let len = ctx.job.raster_len_bytes(body_len);
                self.arena[at + 1] = len[0];
                self.arena[at + 2] = len[1];
            }
        }
        self.lines_waiting += count;
        Ok(())
    }

    /// Emit everything waiting, preceded by the print-information
    /// command when the job asks for a label preamble.
    pub fn flush<W: Write>(&mut self, ctx: &PageCtx, out: &mut W) -> Result<(), Error> {
        if self.lines_waiting == 0 {
            return Ok(());
        }
        if ctx.job.label_preamble {
            emit_print_information(ctx.job, ctx.page, self.lines_waiting, ctx.which_page, out)?;
        }
        match ctx.job.pixel_xfer {
            PixelXfer::Rle => out.write_all(&self.arena)?,
            PixelXfer::Ulp | PixelXfer::Bip => self.expand(ctx, out)?,
        }
        self.arena.clear();
        self.lines_waiting = 0;
        Ok(())
    }

    /// Rewrite the arena's RLE packets as uncompressed or bit-image
    /// lines of exactly `bytes_per_line` bytes each.
    fn expand<W: Write>(&mut self, ctx: &PageCtx, out: &mut W) -> Result<(), Error> {
        let bpl = ctx.job.bytes_per_line as usize;
        let ulp = ctx.job.pixel_xfer == PixelXfer::Ulp;
        let arena = &self.arena;
        let scratch = &mut self.scratch;
        let mut p = 0;
        while p < arena.len() {
            scratch.clear();
            match arena[p] {
                b'Z' => p += 1,
                tag @ (b'G' | b'g') => {
                    let raw = [arena[p + 1], arena[p + 2]];
                    let body_len = if tag == b'g' {
                        u16::from_be_bytes(raw)
                    } else {
                        u16::from_le_bytes(raw)
                    } as usize;
                    let body = &arena[p + 3..p + 3 + body_len];
                    p += 3 + body_len;
                    if rle::unpack_into(body, scratch).is_err() {
                        error!("corrupt run in the row arena");
                    }
                    if scratch.len() > bpl {
                        error!(
                            "expanded {} > {} bytes for one pixel line",
                            scratch.len(),
                            bpl
                        );
                        scratch.truncate(bpl);
                    }
                }
                other => {
                    error!("unknown row tag {other:#04x} in the arena");
                    p += 1;
                }
            }
            scratch.resize(bpl, 0x00);
            if ulp {
                out.write_all(&[b'g', 0x00, ctx.job.bytes_per_line])?;
            }
            out.write_all(scratch)?;
        }
        Ok(())
    }
}
