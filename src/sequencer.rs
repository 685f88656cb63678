//! Job and page command sequencing.
//!
//! The sequencer pulls raster pages from a [`RasterSource`], pushes each
//! row through the transform and the run-length encoder into the row
//! buffer, and brackets everything with the right initialization, mode,
//! print-information and terminator commands.  It reads one page header
//! ahead so the final page can be closed with the eject byte instead of
//! a form feed.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};

use crate::buffer::{PageCtx, RowBuffer};
use crate::error::Error;
use crate::options::{Align, JobOptions, Media, PixelXfer, Series};
use crate::page::PageHeader;
use crate::raster::RasterSource;
use crate::transform::transform_row;

const ESC: u8 = 0x1B;
/// Print and eject; terminates the job.
pub const PTC_EJECT: u8 = 0x1A;
/// Print without ejecting; separates pages.
pub const PTC_FORMFEED: u8 = 0x0C;
/// Zero bytes emitted ahead of the job so the device abandons any
/// half-received command from a previous, aborted stream.
const RECOVERY_PAD: usize = 350;

// Print-information validity flags.
const PI_KIND: u8 = 0x02;
const PI_WIDTH: u8 = 0x04;
const PI_LENGTH: u8 = 0x08;
const PI_QUALITY: u8 = 0x40;
const PI_RECOVER: u8 = 0x80;

/// Snapshot handed to the progress callback between rows.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub page: u32,
    pub completed: u32,
    pub height: u32,
}

/// Per-job encoder state.  One sequencer drives one job; the row arena
/// is reused across its pages.
pub struct Sequencer<'a> {
    options: JobOptions,
    buffer: RowBuffer,
    /// Blank lines seen but not yet materialized in the buffer.
    empty_lines: u32,
    /// Current page number, 1-based.
    page: u32,
    last_page: bool,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<Box<dyn FnMut(Progress) + 'a>>,
}

impl<'a> Sequencer<'a> {
    pub fn new(options: JobOptions) -> Self {
        Sequencer {
            options,
            buffer: RowBuffer::new(),
            empty_lines: 0,
            page: 0,
            last_page: false,
            cancel: None,
            progress: None,
        }
    }

    /// Abort the job when `flag` becomes true.  The flag is polled
    /// between rows, so a signal handler only has to store into it.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn on_progress(mut self, callback: impl FnMut(Progress) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Lower the row buffer's flush threshold (test hook).
    #[doc(hidden)]
    pub fn set_max_lines_waiting(&mut self, max: u32) {
        self.buffer.set_max_lines_waiting(max);
    }

    fn which_page(&self) -> u8 {
        if self.options.last_page_flag && self.last_page {
            2
        } else {
            (self.page > 1) as u8
        }
    }

    /// Convert a whole job, writing the device byte stream to `out`.
    pub fn run<S, W>(&mut self, source: &mut S, out: &mut W) -> Result<(), Error>
    where
        S: RasterSource,
        W: Write,
    {
        let mut header = match source.next_page()? {
            Some(h) => h,
            None => return Ok(()),
        };
        self.page = 1;
        self.last_page = false;
        self.empty_lines = 0;

        loop {
            debug!(
                "page {}: {:.2}x{:.2}pt {}x{}px at {}x{}dpi, bbox {:?}, negative {}",
                self.page,
                header.page_size[0],
                header.page_size[1],
                header.width_px,
                header.height_px,
                header.resolution[0],
                header.resolution[1],
                header.imaging_bbox,
                header.negative_print,
            );
            if self.page == 1 {
                self.emit_job_cmds(out)?;
            }
            // Concatenated jobs are one device page; their settings are
            // only sent once.
            if self.page == 1 || !self.options.concat_pages {
                self.emit_page_cmds(&header, out)?;
            }
            self.emit_raster_lines(source, &header, out)?;

            let xor_mask = header.xor_mask();
            let next = source.next_page()?;
            self.last_page = next.is_none();
            let which_page = self.which_page();
            let ctx = PageCtx {
                job: &self.options,
                page: &header,
                which_page,
            };
            if !self.last_page {
                if !self.options.concat_pages {
                    self.buffer
                        .store_empty_rows(self.empty_lines, xor_mask, &ctx, out)?;
                    self.empty_lines = 0;
                    self.buffer.flush(&ctx, out)?;
                    out.write_all(&[PTC_FORMFEED])?;
                }
            } else {
                if self.options.concat_pages {
                    // The carried inter-page blanks are dropped; the
                    // concatenated page ends with the bottom bbox margin.
                    self.empty_lines =
                        (header.imaging_bbox[1] * header.pt2px()[1]).round() as u32;
                }
                self.buffer
                    .store_empty_rows(self.empty_lines, xor_mask, &ctx, out)?;
                self.empty_lines = 0;
                self.buffer.flush(&ctx, out)?;
                out.write_all(&[PTC_EJECT])?;
            }
            info!("finished page {}", self.page);

            match next {
                Some(h) => {
                    header = h;
                    self.page += 1;
                }
                None => break,
            }
        }
        out.flush()?;
        Ok(())
    }

    fn emit_job_cmds<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&[0u8; RECOVERY_PAD])?;
        out.write_all(&[ESC, b'@'])?;
        if let Some(mode) = self.options.legacy_xfer_mode {
            out.write_all(&[ESC, b'i', b'R', mode])?;
        }
        if let Some(mode) = self.options.xfer_mode {
            out.write_all(&[ESC, b'i', b'a', mode])?;
        }
        if let Some(notify) = self.options.status_notification {
            out.write_all(&[ESC, b'i', b'!', notify])?;
        }
        Ok(())
    }

    fn emit_page_cmds<W: Write>(&self, header: &PageHeader, out: &mut W) -> io::Result<()> {
        let job = &self.options;

        if (1..=5).contains(&job.print_density) {
            out.write_all(&[ESC, b'i', b'D', job.print_density])?;
        }

        if job.legacy_hires
            && header.resolution[0] == 360
            && matches!(header.resolution[1], 360 | 720)
        {
            let width_mm = header.width_mm();
            if header.resolution[1] == 360 {
                out.write_all(&[ESC, b'i', b'c', 0x84, 0x00, width_mm, 0x00, 0x00])?;
            } else {
                out.write_all(&[ESC, b'i', b'c', 0x86, 0x09, width_mm, 0x00, 0x01])?;
            }
        }

        let mut various_mode = 0u8;
        if job.auto_cut || job.cut_mark {
            various_mode |= 0x40;
        }
        if job.mirror_print && !job.software_mirror {
            various_mode |= 0x80;
        }
        out.write_all(&[ESC, b'i', b'M', various_mode])?;

        let mut advanced_mode = 0u8;
        if !job.legacy_hires {
            // High vertical resolutions the device announces via the
            // advanced mode bits instead of the legacy geometry command.
            if header.resolution[0] == 360 {
                if header.resolution[1] == 180 {
                    advanced_mode |= 0x01;
                }
                if header.resolution[1] == 720 {
                    advanced_mode |= 0x40;
                }
            }
            if header.resolution[0] == 300 && header.resolution[1] == 600 {
                advanced_mode |= 0x40;
            }
        }
        if job.half_cut {
            advanced_mode |= 0x04;
        }
        if !job.chain_printing {
            advanced_mode |= 0x08;
        }
        out.write_all(&[ESC, b'i', b'K', advanced_mode])?;

        if let Some(n) = job.cut_label {
            out.write_all(&[ESC, b'i', b'A', n])?;
        }

        // Die-cut labels feed implicitly; only continuous tape gets a
        // real margin amount.
        let mut margin_pt = 0.0f32;
        if job.media != Media::Labels {
            margin_pt += job.min_margin + job.margin;
        }
        let feed = (margin_pt * header.pt2px()[1]).round() as u32;
        let feed = feed.min(u16::MAX as u32) as u16;
        out.write_all(&[ESC, b'i', b'd'])?;
        out.write_all(&feed.to_le_bytes())?;

        match job.pixel_xfer {
            PixelXfer::Rle => out.write_all(&[b'M', 0x02])?,
            PixelXfer::Bip => {
                let lines = header.image_height_px().min(u16::MAX as u32) as u16;
                out.write_all(&[ESC, 0x2A, 0x27])?;
                out.write_all(&lines.to_le_bytes())?;
            }
            PixelXfer::Ulp => {}
        }
        Ok(())
    }

    fn emit_raster_lines<S, W>(
        &mut self,
        source: &mut S,
        header: &PageHeader,
        out: &mut W,
    ) -> Result<(), Error>
    where
        S: RasterSource,
        W: Write,
    {
        let xor_mask = header.xor_mask();
        let do_mirror = self.options.mirror_in_software();
        let bpl = self.options.bytes_per_line as usize;
        let pt2px = header.pt2px();

        let mut buflen = (header.row_bytes as usize).min(0xFF).min(bpl);

        // Horizontal placement: spacing between the imaging box and the
        // page box becomes right padding (plus centering if requested),
        // split into whole bytes and a sub-byte shift.
        let mut right_spacing_px: i64 = 0;
        if header.imaging_bbox[2] < header.page_size[0] {
            right_spacing_px =
                ((header.page_size[0] - header.imaging_bbox[2]) * pt2px[0]) as i64;
        }
        let right_padding_bits: i64 = if self.options.align == Align::Center {
            let left_spacing_px = (header.imaging_bbox[0] * pt2px[0]) as i64;
            let bits = (bpl as i64 * 8
                - (left_spacing_px + header.width_px as i64 + right_spacing_px))
                / 2
                + right_spacing_px;
            bits.max(0)
        } else {
            right_spacing_px
        };
        let mut right_padding_bytes = (right_padding_bits / 8) as usize;
        let mut shift = (right_padding_bits % 8) as i32;
        // Without mirroring a partial last byte must shift right so the
        // leftmost pixel still prints leftmost.
        if !do_mirror {
            shift -= ((8 - header.width_px % 8) % 8) as i32;
        }
        let shift_positive = (shift > 0) as usize;
        if buflen + right_padding_bytes + shift_positive > bpl {
            if right_padding_bytes + shift_positive > bpl {
                right_padding_bytes = bpl - shift_positive;
            }
            buflen = bpl - right_padding_bytes - shift_positive;
        }

        // Vertical placement: page box space above/below the imaging box
        // becomes synthetic blank lines, reduced by the mandatory
        // minimum feed, which is instead taken out of the bitmap edges
        // when the bitmap runs into it.
        let mut top_empty_lines: u32 = 0;
        if header.imaging_bbox[3] != 0.0 && (!self.options.concat_pages || self.page == 1) {
            let top_distance_pt = header.page_size[1] - header.imaging_bbox[3];
            top_empty_lines = (top_distance_pt * pt2px[1]).round() as u32;
        }
        let image_height_px = header.image_height_px();
        let mut bot_empty_lines: u32 = 0;
        if image_height_px >= top_empty_lines + header.height_px {
            bot_empty_lines = image_height_px - top_empty_lines - header.height_px;
        }

        let mut top_skip: u32 = 0;
        let mut bot_skip: u32 = 0;
        let min_feed = (self.options.min_margin * pt2px[1]).round() as u32;
        if self.options.media == Media::Labels && top_empty_lines > 0 {
            top_empty_lines = 0;
        } else if top_empty_lines >= min_feed {
            top_empty_lines -= min_feed;
        } else {
            top_skip = min_feed - top_empty_lines;
            top_empty_lines = 0;
        }
        if self.options.media == Media::Labels && bot_empty_lines > 0 {
            bot_empty_lines = 0;
        } else if bot_empty_lines >= min_feed {
            bot_empty_lines -= min_feed;
        } else {
            bot_skip = min_feed - bot_empty_lines;
            bot_empty_lines = 0;
        }

        self.empty_lines += top_empty_lines;

        let mut raw = vec![0u8; header.row_bytes as usize];
        let mut emit = vec![0u8; bpl];
        let height = header.height_px;
        let which_page = self.which_page();

        for y in 0..height {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    // Buffered rows are dropped; the next job's recovery
                    // pad resets the device anyway.
                    self.buffer.reset();
                    out.write_all(&[PTC_EJECT])?;
                    out.flush()?;
                    return Err(Error::Cancelled);
                }
            }
            if let Some(callback) = &mut self.progress {
                callback(Progress {
                    page: self.page,
                    completed: y,
                    height,
                });
            }
            if source.read_row(&mut raw)? < 1 {
                break;
            }
            if y < top_skip || y + bot_skip >= height {
                continue;
            }
            let nonempty = transform_row(
                &raw[..buflen],
                &mut emit,
                right_padding_bytes,
                shift,
                do_mirror,
                xor_mask,
            );
            let ctx = PageCtx {
                job: &self.options,
                page: header,
                which_page,
            };
            if nonempty {
                if self.empty_lines > 0 {
                    self.buffer
                        .store_empty_rows(self.empty_lines, xor_mask, &ctx, out)?;
                    self.empty_lines = 0;
                }
                self.buffer.store_row(&emit, xor_mask, &ctx, out)?;
            } else {
                self.empty_lines += 1;
            }
        }
        if let Some(callback) = &mut self.progress {
            callback(Progress {
                page: self.page,
                completed: height,
                height,
            });
        }

        if bot_empty_lines != 0 && !self.options.concat_pages {
            self.empty_lines += bot_empty_lines;
        }
        Ok(())
    }
}

/// Emit the `ESC i z` print-information command announcing `lines`
/// raster rows.  Called by the row buffer at flush time so the count is
/// exact.
pub(crate) fn emit_print_information<W: Write>(
    job: &JobOptions,
    page: &PageHeader,
    lines: u32,
    which_page: u8,
    out: &mut W,
) -> io::Result<()> {
    let mut valid = PI_WIDTH;
    if job.label_recovery {
        valid |= PI_RECOVER;
    }
    let mut media_kind = 0u8;
    let mut length_mm = 0u8;
    match job.series {
        Some(Series::Ql) => {
            if job.print_quality_high {
                valid |= PI_QUALITY;
            }
            valid |= PI_KIND;
            match job.media {
                Media::Tape => media_kind = 0x0A,
                Media::Labels => {
                    media_kind = 0x0B;
                    valid |= PI_LENGTH;
                    length_mm = page.length_mm();
                }
            }
        }
        Some(Series::Pt) => {
            // PT models want the 0x09 paper kind for draft and hires
            // vertical resolutions only.
            if page.resolution[0] == 360 && matches!(page.resolution[1], 180 | 720) {
                valid |= PI_KIND;
                media_kind = 0x09;
            }
        }
        None => {}
    }
    let mut cmd = [0u8; 13];
    cmd[..3].copy_from_slice(&[ESC, b'i', b'z']);
    cmd[3] = valid;
    cmd[4] = media_kind;
    cmd[5] = page.width_mm();
    cmd[6] = length_mm;
    cmd[7..11].copy_from_slice(&lines.to_le_bytes());
    cmd[11] = which_page;
    cmd[12] = 0x00;
    out.write_all(&cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::parse_job_options;
    use crate::raster::MemoryPages;

    fn page(height: u32, row: &[u8]) -> (PageHeader, Vec<Vec<u8>>) {
        let header = PageHeader {
            resolution: [300, 300],
            page_size: [176.0, height as f32 * 72.0 / 300.0],
            imaging_bbox: [0.0, 0.0, 176.0, height as f32 * 72.0 / 300.0],
            width_px: row.len() as u32 * 8,
            height_px: height,
            row_bytes: row.len() as u32,
            negative_print: false,
        };
        (header, vec![row.to_vec(); height as usize])
    }

    fn encode(opts: &str, pages: Vec<(PageHeader, Vec<Vec<u8>>)>) -> Vec<u8> {
        let options = parse_job_options(opts).unwrap();
        let mut source = MemoryPages::new(pages);
        let mut out = Vec::new();
        Sequencer::new(options)
            .run(&mut source, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn empty_job_emits_nothing() {
        let out = encode("", vec![]);
        assert!(out.is_empty());
    }

    #[test]
    fn job_opens_with_recovery_pad_and_initialize() {
        let out = encode("BytesPerLine=1", vec![page(1, &[0xFF])]);
        assert!(out[..350].iter().all(|&b| b == 0));
        assert_eq!(&out[350..352], &[0x1B, b'@']);
        assert_eq!(*out.last().unwrap(), PTC_EJECT);
        assert_eq!(out.iter().filter(|&&b| b == PTC_EJECT).count(), 1);
    }

    #[test]
    fn transfer_mode_commands_follow_initialize_in_order() {
        let out = encode(
            "BytesPerLine=1 LegacyTransferMode=1 TransferMode=1 StatusNotification=0",
            vec![page(1, &[0xFF])],
        );
        assert_eq!(
            &out[350..364],
            &[
                0x1B, b'@', 0x1B, b'i', b'R', 0x01, 0x1B, b'i', b'a', 0x01, 0x1B, b'i', b'!',
                0x00
            ]
        );
    }

    #[test]
    fn form_feed_separates_pages() {
        let (h, rows) = page(2, &[0xAA]);
        let out = encode(
            "BytesPerLine=1",
            vec![(h.clone(), rows.clone()), (h, rows)],
        );
        assert_eq!(out.iter().filter(|&&b| b == PTC_FORMFEED).count(), 1);
        assert_eq!(out.iter().filter(|&&b| b == PTC_EJECT).count(), 1);
        assert_eq!(*out.last().unwrap(), PTC_EJECT);
    }

    #[test]
    fn concat_pages_suppresses_the_form_feed() {
        let (h, rows) = page(2, &[0xAA]);
        let out = encode(
            "BytesPerLine=1 ConcatPages",
            vec![(h.clone(), rows.clone()), (h, rows)],
        );
        assert_eq!(out.iter().filter(|&&b| b == PTC_FORMFEED).count(), 0);
        assert_eq!(out.iter().filter(|&&b| b == PTC_EJECT).count(), 1);
    }

    #[test]
    fn cancellation_ejects_and_stops() {
        let options = parse_job_options("BytesPerLine=1").unwrap();
        let (h, rows) = page(4, &[0xFF]);
        let mut source = MemoryPages::new(vec![(h, rows)]);
        let flag = Arc::new(AtomicBool::new(true));
        let mut out = Vec::new();
        let err = Sequencer::new(options)
            .with_cancel_flag(flag)
            .run(&mut source, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(*out.last().unwrap(), PTC_EJECT);
    }

    #[test]
    fn progress_reaches_the_full_height() {
        let options = parse_job_options("BytesPerLine=1").unwrap();
        let (h, rows) = page(3, &[0x01]);
        let mut source = MemoryPages::new(vec![(h, rows)]);
        let mut seen = Vec::new();
        let mut out = Vec::new();
        Sequencer::new(options)
            .on_progress(|p| seen.push((p.page, p.completed)))
            .run(&mut source, &mut out)
            .unwrap();
        assert_eq!(seen.first(), Some(&(1, 0)));
        assert_eq!(seen.last(), Some(&(1, 3)));
    }
}
