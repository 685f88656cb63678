//! Raster page producers.
//!
//! The sequencer does not care where pages come from; it pulls them
//! through [`RasterSource`], one header ahead of the pixel data so it
//! can tell the last page from the rest.  Two producers live here: an
//! in-memory one for tests and a reader for the filter's native page
//! stream container.
//!
//! The native container is deliberately minimal.  A stream starts with
//! the magic `PRa1`; each page follows as thirteen little-endian 32-bit
//! words (resolution x/y, page width/height and the four bounding box
//! coordinates as `f32` bits, width, height and bytes per row, and a
//! negative-print flag) and then `height * row_bytes` bytes of packed
//! pixel rows.  End of stream at a page boundary ends the job.

use std::io::{ErrorKind, Read, Write};

use crate::error::Error;
use crate::page::PageHeader;

/// Stream magic of the native page container.
pub const PAGE_STREAM_MAGIC: [u8; 4] = *b"PRa1";

/// A pull source of raster pages.
pub trait RasterSource {
    /// Fetch the next page header, or `None` at end of job.
    fn next_page(&mut self) -> Result<Option<PageHeader>, Error>;

    /// Read one row into `buf` (sized to the current page's row width).
    /// Returns the number of rows read: 1, or 0 when the page ran out
    /// early.
    fn read_row(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

/// Synthetic in-memory pages, mainly for tests and examples.
pub struct MemoryPages {
    pages: std::vec::IntoIter<(PageHeader, Vec<Vec<u8>>)>,
    rows: std::vec::IntoIter<Vec<u8>>,
}

impl MemoryPages {
    pub fn new(pages: Vec<(PageHeader, Vec<Vec<u8>>)>) -> Self {
        MemoryPages {
            pages: pages.into_iter(),
            rows: Vec::new().into_iter(),
        }
    }
}

impl RasterSource for MemoryPages {
    fn next_page(&mut self) -> Result<Option<PageHeader>, Error> {
        match self.pages.next() {
            Some((header, rows)) => {
                self.rows = rows.into_iter();
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn read_row(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.rows.next() {
            Some(row) => {
                if row.len() != buf.len() {
                    return Err(Error::Reader(format!(
                        "row of {} bytes where {} were expected",
                        row.len(),
                        buf.len()
                    )));
                }
                buf.copy_from_slice(&row);
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

/// Reader for the native page stream container.
pub struct PageStreamReader<R: Read> {
    inner: R,
    started: bool,
    /// Rows left in the current page.
    rows_left: u32,
    row_bytes: u64,
}

impl<R: Read> PageStreamReader<R> {
    pub fn new(inner: R) -> Self {
        PageStreamReader {
            inner,
            started: false,
            rows_left: 0,
            row_bytes: 0,
        }
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let mut word = [0u8; 4];
        self.inner
            .read_exact(&mut word)
            .map_err(|e| Error::Reader(format!("truncated page header: {e}")))?;
        Ok(u32::from_le_bytes(word))
    }

    fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(f32::from_bits(self.read_u32()?))
    }
}

impl<R: Read> RasterSource for PageStreamReader<R> {
    fn next_page(&mut self) -> Result<Option<PageHeader>, Error> {
        if !self.started {
            let mut magic = [0u8; 4];
            self.inner
                .read_exact(&mut magic)
                .map_err(|e| Error::Reader(format!("missing stream magic: {e}")))?;
            if magic != PAGE_STREAM_MAGIC {
                return Err(Error::Reader("bad stream magic".into()));
            }
            self.started = true;
        }
        // Skip whatever is left of a page the caller abandoned early.
        if self.rows_left > 0 {
            let leftover = self.rows_left as u64 * self.row_bytes;
            std::io::copy(
                &mut self.inner.by_ref().take(leftover),
                &mut std::io::sink(),
            )?;
            self.rows_left = 0;
        }
        let mut first = [0u8; 4];
        match self.inner.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(n) if n < 4 => {
                self.inner
                    .read_exact(&mut first[n..])
                    .map_err(|e| Error::Reader(format!("truncated page header: {e}")))?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let header = PageHeader {
            resolution: [u32::from_le_bytes(first), self.read_u32()?],
            page_size: [self.read_f32()?, self.read_f32()?],
            imaging_bbox: [
                self.read_f32()?,
                self.read_f32()?,
                self.read_f32()?,
                self.read_f32()?,
            ],
            width_px: self.read_u32()?,
            height_px: self.read_u32()?,
            row_bytes: self.read_u32()?,
            negative_print: self.read_u32()? != 0,
        };
        if header.row_bytes * 8 < header.width_px {
            return Err(Error::Reader(format!(
                "{} row bytes cannot hold {} pixels",
                header.row_bytes, header.width_px
            )));
        }
        self.rows_left = header.height_px;
        self.row_bytes = header.row_bytes as u64;
        Ok(Some(header))
    }

    fn read_row(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.rows_left == 0 {
            return Ok(0);
        }
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::Reader(format!("short pixel row: {e}")))?;
        self.rows_left -= 1;
        Ok(1)
    }
}

/// Writer counterpart of [`PageStreamReader`], used to produce test
/// fixtures and to bridge other raster producers into the filter.
pub struct PageStreamWriter<W: Write> {
    inner: W,
    started: bool,
}

impl<W: Write> PageStreamWriter<W> {
    pub fn new(inner: W) -> Self {
        PageStreamWriter {
            inner,
            started: false,
        }
    }

    pub fn write_page(&mut self, header: &PageHeader, rows: &[Vec<u8>]) -> Result<(), Error> {
        if !self.started {
            self.inner.write_all(&PAGE_STREAM_MAGIC)?;
            self.started = true;
        }
        debug_assert_eq!(rows.len() as u32, header.height_px);
        for word in [
            header.resolution[0],
            header.resolution[1],
            header.page_size[0].to_bits(),
            header.page_size[1].to_bits(),
            header.imaging_bbox[0].to_bits(),
            header.imaging_bbox[1].to_bits(),
            header.imaging_bbox[2].to_bits(),
            header.imaging_bbox[3].to_bits(),
            header.width_px,
            header.height_px,
            header.row_bytes,
            header.negative_print as u32,
        ] {
            self.inner.write_all(&word.to_le_bytes())?;
        }
        for row in rows {
            debug_assert_eq!(row.len() as u32, header.row_bytes);
            self.inner.write_all(row)?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(width_px: u32, height_px: u32, row_bytes: u32) -> PageHeader {
        PageHeader {
            resolution: [300, 300],
            page_size: [176.0, 142.0],
            imaging_bbox: [0.0, 0.0, 176.0, 142.0],
            width_px,
            height_px,
            row_bytes,
            negative_print: false,
        }
    }

    #[test]
    fn memory_pages_hand_out_rows_then_stop() {
        let h = header(8, 2, 1);
        let mut src = MemoryPages::new(vec![(h.clone(), vec![vec![0xAA], vec![0x55]])]);
        assert_eq!(src.next_page().unwrap(), Some(h));
        let mut row = [0u8; 1];
        assert_eq!(src.read_row(&mut row).unwrap(), 1);
        assert_eq!(row, [0xAA]);
        assert_eq!(src.read_row(&mut row).unwrap(), 1);
        assert_eq!(row, [0x55]);
        assert_eq!(src.read_row(&mut row).unwrap(), 0);
        assert_eq!(src.next_page().unwrap(), None);
    }

    #[test]
    fn page_stream_roundtrips() {
        let h = header(16, 3, 2);
        let rows = vec![vec![1, 2], vec![3, 4], vec![5, 6]];
        let mut writer = PageStreamWriter::new(Vec::new());
        writer.write_page(&h, &rows).unwrap();
        writer.write_page(&h, &rows).unwrap();
        let bytes = writer.into_inner();

        let mut reader = PageStreamReader::new(&bytes[..]);
        for _ in 0..2 {
            let got = reader.next_page().unwrap().unwrap();
            assert_eq!(got, h);
            let mut row = [0u8; 2];
            for want in &rows {
                assert_eq!(reader.read_row(&mut row).unwrap(), 1);
                assert_eq!(&row[..], &want[..]);
            }
            assert_eq!(reader.read_row(&mut row).unwrap(), 0);
        }
        assert!(reader.next_page().unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_a_reader_error() {
        let mut reader = PageStreamReader::new(&b"nope"[..]);
        assert!(matches!(reader.next_page(), Err(Error::Reader(_))));
    }

    #[test]
    fn truncated_rows_are_reader_errors() {
        let h = header(16, 2, 2);
        let mut writer = PageStreamWriter::new(Vec::new());
        writer.write_page(&h, &vec![vec![1, 2], vec![3, 4]]).unwrap();
        let mut bytes = writer.into_inner();
        bytes.truncate(bytes.len() - 1);

        let mut reader = PageStreamReader::new(&bytes[..]);
        reader.next_page().unwrap().unwrap();
        let mut row = [0u8; 2];
        assert_eq!(reader.read_row(&mut row).unwrap(), 1);
        assert!(matches!(reader.read_row(&mut row), Err(Error::Reader(_))));
    }
}
