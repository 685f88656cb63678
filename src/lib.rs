//! Raster filter for Brother P-touch and QL label printers.
//!
//! This crate converts a page-by-page stream of 1-bit raster rows into
//! the one-way device command stream the P-touch/QL family understands:
//! per-row bit reversal and alignment, bounded run-length encoding,
//! deferred page assembly and the job/page command sequencing around it.
//! The matching [`decode`] module parses such a stream back into typed
//! events and doubles as the wire format oracle for the test suite.
//!
//! The two binaries built from this crate are `rastertoptouch` (the
//! filter) and `ptexplain` (the stream explainer).

pub use crate::{
    error::{ConfigError, Error},
    options::{parse_job_options, Align, JobOptions, Media, PixelXfer, Series},
    page::PageHeader,
    raster::{MemoryPages, PageStreamReader, PageStreamWriter, RasterSource},
    sequencer::{Progress, Sequencer},
};

pub mod bits;
pub mod buffer;
pub mod decode;
mod error;
pub mod options;
pub mod page;
pub mod raster;
pub mod render;
pub mod rle;
pub mod sequencer;
pub mod transform;
