//! Pull parser for the printer byte stream.
//!
//! The decoder is the executable definition of the wire format: it
//! turns a command stream back into typed events and is what the test
//! suite round-trips every encoder output through.  Parsing is strictly
//! separate from presentation; see [`crate::render`] for the human
//! readable side.
//!
//! Grammar violations are reported in-band as [`Event::Error`] and
//! parsing continues on a best-effort basis, so one bad byte does not
//! hide the rest of a capture.  Several jobs may be concatenated in one
//! stream; each one re-initializes with `ESC @` after any leading
//! zero-byte recovery padding.

use std::collections::VecDeque;
use std::io::{self, Read};

use crate::rle;

const ESC: u8 = 0x1B;
const CTRL_Z: u8 = 0x1A;
const FORM_FEED: u8 = 0x0C;

/// Pixel data compression selected with the `M` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Uncompressed,
    Tiff,
}

/// Protocol selected with `ESC i a` (or the legacy `ESC i R`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSwitch {
    EscP,
    Raster,
    PTouchTemplate,
    Unknown(u8),
}

impl ModeSwitch {
    fn from_code(code: u8) -> Self {
        match code {
            0 => Self::EscP,
            1 => Self::Raster,
            3 => Self::PTouchTemplate,
            other => Self::Unknown(other),
        }
    }
}

/// One decoded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A run of `zeros` recovery padding bytes.
    Reset { zeros: u32 },
    /// `ESC @`
    Initialize,
    /// `ESC i !` — 0 enables notification, 1 disables it.
    StatusNotification { mode: u8 },
    /// `ESC i S`
    StatusRequest,
    /// `ESC i a` / legacy `ESC i R`
    SwitchMode { mode: ModeSwitch, legacy: bool },
    /// `ESC i z`
    PrintInformation {
        valid: u8,
        kind: u8,
        width: u8,
        length: u8,
        lines: u32,
        which_page: u8,
    },
    /// `ESC i D`
    Density { level: u8 },
    /// `ESC i M`
    VariousMode { flags: u8 },
    /// `ESC i K`
    AdvancedMode { flags: u8 },
    /// `ESC i d`
    Margin { lines: u16 },
    /// `ESC i A`
    CutEvery { labels: u8 },
    /// `ESC i c`
    LegacyHires { data: [u8; 5] },
    /// `ESC i U` / `ESC i k`, emitted by some vendor drivers.
    Undocumented { letter: u8, data: Vec<u8> },
    /// `M`
    SelectCompression { mode: Option<Compression>, raw: u8 },
    /// Raster data arrived before any `M` command; uncompressed assumed.
    CompressionAssumed,
    /// `G`/`g` — `bytes` is the wire body, `decoded` the expanded row.
    RasterLine {
        bytes: Vec<u8>,
        compression: Compression,
        decoded: Vec<u8>,
    },
    /// `Z` — only valid under TIFF compression.
    ZeroRasterLine { valid: bool },
    /// Form feed: print without ejecting.
    Print,
    /// `^Z`: print and eject.
    EndOfJob,
    /// Grammar violation at `offset`; parsing continued after it.
    Error { reason: String, offset: u64 },
}

enum Fail {
    Io(io::Error),
    Truncated(u64),
}

impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Fail::Io(e)
    }
}

/// Streaming decoder; iterate it for events.
pub struct Decoder<R: Read> {
    input: R,
    offset: u64,
    peeked: Option<u8>,
    pending: VecDeque<Event>,
    compression: Option<Compression>,
    initialized: bool,
    done: bool,
}

impl<R: Read> Decoder<R> {
    pub fn new(input: R) -> Self {
        Decoder {
            input,
            offset: 0,
            peeked: None,
            pending: VecDeque::new(),
            compression: None,
            initialized: false,
            done: false,
        }
    }

    /// Stream offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn get(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            self.offset += 1;
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn must(&mut self) -> Result<u8, Fail> {
        match self.get()? {
            Some(b) => Ok(b),
            None => Err(Fail::Truncated(self.offset)),
        }
    }

    fn must_n(&mut self, n: usize) -> Result<Vec<u8>, Fail> {
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            data.push(self.must()?);
        }
        Ok(data)
    }

    fn error(&self, reason: impl Into<String>) -> Event {
        Event::Error {
            reason: reason.into(),
            offset: self.offset,
        }
    }

    /// Fetch the next event, or `None` at a clean end of stream.
    pub fn next_event(&mut self) -> io::Result<Option<Event>> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(Some(ev));
            }
            if self.done {
                return Ok(None);
            }
            let c = match self.get()? {
                Some(c) => c,
                None => {
                    self.done = true;
                    if self.initialized {
                        self.initialized = false;
                        return Ok(Some(self.error("end of job command missing")));
                    }
                    return Ok(None);
                }
            };

            if c == 0 {
                let mut zeros = 1u32;
                loop {
                    match self.get()? {
                        Some(0) => zeros += 1,
                        Some(other) => {
                            self.peeked = Some(other);
                            self.offset -= 1;
                            break;
                        }
                        None => {
                            self.done = true;
                            break;
                        }
                    }
                }
                self.initialized = false;
                return Ok(Some(Event::Reset { zeros }));
            }

            if c != ESC && !self.initialized {
                self.pending
                    .push_back(self.error("initialize command missing"));
                self.initialized = true;
            }

            match self.parse_command(c) {
                Ok(ev) => self.pending.push_back(ev),
                Err(Fail::Truncated(offset)) => {
                    self.done = true;
                    self.pending.push_back(Event::Error {
                        reason: "more data expected".into(),
                        offset,
                    });
                }
                Err(Fail::Io(e)) => return Err(e),
            }
        }
    }

    fn parse_command(&mut self, c: u8) -> Result<Event, Fail> {
        match c {
            ESC => self.parse_escape(),
            b'M' => {
                let raw = self.must()?;
                let mode = match raw {
                    0 => Some(Compression::Uncompressed),
                    2 => Some(Compression::Tiff),
                    _ => None,
                };
                if let Some(mode) = mode {
                    self.compression = Some(mode);
                }
                Ok(Event::SelectCompression { mode, raw })
            }
            b'g' | b'G' => {
                let d = [self.must()?, self.must()?];
                let len = if c == b'g' {
                    u16::from_be_bytes(d)
                } else {
                    u16::from_le_bytes(d)
                } as usize;
                let compression = self.assume_compression();
                let bytes = self.must_n(len)?;
                let decoded = match compression {
                    Compression::Tiff => {
                        let mut row = Vec::new();
                        match rle::unpack_into(&bytes, &mut row) {
                            Ok(_) => row,
                            Err(pos) => {
                                return Ok(self.error(format!(
                                    "run overruns the raster line body at byte {pos}"
                                )))
                            }
                        }
                    }
                    Compression::Uncompressed => bytes.clone(),
                };
                Ok(Event::RasterLine {
                    bytes,
                    compression,
                    decoded,
                })
            }
            b'Z' => {
                let compression = self.assume_compression();
                Ok(Event::ZeroRasterLine {
                    valid: compression == Compression::Tiff,
                })
            }
            FORM_FEED => Ok(Event::Print),
            CTRL_Z => {
                self.initialized = false;
                Ok(Event::EndOfJob)
            }
            other => Ok(self.error(format!("unknown command {other:#04x}"))),
        }
    }

    fn parse_escape(&mut self) -> Result<Event, Fail> {
        let c = self.must()?;
        if c != b'@' && !self.initialized {
            self.pending
                .push_back(self.error("initialize command missing"));
            self.initialized = true;
        }
        match c {
            b'@' => {
                self.initialized = true;
                self.compression = None;
                Ok(Event::Initialize)
            }
            b'i' => self.parse_esc_i(),
            other => Ok(self.error(format!("unknown escape command {other:#04x}"))),
        }
    }

    fn parse_esc_i(&mut self) -> Result<Event, Fail> {
        let c = self.must()?;
        match c {
            b'!' => Ok(Event::StatusNotification { mode: self.must()? }),
            b'S' => Ok(Event::StatusRequest),
            b'R' => Ok(Event::SwitchMode {
                mode: ModeSwitch::from_code(self.must()?),
                legacy: true,
            }),
            b'a' => Ok(Event::SwitchMode {
                mode: ModeSwitch::from_code(self.must()?),
                legacy: false,
            }),
            b'z' => {
                let d = self.must_n(10)?;
                Ok(Event::PrintInformation {
                    valid: d[0],
                    kind: d[1],
                    width: d[2],
                    length: d[3],
                    lines: u32::from_le_bytes([d[4], d[5], d[6], d[7]]),
                    which_page: d[8],
                })
            }
            b'D' => Ok(Event::Density { level: self.must()? }),
            b'M' => Ok(Event::VariousMode { flags: self.must()? }),
            b'K' => Ok(Event::AdvancedMode { flags: self.must()? }),
            b'd' => {
                let d = [self.must()?, self.must()?];
                Ok(Event::Margin {
                    lines: u16::from_le_bytes(d),
                })
            }
            b'A' => Ok(Event::CutEvery {
                labels: self.must()?,
            }),
            b'c' => {
                let d = self.must_n(5)?;
                Ok(Event::LegacyHires {
                    data: [d[0], d[1], d[2], d[3], d[4]],
                })
            }
            b'U' => Ok(Event::Undocumented {
                letter: b'U',
                data: self.must_n(15)?,
            }),
            b'k' => Ok(Event::Undocumented {
                letter: b'k',
                data: self.must_n(3)?,
            }),
            other => Ok(self.error(format!("unknown command ESC i {other:#04x}"))),
        }
    }

    fn assume_compression(&mut self) -> Compression {
        match self.compression {
            Some(mode) => mode,
            None => {
                self.compression = Some(Compression::Uncompressed);
                self.pending.push_back(Event::CompressionAssumed);
                Compression::Uncompressed
            }
        }
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = io::Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// Decode a full in-memory stream; any I/O error is impossible on a
/// slice, so only the event list comes back.
pub fn decode_all(bytes: &[u8]) -> Vec<Event> {
    Decoder::new(bytes)
        .collect::<io::Result<Vec<_>>>()
        .expect("reading from a slice cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_runs_are_counted() {
        let mut stream = vec![0u8; 350];
        stream.extend_from_slice(&[ESC, b'@', CTRL_Z]);
        assert_eq!(
            decode_all(&stream),
            vec![
                Event::Reset { zeros: 350 },
                Event::Initialize,
                Event::EndOfJob
            ]
        );
    }

    #[test]
    fn settings_commands_parse() {
        let stream = [
            ESC, b'@', //
            ESC, b'i', b'R', 0x01, //
            ESC, b'i', b'a', 0x03, //
            ESC, b'i', b'!', 0x00, //
            ESC, b'i', b'D', 0x03, //
            ESC, b'i', b'M', 0x40, //
            ESC, b'i', b'K', 0x48, //
            ESC, b'i', b'A', 0x02, //
            ESC, b'i', b'd', 0x23, 0x01, //
            CTRL_Z,
        ];
        let events = decode_all(&stream);
        assert_eq!(events[0], Event::Initialize);
        assert_eq!(
            events[1],
            Event::SwitchMode {
                mode: ModeSwitch::Raster,
                legacy: true
            }
        );
        assert_eq!(
            events[2],
            Event::SwitchMode {
                mode: ModeSwitch::PTouchTemplate,
                legacy: false
            }
        );
        assert_eq!(events[3], Event::StatusNotification { mode: 0 });
        assert_eq!(events[4], Event::Density { level: 3 });
        assert_eq!(events[5], Event::VariousMode { flags: 0x40 });
        assert_eq!(events[6], Event::AdvancedMode { flags: 0x48 });
        assert_eq!(events[7], Event::CutEvery { labels: 2 });
        assert_eq!(events[8], Event::Margin { lines: 0x0123 });
        assert_eq!(events[9], Event::EndOfJob);
    }

    #[test]
    fn print_information_carries_the_line_count() {
        let mut stream = vec![ESC, b'@'];
        stream.extend_from_slice(&[
            ESC, b'i', b'z', 0x46, 0x0A, 62, 0, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        stream.push(CTRL_Z);
        let events = decode_all(&stream);
        assert_eq!(
            events[1],
            Event::PrintInformation {
                valid: 0x46,
                kind: 0x0A,
                width: 62,
                length: 0,
                lines: 10,
                which_page: 0,
            }
        );
    }

    #[test]
    fn tiff_raster_lines_decode_their_runs() {
        let mut stream = vec![ESC, b'@', b'M', 0x02];
        stream.extend_from_slice(&[b'G', 0x04, 0x00, (-2i8) as u8, 0xAB, 0x00, 0x5C]);
        stream.push(CTRL_Z);
        let events = decode_all(&stream);
        assert_eq!(
            events[2],
            Event::RasterLine {
                bytes: vec![(-2i8) as u8, 0xAB, 0x00, 0x5C],
                compression: Compression::Tiff,
                decoded: vec![0xAB, 0xAB, 0xAB, 0x5C],
            }
        );
        assert_eq!(events[3], Event::EndOfJob);
    }

    #[test]
    fn ql_length_prefix_is_big_endian() {
        let mut stream = vec![ESC, b'@', b'M', 0x02];
        stream.extend_from_slice(&[b'g', 0x00, 0x02, (-89i8) as u8, 0xFF]);
        stream.push(CTRL_Z);
        let events = decode_all(&stream);
        assert_eq!(
            events[2],
            Event::RasterLine {
                bytes: vec![(-89i8) as u8, 0xFF],
                compression: Compression::Tiff,
                decoded: vec![0xFF; 90],
            }
        );
    }

    #[test]
    fn uncompressed_lines_pass_through() {
        let mut stream = vec![ESC, b'@', b'M', 0x00];
        stream.extend_from_slice(&[b'g', 0x00, 0x03, 1, 2, 3]);
        stream.push(CTRL_Z);
        let events = decode_all(&stream);
        assert_eq!(
            events[2],
            Event::RasterLine {
                bytes: vec![1, 2, 3],
                compression: Compression::Uncompressed,
                decoded: vec![1, 2, 3],
            }
        );
    }

    #[test]
    fn missing_compression_select_is_assumed_uncompressed() {
        let stream = [ESC, b'@', b'g', 0x00, 0x01, 0x77, CTRL_Z];
        let events = decode_all(&stream);
        assert_eq!(events[1], Event::CompressionAssumed);
        assert!(matches!(events[2], Event::RasterLine { .. }));
    }

    #[test]
    fn zero_raster_outside_tiff_is_flagged() {
        let stream = [ESC, b'@', b'M', 0x02, b'Z', CTRL_Z];
        assert_eq!(decode_all(&stream)[2], Event::ZeroRasterLine { valid: true });

        let stream = [ESC, b'@', b'M', 0x00, b'Z', CTRL_Z];
        assert_eq!(
            decode_all(&stream)[2],
            Event::ZeroRasterLine { valid: false }
        );
    }

    #[test]
    fn missing_initialize_is_reported_once() {
        let stream = [b'M', 0x02, b'Z', CTRL_Z];
        let events = decode_all(&stream);
        assert!(matches!(events[0], Event::Error { .. }));
        assert_eq!(
            events[1],
            Event::SelectCompression {
                mode: Some(Compression::Tiff),
                raw: 2
            }
        );
        assert_eq!(events[2], Event::ZeroRasterLine { valid: true });
    }

    #[test]
    fn truncated_commands_end_with_an_error() {
        let stream = [ESC, b'@', ESC, b'i', b'z', 0x46];
        let events = decode_all(&stream);
        assert!(matches!(events.last(), Some(Event::Error { .. })));
    }

    #[test]
    fn concatenated_jobs_parse_in_one_pass() {
        let mut stream = Vec::new();
        for _ in 0..2 {
            stream.extend_from_slice(&[0, 0, 0]);
            stream.extend_from_slice(&[ESC, b'@', b'M', 0x02, b'Z', CTRL_Z]);
        }
        let events = decode_all(&stream);
        let inits = events.iter().filter(|e| **e == Event::Initialize).count();
        let ends = events.iter().filter(|e| **e == Event::EndOfJob).count();
        assert_eq!(inits, 2);
        assert_eq!(ends, 2);
        assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
    }

    #[test]
    fn missing_end_of_job_is_an_error() {
        let stream = [ESC, b'@', b'M', 0x02];
        let events = decode_all(&stream);
        assert!(matches!(events.last(), Some(Event::Error { .. })));
    }
}
