//! Human readable presentation of decoded command streams.
//!
//! The renderer consumes [`Event`]s and prints one line per command,
//! with optional ANSI colors, a silent mode that coalesces the noisy
//! row-level commands, and a verbose mode that dumps row payloads.

use std::io::{self, Write};

use crate::decode::{Compression, Event, ModeSwitch};

/// When to colorize renderer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Always,
    Auto,
    Never,
}

#[derive(Clone, Copy)]
enum Class {
    Info,
    Control,
    FlagSet,
    FlagCleared,
    Error,
}

const PRINT_INFORMATION_VALID_FLAGS: &[(u8, &str)] = &[
    (0x02, "kind"),
    (0x04, "width"),
    (0x08, "length"),
    (0x40, "quality"),
    (0x80, "recover"),
];

const VARIOUS_MODE_FLAGS: &[(u8, &str)] = &[(0x40, "auto_cut"), (0x80, "mirror")];

const ADVANCED_MODE_FLAGS: &[(u8, &str)] = &[
    (0x01, "draft"),
    (0x04, "half_cut"),
    (0x08, "nochain"),
    (0x10, "special_tape"),
    (0x40, "hires"),
    (0x80, "no_clearing"),
];

pub struct Renderer<W: Write> {
    out: W,
    colors: bool,
    silent: bool,
    verbose: bool,
    hidden: u32,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, colors: bool) -> Self {
        Renderer {
            out,
            colors,
            silent: false,
            verbose: false,
            hidden: 0,
        }
    }

    /// Hide the row-level commands, printing a coalesced count instead.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Show row payload bytes.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn paint(&self, class: Class) -> (&'static str, &'static str) {
        if !self.colors {
            return match class {
                Class::FlagCleared => ("[", "]"),
                _ => ("", ""),
            };
        }
        match class {
            Class::Info => ("\x1b[34m", "\x1b[0m"),
            Class::Control => ("\x1b[32m", "\x1b[0m"),
            Class::FlagSet => ("\x1b[33;1m", "\x1b[0m"),
            Class::FlagCleared => ("\x1b[33m", "\x1b[0m"),
            Class::Error => ("\x1b[31;1m", "\x1b[0m"),
        }
    }

    fn line(&mut self, class: Class, text: &str) -> io::Result<()> {
        let (on, off) = self.paint(class);
        writeln!(self.out, "{on}{text}{off}")
    }

    fn flush_hidden(&mut self) -> io::Result<()> {
        if self.hidden > 0 {
            let count = self.hidden;
            self.hidden = 0;
            writeln!(self.out, "({count} commands hidden)")?;
        }
        Ok(())
    }

    fn flags_str(&self, byte: u8, flags: &[(u8, &str)]) -> String {
        let mut rest = byte;
        let mut parts = Vec::new();
        for &(mask, name) in flags {
            let class = if byte & mask != 0 {
                Class::FlagSet
            } else {
                Class::FlagCleared
            };
            let (on, off) = self.paint(class);
            parts.push(format!("{on}{mask:02x}={name}{off}"));
            rest &= !mask;
        }
        if rest != 0 {
            let (on, off) = self.paint(Class::Error);
            parts.push(format!("{on}{rest:02x}=unknown{off}"));
        }
        parts.join(" ")
    }

    /// Print one event.
    pub fn event(&mut self, event: &Event) -> io::Result<()> {
        // Row-level commands are the noise a capture is 99% made of.
        if self.silent {
            if let Event::RasterLine { .. } | Event::ZeroRasterLine { valid: true } = event {
                self.hidden += 1;
                return Ok(());
            }
        }
        self.flush_hidden()?;

        match event {
            Event::Reset { zeros } => self.line(Class::Control, &format!("Reset ({zeros})")),
            Event::Initialize => self.line(Class::Control, "Initialize"),
            Event::StatusNotification { mode } => {
                let what = match mode {
                    0 => " (notify)",
                    1 => " (do not notify)",
                    _ => "",
                };
                self.line(
                    Class::Control,
                    &format!("Switch automatic status notification mode{what}"),
                )
            }
            Event::StatusRequest => self.line(Class::Control, "Status information request"),
            Event::SwitchMode { mode, legacy } => {
                let legacy = if *legacy { " (legacy)" } else { "" };
                let text = match mode {
                    ModeSwitch::EscP => format!("Switch to ESC/P mode{legacy}"),
                    ModeSwitch::Raster => format!("Switch to raster mode{legacy}"),
                    ModeSwitch::PTouchTemplate => {
                        format!("Switch to P-touch Template mode{legacy}")
                    }
                    ModeSwitch::Unknown(_) => format!("Switch to unknown mode{legacy}"),
                };
                self.line(Class::Control, &text)
            }
            Event::PrintInformation {
                valid,
                kind,
                width,
                length,
                lines,
                which_page,
            } => {
                let mut info = String::new();
                if valid & 0x02 != 0 {
                    info.push_str(&format!(" kind={kind:#04x}"));
                }
                if valid & 0x04 != 0 {
                    info.push_str(&format!(" width={width}"));
                }
                if valid & 0x08 != 0 {
                    info.push_str(&format!(" length={length}"));
                }
                info.push_str(&format!(" lines={lines}"));
                match which_page {
                    0 => info.push_str(" page=first"),
                    1 => info.push_str(" page=non-first"),
                    2 => info.push_str(" page=last"),
                    _ => {}
                }
                let flags = self.flags_str(*valid, PRINT_INFORMATION_VALID_FLAGS);
                self.line(
                    Class::Control,
                    &format!("Print information command ({flags}){info}"),
                )
            }
            Event::Density { level } => {
                self.line(Class::Control, &format!("Set print density ({level})"))
            }
            Event::VariousMode { flags } => {
                let flags = self.flags_str(*flags, VARIOUS_MODE_FLAGS);
                self.line(Class::Control, &format!("Various mode settings ({flags})"))
            }
            Event::AdvancedMode { flags } => {
                let flags = self.flags_str(*flags, ADVANCED_MODE_FLAGS);
                self.line(Class::Control, &format!("Advanced mode settings ({flags})"))
            }
            Event::Margin { lines } => self.line(
                Class::Control,
                &format!("Specify margin amount ({lines} lines)"),
            ),
            Event::CutEvery { labels } => {
                let noun = if *labels == 1 { "label" } else { "labels" };
                self.line(Class::Control, &format!("Cut every {labels} {noun}"))
            }
            Event::LegacyHires { .. } => self.line(Class::Control, "Legacy hires"),
            Event::Undocumented { letter, data } => self.line(
                Class::Control,
                &format!("Undocumented command ESC i {} ({} bytes)", *letter as char, data.len()),
            ),
            Event::SelectCompression { mode, raw } => match mode {
                Some(Compression::Uncompressed) => {
                    self.line(Class::Control, "Select compression mode (no compression)")
                }
                Some(Compression::Tiff) => {
                    self.line(Class::Control, "Select compression mode (TIFF)")
                }
                None => self.line(
                    Class::Error,
                    &format!("Select compression mode ({raw:#04x}, invalid)"),
                ),
            },
            Event::CompressionAssumed => self.line(
                Class::Info,
                "Compression mode not specified; assuming no compression",
            ),
            Event::RasterLine { bytes, decoded, .. } => {
                if self.verbose {
                    let hex: String = decoded.iter().map(|b| format!("{b:02x}")).collect();
                    self.line(
                        Class::Control,
                        &format!("Raster graphics transfer ({} bytes) {hex}", bytes.len()),
                    )
                } else {
                    self.line(
                        Class::Control,
                        &format!("Raster graphics transfer ({} bytes)", bytes.len()),
                    )
                }
            }
            Event::ZeroRasterLine { valid } => {
                if *valid {
                    self.line(Class::Control, "Zero raster graphics")
                } else {
                    self.line(
                        Class::Error,
                        "Zero raster graphics (not valid outside TIFF compression mode)",
                    )
                }
            }
            Event::Print => self.line(Class::Control, "Print command"),
            Event::EndOfJob => self.line(Class::Control, "End of job"),
            Event::Error { reason, offset } => {
                self.line(Class::Error, &format!("{reason} (at offset {offset})"))
            }
        }
    }

    /// Flush any pending hidden-command count, e.g. at end of stream.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_hidden()?;
        self.out.flush()
    }
}
