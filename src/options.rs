//! Job option string parsing.
//!
//! A job is configured by a single whitespace-separated option string in
//! the spirit of printing-system job templates: `Key` turns a boolean
//! option on, `noKey` turns it off, and `Key=Value` assigns a typed
//! value.  Keys are matched case-insensitively and validated per key.

use crate::error::ConfigError;

/// Pixel data transfer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelXfer {
    /// Uncompressed line printing (`g 0 N`), QL models.
    Ulp,
    /// Run-length encoded raster lines (`G`/`g` with length prefix).
    Rle,
    /// Bit image printing (`ESC * '`), early PT models.
    Bip,
}

/// Pixel data alignment on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Right,
    Center,
}

/// Roll media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media {
    /// Continuous tape; feed is explicit via the margin command.
    Tape,
    /// Die-cut labels; feed is implicit per label.
    Labels,
}

/// Printer family.  The family fixes the raster line command letter and
/// the byte order of its length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Series {
    Pt,
    Ql,
}

/// Validated job options, immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOptions {
    pub pixel_xfer: PixelXfer,
    pub print_quality_high: bool,
    pub auto_cut: bool,
    pub half_cut: bool,
    pub cut_mark: bool,
    /// Cut after every N labels, if requested.
    pub cut_label: Option<u8>,
    pub chain_printing: bool,
    pub mirror_print: bool,
    pub series: Option<Series>,
    /// Print head width in bytes; every emitted row is exactly this wide.
    pub bytes_per_line: u8,
    pub align: Align,
    pub media: Media,
    /// Mirror in the filter instead of setting the device mirror bit.
    pub software_mirror: bool,
    /// 1 (light) to 5 (dark); 0 leaves the device default.
    pub print_density: u8,
    pub legacy_xfer_mode: Option<u8>,
    pub xfer_mode: Option<u8>,
    pub label_preamble: bool,
    pub label_recovery: bool,
    pub last_page_flag: bool,
    pub legacy_hires: bool,
    pub concat_pages: bool,
    /// Minimum top/bottom margin in points.
    pub min_margin: f32,
    /// Additional top/bottom margin in points.
    pub margin: f32,
    pub status_notification: Option<u8>,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            pixel_xfer: PixelXfer::Rle,
            print_quality_high: true,
            auto_cut: false,
            half_cut: false,
            cut_mark: false,
            cut_label: None,
            chain_printing: true,
            mirror_print: false,
            series: None,
            bytes_per_line: 90,
            align: Align::Right,
            media: Media::Tape,
            software_mirror: false,
            print_density: 0,
            legacy_xfer_mode: None,
            xfer_mode: None,
            label_preamble: false,
            label_recovery: false,
            last_page_flag: false,
            legacy_hires: false,
            concat_pages: false,
            min_margin: 0.0,
            margin: 0.0,
            status_notification: None,
        }
    }
}

impl JobOptions {
    /// Raster line command letter for this job's printer family.
    pub fn raster_letter(&self) -> u8 {
        match self.series {
            Some(Series::Ql) => b'g',
            _ => b'G',
        }
    }

    /// Length prefix for a raster line body, in the family's byte order
    /// (QL is big-endian, everything else little-endian).
    pub fn raster_len_bytes(&self, len: u16) -> [u8; 2] {
        match self.series {
            Some(Series::Ql) => len.to_be_bytes(),
            _ => len.to_le_bytes(),
        }
    }

    /// Whether the filter itself mirrors pixel data.
    pub fn mirror_in_software(&self) -> bool {
        self.software_mirror && self.mirror_print
    }
}

fn bad_value(key: &str, expected: impl Into<String>) -> ConfigError {
    ConfigError::BadValue {
        key: key.to_string(),
        expected: expected.into(),
    }
}

fn parse_int(key: &str, value: Option<&str>, min: i64, max: i64) -> Result<i64, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(key.to_string()))?;
    match value.parse::<i64>() {
        Ok(v) if (min..=max).contains(&v) => Ok(v),
        _ => Err(bad_value(key, format!("an integer between {min} and {max}"))),
    }
}

fn parse_float(key: &str, value: Option<&str>, min: f32) -> Result<f32, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(key.to_string()))?;
    match value.parse::<f32>() {
        Ok(v) if v >= min && v.is_finite() => Ok(v),
        _ => Err(bad_value(key, format!("a number of at least {min}"))),
    }
}

fn parse_bool(key: &str, value: Option<&str>) -> Result<bool, ConfigError> {
    match value {
        None => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(_) => Err(bad_value(key, "true or false")),
    }
}

/// Parse a full option string into validated [`JobOptions`].
pub fn parse_job_options(s: &str) -> Result<JobOptions, ConfigError> {
    let mut options = JobOptions::default();
    let mut pt_set = false;
    let mut ql_set = false;

    for token in s.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (token, None),
        };

        // `noKey` clears a boolean option.
        let negatable = key.len() > 2
            && key.as_bytes()[..2].eq_ignore_ascii_case(b"no")
            && value.is_none()
            && is_bool_key(&key[2..]);
        let (key, negated) = if negatable { (&key[2..], true) } else { (key, false) };
        let set = |v: bool| if negated { false } else { v };

        match key.to_ascii_lowercase().as_str() {
            "pixelxfer" => {
                options.pixel_xfer = match value {
                    Some(v) if v.eq_ignore_ascii_case("ULP") => PixelXfer::Ulp,
                    Some(v) if v.eq_ignore_ascii_case("RLE") => PixelXfer::Rle,
                    Some(v) if v.eq_ignore_ascii_case("BIP") => PixelXfer::Bip,
                    _ => return Err(bad_value(key, "RLE, BIP or ULP")),
                }
            }
            "printquality" => {
                options.print_quality_high = match value {
                    Some(v) if v.eq_ignore_ascii_case("High") => true,
                    Some(v) if v.eq_ignore_ascii_case("Fast") => false,
                    _ => return Err(bad_value(key, "High or Fast")),
                }
            }
            "align" => {
                options.align = match value {
                    Some(v) if v.eq_ignore_ascii_case("Right") => Align::Right,
                    Some(v) if v.eq_ignore_ascii_case("Center") => Align::Center,
                    _ => return Err(bad_value(key, "Right or Center")),
                }
            }
            "mediatype" => {
                options.media = match value {
                    Some(v) if v.eq_ignore_ascii_case("Tape") => Media::Tape,
                    Some(v) if v.eq_ignore_ascii_case("Labels") => Media::Labels,
                    _ => return Err(bad_value(key, "Tape or Labels")),
                }
            }
            "bytesperline" => options.bytes_per_line = parse_int(key, value, 1, 255)? as u8,
            "cutlabel" => options.cut_label = Some(parse_int(key, value, 0, 255)? as u8),
            "printdensity" => options.print_density = parse_int(key, value, 0, 5)? as u8,
            "legacytransfermode" => {
                options.legacy_xfer_mode = Some(parse_int(key, value, 0, 255)? as u8)
            }
            "transfermode" => options.xfer_mode = Some(parse_int(key, value, 0, 255)? as u8),
            "statusnotification" => {
                options.status_notification = Some(parse_int(key, value, 0, 1)? as u8)
            }
            "minmargin" => options.min_margin = parse_float(key, value, 0.0)?,
            "margin" => options.margin = parse_float(key, value, 0.0)?,
            "autocut" => options.auto_cut = set(parse_bool(key, value)?),
            "chainprinting" => options.chain_printing = set(parse_bool(key, value)?),
            "concatpages" => options.concat_pages = set(parse_bool(key, value)?),
            "cutmark" => options.cut_mark = set(parse_bool(key, value)?),
            "halfcut" => options.half_cut = set(parse_bool(key, value)?),
            "labelpreamble" => options.label_preamble = set(parse_bool(key, value)?),
            "labelrecovery" => options.label_recovery = set(parse_bool(key, value)?),
            "lastpageflag" => options.last_page_flag = set(parse_bool(key, value)?),
            "legacyhires" => options.legacy_hires = set(parse_bool(key, value)?),
            "mirrorprint" => options.mirror_print = set(parse_bool(key, value)?),
            "softwaremirror" => options.software_mirror = set(parse_bool(key, value)?),
            "pt" => pt_set = set(parse_bool(key, value)?),
            "ql" => ql_set = set(parse_bool(key, value)?),
            _ => return Err(ConfigError::UnknownOption(token.to_string())),
        }
    }

    options.series = match (pt_set, ql_set) {
        (true, true) => return Err(ConfigError::Exclusive("PT", "QL")),
        (true, false) => Some(Series::Pt),
        (false, true) => Some(Series::Ql),
        (false, false) => None,
    };
    Ok(options)
}

fn is_bool_key(key: &str) -> bool {
    [
        "autocut",
        "chainprinting",
        "concatpages",
        "cutmark",
        "halfcut",
        "labelpreamble",
        "labelrecovery",
        "lastpageflag",
        "legacyhires",
        "mirrorprint",
        "softwaremirror",
        "pt",
        "ql",
    ]
    .contains(&key.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_gives_defaults() {
        let o = parse_job_options("").unwrap();
        assert_eq!(o.pixel_xfer, PixelXfer::Rle);
        assert!(o.print_quality_high);
        assert!(o.chain_printing);
        assert_eq!(o.bytes_per_line, 90);
        assert_eq!(o.cut_label, None);
        assert_eq!(o.series, None);
    }

    #[test]
    fn bare_and_negated_booleans() {
        let o = parse_job_options("AutoCut noChainPrinting MirrorPrint").unwrap();
        assert!(o.auto_cut);
        assert!(!o.chain_printing);
        assert!(o.mirror_print);
    }

    #[test]
    fn keys_match_case_insensitively() {
        let o = parse_job_options("pixelxfer=ulp QL bytesperline=162").unwrap();
        assert_eq!(o.pixel_xfer, PixelXfer::Ulp);
        assert_eq!(o.series, Some(Series::Ql));
        assert_eq!(o.bytes_per_line, 162);
    }

    #[test]
    fn integer_ranges_are_enforced() {
        assert!(matches!(
            parse_job_options("PrintDensity=6"),
            Err(ConfigError::BadValue { .. })
        ));
        assert!(matches!(
            parse_job_options("BytesPerLine=0"),
            Err(ConfigError::BadValue { .. })
        ));
        assert!(parse_job_options("StatusNotification=1").is_ok());
    }

    #[test]
    fn floats_reject_negatives() {
        assert!(parse_job_options("Margin=14.5 MinMargin=0").is_ok());
        assert!(matches!(
            parse_job_options("Margin=-1"),
            Err(ConfigError::BadValue { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert_eq!(
            parse_job_options("Sideways"),
            Err(ConfigError::UnknownOption("Sideways".into()))
        );
        // `no` only negates registered booleans.
        assert!(matches!(
            parse_job_options("noBytesPerLine"),
            Err(ConfigError::UnknownOption(_))
        ));
    }

    #[test]
    fn pt_and_ql_are_mutually_exclusive() {
        assert_eq!(
            parse_job_options("PT QL"),
            Err(ConfigError::Exclusive("PT", "QL"))
        );
        assert_eq!(parse_job_options("PT").unwrap().series, Some(Series::Pt));
    }

    #[test]
    fn series_selects_letter_and_endianness() {
        let ql = parse_job_options("QL").unwrap();
        assert_eq!(ql.raster_letter(), b'g');
        assert_eq!(ql.raster_len_bytes(0x1234), [0x12, 0x34]);
        let pt = parse_job_options("PT").unwrap();
        assert_eq!(pt.raster_letter(), b'G');
        assert_eq!(pt.raster_len_bytes(0x1234), [0x34, 0x12]);
    }
}
