use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::warn;

use ptouch_raster::decode::{Decoder, Event};
use ptouch_raster::render::Renderer;

/// Explain a Brother P-touch / QL printer byte stream.
#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// File to read from (instead of standard input).
    #[arg(short, long, value_name = "NAME")]
    input: Option<PathBuf>,

    /// Write decoded raster data to PREFIXn.png.
    #[arg(short, long, value_name = "PREFIX")]
    write: Option<String>,

    /// Hide raster graphics commands.
    #[arg(short, long, conflicts_with = "verbose")]
    silent: bool,

    /// Show all commands and all data.
    #[arg(short, long)]
    verbose: bool,

    /// When to colorize the output.
    #[arg(long, value_enum, default_value_t = ColorWhen::Auto)]
    color: ColorWhen,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ColorWhen {
    Always,
    Auto,
    Never,
}

/// Collects decoded rows and writes one PNG per printed page, the way
/// the device would put them on tape: the last transferred row at the
/// top.
struct ImageSink {
    prefix: String,
    number: u32,
    row_size: Option<usize>,
    rows: Vec<Vec<u8>>,
    /// Blank rows seen before the row width was known.
    leading_blanks: u32,
    warned: bool,
}

impl ImageSink {
    fn new(prefix: String) -> Self {
        ImageSink {
            prefix,
            number: 0,
            row_size: None,
            rows: Vec::new(),
            leading_blanks: 0,
            warned: false,
        }
    }

    fn add_row(&mut self, row: Option<&[u8]>) {
        match (self.row_size, row) {
            (None, None) => self.leading_blanks += 1,
            (None, Some(row)) => {
                self.row_size = Some(row.len());
                self.rows.push(row.to_vec());
            }
            (Some(size), None) => self.rows.push(vec![0; size]),
            (Some(size), Some(row)) => {
                if row.len() == size {
                    self.rows.push(row.to_vec());
                } else {
                    if !self.warned {
                        warn!("row size changed from {size} to {} bytes", row.len());
                        self.warned = true;
                    }
                    self.rows.push(vec![0; size]);
                }
            }
        }
    }

    fn write_page(&mut self) -> io::Result<()> {
        let Some(row_size) = self.row_size else {
            return Ok(());
        };
        if self.rows.is_empty() {
            return Ok(());
        }
        self.number += 1;
        let filename = format!("{}{}.png", self.prefix, self.number);
        let file = File::create(&filename)?;

        let height = self.rows.len() as u32 + self.leading_blanks;
        let mut encoder = png::Encoder::new(BufWriter::new(file), row_size as u32 * 8, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::One);
        // 0 = paper white, 1 = printed black.
        encoder.set_palette(vec![255, 255, 255, 0, 0, 0]);
        let mut writer = encoder
            .write_header()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let mut data = Vec::with_capacity(height as usize * row_size);
        for row in self.rows.iter().rev() {
            data.extend_from_slice(row);
        }
        data.resize(height as usize * row_size, 0);
        writer
            .write_image_data(&data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        writer
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        println!("Raster data written to {filename}");
        self.rows.clear();
        self.row_size = None;
        self.leading_blanks = 0;
        Ok(())
    }
}

fn run(opts: &Opts) -> io::Result<()> {
    let input: Box<dyn Read> = match &opts.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };
    let mut decoder = Decoder::new(BufReader::new(input));

    let colors = match opts.color {
        ColorWhen::Always => true,
        ColorWhen::Never => false,
        ColorWhen::Auto => io::stdout().is_terminal(),
    };
    let stdout = io::stdout();
    let mut renderer = Renderer::new(stdout.lock(), colors)
        .silent(opts.silent)
        .verbose(opts.verbose);
    let mut sink = opts.write.clone().map(ImageSink::new);

    while let Some(event) = decoder.next_event()? {
        renderer.event(&event)?;
        if let Some(sink) = &mut sink {
            match &event {
                Event::RasterLine { decoded, .. } => sink.add_row(Some(decoded)),
                Event::ZeroRasterLine { .. } => sink.add_row(None),
                Event::Print | Event::EndOfJob => sink.write_page()?,
                _ => {}
            }
        }
    }
    renderer.finish()
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = Opts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ptexplain: {e}");
            ExitCode::from(1)
        }
    }
}
