use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info};

use ptouch_raster::{parse_job_options, Error, PageStreamReader, Sequencer};

/// Convert a raster page stream into Brother P-touch / QL printer
/// commands.
#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// Read from NAME instead of standard input.
    #[arg(short, long, value_name = "NAME")]
    input: Option<PathBuf>,

    /// Write to NAME instead of standard output.
    #[arg(short, long, value_name = "NAME")]
    output: Option<PathBuf>,

    /// Job options as space-separated key[=value] tokens, e.g.
    /// "QL BytesPerLine=90 AutoCut LabelPreamble".
    job_options: String,
}

fn run(opts: &Opts) -> Result<(), Error> {
    let options = parse_job_options(&opts.job_options)?;

    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&cancel))?;
    }

    let input: Box<dyn Read> = match &opts.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin().lock()),
    };
    let mut source = PageStreamReader::new(BufReader::new(input));

    let output: Box<dyn Write> = match &opts.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = BufWriter::new(output);

    let mut last_report: Option<Instant> = None;
    Sequencer::new(options)
        .with_cancel_flag(cancel)
        .on_progress(move |p| {
            if p.height == 0 {
                return;
            }
            let due = last_report.map_or(true, |t| t.elapsed() >= Duration::from_secs(1));
            if due || p.completed == p.height {
                info!("printing page {}, {}% done", p.page, p.completed * 100 / p.height);
                last_report = Some(Instant::now());
            }
        })
        .run(&mut source, &mut out)
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = Opts::parse();
    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Config(e)) => {
            error!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}
