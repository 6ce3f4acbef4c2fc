//! bidsify: convert the recordings of a conversion record into BIDS.
//!
//! Runs the most recent conversion table of the BIDS root, or scans the
//! source trees and saves a new one first.  Exits non-zero on configuration
//! errors and when the table has rows flagged `check`, printing them.
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use megbids::{bidsify, logging, BidsifyConfig, ConversionError, FifBidsWriter, FifInspector, Switch};

#[derive(Parser, Debug)]
#[command(name = "bidsify", about = "Convert NatMEG MEG/OPM/EEG recordings to BIDS")]
struct Args {
    /// Conversion record (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Re-convert rows already marked as done, whatever the record says.
    #[arg(long)]
    overwrite: bool,
}

fn print_inconsistent(err: &anyhow::Error) {
    let Some(ConversionError::InconsistentTaskCounts { rows }) = err.downcast_ref::<ConversionError>() else {
        return;
    };
    eprintln!("participant\tsession\tacquisition\tdatatype\ttask\ttask_count\traw_name");
    for r in rows {
        eprintln!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.participant_to, r.session_to, r.acquisition, r.datatype, r.task, r.task_count, r.raw_name
        );
    }
}

fn run(args: &Args) -> Result<()> {
    let mut cfg = BidsifyConfig::load(&args.config)?;
    if args.overwrite {
        cfg.overwrite = Switch::on();
    }
    let bids_root = cfg.bids_root()?;
    let _guard = logging::init(Some(&bids_root))?;

    let today = chrono::Local::now().date_naive();
    match bidsify(&cfg, &FifInspector, &FifBidsWriter, today) {
        Ok(run) => {
            println!(
                "{} written, {} copied, {} skipped, {} failed ({})",
                run.report.written,
                run.report.degraded,
                run.report.skipped,
                run.report.failed.len(),
                run.table_path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("{e:#}");
            print_inconsistent(&e);
            Err(e)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bidsify: {e:#}");
            ExitCode::FAILURE
        }
    }
}
