//! maxfilter: resolve MaxFilter parameters for every session of a project.
//!
//! Prints the planned command lines by default; `--execute` runs them
//! through `sh -c` in each session directory.  Head-position estimation and
//! run merging need MNE and are not available from this binary, so tasks
//! that require them are reported and skipped.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};

use megbids::headpos::{task_transform_paths, HeadPositionEstimator};
use megbids::maxfilter::{MaxFilter, RunMerger, ShellRunner, TaskPlan};
use megbids::{logging, FifInspector, MaxFilterSettings};

#[derive(Parser, Debug)]
#[command(name = "maxfilter", about = "Plan and run MaxFilter for a NatMEG project")]
struct Args {
    /// MaxFilter settings (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Run the commands instead of printing them.
    #[arg(long)]
    execute: bool,

    /// Directory for log.tsv.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

struct Unavailable;

impl HeadPositionEstimator for Unavailable {
    fn estimate(&self, raw: &Path, _pos_out: &Path, _trans_out: &Path) -> Result<()> {
        bail!("no head-position estimator available for {}", raw.display())
    }
}

impl RunMerger for Unavailable {
    fn merge(&self, inputs: &[PathBuf], _output: &Path) -> Result<()> {
        bail!("no run merger available for {} runs", inputs.len())
    }
}

fn print_plan(plans: &[TaskPlan]) {
    for plan in plans {
        let p = &plan.params;
        println!("# {} {} {} (proc-{})", p.subject, p.session, p.task, p.label());
        if plan.merge {
            println!("#   merge: {}", plan.inputs.join(", "));
        }
        for existing in &plan.existing {
            println!("#   exists: {existing}");
        }
        for job in &plan.jobs {
            println!("cd {} && {}", p.session_dir.display(), job.command);
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let settings = MaxFilterSettings::load(&args.config)?;
    let _guard = logging::init(args.log_dir.as_deref())?;

    let mf = MaxFilter::new(&settings, &FifInspector, &Unavailable, &Unavailable, &ShellRunner);
    let plans = mf.plan()?;
    info!("{} task plans under {}", plans.len(), settings.data_root().display());

    if !args.execute {
        print_plan(&plans);
        return Ok(());
    }

    let force = settings.advanced.force.is_on("force")?;
    let needs_estimate = |p: &TaskPlan| {
        let (pos, trans) = task_transform_paths(&p.params.session_dir, &settings.advanced.trans_folder, &p.params.task);
        p.params.wants_transform() && (force || !(pos.exists() && trans.exists()))
    };
    let (runnable, blocked): (Vec<TaskPlan>, Vec<TaskPlan>) =
        plans.into_iter().partition(|p| !p.merge && !needs_estimate(p));
    for p in blocked.iter().filter(|p| !p.jobs.is_empty()) {
        warn!(
            "skipping {} {} {}: needs run merging or a head transform",
            p.params.subject, p.params.session, p.params.task
        );
    }
    let report = mf.execute(&runnable)?;
    println!("{} MaxFilter runs, {} outputs already present", report.executed, report.existing);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("maxfilter: {e:#}");
            ExitCode::FAILURE
        }
    }
}
