//! MaxFilter parameter resolution and execution.
//!
//! [`resolve`] turns the configuration into per-task parameters,
//! [`plan`] decides which files of a session each task runs on and renders
//! the command lines, and [`MaxFilter`] carries out a plan through the
//! [`CommandRunner`], [`RunMerger`] and
//! [`HeadPositionEstimator`](crate::headpos::HeadPositionEstimator)
//! collaborators.
pub mod plan;
pub mod resolve;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

pub use plan::{command_line, output_name, plan_session, sessions, tasks, Job, TaskPlan};
pub use resolve::{resolve, ParameterSet, Resolution};

use crate::config::MaxFilterSettings;
use crate::headpos::{ensure_task_transform, HeadPositionEstimator};
use crate::io::RecordingInspector;

/// Folder inside a session where merged runs are kept.
pub const BACKUP_DIR: &str = "bkp";

/// Runs one shell command line in a working directory.
pub trait CommandRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<()>;
}

/// `sh -c <command>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .status()
            .with_context(|| format!("spawning `{command}`"))?;
        if !status.success() {
            bail!("`{command}` exited with {status}");
        }
        Ok(())
    }
}

/// Concatenates the runs of a task into one recording.
pub trait RunMerger {
    /// `inputs` are in measurement-date order.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub executed: usize,
    pub merged:   usize,
    pub existing: usize,
}

pub struct MaxFilter<'a> {
    settings:  &'a MaxFilterSettings,
    inspector: &'a dyn RecordingInspector,
    estimator: &'a dyn HeadPositionEstimator,
    merger:    &'a dyn RunMerger,
    runner:    &'a dyn CommandRunner,
}

impl<'a> MaxFilter<'a> {
    pub fn new(
        settings: &'a MaxFilterSettings,
        inspector: &'a dyn RecordingInspector,
        estimator: &'a dyn HeadPositionEstimator,
        merger: &'a dyn RunMerger,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self { settings, inspector, estimator, merger, runner }
    }

    /// Plans of every session under the data root.
    pub fn plan(&self) -> Result<Vec<TaskPlan>> {
        let mut plans = Vec::new();
        for (subject, session) in sessions(&self.settings.data_root()) {
            plans.extend(plan_session(self.settings, self.inspector, &subject, &session)?);
        }
        Ok(plans)
    }

    /// Merge the runs under the first run's name and move the originals into
    /// the backup folder.  Nothing moves unless the merge succeeds.
    fn merge(&self, plan: &TaskPlan) -> Result<()> {
        let Some(first) = plan.inputs.first() else {
            return Ok(());
        };
        let dir = &plan.params.session_dir;
        let runs: Vec<PathBuf> = plan.inputs.iter().map(|name| dir.join(name)).collect();
        let partial = dir.join(format!("{first}.merging"));
        if let Err(e) = self.merger.merge(&runs, &partial) {
            if partial.exists() {
                if let Err(rm) = fs::remove_file(&partial) {
                    warn!("could not remove {}: {rm}", partial.display());
                }
            }
            return Err(e.context(format!("merging {} runs of {}", runs.len(), plan.params.task)));
        }

        let backup = dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup).with_context(|| format!("creating {}", backup.display()))?;
        for (name, run) in plan.inputs.iter().zip(&runs) {
            fs::rename(run, backup.join(name)).with_context(|| format!("moving {name} to {}", backup.display()))?;
        }
        fs::rename(&partial, &runs[0]).with_context(|| format!("renaming {}", partial.display()))?;
        info!("merged {} runs of {} into {first}", runs.len(), plan.params.task);
        Ok(())
    }

    pub fn execute(&self, plans: &[TaskPlan]) -> Result<RunReport> {
        let force = self.settings.advanced.force.is_on("force")?;
        let mut report = RunReport::default();
        for plan in plans {
            report.existing += plan.existing.len();
            for output in &plan.existing {
                info!("existing file {output}, delete it to rerun MaxFilter");
            }
            if plan.jobs.is_empty() {
                continue;
            }
            if plan.merge {
                self.merge(plan)?;
                report.merged += 1;
            }
            let dir = &plan.params.session_dir;
            let log_dir = dir.join(&self.settings.advanced.log_folder);
            fs::create_dir_all(&log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
            if plan.params.wants_transform() {
                ensure_task_transform(
                    self.estimator,
                    dir,
                    &self.settings.advanced.trans_folder,
                    &plan.params.task,
                    &dir.join(&plan.jobs[0].input),
                    force,
                )?;
            }
            for job in &plan.jobs {
                info!(
                    "running MaxFilter on {} {} {}",
                    plan.params.subject, plan.params.session, job.input
                );
                self.runner.run(&job.command, dir)?;
                report.executed += 1;
            }
        }
        Ok(report)
    }
}
