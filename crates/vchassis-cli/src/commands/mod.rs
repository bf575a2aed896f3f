pub mod create;
pub mod delete;
pub mod verify;

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use vchassis_core::{ProvisionReport, Settings, StepOutcome, TopologyContext, TopologyLock};
use vchassis_runtime::CommandRunner;
use vchassis_schema::TopologySpec;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_TOPOLOGY_ERROR: u8 = 2;
pub const EXIT_INVALID_ARGS: u8 = 3;

/// Everything a command needs, resolved from arguments and settings.
pub struct Invocation {
    pub ctx: TopologyContext,
    pub spec: TopologySpec,
    pub runner: Arc<dyn CommandRunner>,
    pub settings: Settings,
    pub json: bool,
}

impl Invocation {
    /// Serialize mutating runs against the same topology name.
    pub fn lock(&self) -> Result<TopologyLock, String> {
        let path = vchassis_core::lock_path_for(self.ctx.name());
        TopologyLock::try_acquire(&path)
            .map_err(|e| format!("topology lock: {e}"))?
            .ok_or_else(|| {
                format!(
                    "topology lock: '{}' is in use by another vchassis process",
                    self.ctx.name()
                )
            })
    }

    pub fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        if self.json {
            None
        } else {
            Some(spinner(msg))
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn pass_fail(passed: bool) -> String {
    use console::Style;
    if passed {
        Style::new().green().apply_to("PASS").to_string()
    } else {
        Style::new().red().bold().apply_to("FAIL").to_string()
    }
}

pub fn colorize_outcome(outcome: &StepOutcome) -> String {
    use console::Style;
    let text = outcome.to_string();
    match outcome {
        StepOutcome::Created | StepOutcome::Removed => Style::new().green().apply_to(text).to_string(),
        StepOutcome::Applied => Style::new().cyan().apply_to(text).to_string(),
        StepOutcome::AlreadyPresent | StepOutcome::AlreadyAbsent => {
            Style::new().dim().apply_to(text).to_string()
        }
        StepOutcome::Failed { .. } => Style::new().red().apply_to(text).to_string(),
    }
}

/// Print a create/delete report and pick the exit code: any failed step or
/// an interrupted run is a failure.
pub fn finish_provisioning(
    report: &ProvisionReport,
    verb: &str,
    pb: Option<&ProgressBar>,
    json: bool,
) -> Result<u8, String> {
    let clean = report.is_clean();
    if let Some(pb) = pb {
        if clean {
            spin_ok(pb, &format!("topology '{}' {verb}", report.topology));
        } else if report.interrupted {
            spin_fail(pb, &format!("topology '{}' interrupted", report.topology));
        } else {
            spin_fail(pb, &format!("topology '{}' {verb} with failures", report.topology));
        }
    }

    if json {
        println!("{}", json_pretty(report)?);
    } else {
        let tally = report.tally();
        println!(
            "{} steps: {} created, {} applied, {} removed, {} unchanged, {} failed",
            report.steps.len(),
            tally.created,
            tally.applied,
            tally.removed,
            tally.unchanged,
            tally.failed
        );
        for step in report.steps.iter().filter(|s| s.outcome.is_failed()) {
            println!("  {}: {}", step.step, colorize_outcome(&step.outcome));
        }
        if report.interrupted {
            println!("interrupted; run the same command again to resume");
        }
    }

    if clean {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
