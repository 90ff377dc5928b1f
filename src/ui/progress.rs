//! Terminal progress renderer for pipeline runs.
//!
//! An optional adapter between the engine's progress-callback contract and
//! `indicatif`. Two bars are stacked vertically:
//! - Step bar — how many of the run's steps have completed
//! - Status line — current phase, quality, and ETA
//!
//! The engine never requires this renderer; any [`ProgressCallback`] works.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{ProgressCallback, ProgressSnapshot};
use crate::recovery::ErrorResponse;
use crate::ui::icons::{CHECK, CLOCK, CROSS, PROGRESS, SPARKLE};

/// Renders [`ProgressSnapshot`]s as stacked progress bars.
pub struct ProgressRenderer {
    multi: MultiProgress,
    step_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl ProgressRenderer {
    /// Create the renderer and add both bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_steps` — total number of steps in the run, sizes the step bar
    /// * `verbose` — when `true`, per-step detail lines are printed
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(total_steps));
        step_bar.set_style(step_style);
        step_bar.set_prefix("Steps");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("  Run");
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            step_bar,
            status_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails, so run-level messages are never silently lost.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Update both bars from a snapshot.
    pub fn observe(&self, snapshot: &ProgressSnapshot) {
        self.step_bar
            .set_position(u64::from(snapshot.completed_steps));
        self.step_bar.set_message(format!(
            "{}",
            style(snapshot.phase.name()).yellow()
        ));

        let eta = if snapshot.eta > 0.0 {
            format!("{} {:.0}s left", CLOCK, snapshot.eta)
        } else {
            String::new()
        };
        self.status_bar.set_message(format!(
            "step {}/{} {} quality {} {}",
            style(snapshot.current_step).cyan(),
            snapshot.total_steps,
            PROGRESS,
            style(format!("{:.2}", snapshot.overall_quality_score)).cyan(),
            style(eta).dim()
        ));

        if self.verbose
            && let Some((name, detail)) = snapshot
                .steps
                .iter()
                .find(|(_, detail)| detail.step_number == snapshot.current_step)
        {
            self.print_line(format!(
                "    {} {} ({:.1}s, quality {:.2})",
                style("→").dim(),
                style(name).dim(),
                detail.execution_time,
                detail.quality_score,
            ));
        }
    }

    /// Print the run header before generation begins.
    pub fn run_started(&self, calendar_type: &str, industry: &str) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} Generating {} calendar for {}",
            style("▶").green().bold(),
            style(calendar_type).yellow().bold(),
            industry
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Finish both bars with a success banner.
    pub fn run_completed(&self, overall_quality: f64, processing_time: f64) {
        self.step_bar.finish();
        self.status_bar.finish_with_message(format!(
            "{} complete in {:.1}s",
            CHECK, processing_time
        ));
        self.print_line(format!(
            "\n{} Calendar generated (quality {:.2})\n",
            SPARKLE,
            style(overall_quality).green().bold()
        ));
    }

    /// Finish both bars with a failure banner.
    pub fn run_failed(&self, response: &ErrorResponse) {
        self.status_bar
            .finish_with_message(format!("{} {}", CROSS, response.error_type.as_str()));
        self.print_line(format!(
            "\n{} Generation failed: {}\n",
            CROSS,
            style(&response.error_message).red().bold()
        ));
    }

    /// Wrap this renderer as an engine progress callback.
    pub fn callback(self: &Arc<Self>) -> ProgressCallback {
        let renderer = Arc::clone(self);
        Arc::new(move |snapshot| {
            renderer.observe(snapshot);
            Ok(())
        })
    }
}
