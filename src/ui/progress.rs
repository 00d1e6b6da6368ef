use std::time::Duration;

use async_trait::async_trait;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::progress::{ProgressEvent, ProgressSubscriber};
use crate::ui::icons::{CART, CHECK, CROSS, KEY, PIVOT, SPARKLE};

/// Terminal renderer for one automation session.
///
/// Two bars are stacked vertically:
/// - Step bar: completed steps out of the run's step budget
/// - Phase spinner: the current phase (planning, executing, awaiting input)
///   and the latest progress message
///
/// Subscribes to a [`crate::progress::ProgressReporter`] like any other sink.
pub struct TerminalProgress {
    multi: MultiProgress,
    step_bar: ProgressBar,
    phase_bar: ProgressBar,
    verbose: bool,
}

impl TerminalProgress {
    pub fn new(verbose: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), verbose)
    }

    /// Renderer that draws nowhere; event handling is unchanged.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let step_bar = multi.add(ProgressBar::new(0));
        step_bar.set_style(step_style);
        step_bar.set_prefix(" Steps");

        let phase_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let phase_bar = multi.add(ProgressBar::new_spinner());
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix(" Phase");

        Self {
            multi,
            step_bar,
            phase_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn steps_done(&self) -> u64 {
        self.step_bar.position()
    }

    pub fn step_total(&self) -> u64 {
        self.step_bar.length().unwrap_or(0)
    }

    pub fn is_finished(&self) -> bool {
        self.phase_bar.is_finished()
    }

    fn render(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::State { state, .. } => {
                self.step_bar.set_length(u64::from(state.total_steps));
                self.step_bar.set_position(state.steps_completed.len() as u64);
                if let Some(phase) = &state.current_phase {
                    self.phase_bar.set_message(phase.clone());
                }
            }
            ProgressEvent::AutomationStarted { total_steps, .. } => {
                self.step_bar.set_length(u64::from(*total_steps));
                self.step_bar.set_position(0);
                self.phase_bar
                    .set_message(format!("{}{}", CART, style("starting").dim()));
                self.phase_bar
                    .enable_steady_tick(Duration::from_millis(100));
            }
            ProgressEvent::Progress {
                phase,
                step,
                total_steps,
                message,
                ..
            } => {
                let icon = match phase.as_str() {
                    "awaiting_input" => KEY.to_string(),
                    "recovering" => PIVOT.to_string(),
                    _ => String::new(),
                };
                self.phase_bar.set_message(format!(
                    "{}{} {}/{} {}",
                    icon,
                    style(phase).yellow(),
                    style(step).cyan(),
                    total_steps,
                    style(message).dim()
                ));
                if self.verbose || phase == "awaiting_input" {
                    self.print_line(format!("    {} {}", style("→").dim(), message));
                }
            }
            ProgressEvent::StepCompleted {
                step,
                total_completed,
                ..
            } => {
                self.step_bar.set_position(*total_completed as u64);
                self.step_bar.set_message(step.clone());
                if self.verbose {
                    self.print_line(format!("    {}{}", CHECK, style(step).green()));
                }
            }
            ProgressEvent::Error { error, .. } => {
                self.print_line(format!("{}{}", CROSS, style(error).red()));
            }
            ProgressEvent::AutomationCompleted {
                success,
                final_url,
                steps_completed,
                ..
            } => {
                let at = final_url
                    .as_deref()
                    .map(|url| format!(" at {}", url))
                    .unwrap_or_default();
                if *success {
                    self.phase_bar.finish_with_message(format!(
                        "{}Done after {} steps{}",
                        SPARKLE, steps_completed, at
                    ));
                    self.step_bar.finish();
                } else {
                    self.phase_bar.abandon_with_message(format!(
                        "{}Stopped after {} steps{}",
                        CROSS, steps_completed, at
                    ));
                    self.step_bar.abandon();
                }
            }
        }
    }
}

#[async_trait]
impl ProgressSubscriber for TerminalProgress {
    async fn send(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        self.render(event);
        Ok(())
    }
}
