//! Stuck-loop detection over recent action outcomes.
//!
//! Pure bookkeeping: a fixed-capacity window of [`ActionRecord`]s plus a
//! consecutive-failure counter. The detector reports stuck when either the
//! counter reaches the threshold, or the window is full and its failures
//! (at least `threshold` of them) all come from the same tool.

use std::collections::VecDeque;

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub tool: String,
    pub success: bool,
    pub step_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDetector {
    window_size: usize,
    threshold: usize,
    recent: VecDeque<ActionRecord>,
    failures: usize,
}

impl LoopDetector {
    /// A `window_size` of 0 is treated as 1.
    pub fn new(window_size: usize, threshold: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            threshold,
            recent: VecDeque::with_capacity(window_size),
            failures: 0,
        }
    }

    pub fn add_action(&mut self, tool: &str, success: bool, step_text: &str) {
        if self.recent.len() == self.window_size {
            self.recent.pop_front();
        }
        self.recent.push_back(ActionRecord {
            tool: tool.to_string(),
            success,
            step_text: step_text.to_string(),
        });

        if success {
            self.failures = 0;
        } else {
            self.failures += 1;
        }
    }

    pub fn is_stuck(&self) -> bool {
        if self.failures >= self.threshold {
            return true;
        }

        if self.recent.len() < self.window_size {
            return false;
        }

        let mut failing = self.recent.iter().filter(|r| !r.success);
        let Some(first) = failing.next() else {
            return false;
        };
        let mut count = 1;
        for record in failing {
            if record.tool != first.tool {
                return false;
            }
            count += 1;
        }
        count >= self.threshold
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.failures = 0;
    }

    /// Summary of the last three actions for a re-planning prompt.
    pub fn get_context(&self) -> String {
        let mut out = format!(
            "STUCK IN LOOP: {} consecutive failures. Recent actions:\n",
            self.failures
        );
        let skip = self.recent.len().saturating_sub(3);
        for record in self.recent.iter().skip(skip) {
            let mark = if record.success { "✓" } else { "✗" };
            out.push_str(&format!(
                "  - {}: {} | {}\n",
                record.tool, mark, record.step_text
            ));
        }
        out.push_str("Try a different approach than the actions above.");
        out
    }

    pub fn consecutive_failures(&self) -> usize {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(5, 3)
    }
}
