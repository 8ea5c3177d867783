//! Iteration history of an MCR-ALS run.

use std::fmt;

use super::convergence::TerminalState;

/// One line of the optimization log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Standard deviation of `C·St − X̂_pca`.
    pub error_pca: f64,
    /// Standard deviation of `C·St − X`.
    pub error_exp: f64,
    /// Signed percent change of `error_exp`.
    pub change: f64,
    pub divergence_count: usize,
}

/// Append-only record of an optimization: iterations, warnings and the
/// terminal condition. Every entry is also forwarded to the `log` facade,
/// at info level when verbose and at debug level otherwise.
#[derive(Debug, Clone, Default)]
pub struct IterationLog {
    records: Vec<IterationRecord>,
    warnings: Vec<String>,
    lines: Vec<String>,
    terminal: Option<TerminalState>,
    verbose: bool,
}

impl IterationLog {
    pub(crate) fn new(verbose: bool) -> Self {
        let mut log = IterationLog {
            verbose,
            ..Default::default()
        };
        log.emit("*** ALS optimisation log ***".to_string());
        log.emit(format!(
            "{:>5}  {:>14}  {:>14}  {:>12}",
            "#iter", "Error/PCA", "Error/Exp", "%change"
        ));
        log.emit("-".repeat(53));
        log
    }

    fn emit(&mut self, line: String) {
        if self.verbose {
            log::info!("{}", line);
        } else {
            log::debug!("{}", line);
        }
        self.lines.push(line);
    }

    pub(crate) fn warn(&mut self, message: String) {
        log::warn!("{}", message);
        self.lines.push(format!("warning: {}", message));
        self.warnings.push(message);
    }

    pub(crate) fn push(&mut self, record: IterationRecord) {
        self.emit(format!(
            "{:>5}  {:>14.6}  {:>14.6}  {:>12.6}",
            record.iteration, record.error_pca, record.error_exp, record.change
        ));
        self.records.push(record);
    }

    pub(crate) fn finish(&mut self, state: TerminalState, maxit: usize, maxdiv: usize) {
        let message = match state {
            TerminalState::Converged => "converged !".to_string(),
            TerminalState::DivergenceStopped => format!(
                "Optimization not improved since {} iterations... unconverged or 'tol' set too small ?\nStop ALS optimization",
                maxdiv
            ),
            TerminalState::MaxIterReached => format!(
                "Convergence criterion ('tol') not reached after {} iterations.\nStop ALS optimization",
                maxit
            ),
            TerminalState::Cancelled => format!(
                "Optimization cancelled after {} iterations",
                self.records.len()
            ),
        };
        self.emit(message);
        self.terminal = Some(state);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        self.terminal
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

impl fmt::Display for IterationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
