// 📋 Step Reports - render each pass for human review
// The engine never blocks; pacing belongs to whichever sink the caller picks

use crate::clustering::{RunOutcome, StepReport};
use std::io::{self, BufRead, Write};

const RULE_WIDTH: usize = 60;

// ============================================================================
// REPORT SINK
// ============================================================================

/// Receives one report per step, before the next step starts.
/// Returning an `Interrupted` error stops the run.
pub trait StepSink {
    fn on_step(&mut self, report: &StepReport) -> io::Result<()>;
}

impl<F> StepSink for F
where
    F: FnMut(&StepReport) -> io::Result<()>,
{
    fn on_step(&mut self, report: &StepReport) -> io::Result<()> {
        self(report)
    }
}

// ============================================================================
// TEXT RENDERING
// ============================================================================

pub fn format_step_report(report: &StepReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("Pass {}: {}\n", report.step + 1, report.description));
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push('\n');

    for merge in &report.merges {
        let members: Vec<String> = merge.provenance.iter().map(|p| p.to_string()).collect();
        out.push_str(&format!(
            "{:?} -> {}  [{}]\n",
            merge.key,
            merge.canonical_name,
            members.join(", ")
        ));
    }

    out.push('\n');
    if report.has_merges() {
        out.push_str(&format!("{} changes\n", report.merge_count));
    } else {
        out.push_str("[No changes]\n");
    }

    out
}

pub fn format_summary(outcome: &RunOutcome) -> String {
    format!(
        "Done\nTotal changes: {}\nClusters: {} ({} with more than one name)\n",
        outcome.total_merges,
        outcome.clusters.len(),
        outcome.multi_member_clusters().count()
    )
}

// ============================================================================
// TEXT REPORTER
// ============================================================================

/// Writes each step report as text. With a pause input it waits for a line
/// after every step; a line of `q` stops the run.
pub struct TextReporter<W: Write> {
    out: W,
    pause: Option<Box<dyn BufRead>>,
}

impl<W: Write> TextReporter<W> {
    pub fn new(out: W) -> Self {
        TextReporter { out, pause: None }
    }

    pub fn with_pause<R: BufRead + 'static>(mut self, input: R) -> Self {
        self.pause = Some(Box::new(input));
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> StepSink for TextReporter<W> {
    fn on_step(&mut self, report: &StepReport) -> io::Result<()> {
        writeln!(self.out, "{}", format_step_report(report))?;

        if let Some(input) = self.pause.as_mut() {
            write!(self.out, "Press Enter to continue (q to quit)... ")?;
            self.out.flush()?;

            let mut line = String::new();
            // EOF means nobody is there to ask; keep going
            if input.read_line(&mut line)? > 0 && line.trim().eq_ignore_ascii_case("q") {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "review stopped"));
            }
            writeln!(self.out)?;
        }

        self.out.flush()
    }
}

// ============================================================================
// TESTS
// ============================================================================
