//! In-place terminal status output.
//!
//! Each line is keyed; re-printing a key rewrites that line in place using
//! ANSI cursor-up escapes instead of appending. Safe to share across workers.

use crate::vim::ProgressReport;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct UpdatableStdout {
    inner: Mutex<State>,
}

struct State {
    prior_lines_printed: usize,
    ids: Vec<String>,
    lines: HashMap<String, String>,
    writer: Box<dyn Write + Send>,
}

impl UpdatableStdout {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Used by tests to capture output instead of writing to the terminal.
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        UpdatableStdout {
            inner: Mutex::new(State {
                prior_lines_printed: 0,
                ids: Vec::new(),
                lines: HashMap::new(),
                writer,
            }),
        }
    }

    /// Outputs an empty line.
    pub fn println_blank(&self) {
        self.print("");
    }

    /// Outputs the string on its own line, never updated afterwards.
    pub fn print(&self, s: &str) {
        self.print_updatable(&Uuid::new_v4().to_string(), s);
    }

    /// Outputs the string on the line owned by `id`, or rewrites that line
    /// in place if it was printed before.
    pub fn print_updatable(&self, id: &str, s: &str) {
        let mut state = self.inner.lock().unwrap();
        if !state.lines.contains_key(id) {
            state.ids.push(id.to_string());
        }
        state.lines.insert(id.to_string(), s.to_string());
        state.flush();
    }
}

impl Default for UpdatableStdout {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn flush(&mut self) {
        if self.prior_lines_printed > 0 {
            let _ = write!(self.writer, "\x1b[{}F", self.prior_lines_printed);
        }

        self.prior_lines_printed = 0;
        for id in &self.ids {
            self.prior_lines_printed += 1;
            let _ = writeln!(self.writer, "{}", self.lines[id]);
        }
        let _ = self.writer.flush();
    }
}

/// Streams hypervisor task progress into the updatable output, one line per
/// task keyed by name.
pub struct ProgressLogger {
    out: Arc<UpdatableStdout>,
}

impl ProgressLogger {
    pub fn new(out: Arc<UpdatableStdout>) -> Self {
        ProgressLogger { out }
    }

    /// Returns a sender the hypervisor backend pushes progress reports into.
    /// The consumer task drains reports until the sender side is dropped.
    pub fn sink(&self, task_name: &str) -> mpsc::UnboundedSender<ProgressReport> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressReport>();
        let out = Arc::clone(&self.out);
        let name = task_name.to_string();
        tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                crate::log_debug!(
                    "Received {} progress update: {}",
                    name,
                    report.percent
                );
                if let Some(err) = &report.error {
                    out.print_updatable(&name, &format!("{} - {}", name, err));
                } else if report.percent > 0.0 {
                    // vSphere reports 0 again _after_ 100 which would corrupt
                    // completed VM lines, so non-error zero reports are dropped
                    out.print_updatable(&name, &format!("{} - {:.0}%", name, report.percent));
                }
            }
        });
        tx
    }
}
