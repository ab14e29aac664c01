use std::sync::Mutex;

use runq::config::CommandSpec;
use runq::engine::{ExecutionResult, ExecutionStatus};
use runq::exec::stream::OutputLine;
use runq::monitor::{HealthEventKind, HealthMonitorEvent, HealthSummary};
use runq::report::{ProcessStatusUpdate, Reporter};

/// One reporter hook invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Start { total: usize },
    CommandStart { index: usize, name: String },
    Success { index: usize, name: String },
    Failure { index: usize, name: String },
    Complete { completed: usize, total: usize },
    Output { command: String, text: String },
    ProcessStatus { name: String, update: ProcessStatusUpdate },
    Lifecycle { name: String, kind: HealthEventKind },
    Summary(HealthSummary),
}

/// Reporter that remembers every hook call, for assertions.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    /// Text of every streamed output line, in arrival order.
    pub fn output_lines(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::Output { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Recorded) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Reporter for RecordingReporter {
    fn on_start(&self, total: usize) {
        self.push(Recorded::Start { total });
    }

    fn on_command_start(&self, index: usize, _total: usize, spec: &CommandSpec) {
        self.push(Recorded::CommandStart {
            index,
            name: spec.name.clone(),
        });
    }

    fn on_command_success(&self, index: usize, _total: usize, result: &ExecutionResult) {
        self.push(Recorded::Success {
            index,
            name: result.name.clone(),
        });
    }

    fn on_command_failure(&self, index: usize, _total: usize, result: &ExecutionResult) {
        self.push(Recorded::Failure {
            index,
            name: result.name.clone(),
        });
    }

    fn on_complete(&self, status: &ExecutionStatus) {
        self.push(Recorded::Complete {
            completed: status.completed,
            total: status.total,
        });
    }

    fn on_output_line(&self, line: &OutputLine) {
        self.push(Recorded::Output {
            command: line.command.clone(),
            text: line.text.clone(),
        });
    }

    fn on_process_status(&self, name: &str, _pid: u32, update: &ProcessStatusUpdate) {
        self.push(Recorded::ProcessStatus {
            name: name.to_string(),
            update: *update,
        });
    }

    fn on_lifecycle_event(&self, event: &HealthMonitorEvent) {
        self.push(Recorded::Lifecycle {
            name: event.name.clone(),
            kind: event.kind,
        });
    }

    fn on_health_summary(&self, summary: &HealthSummary) {
        self.push(Recorded::Summary(*summary));
    }
}
