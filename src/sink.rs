//! Progress and diagnostic sinks consumed by the migration engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{Level, event};

/// Fire-and-forget progress reporting. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, percent: f32, message: &str);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Warn,
    Error,
}

/// Where a diagnostic came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticContext {
    pub step: Option<String>,
    pub version: Option<u32>,
    pub record: Option<String>,
    pub owner: Option<String>,
    pub pack: Option<String>,
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, name: impl Into<String>, version: u32) -> Self {
        self.step = Some(name.into());
        self.version = Some(version);
        self
    }

    pub fn record(mut self, record: impl Into<String>) -> Self {
        self.record = Some(record.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn pack(mut self, pack: impl Into<String>) -> Self {
        self.pack = Some(pack.into());
        self
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(step) = &self.step {
            parts.push(format!("step={}", step));
        }
        if let Some(version) = self.version {
            parts.push(format!("version={}", version));
        }
        if let Some(record) = &self.record {
            parts.push(format!("record={}", record));
        }
        if let Some(owner) = &self.owner {
            parts.push(format!("owner={}", owner));
        }
        if let Some(pack) = &self.pack {
            parts.push(format!("pack={}", pack));
        }
        f.write_str(&parts.join(" "))
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn log(&self, level: DiagnosticLevel, message: &str, context: &DiagnosticContext);

    fn log_info(&self, message: &str, context: &DiagnosticContext) {
        self.log(DiagnosticLevel::Info, message, context);
    }

    fn log_warn(&self, message: &str, context: &DiagnosticContext) {
        self.log(DiagnosticLevel::Warn, message, context);
    }

    fn log_error(&self, message: &str, context: &DiagnosticContext) {
        self.log(DiagnosticLevel::Error, message, context);
    }
}

fn emit(level: DiagnosticLevel, message: &str, context: &DiagnosticContext) {
    let step = context.step.as_deref().unwrap_or("");
    let record = context.record.as_deref().unwrap_or("");
    let owner = context.owner.as_deref().unwrap_or("");
    let pack = context.pack.as_deref().unwrap_or("");
    match level {
        DiagnosticLevel::Info => {
            event!(Level::INFO, step, record, owner, pack, "{}", message)
        }
        DiagnosticLevel::Warn => {
            event!(Level::WARN, step, record, owner, pack, "{}", message)
        }
        DiagnosticLevel::Error => {
            event!(Level::ERROR, step, record, owner, pack, "{}", message)
        }
    }
}

/// Default sink: forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report_progress(&self, percent: f32, message: &str) {
        event!(Level::DEBUG, percent = percent, "{}", message);
    }
}

impl DiagnosticSink for TracingSink {
    fn log(&self, level: DiagnosticLevel, message: &str, context: &DiagnosticContext) {
        emit(level, message, context);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub context: DiagnosticContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub percent: f32,
    pub message: String,
}

/// Keeps every progress event and diagnostic in memory and still forwards
/// them to `tracing`.
#[derive(Debug, Default)]
pub struct MemorySink {
    progress: Mutex<Vec<ProgressEvent>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress_events(&self) -> Vec<ProgressEvent> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn at_level(&self, level: DiagnosticLevel) -> Vec<Diagnostic> {
        self.diagnostics()
            .into_iter()
            .filter(|diagnostic| diagnostic.level == level)
            .collect()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.at_level(DiagnosticLevel::Error)
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.at_level(DiagnosticLevel::Warn)
    }
}

impl ProgressSink for MemorySink {
    fn report_progress(&self, percent: f32, message: &str) {
        TracingSink.report_progress(percent, message);
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ProgressEvent {
                percent,
                message: message.to_string(),
            });
    }
}

impl DiagnosticSink for MemorySink {
    fn log(&self, level: DiagnosticLevel, message: &str, context: &DiagnosticContext) {
        emit(level, message, context);
        self.diagnostics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Diagnostic {
                level,
                message: message.to_string(),
                context: context.clone(),
            });
    }
}
