//! Progress Reporter: structured lifecycle events for operators.
//!
//! Separate from logging. Text events go to stderr, JSON events to stdout
//! one object per line, unless a sink is injected.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::intent::{ActionIntent, IntentKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    Off,
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "0" => Ok(ProgressMode::Off),
            "text" => Ok(ProgressMode::Text),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!("unknown progress mode {other:?} (off, text, json)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lock,
    Poll,
    Decide,
    Build,
    Sign,
    Broadcast,
    Confirm,
    Iteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Started,
    Succeeded,
    Failed,
    Skipped,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_kind: Option<IntentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub status: EventStatus,
    pub detail: String,
    pub timestamp: i64,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lock => "lock",
            Stage::Poll => "poll",
            Stage::Decide => "decide",
            Stage::Build => "build",
            Stage::Sign => "sign",
            Stage::Broadcast => "broadcast",
            Stage::Confirm => "confirm",
            Stage::Iteration => "iteration",
        }
    }
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Started => "started",
            EventStatus::Succeeded => "succeeded",
            EventStatus::Failed => "failed",
            EventStatus::Skipped => "skipped",
            EventStatus::Info => "info",
        }
    }
}

impl ProgressEvent {
    fn render_text(&self) -> String {
        let mut line = format!("[{}] {}", self.stage.as_str(), self.status.as_str());
        if let Some(kind) = self.intent_kind {
            line.push_str(&format!(" {kind}"));
        }
        if let Some(target) = &self.target {
            line.push_str(&format!(" {target}"));
        }
        if !self.detail.is_empty() {
            line.push_str(&format!(": {}", self.detail));
        }
        line
    }
}

/// Writes progress events in the configured mode.
pub struct ProgressReporter {
    mode: ProgressMode,
    sink: Mutex<Box<dyn Write + Send>>,
    clock: Arc<dyn Clock>,
}

impl ProgressReporter {
    /// Reporter writing to stderr (text) or stdout (json).
    pub fn new(mode: ProgressMode, clock: Arc<dyn Clock>) -> Self {
        let sink: Box<dyn Write + Send> = match mode {
            ProgressMode::Json => Box::new(std::io::stdout()),
            _ => Box::new(std::io::stderr()),
        };
        Self::with_sink(mode, sink, clock)
    }

    pub fn with_sink(mode: ProgressMode, sink: Box<dyn Write + Send>, clock: Arc<dyn Clock>) -> Self {
        Self {
            mode,
            sink: Mutex::new(sink),
            clock,
        }
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    pub fn emit(&self, stage: Stage, status: EventStatus, detail: impl Into<String>) {
        self.write(ProgressEvent {
            stage,
            intent_kind: None,
            target: None,
            status,
            detail: detail.into(),
            timestamp: self.clock.now(),
        });
    }

    pub fn emit_for(
        &self,
        intent: &ActionIntent,
        stage: Stage,
        status: EventStatus,
        detail: impl Into<String>,
    ) {
        self.write(ProgressEvent {
            stage,
            intent_kind: Some(intent.kind()),
            target: Some(intent.target().to_string()),
            status,
            detail: detail.into(),
            timestamp: self.clock.now(),
        });
    }

    fn write(&self, event: ProgressEvent) {
        debug!(
            stage = event.stage.as_str(),
            status = event.status.as_str(),
            intent_kind = ?event.intent_kind,
            target = event.target.as_deref().unwrap_or(""),
            detail = %event.detail,
            "progress"
        );

        let line = match self.mode {
            ProgressMode::Off => return,
            ProgressMode::Text => event.render_text(),
            ProgressMode::Json => match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    debug!(error = %e, "Failed to encode progress event");
                    return;
                }
            },
        };

        let mut sink = self.sink.lock();
        // A closed stdout/stderr must not take the keeper down.
        let _ = writeln!(sink, "{line}").and_then(|_| sink.flush());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::SharedBuffer;

    fn reporter(mode: ProgressMode) -> (ProgressReporter, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let reporter = ProgressReporter::with_sink(
            mode,
            Box::new(buffer.clone()),
            Arc::new(ManualClock::new(1_700_000_000)),
        );
        (reporter, buffer)
    }

    fn intent() -> ActionIntent {
        ActionIntent::TransferFee {
            target: "vault1".into(),
            amount: 5_000,
            reason: "fees above dust".into(),
        }
    }

    #[test]
    fn test_json_mode_writes_one_object_per_line() {
        let (reporter, buffer) = reporter(ProgressMode::Json);
        reporter.emit(Stage::Poll, EventStatus::Started, "");
        reporter.emit_for(&intent(), Stage::Broadcast, EventStatus::Succeeded, "tx-1");

        let events = buffer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stage, Stage::Poll);
        assert_eq!(events[0].intent_kind, None);
        assert_eq!(events[1].intent_kind, Some(IntentKind::TransferFee));
        assert_eq!(events[1].target.as_deref(), Some("vault1"));
        assert_eq!(events[1].timestamp, 1_700_000_000);
    }

    #[test]
    fn test_text_mode_is_human_readable() {
        let (reporter, buffer) = reporter(ProgressMode::Text);
        reporter.emit_for(&intent(), Stage::Sign, EventStatus::Failed, "signer offline");
        assert_eq!(
            buffer.contents().trim(),
            "[sign] failed transfer_fee vault1: signer offline"
        );
    }

    #[test]
    fn test_off_mode_writes_nothing() {
        let (reporter, buffer) = reporter(ProgressMode::Off);
        reporter.emit(Stage::Iteration, EventStatus::Info, "done");
        assert!(buffer.contents().is_empty());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("JSON".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("off".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("verbose".parse::<ProgressMode>().is_err());
    }
}
