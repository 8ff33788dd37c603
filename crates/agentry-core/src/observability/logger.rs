//! EventLogger - 構造化イベントログ
//!
//! # 振る舞い
//! - 1 回の `emit` = 1 レコード（UTC タイムスタンプは emit 時に生成）
//! - 閾値未満のイベントはシリアライズ前に捨てる（バッファしない）
//! - correlation_id は metadata に入れる。指定がなければキー自体を出さない
//! - failure context は ERROR 以上のときだけ `metadata.exception` に入る

use std::sync::Arc;

use chrono::SecondsFormat;

use super::event::{CORRELATION_KEY, EXCEPTION_KEY, LogEvent, LogRecord, Severity};
use crate::ports::{Clock, LogSink, SystemClock};

pub struct EventLogger {
    agent_name: String,
    min_severity: Severity,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
}

impl EventLogger {
    pub fn new(agent_name: impl Into<String>, min_severity: Severity, sink: Arc<dyn LogSink>) -> Self {
        Self {
            agent_name: agent_name.into(),
            min_severity,
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Build the record without writing it. `None` if below threshold.
    pub fn record(&self, event: LogEvent) -> Option<LogRecord> {
        if !self.enabled(event.severity) {
            return None;
        }

        let LogEvent {
            severity,
            event_type,
            message,
            agent_name,
            mut metadata,
            correlation_id,
            failure,
        } = event;

        if let Some(correlation_id) = correlation_id {
            metadata.insert(CORRELATION_KEY.to_string(), correlation_id.into());
        }
        if let Some(failure) = failure
            && severity.carries_failure()
        {
            match serde_json::to_value(failure) {
                Ok(value) => {
                    metadata.insert(EXCEPTION_KEY.to_string(), value);
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode failure context"),
            }
        }

        Some(LogRecord {
            timestamp: self.clock.now().to_rfc3339_opts(SecondsFormat::Micros, true),
            agent_name: agent_name.unwrap_or_else(|| self.agent_name.clone()),
            event_type,
            severity,
            message,
            metadata,
        })
    }

    /// Serialize and write one event. Sink failures are reported via `tracing` and swallowed.
    pub fn emit(&self, event: LogEvent) {
        let Some(record) = self.record(event) else {
            return;
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, event_type = %record.event_type, "failed to serialize log event");
                return;
            }
        };

        if let Err(e) = self.sink.write_line(&line) {
            tracing::warn!(error = %e, event_type = %record.event_type, "log sink write failed");
        }
    }
}
