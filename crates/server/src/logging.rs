//! Writing request events to `tracing`.
//!
//! Each request owns a [`RequestLog`] built from the server's [`LogConfig`]. In grouped mode the
//! events of a request are buffered by its event channel and written as one multi-line record
//! once the request is settled. Otherwise every event is written as it is emitted, followed by
//! a summary line.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sans_http::event::{Event, EventChannel};
use sans_http::protocol::RequestId;
use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

use crate::LogConfig;

/// Installs a global `fmt` subscriber, for binaries and tests that do not bring their own.
pub fn init_tracing(level: Level) -> Result<(), SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
}

pub(crate) struct RequestLog {
    config: LogConfig,
    id: RequestId,
}

impl RequestLog {
    pub(crate) fn new(config: LogConfig, id: RequestId) -> Self {
        Self { config, id }
    }

    fn shown(&self, event: &Event) -> bool {
        self.config.verbose || event.level() < Level::DEBUG
    }

    fn line(&self, event: &Event, previous: Duration) -> String {
        let line = format!("{:>5} {}: {}", event.level().as_str(), event.category(), event.message());
        if self.config.time_diff {
            let delta = event.elapsed().saturating_sub(previous);
            format!("[+{:.3}ms] {line}", delta.as_secs_f64() * 1000.0)
        } else {
            line
        }
    }

    /// Forwards events as they happen unless grouped or silent. Events recorded before the
    /// call are forwarded first.
    pub(crate) fn attach(self, events: &EventChannel) -> Self {
        if self.config.silent || self.config.grouped {
            return self;
        }

        let forwarder = RequestLog::new(self.config, self.id);
        let previous = Mutex::new(Duration::ZERO);
        let forward = move |event: &Event| {
            if !forwarder.shown(event) {
                return;
            }
            let mut previous = previous.lock().unwrap_or_else(PoisonError::into_inner);
            write(event.level(), forwarder.id, &forwarder.line(event, *previous));
            *previous = event.elapsed();
        };

        for event in &events.events() {
            forward(event);
        }
        events.subscribe(forward);
        self
    }

    /// The lines of a grouped record: every shown event, then `summary`.
    fn render(&self, events: &[Event], summary: &str) -> Vec<String> {
        let mut previous = Duration::ZERO;
        let mut lines = vec![];
        for event in events.iter().filter(|event| self.shown(event)) {
            lines.push(self.line(event, previous));
            previous = event.elapsed();
        }
        lines.push(summary.to_owned());
        lines
    }

    fn summary(&self, outcome: &str, elapsed: Duration) -> String {
        let mut summary = String::new();
        if self.config.timestamp {
            let mut date = faf_http_date::get_date_buff_no_key();
            faf_http_date::get_date_no_key(&mut date);
            summary.push_str(&format!("[{}] ", String::from_utf8_lossy(&date)));
        }
        summary.push_str(outcome);
        if self.config.duration {
            summary.push_str(&format!(" ({:.3}ms)", elapsed.as_secs_f64() * 1000.0));
        }
        summary
    }

    /// Writes what is left once the request is settled.
    pub(crate) fn finish(&self, events: &EventChannel, outcome: &str) {
        if self.config.silent {
            return;
        }

        let summary = self.summary(outcome, events.elapsed());
        if self.config.grouped {
            let recorded = events.events();
            let level = recorded.iter().map(Event::level).fold(Level::INFO, Ord::min);
            write(level, self.id, &self.render(&recorded, &summary).join("\n"));
        } else {
            write(Level::INFO, self.id, &summary);
        }
    }
}

fn write(level: Level, id: RequestId, line: &str) {
    if level == Level::ERROR {
        tracing::error!(id = %id, "{line}");
    } else if level == Level::WARN {
        tracing::warn!(id = %id, "{line}");
    } else if level == Level::INFO {
        tracing::info!(id = %id, "{line}");
    } else if level == Level::DEBUG {
        tracing::debug!(id = %id, "{line}");
    } else {
        tracing::trace!(id = %id, "{line}");
    }
}
