use std::io::{self, Write};
use std::path::Path;

use colored::Colorize;
use serde_json::json;

use crate::error::FlowFailure;
use crate::flow::FlowInfo;
use crate::recording::{Event, EventObserver};
use crate::tls::keylog::encode_hex;

/// What listing found out about a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Plaintext,
    KeyAvailable,
    KeyUnavailable,
    NoClientHello,
}

impl FlowStatus {
    pub fn label(self) -> &'static str {
        match self {
            FlowStatus::Plaintext => "plaintext",
            FlowStatus::KeyAvailable => "key available",
            FlowStatus::KeyUnavailable => "key unavailable",
            FlowStatus::NoClientHello => "no client hello",
        }
    }

    /// Whether the flow can be turned into a recording.
    pub fn convertible(self) -> bool {
        matches!(self, FlowStatus::Plaintext | FlowStatus::KeyAvailable)
    }
}

/// Print one line of the flow listing.
pub fn print_flow(info: &FlowInfo, status: FlowStatus) {
    let label = match status {
        FlowStatus::Plaintext => status.label().cyan(),
        FlowStatus::KeyAvailable => status.label().green().bold(),
        FlowStatus::KeyUnavailable => status.label().red(),
        FlowStatus::NoClientHello => status.label().dimmed(),
    };
    println!(
        "    - {} {} {}: {}",
        info.src.to_string().green(),
        "->".dimmed(),
        info.dst.to_string().yellow(),
        label
    );
}

pub fn print_analyzing(input: &Path) {
    eprintln!("{} '{}' ...", "Analyzing".cyan().bold(), input.display());
}

pub fn print_written(path: &Path, events: usize) {
    eprintln!(
        "{} '{}' ({} events)",
        "Wrote".green().bold(),
        path.display(),
        events
    );
}

pub fn print_failed(failure: &FlowFailure) {
    eprintln!("{} {}", "Failed".red().bold(), failure);
}

/// Observer that writes each event as one JSON object per line.
pub struct JsonEventSink<W: Write> {
    out: W,
}

impl<W: Write> JsonEventSink<W> {
    pub fn new(out: W) -> Self {
        JsonEventSink { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventObserver for JsonEventSink<W> {
    fn on_event_received(&mut self, event: &Event) -> io::Result<()> {
        let j = json!({
            "timestamp_ms": event.timestamp_ms,
            "kind": event.kind,
            "length": event.payload.len(),
            "payload": encode_hex(&event.payload),
        });
        writeln!(self.out, "{}", j)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
