//! List and convert modes: capture in, one recording per flow out.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::capture::{epoch_millis, PacketSource};
use crate::config::{Config, InputKind, OutputFormat};
use crate::error::{FlowError, FlowFailure};
use crate::flow::{
    demultiplex, embedded_addrs, Flow, FlowInfo, FlowKind, EMBEDDED_PAYLOAD_OFFSET,
};
use crate::output::{self, FlowStatus, JsonEventSink};
use crate::recording::{read_events, EventObserver, Recorder};
use crate::replay::{RdpFramingStack, Replayer};
use crate::tls::keylog::SecretStore;
use crate::tls::{find_client_random, Decrypted, CLIENT_HELLO_SEARCH_LIMIT};

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct Summary {
    /// Flows found in the capture.
    pub flows: usize,
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

pub fn run(config: &Config) -> Result<Summary> {
    match config.input_kind {
        InputKind::Capture => process_capture(config),
        InputKind::Replay => {
            let stdout = io::stdout();
            dump_replay(&config.input, stdout.lock())?;
            Ok(Summary::default())
        }
    }
}

/// Re-emit an existing replay artifact as JSON lines.
pub fn dump_replay<W: Write>(path: &Path, out: W) -> Result<usize> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay file: {}", path.display()))?;
    let events = read_events(io::BufReader::new(file))
        .with_context(|| format!("Failed to read replay file: {}", path.display()))?;

    let mut sink = JsonEventSink::new(out);
    for event in &events {
        sink.on_event_received(event)?;
    }
    sink.flush()?;
    Ok(events.len())
}

fn process_capture(config: &Config) -> Result<Summary> {
    let secrets = match &config.secrets {
        Some(path) => SecretStore::from_file(path)?,
        None => SecretStore::default(),
    };

    output::print_analyzing(&config.input);
    let mut source = PacketSource::from_file(&config.input)?;
    let packets = source.packets()?;
    let flows = demultiplex(packets)?;

    let mut summary = Summary {
        flows: flows.len(),
        ..Summary::default()
    };
    let mut convertible = Vec::new();
    for flow in flows {
        let info = flow.info();
        let (status, fingerprint) = classify(&flow, &secrets);
        output::print_flow(&info, status);
        if status.convertible() {
            convertible.push((flow, info, fingerprint));
        }
    }

    if config.list {
        return Ok(summary);
    }

    for (flow, info, fingerprint) in convertible {
        if !config.accepts(&info) {
            tracing::debug!(src = %info.src, dst = %info.dst, "flow filtered out");
            continue;
        }
        let key = flow.key.clone();
        let path = config.output_path(&info);
        tracing::info!(flow = %key, "converting");

        match convert_flow(flow, &info, fingerprint.as_deref(), &secrets, &path, config.format) {
            Ok(events) => {
                tracing::info!(flow = %key, path = %path.display(), events, "recording written");
                output::print_written(&path, events);
                summary.written.push(path);
            }
            Err(source) => {
                let failure = FlowFailure { key, source };
                tracing::error!("flow aborted: {}", failure);
                output::print_failed(&failure);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Decide how a flow is listed, with the fingerprint of its ClientHello.
fn classify(flow: &Flow, secrets: &SecretStore) -> (FlowStatus, Option<String>) {
    if flow.kind == FlowKind::PlaintextEncapsulated {
        return (FlowStatus::Plaintext, None);
    }
    match find_client_random(&flow.packets, CLIENT_HELLO_SEARCH_LIMIT) {
        None => (FlowStatus::NoClientHello, None),
        Some(fp) if secrets.contains(&fp) => (FlowStatus::KeyAvailable, Some(fp)),
        Some(fp) => (FlowStatus::KeyUnavailable, Some(fp)),
    }
}

/// Write the recording of one flow, returning the number of events.
fn convert_flow(
    flow: Flow,
    info: &FlowInfo,
    fingerprint: Option<&str>,
    secrets: &SecretStore,
    path: &Path,
    format: OutputFormat,
) -> Result<usize, FlowError> {
    let file = BufWriter::new(File::create(path)?);
    let recorder = match format {
        OutputFormat::Replay => Recorder::new().with_writer(file),
        OutputFormat::Json => Recorder::new().with_observer(Box::new(JsonEventSink::new(file))),
    };
    let mut replayer = Replayer::new(RdpFramingStack::new(), recorder);

    match flow.kind {
        FlowKind::PlaintextEncapsulated => replay_plaintext(flow, info, &mut replayer)?,
        FlowKind::Tls => {
            let fingerprint = fingerprint.unwrap_or_default();
            let secret = secrets.get(fingerprint).ok_or_else(|| FlowError::MissingSecret {
                fingerprint: fingerprint.to_string(),
            })?;
            replay_tls(Decrypted::new(flow, secret), &mut replayer)?;
        }
    }

    if let Err(e) = replayer.finalize() {
        tracing::warn!(path = %path.display(), "{}", e);
    }
    let events = replayer.recorded();
    replayer.into_recorder().finish()?;
    Ok(events)
}

/// Feed decrypted application data in capture order.
pub fn replay_tls<W: Write>(
    mut decrypted: Decrypted,
    replayer: &mut Replayer<RdpFramingStack, W>,
) -> Result<(), FlowError> {
    while let Some(item) = decrypted.next() {
        let packet = item?;
        let Some(initiator) = decrypted.initiator() else {
            continue;
        };
        let from_client = packet.net.src == initiator;
        for data in packet.application_data() {
            replayer.set_timestamp(epoch_millis(packet.timestamp));
            replayer.ingest(data, from_client)?;
        }
    }
    Ok(())
}

/// Feed the payload of exported PDU records exchanged between the flow's
/// two endpoints. The flow's first embedded source is the client.
pub fn replay_plaintext<W: Write>(
    flow: Flow,
    info: &FlowInfo,
    replayer: &mut Replayer<RdpFramingStack, W>,
) -> Result<(), FlowError> {
    let allowed = [info.src, info.dst];
    for packet in flow.packets {
        let Some((src, dst)) = embedded_addrs(&packet.payload) else {
            continue;
        };
        let (src, dst) = (IpAddr::V4(src), IpAddr::V4(dst));
        if !allowed.contains(&src) || !allowed.contains(&dst) {
            tracing::trace!(frame = packet.index, %src, %dst, "record outside conversation");
            continue;
        }
        let data = packet.payload.get(EMBEDDED_PAYLOAD_OFFSET..).unwrap_or_default();
        replayer.set_timestamp(packet.timestamp_ms());
        replayer.ingest(data, src == info.src)?;
    }
    Ok(())
}
