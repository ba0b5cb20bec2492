//! Stream demultiplexing: partitions an ordered packet sequence into
//! bidirectional flows and classifies each one.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::SystemTime;

use crate::capture::{LinkType, Packet};
use crate::error::ClassificationError;

/// Byte range of the embedded source address in an exported PDU record.
const EMBEDDED_SRC: std::ops::Range<usize> = 12..16;
/// Byte range of the embedded destination address in an exported PDU record.
const EMBEDDED_DST: std::ops::Range<usize> = 20..24;
/// Offset of the protocol payload in an exported PDU record.
pub const EMBEDDED_PAYLOAD_OFFSET: usize = 60;

/// Bidirectional flow identifier, normalized so (A->B) == (B->A).
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlowKey {
    pub addr_a: IpAddr,
    pub port_a: u16,
    pub addr_b: IpAddr,
    pub port_b: u16,
}

impl FlowKey {
    pub fn new(src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16) -> Self {
        // Normalize IPv6-mapped-IPv4 (::ffff:x.x.x.x) to plain IPv4 so that
        // dual-stack connections map to the same flow.
        let src = normalize_ip(src);
        let dst = normalize_ip(dst);
        if (src, src_port) <= (dst, dst_port) {
            FlowKey {
                addr_a: src,
                port_a: src_port,
                addr_b: dst,
                port_b: dst_port,
            }
        } else {
            FlowKey {
                addr_a: dst,
                port_a: dst_port,
                addr_b: src,
                port_b: src_port,
            }
        }
    }
}

/// Convert IPv6-mapped-IPv4 addresses to their IPv4 equivalent.
fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        other => other,
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} <-> {}:{}",
            self.addr_a, self.port_a, self.addr_b, self.port_b
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Raw TCP flow, TLS-capable.
    Tls,
    /// Exported PDU records with addressing embedded in the payload.
    PlaintextEncapsulated,
}

/// Summary of a flow: `(src, dst, start, plaintext)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInfo {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub start: SystemTime,
    pub plaintext: bool,
}

#[derive(Debug)]
pub struct Flow {
    pub key: FlowKey,
    pub kind: FlowKind,
    pub packets: Vec<Packet>,
}

impl Flow {
    /// Endpoints and start time as seen in the flow's first packet.
    pub fn info(&self) -> FlowInfo {
        let first = &self.packets[0];
        match self.kind {
            FlowKind::Tls => {
                // Tls flows are only ever built from packets with `net`.
                let (src, dst) = first
                    .net
                    .map(|n| (n.src.ip(), n.dst.ip()))
                    .unwrap_or((self.key.addr_a, self.key.addr_b));
                FlowInfo {
                    src,
                    dst,
                    start: first.timestamp,
                    plaintext: false,
                }
            }
            FlowKind::PlaintextEncapsulated => {
                let (src, dst) = embedded_addrs(&first.payload)
                    .map(|(s, d)| (IpAddr::V4(s), IpAddr::V4(d)))
                    .unwrap_or((self.key.addr_a, self.key.addr_b));
                FlowInfo {
                    src,
                    dst,
                    start: first.timestamp,
                    plaintext: true,
                }
            }
        }
    }
}

/// Source and destination addresses embedded in an exported PDU record.
pub fn embedded_addrs(payload: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let src: [u8; 4] = payload.get(EMBEDDED_SRC)?.try_into().ok()?;
    let dst: [u8; 4] = payload.get(EMBEDDED_DST)?.try_into().ok()?;
    Some((Ipv4Addr::from(src), Ipv4Addr::from(dst)))
}

/// Group packets into flows, in order of first appearance.
///
/// A packet with an IP header always lands in a TCP flow keyed by its
/// endpoint pair, whatever its payload looks like. A packet without one is
/// only accepted from an exported-PDU capture, keyed by its embedded
/// addresses. Anything else makes the capture unpartitionable.
pub fn demultiplex(packets: Vec<Packet>) -> Result<Vec<Flow>, ClassificationError> {
    let mut flows: Vec<Flow> = Vec::new();
    let mut index: HashMap<FlowKey, usize> = HashMap::new();

    for packet in packets {
        let (key, kind) = match (&packet.net, packet.link) {
            (Some(net), _) => (
                FlowKey::new(net.src.ip(), net.src.port(), net.dst.ip(), net.dst.port()),
                FlowKind::Tls,
            ),
            (None, LinkType::ExportedPdu) => match embedded_addrs(&packet.payload) {
                Some((src, dst)) => (
                    FlowKey::new(IpAddr::V4(src), 0, IpAddr::V4(dst), 0),
                    FlowKind::PlaintextEncapsulated,
                ),
                None => {
                    return Err(ClassificationError {
                        frame: packet.index,
                    });
                }
            },
            (None, _) => {
                return Err(ClassificationError {
                    frame: packet.index,
                });
            }
        };

        match index.get(&key) {
            Some(&i) => flows[i].packets.push(packet),
            None => {
                tracing::debug!(flow = %key, ?kind, "new flow");
                index.insert(key.clone(), flows.len());
                flows.push(Flow {
                    key,
                    kind,
                    packets: vec![packet],
                });
            }
        }
    }

    Ok(flows)
}
