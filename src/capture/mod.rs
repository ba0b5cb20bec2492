//! Capture loading: pcap/pcapng files read through libpcap, decoded into
//! owned [`Packet`]s in capture order.

mod frame;

pub use frame::{decode_frame, Frame};

use anyhow::{Context, Result};
use pcap::Capture;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Link-layer type of the capture, determines how to parse raw frame bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    LinuxSll,
    RawIp,
    /// Wireshark "export PDUs" records: no network-layer header, the
    /// conversation addresses are embedded in the record itself.
    ExportedPdu,
    Other(i32),
}

impl LinkType {
    pub fn from_dlt(dlt: i32) -> Self {
        match dlt {
            1 => LinkType::Ethernet,     // DLT_EN10MB
            12 | 101 => LinkType::RawIp, // DLT_RAW
            113 => LinkType::LinuxSll,   // DLT_LINUX_SLL
            252 => LinkType::ExportedPdu, // DLT_WIRESHARK_UPPER_PDU
            other => LinkType::Other(other),
        }
    }
}

/// Transport endpoints of a TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetInfo {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

/// One captured frame, reduced to what flow reconstruction needs.
#[derive(Debug, Clone)]
pub struct Packet {
    /// 1-based frame number in the capture.
    pub index: u64,
    pub timestamp: SystemTime,
    pub link: LinkType,
    /// Present when the frame carried an IP header with a TCP segment.
    pub net: Option<NetInfo>,
    /// TCP payload, or the whole record for link types without IP.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Capture time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        epoch_millis(self.timestamp)
    }
}

/// Milliseconds since the Unix epoch; times before it clamp to zero.
pub fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct PacketSource {
    cap: Capture<pcap::Offline>,
    link: LinkType,
    index: u64,
}

impl PacketSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        let cap = Capture::from_file(path)
            .context(format!("Failed to open pcap file: {}", path.display()))?;

        let dl = cap.get_datalink();
        let link = LinkType::from_dlt(dl.0);
        if let LinkType::Other(dlt) = link {
            tracing::warn!(
                "unsupported link type {} ({}), frames will not be decoded",
                dl.get_name().unwrap_or_default(),
                dlt
            );
        }
        Ok(PacketSource {
            cap,
            link,
            index: 0,
        })
    }

    /// Read the remaining frames into memory, dropping the ones that cannot
    /// belong to a TCP conversation (ARP, UDP, ...).
    pub fn packets(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        loop {
            let raw = match self.cap.next_packet() {
                Ok(raw) => raw,
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => return Err(e.into()),
            };
            self.index += 1;

            let ts = {
                let tv = raw.header.ts;
                let secs = (tv.tv_sec as i64).max(0) as u64;
                // Clamp to guard against malformed pcap/pcapng files.
                let usec = (tv.tv_usec as i64).clamp(0, 999_999) as u32;
                UNIX_EPOCH + Duration::new(secs, usec * 1000)
            };

            match decode_frame(raw.data, self.link) {
                Frame::Tcp { net, payload } => packets.push(Packet {
                    index: self.index,
                    timestamp: ts,
                    link: self.link,
                    net: Some(net),
                    payload: payload.to_vec(),
                }),
                Frame::Record(data) => packets.push(Packet {
                    index: self.index,
                    timestamp: ts,
                    link: self.link,
                    net: None,
                    payload: data.to_vec(),
                }),
                Frame::Ignored => {
                    tracing::trace!(frame = self.index, "skipping non-TCP frame");
                }
            }
        }
        tracing::debug!(count = packets.len(), "loaded packets");
        Ok(packets)
    }
}
