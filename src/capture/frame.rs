use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use std::net::{IpAddr, SocketAddr};

use super::{LinkType, NetInfo};

/// What a single captured frame turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// IP + TCP segment.
    Tcp { net: NetInfo, payload: &'a [u8] },
    /// A frame without a network-layer header; the whole frame is kept.
    Record(&'a [u8]),
    /// Link chatter or non-TCP traffic.
    Ignored,
}

/// Decode raw frame bytes according to the capture's link type.
pub fn decode_frame(data: &[u8], link_type: LinkType) -> Frame<'_> {
    let sliced = match link_type {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data).ok(),
        LinkType::RawIp => SlicedPacket::from_ip(data).ok(),
        LinkType::LinuxSll => {
            // Linux cooked capture v1: 16-byte header, then IP packet
            if data.len() < 16 {
                return Frame::Ignored;
            }
            SlicedPacket::from_ip(&data[16..]).ok()
        }
        LinkType::ExportedPdu | LinkType::Other(_) => return Frame::Record(data),
    };
    let Some(sliced) = sliced else {
        return Frame::Ignored;
    };

    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return Frame::Ignored,
    };

    match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => Frame::Tcp {
            net: NetInfo {
                src: SocketAddr::new(src_ip, tcp.source_port()),
                dst: SocketAddr::new(dst_ip, tcp.destination_port()),
            },
            payload: tcp.payload(),
        },
        _ => Frame::Ignored,
    }
}
