//! The raw ICMP sniffer half of component C3: one socket per address family,
//! draining pending datagrams whenever the event loop dispatches I/O.

use crate::error::{NetError, Result};
use flowtrace_packet::probe::{MatchingKey, Reply, ReplyClassification};
use flowtrace_packet::{Address, Family};
use nix::sys::socket::{recvfrom, SockaddrStorage};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::IpAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::SystemTime;

/// Which kind of reply a [`RawSniffer`] demultiplexes: routers' ICMP
/// Time-Exceeded/Destination-Unreachable and destination echo replies, or a
/// destination's direct TCP reset/syn-ack (ICMP and TCP never share a raw
/// socket, so a traceroute instance using TCP opens one of each).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnifferKind {
    Icmp,
    Tcp,
}

/// A raw socket demultiplexing replies back to [`Reply`] values: either ICMP
/// (Time-Exceeded, Destination-Unreachable, echo reply) or TCP (reset,
/// syn-ack), one address family per instance.
pub struct RawSniffer {
    socket: Socket,
    family: Family,
    kind: SnifferKind,
    buf: Vec<u8>,
}

impl RawSniffer {
    pub fn new(family: Family) -> Result<Self> {
        let (domain, protocol) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket =
            Socket::new(domain, Type::RAW, Some(protocol)).map_err(NetError::from_socket_io)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            family,
            kind: SnifferKind::Icmp,
            buf: vec![0_u8; 2048],
        })
    }

    /// Open a raw TCP sniffer, used alongside a TCP [`crate::sender::RawSender`]
    /// to catch the destination's reset or syn-ack directly (routers never
    /// answer a TCP probe with anything but an ICMP Time-Exceeded, which
    /// still arrives on the ICMP sniffer for the same family).
    pub fn new_tcp(family: Family) -> Result<Self> {
        let domain = match family {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::RAW, Some(Protocol::TCP)).map_err(NetError::from_socket_io)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            family,
            kind: SnifferKind::Tcp,
            buf: vec![0_u8; 2048],
        })
    }

    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Borrow the socket's file descriptor for readiness polling
    /// (`nix::poll`), without transferring ownership or resorting to
    /// `unsafe` raw-fd reconstruction.
    #[must_use]
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    /// Drain every pending datagram, calling `on_reply` for each one that
    /// parses into a valid candidate [`Reply`] with a [`MatchingKey`].
    ///
    /// Unparseable or unrecognised datagrams are silently dropped after a
    /// debug-level log, per §4.2's collision/drop policy.
    pub fn drain(&mut self, mut on_reply: impl FnMut(Reply)) -> Result<usize> {
        let mut drained = 0;
        let fd = self.socket.as_raw_fd();
        loop {
            match recvfrom::<SockaddrStorage>(fd, &mut self.buf) {
                Ok((n, from)) => {
                    drained += 1;
                    let received = SystemTime::now();
                    let responder = from.as_ref().and_then(responder_of);
                    let parsed = responder.and_then(|r| match self.kind {
                        SnifferKind::Icmp => parse_reply(self.family, r, &self.buf[..n], received),
                        SnifferKind::Tcp => parse_tcp_reply(self.family, r, &self.buf[..n], received),
                    });
                    if let Some(reply) = parsed {
                        on_reply(reply);
                    } else {
                        tracing::debug!(bytes = n, kind = ?self.kind, "dropped unrecognised datagram");
                    }
                }
                Err(nix::errno::Errno::EWOULDBLOCK) => break,
                Err(e) => return Err(NetError::Io(std::io::Error::from(e))),
            }
        }
        Ok(drained)
    }
}

/// Recover the responder's address from the socket layer's `recvfrom` peer
/// address rather than guessing it from quoted packet bytes, which is not
/// always present (IPv6 delivers no outer header on a raw socket at all).
fn responder_of(addr: &SockaddrStorage) -> Option<Address> {
    if let Some(v4) = addr.as_sockaddr_in() {
        Some(Address::from(v4.ip()))
    } else if let Some(v6) = addr.as_sockaddr_in6() {
        Some(Address::from(v6.ip()))
    } else {
        None
    }
}

/// Parse one raw-socket frame (outer IP header included for v4, omitted for
/// v6 per the platform's raw-socket convention) into a candidate [`Reply`].
fn parse_reply(family: Family, responder: Address, frame: &[u8], received: SystemTime) -> Option<Reply> {
    match family {
        Family::V4 => parse_reply_v4(responder, frame, received),
        Family::V6 => parse_reply_v6(responder, frame, received),
    }
}

fn parse_reply_v4(responder: Address, frame: &[u8], received: SystemTime) -> Option<Reply> {
    if frame.len() < 20 {
        return None;
    }
    let ihl = usize::from(frame[0] & 0x0F) * 4;
    let icmp = &frame[ihl..];
    parse_icmp(Family::V4, responder, icmp, received)
}

fn parse_reply_v6(responder: Address, frame: &[u8], received: SystemTime) -> Option<Reply> {
    // The kernel does not deliver the IPv6 header on a raw ICMPv6 socket;
    // `frame` starts at the ICMPv6 header.
    parse_icmp(Family::V6, responder, frame, received)
}

fn parse_icmp(family: Family, responder: Address, icmp: &[u8], received: SystemTime) -> Option<Reply> {
    if icmp.len() < 8 {
        return None;
    }
    let icmp_type = icmp[0];
    let icmp_code = icmp[1];
    match family {
        Family::V4 => match icmp_type {
            11 => {
                // Time Exceeded: quoted packet starts at byte 8.
                let key = MatchingKey::from_quoted_ipv4(&icmp[8..])?;
                Some(Reply::new(
                    responder,
                    ReplyClassification::TimeExceeded,
                    received,
                    key,
                ))
            }
            3 if icmp_code == 3 => {
                let key = MatchingKey::from_quoted_ipv4(&icmp[8..])?;
                Some(Reply::new(
                    responder,
                    ReplyClassification::DestinationUnreachablePort,
                    received,
                    key,
                ))
            }
            0 => {
                // Echo reply: no quoted packet. The destination copies the
                // identifier and sequence back verbatim, so the key is
                // synthesised from those rather than read from a quoted
                // header.
                let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
                let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
                let key = MatchingKey::from_icmp_echo_reply(family, identifier, sequence);
                Some(Reply::new(responder, ReplyClassification::EchoReply, received, key))
            }
            _ => None,
        },
        Family::V6 => match icmp_type {
            3 => {
                let key = MatchingKey::from_quoted_ipv6(&icmp[8..])?;
                Some(Reply::new(
                    responder,
                    ReplyClassification::TimeExceeded,
                    received,
                    key,
                ))
            }
            1 if icmp_code == 4 => {
                let key = MatchingKey::from_quoted_ipv6(&icmp[8..])?;
                Some(Reply::new(
                    responder,
                    ReplyClassification::DestinationUnreachablePort,
                    received,
                    key,
                ))
            }
            129 => {
                let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
                let sequence = u16::from_be_bytes([icmp[6], icmp[7]]);
                let key = MatchingKey::from_icmp_echo_reply(family, identifier, sequence);
                Some(Reply::new(responder, ReplyClassification::EchoReply, received, key))
            }
            _ => None,
        },
    }
}

/// Parse one raw TCP frame (outer IP header included for v4, omitted for v6)
/// into a candidate [`Reply`], recognising only a reset or syn-ack — the
/// destination's two ways of answering a TCP probe directly. Anything else
/// (a data segment from an unrelated connection sharing the raw socket) is
/// dropped.
fn parse_tcp_reply(family: Family, responder: Address, frame: &[u8], received: SystemTime) -> Option<Reply> {
    let tcp = match family {
        Family::V4 => {
            if frame.len() < 20 {
                return None;
            }
            let ihl = usize::from(frame[0] & 0x0F) * 4;
            if frame.len() < ihl + 20 {
                return None;
            }
            &frame[ihl..]
        }
        Family::V6 => frame,
    };
    if tcp.len() < 20 {
        return None;
    }
    const FLAG_SYN: u8 = 0x02;
    const FLAG_RST: u8 = 0x04;
    const FLAG_ACK: u8 = 0x10;
    let flags = tcp[13];
    let is_reset = flags & FLAG_RST != 0;
    let is_syn_ack = flags & FLAG_SYN != 0 && flags & FLAG_ACK != 0;
    if !is_reset && !is_syn_ack {
        return None;
    }
    let reply_src_port = u16::from_be_bytes([tcp[0], tcp[1]]);
    let reply_dst_port = u16::from_be_bytes([tcp[2], tcp[3]]);
    let ack = u32::from_be_bytes([tcp[8], tcp[9], tcp[10], tcp[11]]);
    let flow_id = ack.wrapping_sub(1) as u16;
    // the reply's source/destination ports are the probe's swapped back.
    let key = MatchingKey::from_tcp_reply(family, reply_dst_port, reply_src_port, flow_id);
    Some(Reply::new(responder, ReplyClassification::TcpResetOrSynAck, received, key))
}

#[must_use]
pub fn addr_family(addr: IpAddr) -> Family {
    match addr {
        IpAddr::V4(_) => Family::V4,
        IpAddr::V6(_) => Family::V6,
    }
}
