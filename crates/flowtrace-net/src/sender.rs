//! The raw-socket sender half of component C3.
//!
//! One socket is opened per address family per transport, as required by
//! `spec.md` §4.3. A partial write is retried up to 3 times before the probe
//! is failed with [`NetError::SendFailed`].

use crate::error::{NetError, Result};
use flowtrace_packet::{Address, Family};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::IpAddr;
use std::time::Instant;

const MAX_SEND_RETRIES: u8 = 3;

/// A raw socket used to transmit assembled probe packets.
pub struct RawSender {
    socket: Socket,
    family: Family,
    /// `true` for IPv4 sockets where we supply our own IP header
    /// (`IP_HDRINCL`); IPv6 raw sockets never include the IP header
    /// themselves, the kernel always writes it.
    includes_ip_header: bool,
}

impl RawSender {
    /// Open a raw socket for `family` carrying IP protocol number `protocol`.
    pub fn new(family: Family, protocol: i32) -> Result<Self> {
        let domain = match family {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(protocol)))
            .map_err(NetError::from_socket_io)?;
        let includes_ip_header = family == Family::V4;
        if includes_ip_header {
            socket.set_header_included_v4(true)?;
        }
        Ok(Self {
            socket,
            family,
            includes_ip_header,
        })
    }

    /// Send `bytes` (the full assembled packet) to `dest`, retrying a
    /// partial write up to [`MAX_SEND_RETRIES`] times. Returns the monotonic
    /// send timestamp recorded immediately after the successful write.
    pub fn send(&self, dest: IpAddr, bytes: &[u8]) -> Result<Instant> {
        let payload: &[u8] = if self.includes_ip_header {
            bytes
        } else {
            // The kernel writes the IPv6 header itself; skip our own.
            &bytes[40..]
        };
        let target = SockAddr::from(std::net::SocketAddr::new(dest, 0));
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.socket.send_to(payload, &target) {
                Ok(written) if written == payload.len() => return Ok(Instant::now()),
                Ok(_) if attempts < MAX_SEND_RETRIES => continue,
                Ok(written) => {
                    return Err(NetError::SendFailed {
                        addr: dest,
                        attempts,
                        source: std::io::Error::other(format!(
                            "short write: wrote {written} of {} bytes",
                            payload.len()
                        )),
                    })
                }
                Err(e) if attempts < MAX_SEND_RETRIES => {
                    tracing::debug!(attempt = attempts, error = %e, "retrying probe send");
                    continue;
                }
                Err(e) => {
                    return Err(NetError::SendFailed {
                        addr: dest,
                        attempts,
                        source: e,
                    })
                }
            }
        }
    }

    pub fn set_ttl(&self, ttl: u8) -> Result<()> {
        match self.family {
            Family::V4 => self.socket.set_ttl(u32::from(ttl))?,
            Family::V6 => self.socket.set_unicast_hops_v6(u32::from(ttl))?,
        }
        Ok(())
    }

    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }
}

#[must_use]
pub fn addr_family(addr: IpAddr) -> Family {
    match Address::from(addr) {
        Address::V4(_) => Family::V4,
        Address::V6(_) => Family::V6,
    }
}
