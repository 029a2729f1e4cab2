//! DNS resolution against a pinned recursive resolver.
//!
//! Lookups go straight to 1.1.1.1:53 over UDP so probe timing does not vary
//! with the local resolver configuration. If the pinned resolver cannot be
//! reached or returns no address, the system resolver is used instead.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ProbeError;

/// The recursive resolver every lookup is sent to.
pub const RESOLVER_ADDR: &str = "1.1.1.1:53";

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Resolve `host` to a socket address. IP literals short-circuit without
/// any network traffic.
pub fn resolve(host: &str, port: u16, timeout: Duration) -> Result<SocketAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    match lookup_a(host, timeout) {
        Ok(ip) => Ok(SocketAddr::new(IpAddr::V4(ip), port)),
        Err(err) => {
            tracing::debug!(host, error = %err, "pinned resolver failed, using system resolver");
            let mut addrs = (host, port)
                .to_socket_addrs()
                .map_err(|err| ProbeError::Dns {
                    host: host.to_string(),
                    reason: err.to_string(),
                })?;
            addrs.next().ok_or_else(|| ProbeError::Dns {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            })
        }
    }
}

fn lookup_a(host: &str, timeout: Duration) -> Result<Ipv4Addr, ProbeError> {
    let dns_err = |reason: &str| ProbeError::Dns {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;

    let id = query_id();
    let query = encode_query(id, host).ok_or_else(|| dns_err("name does not fit in a query"))?;
    socket.send_to(&query, RESOLVER_ADDR)?;

    let mut buf = [0u8; 1500];
    let (n, _) = socket.recv_from(&mut buf)?;
    parse_answer(id, &buf[..n]).ok_or_else(|| dns_err("no A record in answer"))
}

/// Transaction ids only need to distinguish in-flight queries on one socket.
fn query_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u16) ^ (std::process::id() as u16)
}

/// Build a single-question recursive query for an A record.
fn encode_query(id: u16, host: &str) -> Option<Vec<u8>> {
    let mut pkt = Vec::with_capacity(32 + host.len());
    pkt.extend_from_slice(&id.to_be_bytes());
    pkt.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    pkt.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    pkt.extend_from_slice(&[0; 6]); // AN/NS/AR counts

    for label in host.trim_end_matches('.').split('.') {
        if label.is_empty() || label.len() > 63 {
            return None;
        }
        pkt.push(label.len() as u8);
        pkt.extend_from_slice(label.as_bytes());
    }
    pkt.push(0);
    pkt.extend_from_slice(&TYPE_A.to_be_bytes());
    pkt.extend_from_slice(&CLASS_IN.to_be_bytes());
    Some(pkt)
}

/// Pull the first A record out of a response packet. CNAME chains are
/// handled implicitly: the resolver appends the terminal A records and we
/// scan every answer.
fn parse_answer(id: u16, pkt: &[u8]) -> Option<Ipv4Addr> {
    if pkt.len() < 12 {
        return None;
    }
    if u16::from_be_bytes([pkt[0], pkt[1]]) != id {
        return None;
    }
    let flags = u16::from_be_bytes([pkt[2], pkt[3]]);
    if flags & 0x000f != 0 {
        return None; // non-zero RCODE
    }
    let qdcount = u16::from_be_bytes([pkt[4], pkt[5]]);
    let ancount = u16::from_be_bytes([pkt[6], pkt[7]]);

    let mut pos = 12;
    for _ in 0..qdcount {
        pos = skip_name(pkt, pos)?;
        pos = pos.checked_add(4)?; // QTYPE + QCLASS
    }

    for _ in 0..ancount {
        pos = skip_name(pkt, pos)?;
        if pos + 10 > pkt.len() {
            return None;
        }
        let rtype = u16::from_be_bytes([pkt[pos], pkt[pos + 1]]);
        let rdlen = u16::from_be_bytes([pkt[pos + 8], pkt[pos + 9]]) as usize;
        pos += 10;
        if pos + rdlen > pkt.len() {
            return None;
        }
        if rtype == TYPE_A && rdlen == 4 {
            return Some(Ipv4Addr::new(
                pkt[pos],
                pkt[pos + 1],
                pkt[pos + 2],
                pkt[pos + 3],
            ));
        }
        pos += rdlen;
    }
    None
}

/// Skip an encoded name, compressed or not, returning the offset just past it.
fn skip_name(pkt: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *pkt.get(pos)?;
        if len & 0xc0 == 0xc0 {
            return Some(pos + 2); // compression pointer ends the name
        }
        if len == 0 {
            return Some(pos + 1);
        }
        pos = pos + 1 + len as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_literals_bypass_lookup() {
        let addr = resolve("127.0.0.1", 8080, Duration::from_secs(1)).unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());

        let addr = resolve("::1", 80, Duration::from_secs(1)).unwrap();
        assert_eq!(addr.port(), 80);
        assert!(addr.is_ipv6());
    }

    #[test]
    fn query_layout() {
        let pkt = encode_query(0xbeef, "example.com").unwrap();
        assert_eq!(&pkt[..2], &[0xbe, 0xef]);
        assert_eq!(&pkt[2..4], &[0x01, 0x00]);
        // 12-byte header, then 7"example" 3"com" 0, qtype, qclass
        assert_eq!(pkt[12], 7);
        assert_eq!(&pkt[13..20], b"example");
        assert_eq!(pkt[20], 3);
        assert_eq!(&pkt[21..24], b"com");
        assert_eq!(pkt[24], 0);
        assert_eq!(&pkt[25..29], &[0, 1, 0, 1]);
    }

    #[test]
    fn rejects_oversized_labels() {
        let label = "a".repeat(64);
        assert!(encode_query(1, &label).is_none());
        assert!(encode_query(1, "with..empty").is_none());
    }

    #[test]
    fn parses_answer_with_cname() {
        // Header: id 1, response flags, 1 question, 2 answers.
        let mut pkt = vec![0x00, 0x01, 0x81, 0x80, 0, 1, 0, 2, 0, 0, 0, 0];
        // Question: x.test A IN
        pkt.extend_from_slice(&[1, b'x', 4, b't', b'e', b's', b't', 0, 0, 1, 0, 1]);
        // Answer 1: pointer to name, CNAME, rdlen 2, pointer rdata.
        pkt.extend_from_slice(&[0xc0, 12, 0, 5, 0, 1, 0, 0, 0, 60, 0, 2, 0xc0, 12]);
        // Answer 2: pointer to name, A, rdlen 4, 10.0.0.7.
        pkt.extend_from_slice(&[0xc0, 12, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 10, 0, 0, 7]);

        assert_eq!(parse_answer(1, &pkt), Some(Ipv4Addr::new(10, 0, 0, 7)));
        // Wrong transaction id is ignored.
        assert_eq!(parse_answer(2, &pkt), None);
    }
}
