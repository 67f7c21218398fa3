use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::time::Duration;

use colored::*;
use rand::random;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;

use crate::packet::{self, Classification, PAYLOAD_SIZE};
use crate::stats::SessionStats;
use crate::timing::{self, RttSample, Timestamp};

/// Fixed number of echo requests per session.
pub const PACKET_COUNT: u32 = 5;

/// Watchdog window for each blocking receive.
pub const WAIT: Duration = Duration::from_secs(6);

// Large enough for any IP datagram we can receive
const MAX_DATAGRAM: usize = 4096;

// Receive buffer hint passed to the socket at setup, best effort
const RECV_BUFFER_SIZE: usize = 65507;

#[derive(Debug, Error)]
pub enum PingError {
    #[error("raw ICMP sockets require root privileges")]
    MissingPrivilege,
    #[error("could not resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("could not open raw ICMP socket: {0}")]
    Socket(#[source] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// The raw-socket surface the session loop needs. Kept narrow so tests can
/// drive the loop with a scripted transport.
pub trait Transport {
    fn send_to(&self, buf: &[u8], addr: &SockAddr) -> io::Result<usize>;
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SockAddr)>;
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

pub struct RawTransport {
    socket: Socket,
}

impl RawTransport {
    pub fn open() -> Result<RawTransport, PingError> {
        let socket = Socket::new(Domain::ipv4(), Type::raw().cloexec(), Some(Protocol::icmpv4()))
            .map_err(PingError::Socket)?;

        if let Err(err) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            tracing::debug!("receive buffer hint rejected: {}", err);
        }

        Ok(RawTransport { socket })
    }
}

impl Transport for RawTransport {
    fn send_to(&self, buf: &[u8], addr: &SockAddr) -> io::Result<usize> {
        self.socket.send_to(buf, addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SockAddr)> {
        self.socket.recv_from(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }
}

/// A matched echo reply, ready for its per-packet line.
struct Pong {
    source: IpAddr,
    sequence: u16,
    ttl: u8,
    byte_len: usize,
    rtt: RttSample,
}

pub struct Pinger<T: Transport> {
    transport: T,
    dest: SockAddr,
    dest_ip: Ipv4Addr,
    identifier: u16, // lower half of the pid tags this session's packets
    sequence: u16,
    payload: [u8; PAYLOAD_SIZE],
}

impl<T: Transport> Pinger<T> {
    pub fn new(transport: T, dest_ip: Ipv4Addr) -> Pinger<T> {
        Pinger {
            transport,
            dest: SockAddr::from(SocketAddr::from((dest_ip, 0))),
            dest_ip,
            identifier: process::id() as u16,
            sequence: 0,
            payload: random(),
        }
    }

    /// Drive the fixed-count send/receive cycle, printing one line per
    /// packet and filling `stats` for the final report.
    pub fn run(&mut self, stats: &mut SessionStats) -> Result<(), PingError> {
        while stats.transmitted() < PACKET_COUNT {
            let send_time = self.send_echo()?;
            stats.record_sent();

            match self.await_reply(send_time)? {
                Some(pong) => {
                    stats.record_reply(pong.rtt.as_millis());
                    println!(
                        "{} bytes from {}: icmp_seq={} ttl={} time={} ms",
                        pong.byte_len,
                        pong.source.to_string().yellow(),
                        pong.sequence.to_string().bold(),
                        pong.ttl.to_string().bold(),
                        format!("{:.2}", pong.rtt.as_millis()).bold()
                    );
                }
                None => {
                    println!("{} icmp_seq={}", "Request timed out:".red(), self.sequence);
                }
            }
        }

        Ok(())
    }

    fn send_echo(&mut self) -> Result<Timestamp, PingError> {
        self.sequence += 1; // Each new request takes the next sequence number
        let request = packet::build_echo_request(self.identifier, self.sequence, &self.payload);

        let send_time = Timestamp::now();
        self.transport.send_to(&request, &self.dest)?;
        tracing::trace!("echo request sent, sequence {}", self.sequence);

        Ok(send_time)
    }

    /// Block until a datagram matches this session or the watchdog fires.
    /// Foreign and malformed datagrams are absorbed here; they never
    /// consume the packet budget.
    fn await_reply(&self, send_time: Timestamp) -> Result<Option<Pong>, PingError> {
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            // Fresh watchdog for every blocking receive
            self.transport.set_read_timeout(Some(WAIT))?;

            let (received, from) = match self.transport.recv_from(&mut buf) {
                Ok(ok) => ok,
                Err(err) if watchdog_fired(&err) => return Ok(None),
                Err(err) => return Err(PingError::Transport(err)),
            };

            match packet::parse_reply(&buf[..received], self.identifier) {
                Classification::Matched { sequence, ttl, byte_len } => {
                    let rtt = timing::elapsed(send_time, Timestamp::now());
                    let source = from
                        .as_std()
                        .map_or(IpAddr::V4(self.dest_ip), |addr| addr.ip());

                    return Ok(Some(Pong { source, sequence, ttl, byte_len, rtt }));
                }
                Classification::Ignored | Classification::Malformed => continue,
            }
        }
    }
}

fn watchdog_fired(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::packet::ECHO_REPLY;

    /// What the mock hands back on the next `recv_from` call.
    #[derive(Clone, Copy)]
    enum Recv {
        /// Echo the most recent request back as a reply.
        ReplyToLastSend,
        /// A reply carrying somebody else's identifier.
        Foreign,
        /// Nothing arrives within the watchdog window.
        TimeOut,
        /// A datagram too short to hold an ICMP header.
        Truncated,
        /// The transport breaks.
        Fail,
    }

    struct MockTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        script: Mutex<VecDeque<Recv>>,
        fail_send: bool,
    }

    impl MockTransport {
        fn new(script: Vec<Recv>) -> MockTransport {
            MockTransport {
                sent: Mutex::new(vec![]),
                script: Mutex::new(script.into_iter().collect()),
                fail_send: false,
            }
        }

        fn with_failing_send() -> MockTransport {
            MockTransport {
                fail_send: true,
                ..MockTransport::new(vec![])
            }
        }
    }

    fn loopback() -> SockAddr {
        SockAddr::from(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }

    // A reply datagram the way the kernel would deliver it: 20 byte IP
    // header in front of the echoed request with the type flipped.
    fn reply_datagram(request: &[u8], identifier_override: Option<u16>) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = ECHO_REPLY;
        if let Some(ident) = identifier_override {
            icmp[4..6].copy_from_slice(&ident.to_be_bytes());
        }
        icmp[2..4].copy_from_slice(&[0, 0]);
        crate::util::write_checksum(&mut icmp);

        let mut datagram = vec![0u8; 20];
        datagram[0] = 0x45;
        datagram[2..4].copy_from_slice(&((20 + icmp.len()) as u16).to_be_bytes());
        datagram[8] = 64; // ttl
        datagram[9] = 1; // ICMP
        datagram[12..16].copy_from_slice(&[127, 0, 0, 1]);
        datagram.extend_from_slice(&icmp);
        datagram
    }

    impl Transport for MockTransport {
        fn send_to(&self, buf: &[u8], _addr: &SockAddr) -> io::Result<usize> {
            if self.fail_send {
                return Err(io::Error::new(io::ErrorKind::Other, "send failed in mock"));
            }
            self.sent.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SockAddr)> {
            let action = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Recv::TimeOut);

            let datagram = match action {
                Recv::TimeOut => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "watchdog expired in mock",
                    ));
                }
                Recv::Fail => {
                    return Err(io::Error::new(io::ErrorKind::Other, "receive failed in mock"));
                }
                Recv::ReplyToLastSend => {
                    let sent = self.sent.lock().unwrap();
                    reply_datagram(sent.last().expect("no request sent yet"), None)
                }
                Recv::Foreign => {
                    let sent = self.sent.lock().unwrap();
                    let request = sent.last().expect("no request sent yet");
                    let ident = u16::from_be_bytes([request[4], request[5]]);
                    reply_datagram(request, Some(!ident))
                }
                Recv::Truncated => vec![0x45, 0, 0, 24],
            };

            buf[..datagram.len()].copy_from_slice(&datagram);
            Ok((datagram.len(), loopback()))
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn pinger_with(script: Vec<Recv>) -> Pinger<MockTransport> {
        Pinger::new(MockTransport::new(script), Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn all_replies_received() {
        let mut pinger = pinger_with(vec![Recv::ReplyToLastSend; 5]);
        let mut stats = SessionStats::new();

        pinger.run(&mut stats).unwrap();

        assert_eq!(5, stats.transmitted());
        assert_eq!(5, stats.received());
        assert_eq!(0, stats.loss_percent());
    }

    #[test]
    fn dropped_packets_count_against_loss() {
        let mut pinger = pinger_with(vec![
            Recv::ReplyToLastSend,
            Recv::TimeOut,
            Recv::ReplyToLastSend,
            Recv::TimeOut,
            Recv::ReplyToLastSend,
        ]);
        let mut stats = SessionStats::new();

        pinger.run(&mut stats).unwrap();

        assert_eq!(5, stats.transmitted());
        assert_eq!(3, stats.received());
        assert_eq!(40, stats.loss_percent());
    }

    #[test]
    fn foreign_traffic_does_not_consume_the_budget() {
        // The first exchange wades through a foreign reply and a truncated
        // datagram before the real reply arrives.
        let mut pinger = pinger_with(vec![
            Recv::Foreign,
            Recv::Truncated,
            Recv::ReplyToLastSend,
            Recv::ReplyToLastSend,
            Recv::ReplyToLastSend,
            Recv::ReplyToLastSend,
            Recv::ReplyToLastSend,
        ]);
        let mut stats = SessionStats::new();

        pinger.run(&mut stats).unwrap();

        assert_eq!(5, stats.transmitted());
        assert_eq!(5, stats.received());
        assert_eq!(5, pinger.transport.sent.lock().unwrap().len());
    }

    #[test]
    fn sequence_numbers_start_at_one() {
        let mut pinger = pinger_with(vec![Recv::ReplyToLastSend; 5]);
        let mut stats = SessionStats::new();

        pinger.run(&mut stats).unwrap();

        let sent = pinger.transport.sent.lock().unwrap();
        let sequences: Vec<u16> = sent
            .iter()
            .map(|request| u16::from_be_bytes([request[6], request[7]]))
            .collect();
        assert_eq!(vec![1, 2, 3, 4, 5], sequences);
    }

    #[test]
    fn send_failure_is_fatal() {
        let mut pinger = Pinger::new(MockTransport::with_failing_send(), Ipv4Addr::LOCALHOST);
        let mut stats = SessionStats::new();

        assert!(matches!(pinger.run(&mut stats), Err(PingError::Transport(_))));
        assert_eq!(0, stats.transmitted());
    }

    #[test]
    fn receive_failure_is_fatal() {
        let mut pinger = pinger_with(vec![Recv::Fail]);
        let mut stats = SessionStats::new();

        assert!(matches!(pinger.run(&mut stats), Err(PingError::Transport(_))));
        // The request went out before the transport died.
        assert_eq!(1, stats.transmitted());
    }
}
