use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// A frame the controller could not make sense of. The frame is dropped
/// without touching any controller state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("{layer} header truncated: need {need} bytes, got {got}")]
    Truncated {
        layer: &'static str,
        need: usize,
        got: usize,
    },
    #[error("unsupported ARP hardware/protocol pair {htype:#06x}/{ptype:#06x}")]
    UnsupportedArp { htype: u16, ptype: u16 },
    #[error("unknown ARP opcode {0}")]
    UnknownArpOp(u16),
    #[error("IPv4 header carries version {0}")]
    BadIpVersion(u8),
    #[error("IPv4 header length {0} words is invalid")]
    BadIpHeaderLength(u8),
}

/// Problems found while loading or validating the controller configuration.
/// All of these abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config must contain exactly one of [load_balancer] or [policy_switch]")]
    NoApplication,
    #[error("config contains both [load_balancer] and [policy_switch]")]
    BothApplications,
    #[error("round-robin needs at least 2 backends, {0} configured")]
    TooFewBackends(usize),
    #[error("backend {0} is configured more than once")]
    DuplicateBackend(Ipv4Addr),
    #[error("initial backend {0} is not in the backend pool")]
    UnknownBackendReference(Ipv4Addr),
    #[error("hour {0} is outside 0..=23")]
    InvalidHour(u32),
}

/// Failures on the OpenFlow channel to a switch.
#[derive(Debug, Error)]
pub enum OfpError {
    /// Covers both receive and send failures. Sends are never retried; the
    /// session ends instead.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported OpenFlow version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("message length {0} is shorter than the OpenFlow header")]
    BadLength(u16),
    #[error("{0} message truncated")]
    Truncated(&'static str),
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A string that is not six colon-separated hex octets.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid MAC address {0:?}")]
pub struct ParseMacError(pub String);
