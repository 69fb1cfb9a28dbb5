use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::config::{Backend, LoadBalancerConfig};
use crate::error::{ClassifyError, ConfigError, OfpError};
use crate::flow_programmer::{install_balance_flows, send_arp_reply};
use crate::ofp_controller::{CommandSink, OfpApp};
use crate::openflow0x01::PacketIn;
use crate::packet::{Arp, MacAddr, Packet, VlanTag};
use crate::state::RoundRobin;

/// What to do about one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArpDecision {
    /// A client ARP. Route the client to `backend`, then answer with `reply`.
    Balance {
        backend: Backend,
        client_ip: Ipv4Addr,
        reply: Arp,
        dl_dst: MacAddr,
        vlan: Option<VlanTag>,
    },
    /// A backend asking for a client address. Answer only.
    Answer {
        reply: Arp,
        dl_dst: MacAddr,
        vlan: Option<VlanTag>,
    },
    /// Nothing to send.
    Ignore,
}

/// ARP-driven round-robin load balancer for a single virtual service IP.
///
/// Clients resolve the virtual IP through the controller, which answers with
/// the MAC of the next backend in turn and installs the flows rewriting the
/// client's traffic to that backend and the backend's replies back to the
/// virtual IP. The cursor is shared by every switch.
pub struct LoadBalancer {
    virtual_ip: Ipv4Addr,
    backends: Vec<Backend>,
    clients: HashMap<Ipv4Addr, MacAddr>,
    cursor: Mutex<RoundRobin>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> Result<LoadBalancer, ConfigError> {
        let start = config.validate()?;
        let cursor = RoundRobin::new(config.backends.len(), start)
            .ok_or_else(|| {
                ConfigError::UnknownBackendReference(config.initial_backend
                    .unwrap_or(Ipv4Addr::UNSPECIFIED))
            })?;
        Ok(LoadBalancer {
            virtual_ip: config.virtual_ip,
            clients: config.clients.iter().map(|c| (c.ip, c.mac)).collect(),
            backends: config.backends,
            cursor: Mutex::new(cursor),
        })
    }

    fn lock_cursor(&self) -> MutexGuard<RoundRobin> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the round-robin cursor.
    pub fn cursor(&self) -> RoundRobin {
        *self.lock_cursor()
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    fn is_backend(&self, ip: Ipv4Addr) -> bool {
        self.backends.iter().any(|b| b.ip == ip)
    }

    /// Classify `frame` and decide the ARP answer. Only client ARPs move the
    /// cursor; a frame that fails to classify leaves it untouched.
    pub fn decide(&self, frame: &[u8]) -> Result<ArpDecision, ClassifyError> {
        let pkt = Packet::parse(frame)?;
        let arp = match pkt.arp() {
            Some(arp) => *arp,
            None => {
                debug!("ignoring non-ARP frame from {}", pkt.dl_src);
                return Ok(ArpDecision::Ignore);
            }
        };
        if self.is_backend(arp.sender_ip) {
            return Ok(match self.clients.get(&arp.target_ip) {
                Some(&mac) => {
                    ArpDecision::Answer {
                        reply: arp.reply(mac, pkt.dl_src),
                        dl_dst: pkt.dl_src,
                        vlan: pkt.vlan,
                    }
                }
                None => {
                    warn!("backend {} asked for unknown address {}",
                          arp.sender_ip,
                          arp.target_ip);
                    ArpDecision::Ignore
                }
            });
        }
        let assignment = self.lock_cursor().advance();
        let backend = self.backends[assignment.flow];
        let answer = self.backends[assignment.reply].mac;
        info!("client {} ({}) assigned to backend {}",
              arp.sender_ip,
              pkt.dl_src,
              backend.ip);
        Ok(ArpDecision::Balance {
            backend: backend,
            client_ip: arp.sender_ip,
            reply: arp.reply(answer, pkt.dl_src),
            dl_dst: pkt.dl_src,
            vlan: pkt.vlan,
        })
    }
}

impl OfpApp for LoadBalancer {
    fn packet_in(&self, sw: u64, pkt: &PacketIn, sink: &mut dyn CommandSink) -> Result<(), OfpError> {
        let decision = match self.decide(pkt.input_payload.data()) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("switch {:#x} port {}: dropping frame: {}", sw, pkt.port, e);
                return Ok(());
            }
        };
        match decision {
            ArpDecision::Balance { backend, client_ip, reply, dl_dst, vlan } => {
                install_balance_flows(sink, sw, self.virtual_ip, &backend, client_ip, pkt.port)?;
                send_arp_reply(sink, sw, pkt.port, &reply, dl_dst, vlan)
            }
            ArpDecision::Answer { reply, dl_dst, vlan } => {
                send_arp_reply(sink, sw, pkt.port, &reply, dl_dst, vlan)
            }
            ArpDecision::Ignore => Ok(()),
        }
    }
}
