use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{AdmissionRule, PolicySwitchConfig};
use crate::error::{ClassifyError, ConfigError, OfpError};
use crate::flow_programmer::send_frame;
use crate::ofp_controller::{CommandSink, OfpApp};
use crate::openflow0x01::{Action, PacketIn, PseudoPort};
use crate::packet::{EthernetHeader, MacAddr};
use crate::state::LearningTable;

/// L2 learning switch with static admission rules.
///
/// Every frame is decided on its own and released with a PACKET_OUT; no
/// flows are installed, so every frame keeps coming to the controller and
/// every frame is checked against the rules.
pub struct PolicySwitch {
    rules: Vec<AdmissionRule>,
    table: Mutex<LearningTable>,
    clock: Arc<dyn Clock>,
}

impl PolicySwitch {
    pub fn new(config: PolicySwitchConfig, clock: Arc<dyn Clock>) -> Result<PolicySwitch, ConfigError> {
        config.validate()?;
        Ok(PolicySwitch {
            table: Mutex::new(LearningTable::new(config.mac_ttl_secs.map(Duration::from_secs))),
            rules: config.rules,
            clock: clock,
        })
    }

    /// The port `mac` is currently learned on at switch `sw`.
    pub fn learned_port(&self, sw: u64, mac: MacAddr) -> Option<u16> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .port_of(sw, mac, Instant::now())
    }

    /// Overlay the admission rules on `forward`. Rules are checked in order
    /// and the last matching one decides; the clock is read only when a
    /// time-gated rule matches.
    pub fn admit(&self, src: MacAddr, dst: MacAddr, forward: Vec<Action>) -> Vec<Action> {
        let mut actions = forward.clone();
        for rule in self.rules.iter().filter(|r| r.matches(src, dst)) {
            let allowed = match rule.valid_hours {
                None => false,
                Some(ref hours) => hours.contains(&self.clock.current_hour()),
            };
            actions = if allowed { forward.clone() } else { vec![] };
        }
        if actions.is_empty() {
            info!("dropping {} -> {} by admission rule", src, dst);
        }
        actions
    }

    /// Learn the source of `frame`, pick its output, and apply the rules.
    /// Only the Ethernet header is read; whatever it carries is forwarded
    /// as is.
    pub fn decide(&self, sw: u64, in_port: u16, frame: &[u8], now: Instant)
                  -> Result<Vec<Action>, ClassifyError> {
        let (eth, _) = EthernetHeader::parse(frame)?;
        let (src, dst) = (eth.dl_src, eth.dl_dst);
        info!("packet in {:#x} {} {} {}", sw, src, dst, in_port);

        let out_port = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(old) = table.learn(sw, src, in_port, now) {
                debug!("{} moved from port {} to {}", src, old, in_port);
            }
            table.port_of(sw, dst, now)
        };
        let forward = match out_port {
            Some(p) => vec![Action::Output(PseudoPort::PhysicalPort(p))],
            None => {
                debug!("flooding to {}", dst);
                vec![Action::Output(PseudoPort::Flood)]
            }
        };
        Ok(self.admit(src, dst, forward))
    }
}

impl OfpApp for PolicySwitch {
    fn packet_in(&self, sw: u64, pkt: &PacketIn, sink: &mut dyn CommandSink) -> Result<(), OfpError> {
        match self.decide(sw, pkt.port, pkt.input_payload.data(), Instant::now()) {
            Ok(actions) => send_frame(sink, sw, pkt.port, pkt.input_payload.clone(), actions),
            Err(e) => {
                warn!("switch {:#x} port {}: dropping frame: {}", sw, pkt.port, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0, 0, 0, 0, 0, last])
    }

    fn frame(src: u8, dst: u8) -> Vec<u8> {
        let mut buf = vec![0, 0, 0, 0, 0, dst, 0, 0, 0, 0, 0, src, 0x88, 0xb5];
        buf.extend_from_slice(&[0; 46]);
        buf
    }

    fn switch(hour: u32) -> PolicySwitch {
        let config = PolicySwitchConfig {
            mac_ttl_secs: None,
            rules: vec![AdmissionRule {
                            src: mac(1),
                            dst: vec![mac(0x19), mac(0x1a), mac(0x1b)],
                            valid_hours: None,
                        },
                        AdmissionRule {
                            src: mac(2),
                            dst: vec![mac(0x16), mac(0x17), mac(0x18)],
                            valid_hours: Some(vec![10, 14, 15].into_iter().collect()),
                        }],
        };
        PolicySwitch::new(config, Arc::new(FixedClock(hour))).unwrap()
    }

    fn out(port: u16) -> Vec<Action> {
        vec![Action::Output(PseudoPort::PhysicalPort(port))]
    }

    #[test]
    fn floods_until_destination_is_learned() {
        let ps = switch(12);
        let now = Instant::now();
        assert_eq!(ps.decide(1, 3, &frame(3, 4), now).unwrap(),
                   vec![Action::Output(PseudoPort::Flood)]);
        assert_eq!(ps.decide(1, 4, &frame(4, 3), now).unwrap(), out(3));
        assert_eq!(ps.decide(1, 3, &frame(3, 4), now).unwrap(), out(4));
        assert_eq!(ps.learned_port(1, mac(3)), Some(3));
    }

    #[test]
    fn relearns_moved_host() {
        let ps = switch(12);
        let now = Instant::now();
        ps.decide(1, 3, &frame(3, 4), now).unwrap();
        ps.decide(1, 7, &frame(3, 4), now).unwrap();
        assert_eq!(ps.decide(1, 4, &frame(4, 3), now).unwrap(), out(7));
    }

    #[test]
    fn deny_rule_drops_even_when_learned() {
        let ps = switch(14);
        let now = Instant::now();
        ps.decide(1, 9, &frame(0x19, 1), now).unwrap();
        assert_eq!(ps.decide(1, 1, &frame(1, 0x19), now).unwrap(), Vec::<Action>::new());
        assert_eq!(ps.decide(1, 1, &frame(1, 0x1b), now).unwrap(), Vec::<Action>::new());
        // The learning side effect still happens on a dropped frame.
        assert_eq!(ps.learned_port(1, mac(1)), Some(1));
        assert_eq!(ps.decide(1, 1, &frame(1, 0x20), now).unwrap(),
                   vec![Action::Output(PseudoPort::Flood)]);
    }

    #[test]
    fn time_gated_rule_follows_the_clock() {
        let now = Instant::now();
        for &(hour, allowed) in &[(9, false), (10, true), (14, true), (15, true), (16, false)] {
            let ps = switch(hour);
            let actions = ps.decide(1, 2, &frame(2, 0x16), now).unwrap();
            assert_eq!(!actions.is_empty(), allowed, "hour {}", hour);
        }
    }

    #[test]
    fn later_rule_overrides_earlier() {
        let config = PolicySwitchConfig {
            mac_ttl_secs: None,
            rules: vec![AdmissionRule {
                            src: mac(2),
                            dst: vec![mac(0x16)],
                            valid_hours: None,
                        },
                        AdmissionRule {
                            src: mac(2),
                            dst: vec![mac(0x16)],
                            valid_hours: Some(vec![10].into_iter().collect()),
                        }],
        };
        let ps = PolicySwitch::new(config, Arc::new(FixedClock(10))).unwrap();
        assert_eq!(ps.admit(mac(2), mac(0x16), out(4)), out(4));
    }

    #[test]
    fn broken_payload_is_still_switched() {
        let ps = switch(12);
        let now = Instant::now();
        // ARP with an InARP opcode behind a valid Ethernet header.
        let mut arp = vec![0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 3, 0x08, 0x06, 0, 1, 0x08, 0, 6, 4, 0, 8];
        arp.extend_from_slice(&[0; 20]);
        assert_eq!(ps.decide(1, 3, &arp, now).unwrap(),
                   vec![Action::Output(PseudoPort::Flood)]);
        assert_eq!(ps.learned_port(1, mac(3)), Some(3));
    }

    #[test]
    fn malformed_frame_learns_nothing() {
        let ps = switch(12);
        assert!(ps.decide(1, 3, &[0; 8], Instant::now()).is_err());
        assert_eq!(ps.learned_port(1, mac(0)), None);
    }
}
