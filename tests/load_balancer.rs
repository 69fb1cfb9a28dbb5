use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use reactive_ofp::config::{AppConfig, Config, LoadBalancerConfig};
use reactive_ofp::load_balancer::LoadBalancer;
use reactive_ofp::ofp_controller::{Command, OfpApp};
use reactive_ofp::openflow0x01::{Action, PacketIn, PacketInReason, Payload, PseudoPort};
use reactive_ofp::packet::{Arp, ArpOp, MacAddr, Packet, VlanTag};

fn mac(last: u8) -> MacAddr {
    MacAddr([0, 0, 0, 0, 0, last])
}

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn sample() -> LoadBalancerConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/load_balancer.toml");
    match Config::from_file(path).unwrap().app {
        AppConfig::LoadBalancer(lb) => lb,
        other => panic!("unexpected {:?}", other),
    }
}

fn arp_in(host: u8, target: Ipv4Addr, port: u16) -> PacketIn {
    let frame = Arp {
            op: ArpOp::Request,
            sender_mac: mac(host),
            sender_ip: ip(host),
            target_mac: MacAddr::default(),
            target_ip: target,
        }
        .to_frame(MacAddr::BROADCAST, mac(host));
    PacketIn {
        total_len: frame.len() as u16,
        input_payload: Payload::NotBuffered(frame),
        port: port,
        reason: PacketInReason::NoMatch,
    }
}

fn replied_mac(cmd: &Command) -> MacAddr {
    match *cmd {
        Command::PacketOut(_, ref po) => {
            let pkt = Packet::parse(po.output_payload.data()).unwrap();
            pkt.arp().unwrap().sender_mac
        }
        ref other => panic!("expected PACKET_OUT, got {:?}", other),
    }
}

#[test]
fn three_clients_round_robin() {
    let lb = LoadBalancer::new(sample()).unwrap();
    let mut log: Vec<Command> = vec![];
    for &(host, port) in &[(1, 1), (2, 2), (3, 3)] {
        lb.packet_in(0x1, &arp_in(host, ip(10), port), &mut log).unwrap();
    }
    assert_eq!(log.len(), 9);

    let expected = [(1, 5), (2, 6), (3, 5)];
    for (chunk, &(client, backend)) in log.chunks(3).zip(expected.iter()) {
        match (&chunk[0], &chunk[1]) {
            (&Command::FlowMod(1, ref fwd), &Command::FlowMod(1, ref rev)) => {
                assert_eq!(fwd.pattern.in_port, Some(client as u16));
                assert_eq!(fwd.pattern.nw_dst, Some(ip(10)));
                assert_eq!(fwd.actions,
                           vec![Action::SetNwDst(ip(backend)),
                                Action::Output(PseudoPort::PhysicalPort(backend as u16))]);
                assert_eq!(rev.pattern.in_port, Some(backend as u16));
                assert_eq!(rev.pattern.nw_src, Some(ip(backend)));
                assert_eq!(rev.pattern.nw_dst, Some(ip(client)));
                assert_eq!(rev.actions,
                           vec![Action::SetNwSrc(ip(10)),
                                Action::Output(PseudoPort::PhysicalPort(client as u16))]);
            }
            other => panic!("expected two FLOW_MODs, got {:?}", other),
        }
        assert_eq!(replied_mac(&chunk[2]), mac(backend));
        match chunk[2] {
            Command::PacketOut(1, ref po) => {
                assert_eq!(po.port_id, Some(client as u16));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::InPort)]);
                let pkt = Packet::parse(po.output_payload.data()).unwrap();
                assert_eq!(pkt.dl_dst, mac(client));
                let arp = pkt.arp().unwrap();
                assert_eq!(arp.op, ArpOp::Reply);
                assert_eq!(arp.sender_ip, ip(10));
                assert_eq!(arp.target_ip, ip(client));
            }
            ref other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn client_matches_never_overlap() {
    let lb = LoadBalancer::new(sample()).unwrap();
    let mut log: Vec<Command> = vec![];
    for host in 1..5 {
        lb.packet_in(0x1, &arp_in(host, ip(10), host as u16), &mut log).unwrap();
    }
    let patterns: HashSet<_> = log.iter()
        .filter_map(|c| match *c {
            Command::FlowMod(_, ref fm) => Some(fm.pattern.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(patterns.len(), 8);
}

#[test]
fn backend_arp_installs_nothing() {
    let lb = LoadBalancer::new(sample()).unwrap();
    let mut log: Vec<Command> = vec![];
    lb.packet_in(0x1, &arp_in(5, ip(3), 5), &mut log).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(replied_mac(&log[0]), mac(3));
    // The cursor did not move: the next client still gets the first backend.
    lb.packet_in(0x1, &arp_in(1, ip(10), 1), &mut log).unwrap();
    assert_eq!(replied_mac(&log[3]), mac(5));
}

#[test]
fn malformed_frame_sends_nothing() {
    let lb = LoadBalancer::new(sample()).unwrap();
    let mut log: Vec<Command> = vec![];
    let mut pkt = arp_in(1, ip(10), 1);
    pkt.input_payload = Payload::NotBuffered(vec![0xff; 10]);
    lb.packet_in(0x1, &pkt, &mut log).unwrap();
    assert!(log.is_empty());
}

#[test]
fn switches_share_one_cursor() {
    let lb = Arc::new(LoadBalancer::new(sample()).unwrap());
    let handles: Vec<_> = (0..4u64)
        .map(|sw| {
            let lb = Arc::clone(&lb);
            thread::spawn(move || {
                let mut log: Vec<Command> = vec![];
                for _ in 0..25 {
                    lb.packet_in(sw, &arp_in(1, ip(10), 1), &mut log).unwrap();
                }
                log
            })
        })
        .collect();
    let mut counts = [0usize; 2];
    for handle in handles {
        for cmd in handle.join().unwrap().iter().filter(|c| match **c {
            Command::PacketOut(..) => true,
            _ => false,
        }) {
            if replied_mac(cmd) == mac(5) {
                counts[0] += 1;
            } else {
                counts[1] += 1;
            }
        }
    }
    assert_eq!(counts, [50, 50]);
}

#[test]
fn tagged_request_gets_tagged_reply() {
    let lb = LoadBalancer::new(sample()).unwrap();
    let tag = VlanTag {
        id: 10,
        pcp: 0,
        dei: false,
    };
    let frame = Arp {
            op: ArpOp::Request,
            sender_mac: mac(2),
            sender_ip: ip(2),
            target_mac: MacAddr::default(),
            target_ip: ip(10),
        }
        .to_tagged_frame(MacAddr::BROADCAST, mac(2), Some(tag));
    let pkt = PacketIn {
        total_len: frame.len() as u16,
        input_payload: Payload::NotBuffered(frame),
        port: 2,
        reason: PacketInReason::NoMatch,
    };
    let mut log: Vec<Command> = vec![];
    lb.packet_in(0x1, &pkt, &mut log).unwrap();
    assert_eq!(log.len(), 3);
    match log[2] {
        Command::PacketOut(_, ref po) => {
            let reply = Packet::parse(po.output_payload.data()).unwrap();
            assert_eq!(reply.vlan, Some(tag));
            assert_eq!(reply.dl_dst, mac(2));
            assert_eq!(reply.arp().map(|a| a.sender_mac), Some(mac(5)));
        }
        ref other => panic!("unexpected {:?}", other),
    }
}
