//! Turns decisions into FLOW_MOD and PACKET_OUT commands.

use std::net::Ipv4Addr;

use log::info;

use crate::config::Backend;
use crate::error::OfpError;
use crate::ofp_controller::CommandSink;
use crate::openflow0x01::message::add_flow;
use crate::openflow0x01::{Action, FlowMod, PacketOut, Pattern, Payload, PseudoPort};
use crate::packet::{Arp, EthTyp, MacAddr, VlanTag};

/// Priority of the balancing flows. The matches of two clients never
/// overlap, so no ordering between them is needed.
pub const DEFAULT_PRIORITY: u16 = 0;

/// Client to virtual IP: rewrite the destination to the backend.
pub fn client_to_backend(virtual_ip: Ipv4Addr, backend: &Backend, client_port: u16) -> FlowMod {
    let pattern = Pattern {
        in_port: Some(client_port),
        dl_typ: Some(EthTyp::Ip as u16),
        nw_dst: Some(virtual_ip),
        ..Pattern::match_all()
    };
    let actions = vec![Action::SetNwDst(backend.ip),
                       Action::Output(PseudoPort::PhysicalPort(backend.port))];
    add_flow(DEFAULT_PRIORITY, pattern, actions)
}

/// Backend to client: rewrite the source back to the virtual IP.
pub fn backend_to_client(virtual_ip: Ipv4Addr,
                         backend: &Backend,
                         client_ip: Ipv4Addr,
                         client_port: u16)
                         -> FlowMod {
    let pattern = Pattern {
        in_port: Some(backend.port),
        dl_typ: Some(EthTyp::Ip as u16),
        nw_src: Some(backend.ip),
        nw_dst: Some(client_ip),
        ..Pattern::match_all()
    };
    let actions = vec![Action::SetNwSrc(virtual_ip),
                       Action::Output(PseudoPort::PhysicalPort(client_port))];
    add_flow(DEFAULT_PRIORITY, pattern, actions)
}

/// Install both directions of the path between a client and its backend.
pub fn install_balance_flows(sink: &mut dyn CommandSink,
                             sw: u64,
                             virtual_ip: Ipv4Addr,
                             backend: &Backend,
                             client_ip: Ipv4Addr,
                             client_port: u16)
                             -> Result<(), OfpError> {
    info!("switch {:#x}: {} via port {} -> {} via port {}",
          sw,
          client_ip,
          client_port,
          backend.ip,
          backend.port);
    sink.send_flow_mod(sw, client_to_backend(virtual_ip, backend, client_port))?;
    sink.send_flow_mod(sw,
                       backend_to_client(virtual_ip, backend, client_ip, client_port))
}

/// Send `reply` back out the port its request came in on, tagged with the
/// request's VLAN if it had one.
pub fn send_arp_reply(sink: &mut dyn CommandSink,
                      sw: u64,
                      in_port: u16,
                      reply: &Arp,
                      dl_dst: MacAddr,
                      vlan: Option<VlanTag>)
                      -> Result<(), OfpError> {
    let frame = reply.to_tagged_frame(dl_dst, reply.sender_mac, vlan);
    let pkt_out = PacketOut {
        output_payload: Payload::NotBuffered(frame),
        port_id: Some(in_port),
        apply_actions: vec![Action::Output(PseudoPort::InPort)],
    };
    sink.send_packet_out(sw, pkt_out)
}

/// Release a received frame with `actions`. An empty list makes the switch
/// drop it.
pub fn send_frame(sink: &mut dyn CommandSink,
                  sw: u64,
                  in_port: u16,
                  payload: Payload,
                  actions: Vec<Action>)
                  -> Result<(), OfpError> {
    let pkt_out = PacketOut {
        output_payload: payload,
        port_id: Some(in_port),
        apply_actions: actions,
    };
    sink.send_packet_out(sw, pkt_out)
}
