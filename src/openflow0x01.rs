use std::io::{self, Write};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::bits::{test_bit, with_bit};
use crate::error::OfpError;
use crate::packet::MacAddr;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl MsgCode {
    const ALL: [MsgCode; 22] = [MsgCode::Hello,
                                MsgCode::Error,
                                MsgCode::EchoReq,
                                MsgCode::EchoResp,
                                MsgCode::Vendor,
                                MsgCode::FeaturesReq,
                                MsgCode::FeaturesResp,
                                MsgCode::GetConfigReq,
                                MsgCode::GetConfigResp,
                                MsgCode::SetConfig,
                                MsgCode::PacketIn,
                                MsgCode::FlowRemoved,
                                MsgCode::PortStatus,
                                MsgCode::PacketOut,
                                MsgCode::FlowMod,
                                MsgCode::PortMod,
                                MsgCode::StatsReq,
                                MsgCode::StatsResp,
                                MsgCode::BarrierReq,
                                MsgCode::BarrierResp,
                                MsgCode::QueueGetConfigReq,
                                MsgCode::QueueGetConfigResp];

    pub fn of_int(code: u8) -> Option<MsgCode> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Wildcard bits of `ofp_match`.
const OFPFW_IN_PORT: u32 = 0;
const OFPFW_DL_VLAN: u32 = 1;
const OFPFW_DL_SRC: u32 = 2;
const OFPFW_DL_DST: u32 = 3;
const OFPFW_DL_TYPE: u32 = 4;
const OFPFW_NW_PROTO: u32 = 5;
const OFPFW_TP_SRC: u32 = 6;
const OFPFW_TP_DST: u32 = 7;
const OFPFW_NW_SRC_SHIFT: u32 = 8;
const OFPFW_NW_DST_SHIFT: u32 = 14;
const OFPFW_DL_VLAN_PCP: u32 = 20;
const OFPFW_NW_TOS: u32 = 21;
const OFPFW_NW_ALL_BITS: u32 = 32;

/// Fields to match against flows. `None` wildcards the field; IPv4
/// addresses match exactly when present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    const SIZE: usize = 40;

    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    pub fn wildcards(&self) -> u32 {
        let mut w = 0;
        w = with_bit(w, OFPFW_IN_PORT, self.in_port.is_none());
        w = with_bit(w, OFPFW_DL_VLAN, self.dl_vlan.is_none());
        w = with_bit(w, OFPFW_DL_SRC, self.dl_src.is_none());
        w = with_bit(w, OFPFW_DL_DST, self.dl_dst.is_none());
        w = with_bit(w, OFPFW_DL_TYPE, self.dl_typ.is_none());
        w = with_bit(w, OFPFW_NW_PROTO, self.nw_proto.is_none());
        w = with_bit(w, OFPFW_TP_SRC, self.tp_src.is_none());
        w = with_bit(w, OFPFW_TP_DST, self.tp_dst.is_none());
        w = with_bit(w, OFPFW_DL_VLAN_PCP, self.dl_vlan_pcp.is_none());
        w = with_bit(w, OFPFW_NW_TOS, self.nw_tos.is_none());
        if self.nw_src.is_none() {
            w |= OFPFW_NW_ALL_BITS << OFPFW_NW_SRC_SHIFT;
        }
        if self.nw_dst.is_none() {
            w |= OFPFW_NW_ALL_BITS << OFPFW_NW_DST_SHIFT;
        }
        w
    }

    fn marshal<W: Write>(&self, bytes: &mut W) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(self.wildcards())?;
        bytes.write_u16::<BigEndian>(self.in_port.unwrap_or(0))?;
        bytes.write_all(&self.dl_src.unwrap_or_default().0)?;
        bytes.write_all(&self.dl_dst.unwrap_or_default().0)?;
        bytes.write_u16::<BigEndian>(self.dl_vlan.unwrap_or(0))?;
        bytes.write_u8(self.dl_vlan_pcp.unwrap_or(0))?;
        bytes.write_u8(0)?;
        bytes.write_u16::<BigEndian>(self.dl_typ.unwrap_or(0))?;
        bytes.write_u8(self.nw_tos.unwrap_or(0))?;
        bytes.write_u8(self.nw_proto.unwrap_or(0))?;
        bytes.write_all(&[0; 2])?;
        bytes.write_u32::<BigEndian>(self.nw_src.map_or(0, u32::from))?;
        bytes.write_u32::<BigEndian>(self.nw_dst.map_or(0, u32::from))?;
        bytes.write_u16::<BigEndian>(self.tp_src.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(self.tp_dst.unwrap_or(0))
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u16),
    Local,
}

#[repr(u16)]
enum OfpPort {
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn to_int(pp: PseudoPort) -> u16 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u16,
            PseudoPort::Table => OfpPort::OFPPTable as u16,
            PseudoPort::Normal => OfpPort::OFPPNormal as u16,
            PseudoPort::Flood => OfpPort::OFPPFlood as u16,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u16,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u16,
            PseudoPort::Local => OfpPort::OFPPLocal as u16,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
    SetNwSrc(Ipv4Addr),
    SetNwDst(Ipv4Addr),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
    OFPATSetNwSrc = 6,
    OFPATSetNwDst = 7,
}

impl Action {
    /// Every supported action is 8 bytes on the wire.
    const SIZE: usize = 8;

    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::SetNwSrc(_) => OfpActionType::OFPATSetNwSrc,
            Action::SetNwDst(_) => OfpActionType::OFPATSetNwDst,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.len() * Self::SIZE
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts.into_iter()
            .partition(|act| match *act {
                Action::Output(PseudoPort::Controller(_)) => true,
                _ => false,
            });
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal<W: Write>(act: Action, bytes: &mut W) -> io::Result<()> {
        bytes.write_u16::<BigEndian>(Action::type_code(&act) as u16)?;
        bytes.write_u16::<BigEndian>(Self::SIZE as u16)?;
        match act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(PseudoPort::to_int(pp))?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })
            }
            Action::SetNwSrc(addr) | Action::SetNwDst(addr) => {
                bytes.write_u32::<BigEndian>(u32::from(addr))
            }
        }
    }
}

/// `ofp_flow_mod_command` for adding a flow. The controller only ever adds.
const OFPFC_ADD: u16 = 0;

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    /// Seconds of inactivity before the flow expires; 0 never expires.
    pub idle_timeout: u16,
    /// Seconds before the flow expires regardless of traffic; 0 never expires.
    pub hard_timeout: u16,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn size_of(msg: &FlowMod) -> usize {
        Pattern::SIZE + 24 + Action::size_of_sequence(&msg.actions)
    }

    fn marshal<W: Write>(fm: FlowMod, bytes: &mut W) -> io::Result<()> {
        fm.pattern.marshal(bytes)?;
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u16::<BigEndian>(OFPFC_ADD)?;
        bytes.write_u16::<BigEndian>(fm.idle_timeout)?;
        bytes.write_u16::<BigEndian>(fm.hard_timeout)?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(fm.out_port
            .map_or(OfpPort::OFPPNone as u16, PseudoPort::to_int))?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(fm.check_overlap,
                                                          fm.notify_when_removed))?;
        for act in Action::move_controller_last(fm.actions) {
            if act == Action::Output(PseudoPort::Table) {
                return Err(io::Error::new(io::ErrorKind::InvalidInput,
                                          "OFPPTable not allowed in installed flow"));
            }
            Action::marshal(act, bytes)?;
        }
        Ok(())
    }
}

const NO_BUFFER: u32 = 0xffff_ffff;

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        payload.data().len()
    }

    /// The frame bytes carried with the message, possibly truncated by the
    /// switch when it also holds the frame in a buffer.
    pub fn data(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) |
            Payload::NotBuffered(ref buf) => buf,
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

impl PacketIn {
    const HEADER_SIZE: usize = 10;

    fn size_of(pi: &PacketIn) -> usize {
        Self::HEADER_SIZE + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(OfpError::Truncated("PACKET_IN"));
        }
        let data = buf[Self::HEADER_SIZE..].to_vec();
        let payload = match BigEndian::read_u32(&buf[0..4]) {
            NO_BUFFER => Payload::NotBuffered(data),
            n => Payload::Buffered(n, data),
        };
        Ok(PacketIn {
            input_payload: payload,
            total_len: BigEndian::read_u16(&buf[4..6]),
            port: BigEndian::read_u16(&buf[6..8]),
            reason: match buf[8] {
                0 => PacketInReason::NoMatch,
                _ => PacketInReason::ExplicitSend,
            },
        })
    }

    fn marshal<W: Write>(pi: PacketIn, bytes: &mut W) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(match pi.input_payload {
            Payload::Buffered(n, _) => n,
            Payload::NotBuffered(_) => NO_BUFFER,
        })?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u16::<BigEndian>(pi.port)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(0)?;
        bytes.write_all(pi.input_payload.data())
    }
}

/// Represents a packet the controller asks the datapath to emit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

impl PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        8 + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn marshal<W: Write>(po: PacketOut, bytes: &mut W) -> io::Result<()> {
        bytes.write_u32::<BigEndian>(match po.output_payload {
            Payload::Buffered(n, _) => n,
            Payload::NotBuffered(_) => NO_BUFFER,
        })?;
        bytes.write_u16::<BigEndian>(po.port_id.unwrap_or(OfpPort::OFPPNone as u16))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        for act in po.apply_actions {
            Action::marshal(act, bytes)?;
        }
        match po.output_payload {
            Payload::Buffered(..) => Ok(()),
            Payload::NotBuffered(buf) => bytes.write_all(&buf),
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d),
            table_stats: test_bit(1, d),
            port_stats: test_bit(2, d),
            stp: test_bit(3, d),
            ip_reasm: test_bit(5, d),
            queue_stats: test_bit(6, d),
            arp_match_ip: test_bit(7, d),
        }
    }
}

/// Description of a physical port, reduced to what the apps log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
}

impl PortDesc {
    const SIZE: usize = 48;

    fn parse(buf: &[u8]) -> PortDesc {
        let mut hw_addr = [0; 6];
        hw_addr.copy_from_slice(&buf[2..8]);
        let name = &buf[8..24];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        PortDesc {
            port_no: BigEndian::read_u16(&buf[0..2]),
            hw_addr: MacAddr(hw_addr),
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
        }
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    /// Raw `ofp_action_type` bitmap.
    pub supported_actions: u32,
    pub ports: Vec<PortDesc>,
}

impl SwitchFeatures {
    const HEADER_SIZE: usize = 24;

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(OfpError::Truncated("FEATURES_REPLY"));
        }
        let ports = buf[Self::HEADER_SIZE..]
            .chunks(PortDesc::SIZE)
            .filter(|chunk| chunk.len() == PortDesc::SIZE)
            .map(PortDesc::parse)
            .collect();
        Ok(SwitchFeatures {
            datapath_id: BigEndian::read_u64(&buf[0..8]),
            num_buffers: BigEndian::read_u32(&buf[8..12]),
            num_tables: buf[12],
            supported_capabilities: Capabilities::of_int(BigEndian::read_u32(&buf[16..20])),
            supported_actions: BigEndian::read_u32(&buf[20..24]),
            ports: ports,
        })
    }
}

/// Error reported by the switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl ErrorMsg {
    fn parse(buf: &[u8]) -> Result<ErrorMsg, OfpError> {
        if buf.len() < 4 {
            return Err(OfpError::Truncated("ERROR"));
        }
        Ok(ErrorMsg {
            typ: BigEndian::read_u16(&buf[0..2]),
            code: BigEndian::read_u16(&buf[2..4]),
            data: buf[4..].to_vec(),
        })
    }
}

/// Encapsulates handling of OpenFlow 1.0 messages.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    pub const OFP_VERSION: u8 = 0x01;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        /// A message the controller does not act on, kept by raw type code.
        Other(u8),
    }

    impl Message {
        /// Map `Message` to the raw OpenFlow message type code.
        fn type_code(msg: &Message) -> u8 {
            let code = match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::Other(code) => return code,
            };
            code as u8
        }

        /// Marshal the body of OpenFlow message `msg`.
        fn marshal_body<W: Write>(msg: Message, bytes: &mut W) -> io::Result<()> {
            match msg {
                Message::Hello | Message::FeaturesReq | Message::Other(_) => Ok(()),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => bytes.write_all(&buf),
                Message::Error(err) => {
                    bytes.write_u16::<BigEndian>(err.typ)?;
                    bytes.write_u16::<BigEndian>(err.code)?;
                    bytes.write_all(&err.data)
                }
                Message::FeaturesReply(_) => {
                    Err(io::Error::new(io::ErrorKind::InvalidInput,
                                       "controller does not send FEATURES_REPLY"))
                }
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello | Message::FeaturesReq | Message::Other(_) => 0,
                Message::EchoRequest(ref buf) |
                Message::EchoReply(ref buf) => buf.len(),
                Message::Error(ref err) => 4 + err.data.len(),
                Message::FeaturesReply(ref sf) => {
                    SwitchFeatures::HEADER_SIZE + sf.ports.len() * PortDesc::SIZE
                }
                Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                Message::PacketOut(ref packet_out) => PacketOut::size_of(packet_out),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            let sizeof_buf = Self::size_of(msg);
            OfpHeader::new(OFP_VERSION, Self::type_code(msg), sizeof_buf as u16, xid)
        }

        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>, OfpError> {
            if Self::size_of(&msg) > u16::max_value() as usize {
                return Err(OfpError::Io(io::Error::new(io::ErrorKind::InvalidInput,
                                                       "message exceeds 65535 bytes")));
            }
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), OfpError> {
            let msg = match header.type_code() {
                Some(MsgCode::Hello) => Message::Hello,
                Some(MsgCode::Error) => Message::Error(ErrorMsg::parse(buf)?),
                Some(MsgCode::EchoReq) => Message::EchoRequest(buf.to_vec()),
                Some(MsgCode::EchoResp) => Message::EchoReply(buf.to_vec()),
                Some(MsgCode::FeaturesReq) => Message::FeaturesReq,
                Some(MsgCode::FeaturesResp) => {
                    Message::FeaturesReply(SwitchFeatures::parse(buf)?)
                }
                Some(MsgCode::PacketIn) => Message::PacketIn(PacketIn::parse(buf)?),
                _ => Message::Other(header.raw_type()),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            pattern: pattern,
            priority: prio,
            actions: actions,
            cookie: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }
}
