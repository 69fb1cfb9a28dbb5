use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClassifyError, ParseMacError};

/// 48-bit Ethernet hardware address.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    fn from_slice(buf: &[u8]) -> MacAddr {
        let mut arr = [0; 6];
        arr.copy_from_slice(&buf[..6]);
        MacAddr(arr)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = &self.0;
        write!(f,
               "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               b[0],
               b[1],
               b[2],
               b[3],
               b[4],
               b[5])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<MacAddr, ParseMacError> {
        let mut arr = [0; 6];
        let mut octets = s.split(':');
        for slot in arr.iter_mut() {
            let octet = octets.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if octet.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *slot = u8::from_str_radix(octet, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if octets.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddr(arr))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<MacAddr, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

fn need(layer: &'static str, buf: &[u8], need: usize) -> Result<(), ClassifyError> {
    if buf.len() < need {
        Err(ClassifyError::Truncated {
            layer: layer,
            need: need,
            got: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// IPv4 header fields the controller looks at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ip {
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ip {
    const MIN_LEN: usize = 20;

    fn parse(buf: &[u8]) -> Result<Ip, ClassifyError> {
        need("IPv4", buf, Self::MIN_LEN)?;
        let vhl = buf[0];
        if (vhl >> 4) != 4 {
            return Err(ClassifyError::BadIpVersion(vhl >> 4));
        }
        let ihl = vhl & 0x0f;
        if ihl < 5 {
            return Err(ClassifyError::BadIpHeaderLength(ihl));
        }
        need("IPv4", buf, ihl as usize * 4)?;
        Ok(Ip {
            proto: buf[9],
            src: Ipv4Addr::from(BigEndian::read_u32(&buf[12..16])),
            dst: Ipv4Addr::from(BigEndian::read_u32(&buf[16..20])),
        })
    }
}

/// ARP operation code.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

/// Address resolution protocol (ARP) packet payload, Ethernet/IPv4 only.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Arp {
    pub op: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl Arp {
    pub const LEN: usize = 28;

    fn parse(buf: &[u8]) -> Result<Arp, ClassifyError> {
        need("ARP", buf, Self::LEN)?;
        let htype = BigEndian::read_u16(&buf[0..2]);
        let ptype = BigEndian::read_u16(&buf[2..4]);
        if htype != 1 || ptype != EthTyp::Ip as u16 || buf[4] != 6 || buf[5] != 4 {
            return Err(ClassifyError::UnsupportedArp {
                htype: htype,
                ptype: ptype,
            });
        }
        let op = match BigEndian::read_u16(&buf[6..8]) {
            1 => ArpOp::Request,
            2 => ArpOp::Reply,
            n => return Err(ClassifyError::UnknownArpOp(n)),
        };
        Ok(Arp {
            op: op,
            sender_mac: MacAddr::from_slice(&buf[8..14]),
            sender_ip: Ipv4Addr::from(BigEndian::read_u32(&buf[14..18])),
            target_mac: MacAddr::from_slice(&buf[18..24]),
            target_ip: Ipv4Addr::from(BigEndian::read_u32(&buf[24..28])),
        })
    }

    /// Build the reply to this ARP claiming `target_ip` lives at
    /// `answer_mac`, addressed back to `requester_mac`.
    pub fn reply(&self, answer_mac: MacAddr, requester_mac: MacAddr) -> Arp {
        Arp {
            op: ArpOp::Reply,
            sender_mac: answer_mac,
            sender_ip: self.target_ip,
            target_mac: requester_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Serialize as a complete untagged Ethernet frame from `dl_src` to
    /// `dl_dst`.
    pub fn to_frame(&self, dl_dst: MacAddr, dl_src: MacAddr) -> Vec<u8> {
        self.to_tagged_frame(dl_dst, dl_src, None)
    }

    /// Serialize as an Ethernet frame, inserting `vlan` as an 802.1Q tag.
    pub fn to_tagged_frame(&self, dl_dst: MacAddr, dl_src: MacAddr, vlan: Option<VlanTag>) -> Vec<u8> {
        let eth = EthernetHeader {
            dl_dst: dl_dst,
            dl_src: dl_src,
            vlan: vlan,
            dl_typ: EthTyp::Arp as u16,
        };
        let mut buf = Vec::with_capacity(eth.len() + Self::LEN);
        eth.write(&mut buf);
        let mut arp = [0u8; Self::LEN];
        BigEndian::write_u16(&mut arp[0..2], 1);
        BigEndian::write_u16(&mut arp[2..4], EthTyp::Ip as u16);
        arp[4] = 6;
        arp[5] = 4;
        BigEndian::write_u16(&mut arp[6..8], self.op as u16);
        arp[8..14].copy_from_slice(&self.sender_mac.0);
        arp[14..18].copy_from_slice(&self.sender_ip.octets());
        arp[18..24].copy_from_slice(&self.target_mac.0);
        arp[24..28].copy_from_slice(&self.target_ip.octets());
        buf.extend_from_slice(&arp);
        buf
    }
}

/// Represents a packet at the network protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    /// Any other ethertype. Not an error: callers simply take no action.
    Other(u16),
}

/// 802.1Q tag control information.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VlanTag {
    pub id: u16,
    pub pcp: u8,
    pub dei: bool,
}

impl VlanTag {
    fn of_int(tci: u16) -> VlanTag {
        VlanTag {
            id: tci & 0xfff,
            pcp: (tci >> 13) as u8,
            dei: (tci & 0x1000) > 0,
        }
    }

    fn to_int(&self) -> u16 {
        ((self.pcp as u16) << 13) | (if self.dei { 0x1000 } else { 0 }) | (self.id & 0xfff)
    }
}

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

#[repr(u16)]
#[derive(Copy, Clone)]
pub enum EthTyp {
    Ip = 0x0800,
    Arp = 0x0806,
    Vlan = 0x8100,
}

/// Ethernet header. `dl_typ` is the ethertype after any 802.1Q tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dl_dst: MacAddr,
    pub dl_src: MacAddr,
    pub vlan: Option<VlanTag>,
    pub dl_typ: u16,
}

impl EthernetHeader {
    /// Parse the link-layer header of `buf` and return it with the rest of
    /// the frame. Nothing past the header is looked at.
    pub fn parse(buf: &[u8]) -> Result<(EthernetHeader, &[u8]), ClassifyError> {
        need("Ethernet", buf, ETH_HEADER_LEN)?;
        let typ = BigEndian::read_u16(&buf[12..14]);
        let (vlan, typ, rest) = if typ == EthTyp::Vlan as u16 {
            need("802.1Q", buf, ETH_HEADER_LEN + VLAN_TAG_LEN)?;
            (Some(VlanTag::of_int(BigEndian::read_u16(&buf[14..16]))),
             BigEndian::read_u16(&buf[16..18]),
             &buf[ETH_HEADER_LEN + VLAN_TAG_LEN..])
        } else {
            (None, typ, &buf[ETH_HEADER_LEN..])
        };
        let header = EthernetHeader {
            dl_dst: MacAddr::from_slice(&buf[0..6]),
            dl_src: MacAddr::from_slice(&buf[6..12]),
            vlan: vlan,
            dl_typ: typ,
        };
        Ok((header, rest))
    }

    fn len(&self) -> usize {
        ETH_HEADER_LEN + self.vlan.map_or(0, |_| VLAN_TAG_LEN)
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.dl_dst.0);
        buf.extend_from_slice(&self.dl_src.0);
        let mut word = [0u8; 2];
        if let Some(tag) = self.vlan {
            BigEndian::write_u16(&mut word, EthTyp::Vlan as u16);
            buf.extend_from_slice(&word);
            BigEndian::write_u16(&mut word, tag.to_int());
            buf.extend_from_slice(&word);
        }
        BigEndian::write_u16(&mut word, self.dl_typ);
        buf.extend_from_slice(&word);
    }
}

/// Represents a packet at the ethernet protocol level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub vlan: Option<VlanTag>,
    pub nw: Nw,
}

impl Packet {
    /// Classify a raw frame. Truncated or malformed Ethernet, ARP and IPv4
    /// headers are errors; unknown ethertypes classify as `Nw::Other`.
    pub fn parse(buf: &[u8]) -> Result<Packet, ClassifyError> {
        let (eth, rest) = EthernetHeader::parse(buf)?;
        let nw = match eth.dl_typ {
            t if t == EthTyp::Ip as u16 => Nw::Ip(Ip::parse(rest)?),
            t if t == EthTyp::Arp as u16 => Nw::Arp(Arp::parse(rest)?),
            t => Nw::Other(t),
        };
        Ok(Packet {
            dl_src: eth.dl_src,
            dl_dst: eth.dl_dst,
            vlan: eth.vlan,
            nw: nw,
        })
    }

    pub fn arp(&self) -> Option<&Arp> {
        match self.nw {
            Nw::Arp(ref arp) => Some(arp),
            _ => None,
        }
    }
}
