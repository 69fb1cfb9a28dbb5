use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::error::OfpError;
use crate::ofp_header::OfpHeader;
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::{Message, OFP_VERSION};
use crate::openflow0x01::{FlowMod, MsgCode, PacketIn, PacketOut, SwitchFeatures};

/// Command-send primitive handed to apps.
///
/// Sends are fire-and-forget: nothing waits for the switch to acknowledge a
/// command, and a failed send is reported but never retried.
pub trait CommandSink {
    fn send_packet_out(&mut self, sw: u64, pkt: PacketOut) -> Result<(), OfpError>;
    fn send_flow_mod(&mut self, sw: u64, flow_mod: FlowMod) -> Result<(), OfpError>;
}

/// A command as issued by an app, tagged with its target datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    PacketOut(u64, PacketOut),
    FlowMod(u64, FlowMod),
}

/// Records commands in issue order instead of sending them.
impl CommandSink for Vec<Command> {
    fn send_packet_out(&mut self, sw: u64, pkt: PacketOut) -> Result<(), OfpError> {
        self.push(Command::PacketOut(sw, pkt));
        Ok(())
    }

    fn send_flow_mod(&mut self, sw: u64, flow_mod: FlowMod) -> Result<(), OfpError> {
        self.push(Command::FlowMod(sw, flow_mod));
        Ok(())
    }
}

/// OpenFlow Controller Application
///
/// The typed callbacks a session dispatches switch events to. One app
/// instance serves every connected switch, so implementations guard their
/// own state.
pub trait OfpApp: Send + Sync {
    /// Called once the handshake with a switch completes.
    fn switch_connected(&self, _sw: u64, _features: &SwitchFeatures) {}
    /// Called when the session with a connected switch ends, for any reason.
    fn switch_disconnected(&self, _sw: u64) {}
    /// Called for every PACKET_IN, one at a time per switch.
    fn packet_in(&self, sw: u64, pkt: &PacketIn, sink: &mut dyn CommandSink) -> Result<(), OfpError>;
}

/// The OpenFlow 1.0 channel to one switch.
pub struct SwitchSession<S> {
    stream: S,
    next_xid: u32,
}

impl<S: Read + Write> SwitchSession<S> {
    pub fn new(stream: S) -> SwitchSession<S> {
        SwitchSession {
            stream: stream,
            next_xid: 1,
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Send `msg` under a fresh transaction id.
    pub fn send_message(&mut self, msg: Message) -> Result<(), OfpError> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        self.send_with_xid(xid, msg)
    }

    fn send_with_xid(&mut self, xid: u32, msg: Message) -> Result<(), OfpError> {
        let bytes = Message::marshal(xid, msg)?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read the next message. Returns `None` when the switch closes the
    /// connection on a message boundary.
    pub fn recv_message(&mut self) -> Result<Option<(u32, Message)>, OfpError> {
        let mut buf = [0u8; 8];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => (),
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let header = OfpHeader::parse(buf);
        if header.length() < OfpHeader::size() {
            return Err(OfpError::BadLength(header.length() as u16));
        }
        let mut body = vec![0; header.length() - OfpHeader::size()];
        self.stream.read_exact(&mut body)?;
        // A HELLO advertises the peer's highest version; anything else must
        // be spoken in the negotiated 1.0.
        if header.version() != OFP_VERSION && header.type_code() != Some(MsgCode::Hello) {
            return Err(OfpError::UnsupportedVersion(header.version()));
        }
        Message::parse(&header, &body).map(Some)
    }

    /// Exchange HELLOs and request the switch features.
    pub fn handshake(&mut self) -> Result<SwitchFeatures, OfpError> {
        self.send_message(Message::Hello)?;
        self.send_message(Message::FeaturesReq)?;
        loop {
            match self.recv_message()? {
                None => return Err(OfpError::Handshake("switch closed the connection".to_string())),
                Some((_, Message::FeaturesReply(features))) => return Ok(features),
                Some((xid, Message::EchoRequest(buf))) => {
                    self.send_with_xid(xid, Message::EchoReply(buf))?
                }
                Some((_, Message::Error(err))) => {
                    return Err(OfpError::Handshake(format!("switch error type {} code {}",
                                                           err.typ,
                                                           err.code)))
                }
                Some((_, msg)) => debug!("ignoring {:?} during handshake", msg),
            }
        }
    }

    /// Perform the handshake, then dispatch events to `app` until the switch
    /// disconnects.
    pub fn run(&mut self, app: &dyn OfpApp) -> Result<(), OfpError> {
        let features = self.handshake()?;
        let sw = features.datapath_id;
        info!("switch {:#x} connected with {} ports", sw, features.ports.len());
        app.switch_connected(sw, &features);
        let result = self.serve(sw, app);
        app.switch_disconnected(sw);
        info!("switch {:#x} disconnected", sw);
        result
    }

    fn serve(&mut self, sw: u64, app: &dyn OfpApp) -> Result<(), OfpError> {
        while let Some((xid, msg)) = self.recv_message()? {
            match msg {
                Message::PacketIn(pkt) => app.packet_in(sw, &pkt, self)?,
                Message::EchoRequest(buf) => self.send_with_xid(xid, Message::EchoReply(buf))?,
                Message::Error(err) => {
                    warn!("switch {:#x} reported error type {} code {}",
                          sw,
                          err.typ,
                          err.code)
                }
                Message::Hello | Message::EchoReply(_) => (),
                other => debug!("switch {:#x}: ignoring {:?}", sw, other),
            }
        }
        Ok(())
    }
}

impl<S: Read + Write> CommandSink for SwitchSession<S> {
    fn send_packet_out(&mut self, _sw: u64, pkt: PacketOut) -> Result<(), OfpError> {
        self.send_message(Message::PacketOut(pkt))
    }

    fn send_flow_mod(&mut self, _sw: u64, flow_mod: FlowMod) -> Result<(), OfpError> {
        self.send_message(Message::FlowMod(flow_mod))
    }
}

/// Run a session over a freshly accepted switch connection. Intended as a
/// thread entry point; failures end the session and are logged.
pub fn handle_client_connected(stream: TcpStream, app: Arc<dyn OfpApp>) {
    let peer = stream.peer_addr().ok();
    let mut session = SwitchSession::new(stream);
    match session.run(app.as_ref()) {
        Ok(()) => info!("session with {:?} closed", peer),
        Err(e) => error!("session with {:?} ended: {}", peer, e),
    }
}
