//! BOOTP-framed DHCPv4 wire format (RFC 2131 §2, RFC 2132).

use byteorder::{ByteOrder, NetworkEndian};
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Fixed BOOTP header length, not counting the magic cookie or options.
pub const HEADER_LEN: usize = 236;
pub const MAGIC_COOKIE: u32 = 0x6382_5363;
/// Smallest legal wire size (RFC 2131 §2: "a DHCP message ... at least 300 octets").
pub const MIN_MESSAGE_LEN: usize = 300;
pub const MAX_MESSAGE_LEN: usize = 576;

pub const MAX_DNS_SERVERS: usize = 4;
pub const MAX_HOSTNAME: usize = 64;
pub const MAX_PARAMETER_REQUEST_LIST: usize = 16;

const FLAG_BROADCAST: u16 = 0x8000;

macro_rules! enum_with_unknown {
    (
        $(#[$attr:meta])*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $variant ),+,
            Unknown($ty),
        }

        impl core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant, )+
                    other => $name::Unknown(other),
                }
            }
        }

        impl core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Unknown(other) => other,
                }
            }
        }
    }
}

enum_with_unknown! {
    pub enum OpCode(u8) {
        BootRequest = 1,
        BootReply = 2,
    }
}

enum_with_unknown! {
    pub enum MessageType(u8) {
        Discover = 1,
        Offer = 2,
        Request = 3,
        Decline = 4,
        Ack = 5,
        Nak = 6,
        Release = 7,
        Inform = 8,
    }
}

/// Option codes used by this client (RFC 2132).
pub mod field {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const HOST_NAME: u8 = 12;
    pub const INTERFACE_MTU: u8 = 26;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_IDENTIFIER: u8 = 54;
    pub const PARAMETER_REQUEST_LIST: u8 = 55;
    pub const CLIENT_IDENTIFIER: u8 = 61;
    pub const RENEWAL_TIME_T1: u8 = 58;
    pub const REBINDING_TIME_T2: u8 = 59;
    pub const RAPID_COMMIT: u8 = 80;
    pub const END: u8 = 255;
}

/// A read/write wrapper around a BOOTP/DHCP packet buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

mod header {
    use super::*;
    pub const OP: usize = 0;
    pub const HTYPE: usize = 1;
    pub const HLEN: usize = 2;
    #[allow(dead_code)]
    pub const HOPS: usize = 3;
    pub const XID: core::ops::Range<usize> = 4..8;
    pub const SECS: core::ops::Range<usize> = 8..10;
    pub const FLAGS: core::ops::Range<usize> = 10..12;
    pub const CIADDR: core::ops::Range<usize> = 12..16;
    pub const YIADDR: core::ops::Range<usize> = 16..20;
    pub const SIADDR: core::ops::Range<usize> = 20..24;
    #[allow(dead_code)]
    pub const GIADDR: core::ops::Range<usize> = 24..28;
    pub const CHADDR: core::ops::Range<usize> = 28..44;
    pub const MAGIC_COOKIE: core::ops::Range<usize> = HEADER_LEN..HEADER_LEN + 4;
    pub const OPTIONS: core::ops::RangeFrom<usize> = HEADER_LEN + 4..;
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let len = buffer.as_ref().len();
        if len < HEADER_LEN + 4 {
            return Err(Error::Truncated);
        }
        let packet = Packet { buffer };
        if NetworkEndian::read_u32(&packet.buffer.as_ref()[header::MAGIC_COOKIE]) != MAGIC_COOKIE {
            return Err(Error::Truncated);
        }
        Ok(packet)
    }

    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn op(&self) -> OpCode {
        self.buffer.as_ref()[header::OP].into()
    }

    pub fn htype(&self) -> u8 {
        self.buffer.as_ref()[header::HTYPE]
    }

    pub fn hlen(&self) -> u8 {
        self.buffer.as_ref()[header::HLEN]
    }

    pub fn xid(&self) -> u32 {
        NetworkEndian::read_u32(&self.buffer.as_ref()[header::XID])
    }

    pub fn secs(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[header::SECS])
    }

    pub fn flags(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[header::FLAGS])
    }

    pub fn broadcast(&self) -> bool {
        self.flags() & FLAG_BROADCAST != 0
    }

    pub fn ciaddr(&self) -> Ipv4Addr {
        read_addr(&self.buffer.as_ref()[header::CIADDR])
    }

    pub fn yiaddr(&self) -> Ipv4Addr {
        read_addr(&self.buffer.as_ref()[header::YIADDR])
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        read_addr(&self.buffer.as_ref()[header::SIADDR])
    }

    pub fn chaddr(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer.as_ref()[header::CHADDR.start..header::CHADDR.start + 6]);
        mac
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[header::OPTIONS]
    }
}

fn read_addr(bytes: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_op(&mut self, op: OpCode) {
        self.buffer.as_mut()[header::OP] = op.into();
    }
    pub fn set_htype(&mut self, htype: u8) {
        self.buffer.as_mut()[header::HTYPE] = htype;
    }
    pub fn set_hlen(&mut self, hlen: u8) {
        self.buffer.as_mut()[header::HLEN] = hlen;
    }
    pub fn set_xid(&mut self, xid: u32) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[header::XID], xid);
    }
    pub fn set_secs(&mut self, secs: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[header::SECS], secs);
    }
    pub fn set_flags(&mut self, flags: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[header::FLAGS], flags);
    }
    pub fn set_ciaddr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[header::CIADDR].copy_from_slice(&addr.octets());
    }
    pub fn set_yiaddr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[header::YIADDR].copy_from_slice(&addr.octets());
    }
    pub fn set_siaddr(&mut self, addr: Ipv4Addr) {
        self.buffer.as_mut()[header::SIADDR].copy_from_slice(&addr.octets());
    }
    pub fn set_chaddr(&mut self, mac: [u8; 6]) {
        let chaddr = &mut self.buffer.as_mut()[header::CHADDR];
        chaddr.fill(0);
        chaddr[..6].copy_from_slice(&mac);
    }
    pub fn set_magic_cookie(&mut self) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[header::MAGIC_COOKIE], MAGIC_COOKIE);
    }
    pub fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[header::OPTIONS]
    }
}

/// A single decoded option.
#[derive(Debug, Clone, Copy)]
pub struct DhcpOption<'a> {
    pub code: u8,
    pub data: &'a [u8],
}

/// Iterator over the options area of a packet, stopping at `End`/buffer end.
pub struct OptionIter<'a> {
    data: &'a [u8],
    done: bool,
}

impl<'a> OptionIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        OptionIter { data, done: false }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<DhcpOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            let (&code, rest) = self.data.split_first()?;
            if code == field::END {
                self.done = true;
                return None;
            }
            if code == field::PAD {
                self.data = rest;
                continue;
            }
            let (&len, rest) = rest.split_first()?;
            let len = len as usize;
            if rest.len() < len {
                self.done = true;
                return Some(Err(Error::Truncated));
            }
            let (data, rest) = rest.split_at(len);
            self.data = rest;
            return Some(Ok(DhcpOption { code, data }));
        }
    }
}

/// An option writer that appends TLV-encoded options, terminating with `End`.
pub struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        OptionWriter { buffer, pos: 0 }
    }

    pub fn emit(&mut self, code: u8, data: &[u8]) -> Result<()> {
        let total = 2 + data.len();
        if self.buffer.len() - self.pos < total {
            return Err(Error::Exhausted);
        }
        self.buffer[self.pos] = code;
        self.buffer[self.pos + 1] = data.len() as u8;
        self.buffer[self.pos + 2..self.pos + 2 + data.len()].copy_from_slice(data);
        self.pos += total;
        Ok(())
    }

    pub fn end(mut self) -> Result<usize> {
        if self.buffer.len() - self.pos < 1 {
            return Err(Error::Exhausted);
        }
        self.buffer[self.pos] = field::END;
        self.pos += 1;
        Ok(self.pos)
    }
}

/// High level representation of a DHCPv4 message (§4.1).
#[derive(Debug, Clone)]
pub struct Repr {
    pub message_type: Option<MessageType>,
    pub transaction_id: u32,
    pub secs: u16,
    pub broadcast: bool,
    pub client_hardware_address: [u8; 6],
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,

    pub client_identifier: Option<[u8; 6]>,
    pub server_identifier: Option<Ipv4Addr>,
    pub requested_ip: Option<Ipv4Addr>,
    pub parameter_request_list: Option<Vec<u8>>,
    pub hostname: Option<String>,
    pub rapid_commit: bool,

    pub subnet_mask: Option<Ipv4Addr>,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub mtu: Option<u16>,
    pub lease_time_secs: Option<u32>,
    pub renewal_time_t1_secs: Option<u32>,
    pub rebinding_time_t2_secs: Option<u32>,
}

impl Default for Repr {
    fn default() -> Repr {
        Repr {
            message_type: None,
            transaction_id: 0,
            secs: 0,
            broadcast: false,
            client_hardware_address: [0; 6],
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            client_identifier: None,
            server_identifier: None,
            requested_ip: None,
            parameter_request_list: None,
            hostname: None,
            rapid_commit: false,
            subnet_mask: None,
            router: None,
            dns_servers: Vec::new(),
            mtu: None,
            lease_time_secs: None,
            renewal_time_t1_secs: None,
            rebinding_time_t2_secs: None,
        }
    }
}

impl Repr {
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        let mut repr = Repr {
            transaction_id: packet.xid(),
            secs: packet.secs(),
            broadcast: packet.broadcast(),
            client_hardware_address: packet.chaddr(),
            ciaddr: packet.ciaddr(),
            yiaddr: packet.yiaddr(),
            siaddr: packet.siaddr(),
            ..Repr::default()
        };

        for option in OptionIter::new(packet.options()) {
            let option = option?;
            match option.code {
                field::MESSAGE_TYPE if option.data.len() == 1 => {
                    repr.message_type = Some(option.data[0].into());
                }
                field::SERVER_IDENTIFIER if option.data.len() == 4 => {
                    repr.server_identifier = Some(read_addr(option.data));
                }
                field::REQUESTED_IP if option.data.len() == 4 => {
                    repr.requested_ip = Some(read_addr(option.data));
                }
                field::SUBNET_MASK if option.data.len() == 4 => {
                    repr.subnet_mask = Some(read_addr(option.data));
                }
                field::ROUTER if option.data.len() >= 4 => {
                    // Only the first router is honored (§9 open question).
                    repr.router = Some(read_addr(&option.data[0..4]));
                }
                field::DNS_SERVER => {
                    for chunk in option.data.chunks_exact(4) {
                        if repr.dns_servers.len() >= MAX_DNS_SERVERS {
                            break;
                        }
                        repr.dns_servers.push(read_addr(chunk));
                    }
                }
                field::INTERFACE_MTU if option.data.len() == 2 => {
                    repr.mtu = Some(NetworkEndian::read_u16(option.data));
                }
                field::LEASE_TIME if option.data.len() == 4 => {
                    repr.lease_time_secs = Some(NetworkEndian::read_u32(option.data));
                }
                field::RENEWAL_TIME_T1 if option.data.len() == 4 => {
                    repr.renewal_time_t1_secs = Some(NetworkEndian::read_u32(option.data));
                }
                field::REBINDING_TIME_T2 if option.data.len() == 4 => {
                    repr.rebinding_time_t2_secs = Some(NetworkEndian::read_u32(option.data));
                }
                field::HOST_NAME => {
                    repr.hostname = core::str::from_utf8(option.data).ok().map(String::from);
                }
                // RFC 2132 §9.14: type(1) + value; type=1 (Ethernet) mirrors chaddr's length.
                field::CLIENT_IDENTIFIER if option.data.len() == 7 && option.data[0] == 1 => {
                    let mut id = [0u8; 6];
                    id.copy_from_slice(&option.data[1..7]);
                    repr.client_identifier = Some(id);
                }
                field::RAPID_COMMIT => {
                    repr.rapid_commit = true;
                }
                field::PARAMETER_REQUEST_LIST => {
                    repr.parameter_request_list = Some(option.data.to_vec());
                }
                _ => {}
            }
        }

        Ok(repr)
    }

    /// Size in bytes of the fixed header plus magic cookie; the caller
    /// supplies a buffer of at least `HEADER_LEN + 4 + options_len`.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        op: OpCode,
        packet: &mut Packet<T>,
    ) -> Result<usize> {
        packet.set_op(op);
        packet.set_htype(1);
        packet.set_hlen(6);
        packet.set_xid(self.transaction_id);
        packet.set_secs(self.secs);
        packet.set_flags(if self.broadcast { FLAG_BROADCAST } else { 0 });
        packet.set_ciaddr(self.ciaddr);
        packet.set_yiaddr(self.yiaddr);
        packet.set_siaddr(self.siaddr);
        packet.set_chaddr(self.client_hardware_address);
        packet.set_magic_cookie();

        let mut writer = OptionWriter::new(packet.options_mut());
        if let Some(mt) = self.message_type {
            writer.emit(field::MESSAGE_TYPE, &[mt.into()])?;
        }
        if let Some(hostname) = &self.hostname {
            writer.emit(field::HOST_NAME, hostname.as_bytes())?;
        }
        if let Some(id) = self.client_identifier {
            let mut buf = [0u8; 7];
            buf[0] = 1;
            buf[1..].copy_from_slice(&id);
            writer.emit(field::CLIENT_IDENTIFIER, &buf)?;
        }
        if self.rapid_commit {
            writer.emit(field::RAPID_COMMIT, &[])?;
        }
        if let Some(addr) = self.server_identifier {
            writer.emit(field::SERVER_IDENTIFIER, &addr.octets())?;
        }
        if let Some(addr) = self.requested_ip {
            writer.emit(field::REQUESTED_IP, &addr.octets())?;
        }
        if let Some(prl) = &self.parameter_request_list {
            writer.emit(field::PARAMETER_REQUEST_LIST, prl)?;
        }
        if let Some(addr) = self.subnet_mask {
            writer.emit(field::SUBNET_MASK, &addr.octets())?;
        }
        if let Some(addr) = self.router {
            writer.emit(field::ROUTER, &addr.octets())?;
        }
        if !self.dns_servers.is_empty() {
            let mut buf = Vec::with_capacity(self.dns_servers.len() * 4);
            for addr in &self.dns_servers {
                buf.extend_from_slice(&addr.octets());
            }
            writer.emit(field::DNS_SERVER, &buf)?;
        }
        if let Some(mtu) = self.mtu {
            let mut buf = [0u8; 2];
            NetworkEndian::write_u16(&mut buf, mtu);
            writer.emit(field::INTERFACE_MTU, &buf)?;
        }
        if let Some(lease) = self.lease_time_secs {
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, lease);
            writer.emit(field::LEASE_TIME, &buf)?;
        }
        if let Some(t1) = self.renewal_time_t1_secs {
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, t1);
            writer.emit(field::RENEWAL_TIME_T1, &buf)?;
        }
        if let Some(t2) = self.rebinding_time_t2_secs {
            let mut buf = [0u8; 4];
            NetworkEndian::write_u32(&mut buf, t2);
            writer.emit(field::REBINDING_TIME_T2, &buf)?;
        }
        let options_len = writer.end()?;
        Ok(header::OPTIONS.start + options_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discover_repr() -> Repr {
        Repr {
            message_type: Some(MessageType::Discover),
            transaction_id: 0x1234_5678,
            secs: 3,
            broadcast: true,
            client_hardware_address: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            hostname: Some("test-host".into()),
            parameter_request_list: Some(vec![
                field::SUBNET_MASK,
                field::ROUTER,
                field::DNS_SERVER,
                field::INTERFACE_MTU,
                field::LEASE_TIME,
                field::RENEWAL_TIME_T1,
                field::REBINDING_TIME_T2,
            ]),
            ..Repr::default()
        }
    }

    #[test]
    fn round_trips_discover() {
        let repr = discover_repr();
        let mut buffer = vec![0u8; MAX_MESSAGE_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        let len = repr.emit(OpCode::BootRequest, &mut packet).unwrap();
        buffer.truncate(len.max(MIN_MESSAGE_LEN));

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(packet.xid(), 0x1234_5678);
        assert!(packet.broadcast());
        assert_eq!(packet.chaddr(), [0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.message_type, Some(MessageType::Discover));
        assert_eq!(parsed.transaction_id, 0x1234_5678);
        assert_eq!(parsed.hostname.as_deref(), Some("test-host"));
        assert_eq!(
            parsed.parameter_request_list,
            Some(vec![
                field::SUBNET_MASK,
                field::ROUTER,
                field::DNS_SERVER,
                field::INTERFACE_MTU,
                field::LEASE_TIME,
                field::RENEWAL_TIME_T1,
                field::REBINDING_TIME_T2,
            ])
        );
    }

    #[test]
    fn round_trips_ack_options() {
        let repr = Repr {
            message_type: Some(MessageType::Ack),
            transaction_id: 7,
            client_hardware_address: [1, 2, 3, 4, 5, 6],
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            server_identifier: Some(Ipv4Addr::new(192, 0, 2, 1)),
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            router: Some(Ipv4Addr::new(192, 0, 2, 1)),
            dns_servers: vec![Ipv4Addr::new(192, 0, 2, 53)],
            mtu: Some(1500),
            lease_time_secs: Some(600),
            renewal_time_t1_secs: Some(300),
            rebinding_time_t2_secs: Some(525),
            ..Repr::default()
        };

        // The high-level ack fields (subnet mask, router, dns, mtu, T1/T2)
        // are commit-time inputs, not something we emit from the client, but
        // a server-shaped encode/decode must still round-trip identically
        // since the client parses them from a real server reply.
        let mut buffer = vec![0u8; MAX_MESSAGE_LEN];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            packet.set_op(OpCode::BootReply);
            packet.set_htype(1);
            packet.set_hlen(6);
            packet.set_xid(repr.transaction_id);
            packet.set_yiaddr(repr.yiaddr);
            packet.set_chaddr(repr.client_hardware_address);
            packet.set_magic_cookie();
            let mut writer = OptionWriter::new(packet.options_mut());
            writer.emit(field::MESSAGE_TYPE, &[MessageType::Ack.into()]).unwrap();
            writer.emit(field::SERVER_IDENTIFIER, &repr.server_identifier.unwrap().octets()).unwrap();
            writer.emit(field::SUBNET_MASK, &repr.subnet_mask.unwrap().octets()).unwrap();
            writer.emit(field::ROUTER, &repr.router.unwrap().octets()).unwrap();
            writer.emit(field::DNS_SERVER, &repr.dns_servers[0].octets()).unwrap();
            let mut mtu_buf = [0u8; 2];
            NetworkEndian::write_u16(&mut mtu_buf, repr.mtu.unwrap());
            writer.emit(field::INTERFACE_MTU, &mtu_buf).unwrap();
            let mut lease_buf = [0u8; 4];
            NetworkEndian::write_u32(&mut lease_buf, repr.lease_time_secs.unwrap());
            writer.emit(field::LEASE_TIME, &lease_buf).unwrap();
            let mut t1_buf = [0u8; 4];
            NetworkEndian::write_u32(&mut t1_buf, repr.renewal_time_t1_secs.unwrap());
            writer.emit(field::RENEWAL_TIME_T1, &t1_buf).unwrap();
            let mut t2_buf = [0u8; 4];
            NetworkEndian::write_u32(&mut t2_buf, repr.rebinding_time_t2_secs.unwrap());
            writer.emit(field::REBINDING_TIME_T2, &t2_buf).unwrap();
            writer.end().unwrap();
        }

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.yiaddr, repr.yiaddr);
        assert_eq!(parsed.server_identifier, repr.server_identifier);
        assert_eq!(parsed.subnet_mask, repr.subnet_mask);
        assert_eq!(parsed.router, repr.router);
        assert_eq!(parsed.dns_servers, repr.dns_servers);
        assert_eq!(parsed.mtu, repr.mtu);
        assert_eq!(parsed.lease_time_secs, repr.lease_time_secs);
        assert_eq!(parsed.renewal_time_t1_secs, repr.renewal_time_t1_secs);
        assert_eq!(parsed.rebinding_time_t2_secs, repr.rebinding_time_t2_secs);
    }

    #[test]
    fn exact_header_with_only_end_option_parses_with_no_options() {
        let mut buffer = vec![0u8; HEADER_LEN + 4 + 1];
        NetworkEndian::write_u32(&mut buffer[HEADER_LEN..HEADER_LEN + 4], MAGIC_COOKIE);
        buffer[HEADER_LEN + 4] = field::END;
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        let repr = Repr::parse(&packet).unwrap();
        assert!(repr.message_type.is_none());
    }

    #[test]
    fn client_identifier_round_trips() {
        let repr = Repr {
            message_type: Some(MessageType::Discover),
            transaction_id: 1,
            client_hardware_address: [1, 2, 3, 4, 5, 6],
            client_identifier: Some([1, 2, 3, 4, 5, 6]),
            ..Repr::default()
        };
        let mut buffer = vec![0u8; MAX_MESSAGE_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        let len = repr.emit(OpCode::BootRequest, &mut packet).unwrap();
        buffer.truncate(len.max(MIN_MESSAGE_LEN));
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.client_identifier, Some([1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn one_byte_short_is_rejected() {
        let buffer = vec![0u8; HEADER_LEN + 3];
        assert_eq!(Packet::new_checked(&buffer[..]).unwrap_err(), Error::Truncated);
    }
}
