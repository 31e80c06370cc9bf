//! DHCPv6 wire format (RFC 3315/8415 §8, §21).

use byteorder::{ByteOrder, NetworkEndian};
use std::net::Ipv6Addr;

use crate::error::{Error, Result};

pub const SERVER_PORT: u16 = 547;
pub const CLIENT_PORT: u16 = 546;

pub const MAX_DNS_SERVERS: usize = 4;
pub const MAX_IA_ADDRESSES: usize = 4;
pub const MAX_REQUEST_OPTIONS: usize = 8;

const HEADER_LEN: usize = 4;

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
    pub enum MessageType(u8) {
        Solicit = 1,
        Advertise = 2,
        Request = 3,
        Confirm = 4,
        Renew = 5,
        Rebind = 6,
        Reply = 7,
        Release = 8,
        Decline = 9,
        Reconfigure = 10,
        InformationRequest = 11,
    }
}

enum_with_unknown! {
    pub enum StatusCode(u16) {
        Success = 0,
        UnspecFail = 1,
        NoAddrsAvail = 2,
        NoBinding = 3,
        NotOnLink = 4,
        UseMulticast = 5,
    }
}

/// Option codes used by this client (RFC 8415 §21).
pub mod field {
    pub const OPT_CLIENTID: u16 = 1;
    pub const OPT_SERVERID: u16 = 2;
    pub const OPT_IA_NA: u16 = 3;
    pub const OPT_IA_ADDR: u16 = 5;
    pub const OPT_ORO: u16 = 6;
    pub const OPT_PREFERENCE: u16 = 7;
    pub const OPT_ELAPSED_TIME: u16 = 8;
    pub const OPT_STATUS_CODE: u16 = 13;
    pub const OPT_RAPID_COMMIT: u16 = 14;
    pub const OPT_DNS_SERVERS: u16 = 23;
    pub const OPT_DOMAIN_LIST: u16 = 24;
    pub const OPT_FQDN: u16 = 39;
}

#[derive(Debug, Clone, Copy)]
pub struct Dhcpv6Option<'a> {
    pub code: u16,
    pub data: &'a [u8],
}

pub struct OptionIter<'a> {
    data: &'a [u8],
}

impl<'a> OptionIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        OptionIter { data }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<Dhcpv6Option<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 4 {
            self.data = &[];
            return Some(Err(Error::Truncated));
        }
        let code = NetworkEndian::read_u16(&self.data[0..2]);
        let len = NetworkEndian::read_u16(&self.data[2..4]) as usize;
        if self.data.len() < 4 + len {
            self.data = &[];
            return Some(Err(Error::Truncated));
        }
        let data = &self.data[4..4 + len];
        self.data = &self.data[4 + len..];
        Some(Ok(Dhcpv6Option { code, data }))
    }
}

pub struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> OptionWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        OptionWriter { buffer, pos: 0 }
    }

    pub fn emit(&mut self, code: u16, data: &[u8]) -> Result<()> {
        if data.len() > u16::MAX as usize {
            return Err(Error::Exhausted);
        }
        let total = 4 + data.len();
        if self.buffer.len() - self.pos < total {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u16(&mut self.buffer[self.pos..self.pos + 2], code);
        NetworkEndian::write_u16(&mut self.buffer[self.pos + 2..self.pos + 4], data.len() as u16);
        self.buffer[self.pos + 4..self.pos + 4 + data.len()].copy_from_slice(data);
        self.pos += total;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

/// A read/write wrapper around a DHCPv6 message buffer.
#[derive(Debug, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        if buffer.as_ref().len() < HEADER_LEN {
            return Err(Error::Truncated);
        }
        Ok(Packet { buffer })
    }

    pub fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn msg_type(&self) -> MessageType {
        self.buffer.as_ref()[0].into()
    }

    pub fn transaction_id(&self) -> u32 {
        let b = self.buffer.as_ref();
        u32::from(b[1]) << 16 | u32::from(b[2]) << 8 | u32::from(b[3])
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[HEADER_LEN..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_msg_type(&mut self, msg_type: MessageType) {
        self.buffer.as_mut()[0] = msg_type.into();
    }

    pub fn set_transaction_id(&mut self, xid: u32) {
        let b = self.buffer.as_mut();
        b[1] = (xid >> 16) as u8;
        b[2] = (xid >> 8) as u8;
        b[3] = xid as u8;
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[HEADER_LEN..]
    }
}

/// A single IA Address sub-option (§21.6): one address plus its lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddr {
    pub addr: Ipv6Addr,
    pub preferred_lifetime_secs: u32,
    pub valid_lifetime_secs: u32,
}

/// A decoded IA_NA option (§21.4).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IaNa {
    pub iaid: u32,
    pub t1_secs: u32,
    pub t2_secs: u32,
    pub addresses: Vec<IaAddr>,
    pub status_code: Option<StatusCode>,
}

impl IaNa {
    fn parse(data: &[u8]) -> Result<IaNa> {
        if data.len() < 12 {
            return Err(Error::Truncated);
        }
        let iaid = NetworkEndian::read_u32(&data[0..4]);
        let t1_secs = NetworkEndian::read_u32(&data[4..8]);
        let t2_secs = NetworkEndian::read_u32(&data[8..12]);
        if t1_secs > t2_secs && t2_secs > 0 {
            return Err(Error::Truncated);
        }

        let mut addresses = Vec::new();
        let mut status_code = None;
        for option in OptionIter::new(&data[12..]) {
            let option = option?;
            match option.code {
                field::OPT_IA_ADDR => {
                    if option.data.len() < 24 {
                        // A malformed sub-option is discarded, not fatal to the message (§7).
                        continue;
                    }
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&option.data[0..16]);
                    let preferred = NetworkEndian::read_u32(&option.data[16..20]);
                    let valid = NetworkEndian::read_u32(&option.data[20..24]);
                    if preferred > valid {
                        continue;
                    }
                    if addresses.len() < MAX_IA_ADDRESSES {
                        addresses.push(IaAddr {
                            addr: Ipv6Addr::from(octets),
                            preferred_lifetime_secs: preferred,
                            valid_lifetime_secs: valid,
                        });
                    }
                }
                field::OPT_STATUS_CODE if option.data.len() >= 2 => {
                    status_code = Some(NetworkEndian::read_u16(&option.data[0..2]).into());
                }
                _ => {}
            }
        }

        Ok(IaNa {
            iaid,
            t1_secs,
            t2_secs,
            addresses,
            status_code,
        })
    }

    fn emit(&self, writer: &mut OptionWriter, addr_buf: &mut [u8]) -> Result<()> {
        let mut body = [0u8; 12];
        NetworkEndian::write_u32(&mut body[0..4], self.iaid);
        NetworkEndian::write_u32(&mut body[4..8], self.t1_secs);
        NetworkEndian::write_u32(&mut body[8..12], self.t2_secs);

        let mut addr_writer = OptionWriter::new(addr_buf);
        for addr in &self.addresses {
            let mut data = [0u8; 24];
            data[0..16].copy_from_slice(&addr.addr.octets());
            NetworkEndian::write_u32(&mut data[16..20], addr.preferred_lifetime_secs);
            NetworkEndian::write_u32(&mut data[20..24], addr.valid_lifetime_secs);
            addr_writer.emit(field::OPT_IA_ADDR, &data)?;
        }
        let addr_len = addr_writer.position();

        let mut full = Vec::with_capacity(12 + addr_len);
        full.extend_from_slice(&body);
        full.extend_from_slice(&addr_buf[..addr_len]);
        writer.emit(field::OPT_IA_NA, &full)
    }
}

/// High level representation of a DHCPv6 message (§4.2).
#[derive(Debug, Clone, Default)]
pub struct Repr {
    pub message_type: Option<MessageType>,
    pub transaction_id: u32,
    pub client_id: Option<Vec<u8>>,
    pub server_id: Option<Vec<u8>>,
    pub ia_na: Option<IaNa>,
    pub elapsed_time_centisecs: Option<u16>,
    pub request_options: Option<Vec<u16>>,
    pub rapid_commit: bool,
    pub preference: Option<u8>,
    pub status_code: Option<StatusCode>,
    pub dns_servers: Vec<Ipv6Addr>,
    pub fqdn: Option<String>,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        let mut repr = Repr {
            message_type: Some(packet.msg_type()),
            transaction_id: packet.transaction_id(),
            ..Repr::default()
        };

        for option in OptionIter::new(packet.options()) {
            let option = option?;
            match option.code {
                field::OPT_CLIENTID => repr.client_id = Some(option.data.to_vec()),
                field::OPT_SERVERID => repr.server_id = Some(option.data.to_vec()),
                field::OPT_ORO => {
                    repr.request_options =
                        Some(option.data.chunks_exact(2).map(NetworkEndian::read_u16).collect());
                }
                // First successful IA_NA wins; later ones are parsed only far
                // enough to validate, per §9's under-specified multi-IA_NA
                // behavior (documented decision in DESIGN.md).
                field::OPT_IA_NA if repr.ia_na.is_none() => {
                    if let Ok(ia_na) = IaNa::parse(option.data) {
                        repr.ia_na = Some(ia_na);
                    }
                }
                field::OPT_ELAPSED_TIME if option.data.len() == 2 => {
                    repr.elapsed_time_centisecs = Some(NetworkEndian::read_u16(option.data));
                }
                field::OPT_RAPID_COMMIT => repr.rapid_commit = true,
                field::OPT_PREFERENCE if option.data.len() == 1 => {
                    repr.preference = Some(option.data[0]);
                }
                field::OPT_STATUS_CODE if option.data.len() >= 2 => {
                    repr.status_code = Some(NetworkEndian::read_u16(&option.data[0..2]).into());
                }
                field::OPT_DNS_SERVERS => {
                    for chunk in option.data.chunks_exact(16) {
                        if repr.dns_servers.len() >= MAX_DNS_SERVERS {
                            break;
                        }
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(chunk);
                        repr.dns_servers.push(Ipv6Addr::from(octets));
                    }
                }
                field::OPT_FQDN if !option.data.is_empty() => {
                    // flags(1) + wire-encoded domain name; we decode it as raw label text.
                    repr.fqdn = core::str::from_utf8(&option.data[1..]).ok().map(String::from);
                }
                _ => {}
            }
        }

        Ok(repr)
    }

    pub fn add_request_option(&mut self, code: u16) {
        let options = self.request_options.get_or_insert_with(Vec::new);
        if !options.contains(&code) {
            options.push(code);
        }
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) -> Result<usize> {
        packet.set_msg_type(self.message_type.unwrap_or(MessageType::Solicit));
        packet.set_transaction_id(self.transaction_id);

        let mut scratch = [0u8; 512];
        let mut writer = OptionWriter::new(packet.options_mut());
        if let Some(client_id) = &self.client_id {
            writer.emit(field::OPT_CLIENTID, client_id)?;
        }
        if let Some(server_id) = &self.server_id {
            writer.emit(field::OPT_SERVERID, server_id)?;
        }
        if let Some(ia_na) = &self.ia_na {
            ia_na.emit(&mut writer, &mut scratch)?;
        }
        if let Some(elapsed) = self.elapsed_time_centisecs {
            let mut buf = [0u8; 2];
            NetworkEndian::write_u16(&mut buf, elapsed);
            writer.emit(field::OPT_ELAPSED_TIME, &buf)?;
        }
        if self.rapid_commit {
            writer.emit(field::OPT_RAPID_COMMIT, &[])?;
        }
        if let Some(preference) = self.preference {
            writer.emit(field::OPT_PREFERENCE, &[preference])?;
        }
        if let Some(options) = &self.request_options {
            let mut buf = [0u8; MAX_REQUEST_OPTIONS * 2];
            for (i, code) in options.iter().enumerate().take(MAX_REQUEST_OPTIONS) {
                NetworkEndian::write_u16(&mut buf[i * 2..i * 2 + 2], *code);
            }
            writer.emit(field::OPT_ORO, &buf[..options.len().min(MAX_REQUEST_OPTIONS) * 2])?;
        }
        if let Some(fqdn) = &self.fqdn {
            let mut buf = Vec::with_capacity(1 + fqdn.len());
            buf.push(0); // flags: client performs its own DNS updates.
            buf.extend_from_slice(fqdn.as_bytes());
            writer.emit(field::OPT_FQDN, &buf)?;
        }

        Ok(HEADER_LEN + writer.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_solicit_with_ia_na() {
        let mut repr = Repr {
            message_type: Some(MessageType::Solicit),
            transaction_id: 0xABCDEF,
            client_id: Some(vec![0, 3, 0, 1, 2, 0, 0, 0, 0, 1]),
            ia_na: Some(IaNa {
                iaid: 7,
                t1_secs: 0,
                t2_secs: 0,
                addresses: vec![IaAddr {
                    addr: "2001:db8::dead".parse().unwrap(),
                    preferred_lifetime_secs: 3600,
                    valid_lifetime_secs: 7200,
                }],
                status_code: None,
            }),
            elapsed_time_centisecs: Some(0),
            ..Repr::default()
        };
        repr.add_request_option(field::OPT_DNS_SERVERS);
        repr.add_request_option(field::OPT_DOMAIN_LIST);
        repr.add_request_option(field::OPT_FQDN);

        let mut buffer = vec![0u8; 512];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        let len = repr.emit(&mut packet).unwrap();
        buffer.truncate(len);

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(packet.msg_type(), MessageType::Solicit);
        assert_eq!(packet.transaction_id(), 0xABCDEF);

        let parsed = Repr::parse(&packet).unwrap();
        assert_eq!(parsed.client_id, repr.client_id);
        assert_eq!(parsed.ia_na.as_ref().unwrap().addresses, repr.ia_na.as_ref().unwrap().addresses);
        assert_eq!(parsed.request_options, repr.request_options);
    }

    #[test]
    fn ia_na_with_t1_greater_than_t2_is_rejected() {
        let mut data = [0u8; 12];
        NetworkEndian::write_u32(&mut data[4..8], 200);
        NetworkEndian::write_u32(&mut data[8..12], 100);
        assert!(IaNa::parse(&data).is_err());
    }

    #[test]
    fn ia_addr_with_preferred_greater_than_valid_is_discarded() {
        let mut ia_data = [0u8; 12 + 28];
        ia_data[12] = 0;
        ia_data[13] = field::OPT_IA_ADDR as u8;
        NetworkEndian::write_u16(&mut ia_data[14..16], 24);
        NetworkEndian::write_u32(&mut ia_data[12 + 4 + 16..12 + 4 + 20], 500);
        NetworkEndian::write_u32(&mut ia_data[12 + 4 + 20..12 + 4 + 24], 100);
        let ia_na = IaNa::parse(&ia_data).unwrap();
        assert!(ia_na.addresses.is_empty());
    }
}
