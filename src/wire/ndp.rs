//! NDP wire formats used by the SLAAC engine (RFC 4861, RFC 4862, RFC 8106):
//! Router Solicitation/Advertisement, Neighbor Solicitation/Advertisement
//! (for DAD), the Prefix Information option, and the RDNSS option.

use byteorder::{ByteOrder, NetworkEndian};
use std::net::Ipv6Addr;

use crate::error::{Error, Result};

const ICMPV6_RTR_SOLICIT: u8 = 133;
const ICMPV6_RTR_ADVERT: u8 = 134;
const ICMPV6_NEIGHBOR_SOLICIT: u8 = 135;
const ICMPV6_NEIGHBOR_ADVERT: u8 = 136;

pub mod option {
    pub const SOURCE_LL_ADDR: u8 = 1;
    pub const TARGET_LL_ADDR: u8 = 2;
    pub const PREFIX_INFORMATION: u8 = 3;
    pub const RECURSIVE_DNS_SERVER: u8 = 25;
}

bitflags::bitflags! {
    pub struct RouterFlags: u8 {
        const MANAGED = 0b1000_0000;
        const OTHER_CONFIG = 0b0100_0000;
    }
}

bitflags::bitflags! {
    pub struct PrefixInfoFlags: u8 {
        const ON_LINK = 0b1000_0000;
        const AUTONOMOUS = 0b0100_0000;
    }
}

/// A decoded Prefix Information option (RFC 4861 §4.6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixInformation {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime_secs: u32,
    pub preferred_lifetime_secs: u32,
}

/// A decoded Recursive DNS Server option (RFC 8106 §5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursiveDnsServer {
    pub lifetime_secs: u32,
    pub servers: Vec<Ipv6Addr>,
}

/// A minimal option iterator over the type-length-in-8-octets-value
/// encoding all NDP options share.
struct OptionIter<'a> {
    data: &'a [u8],
}

struct RawOption<'a> {
    kind: u8,
    data: &'a [u8],
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<RawOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 2 {
            self.data = &[];
            return Some(Err(Error::Truncated));
        }
        let kind = self.data[0];
        let len_units = self.data[1] as usize;
        if len_units == 0 {
            self.data = &[];
            return Some(Err(Error::Truncated));
        }
        let total = len_units * 8;
        if self.data.len() < total {
            self.data = &[];
            return Some(Err(Error::Truncated));
        }
        let data = &self.data[2..total];
        self.data = &self.data[total..];
        Some(Ok(RawOption { kind, data }))
    }
}

/// Router Advertisement representation, with only the fields SLAAC needs.
#[derive(Debug, Clone, Default)]
pub struct RouterAdvert {
    pub cur_hop_limit: u8,
    pub managed: bool,
    pub other_config: bool,
    pub router_lifetime_secs: u16,
    pub reachable_time_ms: u32,
    pub retrans_timer_ms: u32,
    pub prefixes: Vec<PrefixInformation>,
    pub rdnss: Vec<RecursiveDnsServer>,
}

impl RouterAdvert {
    /// Parse an ICMPv6 Router Advertisement body (type/code/checksum
    /// stripped, starting at the 4-octet fixed header of RFC 4861 §4.2).
    pub fn parse(data: &[u8]) -> Result<RouterAdvert> {
        if data.len() < 12 {
            return Err(Error::Truncated);
        }
        let flags = data[1];
        let mut advert = RouterAdvert {
            cur_hop_limit: data[0],
            managed: flags & RouterFlags::MANAGED.bits() != 0,
            other_config: flags & RouterFlags::OTHER_CONFIG.bits() != 0,
            router_lifetime_secs: NetworkEndian::read_u16(&data[2..4]),
            reachable_time_ms: NetworkEndian::read_u32(&data[4..8]),
            retrans_timer_ms: NetworkEndian::read_u32(&data[8..12]),
            prefixes: Vec::new(),
            rdnss: Vec::new(),
        };

        for option in (OptionIter { data: &data[12..] }) {
            let option = option?;
            match option.kind {
                option::PREFIX_INFORMATION if option.data.len() >= 30 => {
                    let prefix_len = option.data[0];
                    let pflags = option.data[1];
                    let valid = NetworkEndian::read_u32(&option.data[2..6]);
                    let preferred = NetworkEndian::read_u32(&option.data[6..10]);
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&option.data[14..30]);
                    advert.prefixes.push(PrefixInformation {
                        prefix: Ipv6Addr::from(octets),
                        prefix_len,
                        on_link: pflags & PrefixInfoFlags::ON_LINK.bits() != 0,
                        autonomous: pflags & PrefixInfoFlags::AUTONOMOUS.bits() != 0,
                        valid_lifetime_secs: valid,
                        preferred_lifetime_secs: preferred,
                    });
                }
                option::RECURSIVE_DNS_SERVER if option.data.len() >= 6 => {
                    let lifetime_secs = NetworkEndian::read_u32(&option.data[2..6]);
                    let servers = option.data[6..]
                        .chunks_exact(16)
                        .map(|chunk| {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(chunk);
                            Ipv6Addr::from(octets)
                        })
                        .collect();
                    advert.rdnss.push(RecursiveDnsServer { lifetime_secs, servers });
                }
                _ => {}
            }
        }

        Ok(advert)
    }
}

/// Emit a bare Router Solicitation body (RFC 4861 §4.1): 4 reserved octets,
/// no options (the source link-layer address option is omitted when the
/// soliciting address is the unspecified address, as it is during SLAAC's
/// first solicitation).
pub fn emit_router_solicit(buf: &mut [u8]) -> Result<usize> {
    if buf.len() < 4 {
        return Err(Error::Exhausted);
    }
    buf[0..4].copy_from_slice(&[0, 0, 0, 0]);
    Ok(4)
}

/// Emit a Neighbor Solicitation body for DAD (RFC 4861 §4.3): 4 reserved
/// octets followed by the 16-octet target address, no options.
pub fn emit_neighbor_solicit(target: Ipv6Addr, buf: &mut [u8]) -> Result<usize> {
    if buf.len() < 20 {
        return Err(Error::Exhausted);
    }
    buf[0..4].copy_from_slice(&[0, 0, 0, 0]);
    buf[4..20].copy_from_slice(&target.octets());
    Ok(20)
}

pub const fn icmpv6_type_router_solicit() -> u8 {
    ICMPV6_RTR_SOLICIT
}

pub const fn icmpv6_type_router_advert() -> u8 {
    ICMPV6_RTR_ADVERT
}

pub const fn icmpv6_type_neighbor_solicit() -> u8 {
    ICMPV6_NEIGHBOR_SOLICIT
}

pub const fn icmpv6_type_neighbor_advert() -> u8 {
    ICMPV6_NEIGHBOR_ADVERT
}
