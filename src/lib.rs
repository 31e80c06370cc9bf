//! Dynamic host-address acquisition core: DHCPv4, DHCPv6 and SLAAC client
//! engines for a surrounding TCP/IP stack (RFC 2131, RFC 2132, RFC 3315/8415,
//! RFC 4861, RFC 4862).
//!
//! Framing, ARP/NDP/IGMP/MLD transport, UDP/IP send-receive, the socket API,
//! DNS resolution and the RTOS primitives themselves are not provided by
//! this crate; see [`interface`] for the seam the surrounding stack
//! implements.

pub mod duid;
pub mod engine;
pub mod error;
pub mod eui64;
pub mod interface;
pub mod time;
pub mod wire;

pub use engine::{Dhcpv4Client, Dhcpv6Client, SlaacEngine};
pub use error::{Error, Result};
pub use interface::{AddrState, Clock, NetworkInterface, RandomSource};
