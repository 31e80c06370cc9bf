//! The three protocol engines this crate provides.

pub mod dhcpv4;
pub mod dhcpv6;
pub mod slaac;

pub use dhcpv4::Dhcpv4Client;
pub use dhcpv6::Dhcpv6Client;
pub use slaac::SlaacEngine;
