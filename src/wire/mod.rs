//! Wire formats for the three protocols this crate speaks.

pub mod dhcpv4;
pub mod dhcpv6;
pub mod ndp;
