//! Modified EUI-64 interface identifier derivation (RFC 4291 appendix A),
//! used by the SLAAC engine to form link-local and global addresses.

/// Derive a 64-bit interface identifier from a 48-bit MAC address: split it
/// around `0xFFFE` and invert the Universal/Local bit of the first octet.
pub fn mac_addr_to_eui64(mac: [u8; 6]) -> [u8; 8] {
    let mut iid = [0u8; 8];
    iid[0] = mac[0] ^ 0x02;
    iid[1] = mac[1];
    iid[2] = mac[2];
    iid[3] = 0xff;
    iid[4] = 0xfe;
    iid[5] = mac[3];
    iid[6] = mac[4];
    iid[7] = mac[5];
    iid
}
