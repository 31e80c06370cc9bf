//! IPv6 Stateless Address Autoconfiguration (RFC 4862 §5, RFC 4861).

use std::net::Ipv6Addr;
use std::sync::Mutex;

use crate::error::Result;
use crate::eui64::mac_addr_to_eui64;
use crate::interface::{AddrState, Clock, NetworkInterface, RandomSource};
use crate::time::{Duration, Instant};
use crate::wire::ndp::{PrefixInformation, RouterAdvert};

/// RFC 4861 §10 default for the neighbor-solicit retransmit timer; not
/// currently exposed as a setting since no review surfaced a need to tune it.
const RETRANS_TIMER: Duration = Duration::from_millis(1_000);

type RaParsedCallback = Box<dyn FnMut(&RouterAdvert) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    LinkLocalAddrDad,
    RouterSolicit,
    GlobalAddrDad,
    Configured,
    NoRouter,
    DadFailure,
}

pub struct Settings {
    pub accept_ra: bool,
    pub manual_dns_config: bool,
    /// RFC 4861 §10: random delay before the first Router Solicitation,
    /// drawn uniformly from `[min_rtr_solicitation_delay, max_rtr_solicitation_delay]`.
    pub min_rtr_solicitation_delay: Duration,
    pub max_rtr_solicitation_delay: Duration,
    pub rtr_solicitation_interval: Duration,
    pub max_rtr_solicitations: u32,
    pub dup_addr_detect_transmits: u32,
    pub on_ra_parsed: Option<RaParsedCallback>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            accept_ra: true,
            manual_dns_config: false,
            min_rtr_solicitation_delay: Duration::ZERO,
            max_rtr_solicitation_delay: Duration::from_millis(1_000),
            rtr_solicitation_interval: Duration::from_millis(4_000),
            max_rtr_solicitations: 3,
            dup_addr_detect_transmits: 1,
            on_ra_parsed: None,
        }
    }
}

struct Inner {
    state: State,
    settings: Settings,
    link_local: Ipv6Addr,
    global: Option<Ipv6Addr>,
    prefix_len: u8,
    dad_transmits_sent: u32,
    dad_deadline: Instant,
    rs_sent: u32,
    rs_deadline: Instant,
    dns_servers: Vec<Ipv6Addr>,
}

pub struct SlaacEngine {
    inner: Mutex<Inner>,
}

impl SlaacEngine {
    pub fn get_default_settings() -> Settings {
        Settings::default()
    }

    pub fn init(mac: [u8; 6], settings: Settings) -> Result<SlaacEngine> {
        let iid = mac_addr_to_eui64(mac);
        let mut octets = [0u8; 16];
        octets[0] = 0xfe;
        octets[1] = 0x80;
        octets[8..16].copy_from_slice(&iid);
        let link_local = Ipv6Addr::from(octets);

        Ok(SlaacEngine {
            inner: Mutex::new(Inner {
                state: State::Init,
                settings,
                link_local,
                global: None,
                prefix_len: 0,
                dad_transmits_sent: 0,
                dad_deadline: Instant::ZERO,
                rs_sent: 0,
                rs_deadline: Instant::ZERO,
                dns_servers: Vec::new(),
            }),
        })
    }

    pub fn get_state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    pub fn link_local_address(&self) -> Ipv6Addr {
        self.inner.lock().unwrap().link_local
    }

    pub fn global_address(&self) -> Option<Ipv6Addr> {
        self.inner.lock().unwrap().global
    }

    pub fn start<I: NetworkInterface, C: Clock>(&self, iface: &mut I, clock: &C) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::LinkLocalAddrDad;
        inner.dad_transmits_sent = 0;
        let addr = inner.link_local;
        iface.set_link_local_addr(AddrState::Tentative(addr));
        begin_dad(&mut inner, iface, clock, addr)
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Init;
        inner.global = None;
    }

    pub fn tick<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = clock.now();

        match inner.state {
            State::LinkLocalAddrDad => {
                if now >= inner.dad_deadline {
                    if iface.duplicate_detected(inner.link_local) {
                        log::warn!("slaac: DAD failure on link-local {}", inner.link_local);
                        iface.set_link_local_addr(AddrState::Invalid);
                        inner.state = State::DadFailure;
                        return Ok(());
                    }
                    if inner.dad_transmits_sent < inner.settings.dup_addr_detect_transmits {
                        let addr = inner.link_local;
                        begin_dad(&mut inner, iface, clock, addr)?;
                    } else {
                        log::debug!("slaac: link-local {} confirmed unique", inner.link_local);
                        iface.set_link_local_addr(AddrState::Preferred(inner.link_local));
                        inner.state = State::RouterSolicit;
                        inner.rs_sent = 0;
                        // RFC 4861 §6.3.7: delay the first solicitation to
                        // avoid synchronized bursts after, e.g., a link-wide
                        // power-up.
                        let delay = rand.rand_range(
                            inner.settings.min_rtr_solicitation_delay.total_millis() as u32,
                            inner.settings.max_rtr_solicitation_delay.total_millis() as u32,
                        );
                        inner.rs_deadline = now + Duration::from_millis(delay as u64);
                    }
                }
            }
            State::RouterSolicit => {
                if now >= inner.rs_deadline {
                    if inner.rs_sent >= inner.settings.max_rtr_solicitations {
                        log::debug!("slaac: no router found after {} solicitations", inner.rs_sent);
                        inner.state = State::NoRouter;
                        return Ok(());
                    }
                    iface.send_router_solicit()?;
                    inner.rs_sent += 1;
                    inner.rs_deadline = now + inner.settings.rtr_solicitation_interval;
                }
            }
            State::GlobalAddrDad => {
                if now >= inner.dad_deadline {
                    let addr = match inner.global {
                        Some(addr) => addr,
                        None => return Ok(()),
                    };
                    if iface.duplicate_detected(addr) {
                        log::warn!("slaac: DAD failure on global {}", addr);
                        iface.set_global_addr(AddrState::Invalid);
                        inner.global = None;
                        inner.state = State::DadFailure;
                        return Ok(());
                    }
                    if inner.dad_transmits_sent < inner.settings.dup_addr_detect_transmits {
                        begin_dad(&mut inner, iface, clock, addr)?;
                    } else {
                        log::debug!("slaac: global {} confirmed unique", addr);
                        iface.set_global_addr(AddrState::Preferred(addr));
                        iface.set_prefix(prefix_of(addr, inner.prefix_len), inner.prefix_len);
                        if !inner.settings.manual_dns_config && !inner.dns_servers.is_empty() {
                            iface.set_dns_servers_v6(&inner.dns_servers);
                        }
                        inner.state = State::Configured;
                    }
                }
            }
            State::Init | State::Configured | State::NoRouter | State::DadFailure => {}
        }
        Ok(())
    }

    /// Process a received Router Advertisement (RFC 4861 §6.1.2).
    pub fn on_router_advert<I: NetworkInterface, C: Clock>(&self, iface: &mut I, clock: &C, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.settings.accept_ra {
            return;
        }
        if !matches!(inner.state, State::RouterSolicit | State::NoRouter | State::Configured) {
            return;
        }
        let advert = match RouterAdvert::parse(data) {
            Ok(advert) => advert,
            Err(_) => {
                log::debug!("slaac: dropping malformed router advertisement");
                return;
            }
        };

        if let Some(cb) = inner.settings.on_ra_parsed.as_mut() {
            cb(&advert);
        }

        if !advert.rdnss.is_empty() {
            inner.dns_servers = advert.rdnss.iter().flat_map(|r| r.servers.clone()).collect();
        }

        let autonomous_prefix = advert.prefixes.iter().find(|p| is_autoconf_eligible(p));
        let prefix = match autonomous_prefix {
            Some(prefix) => *prefix,
            None => {
                if inner.state == State::RouterSolicit {
                    inner.state = State::NoRouter;
                }
                return;
            }
        };

        let iid = match inner.global {
            Some(addr) => addr.octets()[8..16].try_into().unwrap(),
            None => {
                let ll = inner.link_local.octets();
                let mut iid = [0u8; 8];
                iid.copy_from_slice(&ll[8..16]);
                iid
            }
        };
        let mut octets = prefix.prefix.octets();
        octets[8..16].copy_from_slice(&iid);
        let global = Ipv6Addr::from(octets);

        log::trace!("slaac: forming global address {} from prefix {}/{}", global, prefix.prefix, prefix.prefix_len);
        inner.global = Some(global);
        inner.prefix_len = prefix.prefix_len;
        iface.set_global_addr(AddrState::Tentative(global));
        inner.state = State::GlobalAddrDad;
        inner.dad_transmits_sent = 0;
        let _ = begin_dad(&mut inner, iface, clock, global);
    }
}

/// RFC 4862 §5.5.3: a prefix is eligible for SLAAC only when it is
/// autonomous, exactly /64 (the length this crate's modified-EUI-64 IID
/// derivation assumes), not the link-local prefix, has a non-zero valid
/// lifetime, and preferred does not exceed valid.
fn is_autoconf_eligible(p: &PrefixInformation) -> bool {
    p.autonomous
        && p.prefix_len == 64
        && !is_link_local_prefix(p.prefix)
        && p.valid_lifetime_secs > 0
        && p.preferred_lifetime_secs <= p.valid_lifetime_secs
}

fn is_link_local_prefix(addr: Ipv6Addr) -> bool {
    let o = addr.octets();
    o[0] == 0xfe && (o[1] & 0xc0) == 0x80
}

fn begin_dad<I: NetworkInterface, C: Clock>(inner: &mut Inner, iface: &mut I, clock: &C, addr: Ipv6Addr) -> Result<()> {
    iface.send_neighbor_solicit(addr, true)?;
    inner.dad_transmits_sent += 1;
    inner.dad_deadline = clock.now() + RETRANS_TIMER;
    Ok(())
}

fn prefix_of(addr: Ipv6Addr, prefix_len: u8) -> Ipv6Addr {
    let mut octets = addr.octets();
    let full_bytes = (prefix_len / 8) as usize;
    let rem_bits = prefix_len % 8;
    for byte in octets.iter_mut().skip(full_bytes.min(16)) {
        *byte = 0;
    }
    if full_bytes < 16 && rem_bits > 0 {
        let mask = 0xFFu8 << (8 - rem_bits);
        octets[full_bytes] &= mask;
    }
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Ipv4Config, Ipv4Endpoint, Ipv6Config, Ipv6Endpoint};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeClock(std::cell::Cell<i64>);
    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            Instant::from_millis(self.0.get())
        }
    }

    struct FakeRand;
    impl RandomSource for FakeRand {
        fn rand_u32(&mut self) -> u32 {
            42
        }
    }

    #[derive(Default)]
    struct FakeIface {
        link_local: Option<Ipv6Addr>,
        global: Option<Ipv6Addr>,
        dns_servers: Vec<Ipv6Addr>,
        ns_sent: u32,
        rs_sent: u32,
        duplicate: bool,
    }

    impl NetworkInterface for FakeIface {
        fn mac_address(&self) -> [u8; 6] {
            [0x02, 0, 0, 0, 0, 1]
        }
        fn link_up(&self) -> bool {
            true
        }
        fn id(&self) -> u32 {
            0
        }
        fn ipv4_config(&self) -> Ipv4Config {
            Ipv4Config::default()
        }
        fn ipv6_config(&self) -> Ipv6Config {
            Ipv6Config::default()
        }
        fn set_host_addr(&mut self, _state: AddrState<Ipv4Addr>) {}
        fn set_subnet_mask(&mut self, _mask: Ipv4Addr) {}
        fn set_default_gateway(&mut self, _gw: Option<Ipv4Addr>) {}
        fn set_mtu_v4(&mut self, _mtu: u16) {}
        fn set_dns_servers_v4(&mut self, _servers: &[Ipv4Addr]) {}
        fn set_link_local_addr(&mut self, state: AddrState<Ipv6Addr>) {
            self.link_local = state.address();
        }
        fn set_global_addr(&mut self, state: AddrState<Ipv6Addr>) {
            self.global = state.address();
        }
        fn set_prefix(&mut self, _prefix: Ipv6Addr, _len: u8) {}
        fn set_dns_servers_v6(&mut self, servers: &[Ipv6Addr]) {
            self.dns_servers = servers.to_vec();
        }
        fn send_udp_v4(&mut self, _src: u16, _dst: Ipv4Endpoint, _buf: &[u8], _ttl: u8) -> Result<()> {
            Ok(())
        }
        fn send_udp_v6(&mut self, _src: u16, _dst: Ipv6Endpoint, _buf: &[u8], _hl: u8) -> Result<()> {
            Ok(())
        }
        fn send_neighbor_solicit(&mut self, _target: Ipv6Addr, _multicast: bool) -> Result<()> {
            self.ns_sent += 1;
            Ok(())
        }
        fn send_router_solicit(&mut self) -> Result<()> {
            self.rs_sent += 1;
            Ok(())
        }
        fn duplicate_detected(&self, _candidate: Ipv6Addr) -> bool {
            self.duplicate
        }
    }

    fn build_ra(prefix_len: u8, flags: u8, prefix_addr: Ipv6Addr, preferred: u32, valid: u32) -> Vec<u8> {
        let mut ra = vec![64, 0b0100_0000, 0, 0, 0, 0, 0x4e, 0x20, 0, 0, 0x13, 0x88];
        let mut prefix_opt = vec![prefix_len, flags];
        prefix_opt.extend_from_slice(&valid.to_be_bytes());
        prefix_opt.extend_from_slice(&preferred.to_be_bytes());
        prefix_opt.extend_from_slice(&[0, 0, 0, 0]);
        prefix_opt.extend_from_slice(&prefix_addr.octets());
        ra.push(3);
        ra.push(4);
        ra.extend_from_slice(&prefix_opt);
        ra
    }

    #[test]
    fn link_local_dad_then_router_solicit_then_global_dad() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();

        engine.start(&mut iface, &clock).unwrap();
        assert_eq!(engine.get_state(), State::LinkLocalAddrDad);
        assert_eq!(iface.ns_sent, 1);

        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(engine.get_state(), State::RouterSolicit);
        assert_eq!(iface.link_local, Some(engine.link_local_address()));

        let prefix_addr: Ipv6Addr = "2001:db8:1::".parse().unwrap();
        let ra = build_ra(64, 0b1100_0000, prefix_addr, 1800, 3600);

        engine.on_router_advert(&mut iface, &clock, &ra);
        assert_eq!(engine.get_state(), State::GlobalAddrDad);
        let global = engine.global_address().unwrap();
        assert_eq!(&global.octets()[0..8], &prefix_addr.octets()[0..8]);

        clock.0.set(4000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(engine.get_state(), State::Configured);
        assert_eq!(iface.global, Some(global));
    }

    #[test]
    fn dad_failure_invalidates_link_local() {
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], Settings::default()).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface { duplicate: true, ..FakeIface::default() };

        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(engine.get_state(), State::DadFailure);
        assert_eq!(iface.link_local, None);
    }

    #[test]
    fn first_router_solicit_is_delayed_not_immediate() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.min_rtr_solicitation_delay = Duration::from_millis(500);
        settings.max_rtr_solicitation_delay = Duration::from_millis(500);
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();

        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(1000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(engine.get_state(), State::RouterSolicit);

        // RS deadline must be 1000 + 500, not immediate at 1000.
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(iface.rs_sent, 0, "router solicit must not fire before the delay elapses");

        clock.0.set(1500);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(iface.rs_sent, 1);
    }

    #[test]
    fn non_64_prefix_is_rejected() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();
        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        let ra = build_ra(56, 0b1100_0000, "2001:db8:1::".parse().unwrap(), 1800, 3600);
        engine.on_router_advert(&mut iface, &clock, &ra);
        assert_eq!(engine.get_state(), State::NoRouter);
    }

    #[test]
    fn link_local_prefix_is_rejected() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();
        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        let ra = build_ra(64, 0b1100_0000, "fe80::".parse().unwrap(), 1800, 3600);
        engine.on_router_advert(&mut iface, &clock, &ra);
        assert_eq!(engine.get_state(), State::NoRouter);
    }

    #[test]
    fn preferred_exceeding_valid_is_rejected() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();
        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        let ra = build_ra(64, 0b1100_0000, "2001:db8:1::".parse().unwrap(), 7200, 3600);
        engine.on_router_advert(&mut iface, &clock, &ra);
        assert_eq!(engine.get_state(), State::NoRouter);
    }

    #[test]
    fn manual_dns_config_skips_applying_rdnss() {
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        settings.manual_dns_config = true;
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();
        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        let mut ra = build_ra(64, 0b1100_0000, "2001:db8:1::".parse().unwrap(), 1800, 3600);
        // RDNSS option: type=25, len=3 (24 bytes), reserved(2), lifetime(4), one server.
        ra.push(25);
        ra.push(3);
        ra.extend_from_slice(&[0, 0]);
        ra.extend_from_slice(&3600u32.to_be_bytes());
        ra.extend_from_slice(&"2001:db8::53".parse::<Ipv6Addr>().unwrap().octets());
        engine.on_router_advert(&mut iface, &clock, &ra);
        clock.0.set(4000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        assert_eq!(engine.get_state(), State::Configured);
        assert!(iface.dns_servers.is_empty());
    }

    #[test]
    fn on_ra_parsed_callback_fires() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = count.clone();
        let mut settings = SlaacEngine::get_default_settings();
        settings.max_rtr_solicitation_delay = Duration::ZERO;
        settings.on_ra_parsed = Some(Box::new(move |_advert| {
            count_cb.fetch_add(1, Ordering::SeqCst);
        }));
        let engine = SlaacEngine::init([0x02, 0, 0, 0, 0, 1], settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand;
        let mut iface = FakeIface::default();
        engine.start(&mut iface, &clock).unwrap();
        clock.0.set(2000);
        engine.tick(&mut iface, &clock, &mut rand).unwrap();

        let ra = build_ra(64, 0b1100_0000, "2001:db8:1::".parse().unwrap(), 1800, 3600);
        engine.on_router_advert(&mut iface, &clock, &ra);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
