//! DHCPv4 client state machine (RFC 2131 §4, RFC 2132).

use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::error::Result;
use crate::interface::{AddrState, Clock, Ipv4Endpoint, NetworkInterface, RandomSource};
use crate::time::{Duration, Instant};
use crate::wire::dhcpv4::{self, field, MessageType, OpCode, Packet, Repr};

/// Initial/maximum retransmission timeouts for `DISCOVER` and `REQUEST`
/// (RFC 2131 §4.1's exponential-backoff guidance, matched by real clients).
const DISCOVER_INIT_RT: Duration = Duration::from_millis(4_000);
const DISCOVER_MAX_RT: Duration = Duration::from_millis(64_000);
const REQUEST_INIT_RT: Duration = Duration::from_millis(4_000);
const REQUEST_MAX_RT: Duration = Duration::from_millis(64_000);
const REQUEST_MAX_RC: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Selecting,
    Requesting,
    InitReboot,
    Rebooting,
    Bound,
    Renewing,
    Rebinding,
}

/// Configuration recognized by the client (spec §3): `{interface, hostname,
/// rapid-commit, manual-dns-config, user-timeout, timeout-event callback,
/// link-change callback, state-change callback}`.
pub struct Settings {
    pub hostname: Option<String>,
    pub requested_parameters: Vec<u8>,
    pub rapid_commit: bool,
    pub manual_dns_config: bool,
    /// Advisory deadline since the start of an acquisition attempt after
    /// which `on_timeout` fires once; `Duration::ZERO` disables it.
    pub user_timeout: Duration,
    pub on_timeout: Option<Box<dyn FnMut() + Send>>,
    pub on_link_change: Option<Box<dyn FnMut(bool) + Send>>,
    pub on_state_change: Option<Box<dyn FnMut(State) + Send>>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            hostname: None,
            requested_parameters: vec![
                field::SUBNET_MASK,
                field::ROUTER,
                field::DNS_SERVER,
                field::INTERFACE_MTU,
                field::LEASE_TIME,
                field::RENEWAL_TIME_T1,
                field::REBINDING_TIME_T2,
            ],
            rapid_commit: false,
            manual_dns_config: false,
            user_timeout: Duration::ZERO,
            on_timeout: None,
            on_link_change: None,
            on_state_change: None,
        }
    }
}

/// The lease currently bound, derived from a committed `Ack` (§3).
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub server_identifier: Ipv4Addr,
    pub lease: Duration,
    pub t1: Duration,
    pub t2: Duration,
}

impl Default for Lease {
    fn default() -> Lease {
        Lease {
            address: Ipv4Addr::UNSPECIFIED,
            server_identifier: Ipv4Addr::UNSPECIFIED,
            lease: Duration::ZERO,
            t1: Duration::ZERO,
            t2: Duration::ZERO,
        }
    }
}

struct Inner {
    state: State,
    settings: Settings,
    transaction_id: u32,
    lease: Option<Lease>,
    retransmit_at: Instant,
    retransmit_timeout: Duration,
    retransmit_count: u32,
    lease_obtained_at: Instant,
    requested_ip: Option<Ipv4Addr>,
    /// Server Identifier offered during SELECTING, persisted so
    /// retransmitted REQUESTs in REQUESTING can rebuild it (§4.1).
    server_identifier: Option<Ipv4Addr>,
    config_start: Instant,
    timeout_fired: bool,
}

/// One DHCPv4 client instance, bound to a single interface.
pub struct Dhcpv4Client {
    inner: Mutex<Inner>,
}

impl Dhcpv4Client {
    pub fn get_default_settings() -> Settings {
        Settings::default()
    }

    pub fn init(settings: Settings) -> Result<Dhcpv4Client> {
        Ok(Dhcpv4Client {
            inner: Mutex::new(Inner {
                state: State::Init,
                settings,
                transaction_id: 0,
                lease: None,
                retransmit_at: Instant::ZERO,
                retransmit_timeout: DISCOVER_INIT_RT,
                retransmit_count: 0,
                lease_obtained_at: Instant::ZERO,
                requested_ip: None,
                server_identifier: None,
                config_start: Instant::ZERO,
                timeout_fired: false,
            }),
        })
    }

    pub fn get_state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    pub fn lease(&self) -> Option<Lease> {
        self.inner.lock().unwrap().lease
    }

    /// Begin acquisition: move to `SELECTING` and send the first `DISCOVER`.
    pub fn start<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        begin_acquisition(&mut inner, clock);
        set_state(&mut inner, State::Selecting);
        inner.transaction_id = rand.rand_u32();
        inner.retransmit_timeout = DISCOVER_INIT_RT;
        inner.retransmit_count = 0;
        send_discover(&mut inner, iface, clock, rand)
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        set_state(&mut inner, State::Init);
        inner.lease = None;
    }

    /// Send a `RELEASE` to the bound server and return to `INIT`.
    pub fn release<I: NetworkInterface>(&self, iface: &mut I) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let lease = match inner.lease {
            Some(lease) => lease,
            None => return Ok(()),
        };
        let repr = Repr {
            message_type: Some(MessageType::Release),
            transaction_id: inner.transaction_id,
            client_hardware_address: iface.mac_address(),
            client_identifier: Some(iface.mac_address()),
            ciaddr: lease.address,
            server_identifier: Some(lease.server_identifier),
            ..Repr::default()
        };
        send(&repr, iface)?;
        set_state(&mut inner, State::Init);
        inner.lease = None;
        Ok(())
    }

    /// Called when the link transitions up/down (§4.1): invalidates the
    /// interface address if running, then re-enters INIT (no prior lease)
    /// or INIT-REBOOT (a prior lease exists, cached address is retried).
    pub fn on_link_change<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
        link_up: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cb) = inner.settings.on_link_change.as_mut() {
            cb(link_up);
        }
        iface.set_host_addr(AddrState::Invalid);
        if !link_up {
            set_state(&mut inner, State::Init);
            inner.lease = None;
            return Ok(());
        }

        match inner.lease {
            Some(lease) => {
                inner.requested_ip = Some(lease.address);
                inner.server_identifier = None;
                begin_acquisition(&mut inner, clock);
                set_state(&mut inner, State::InitReboot);
                set_state(&mut inner, State::Rebooting);
                inner.transaction_id = rand.rand_u32();
                inner.retransmit_timeout = REQUEST_INIT_RT;
                inner.retransmit_count = 0;
                let requested = lease.address;
                send_request_reboot(&mut inner, iface, requested)
            }
            None => {
                begin_acquisition(&mut inner, clock);
                set_state(&mut inner, State::Selecting);
                inner.transaction_id = rand.rand_u32();
                inner.retransmit_timeout = DISCOVER_INIT_RT;
                inner.retransmit_count = 0;
                send_discover(&mut inner, iface, clock, rand)
            }
        }
    }

    /// Construct and broadcast a one-shot Decline after the caller (via
    /// `NetworkInterface::arp_conflict_detected`) observes an ARP conflict
    /// on an offered/bound address; returns to INIT (§4.1).
    pub fn on_arp_conflict_detected<I: NetworkInterface>(&self, iface: &mut I, address: Ipv4Addr) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let server_id = inner.lease.map(|l| l.server_identifier).or(inner.server_identifier);
        let repr = Repr {
            message_type: Some(MessageType::Decline),
            transaction_id: inner.transaction_id,
            client_hardware_address: iface.mac_address(),
            client_identifier: Some(iface.mac_address()),
            broadcast: true,
            server_identifier: server_id,
            requested_ip: Some(address),
            ..Repr::default()
        };
        send(&repr, iface)?;
        iface.set_host_addr(AddrState::Invalid);
        inner.lease = None;
        set_state(&mut inner, State::Init);
        Ok(())
    }

    /// Called on every poll to drive retransmission and lease-timer logic.
    pub fn tick<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = clock.now();

        if matches!(inner.state, State::Selecting | State::Requesting | State::Rebooting)
            && !inner.timeout_fired
            && inner.settings.user_timeout > Duration::ZERO
            && now.saturating_duration_since(inner.config_start) >= inner.settings.user_timeout
        {
            inner.timeout_fired = true;
            if let Some(cb) = inner.settings.on_timeout.as_mut() {
                cb();
            }
        }

        match inner.state {
            State::Selecting | State::Requesting | State::Rebooting => {
                if now >= inner.retransmit_at {
                    retransmit(&mut inner, iface, clock, rand)?;
                }
            }
            State::Bound | State::Renewing | State::Rebinding => {
                if let Some(lease) = inner.lease {
                    let elapsed = now.saturating_duration_since(inner.lease_obtained_at);
                    if elapsed >= lease.lease {
                        log::warn!("dhcpv4: lease expired, restarting");
                        iface.set_host_addr(AddrState::Invalid);
                        set_state(&mut inner, State::Init);
                        inner.lease = None;
                    } else if elapsed >= lease.t2 && inner.state != State::Rebinding {
                        log::debug!("dhcpv4: T2 expired, rebinding");
                        set_state(&mut inner, State::Rebinding);
                        inner.transaction_id = rand.rand_u32();
                        send_request_renew(&mut inner, iface, None)?;
                    } else if elapsed >= lease.t1 && inner.state == State::Bound {
                        log::debug!("dhcpv4: T1 expired, renewing");
                        set_state(&mut inner, State::Renewing);
                        inner.transaction_id = rand.rand_u32();
                        send_request_renew(&mut inner, iface, Some(lease.server_identifier))?;
                    }
                }
            }
            State::Init | State::InitReboot => {}
        }
        Ok(())
    }

    /// Process an inbound UDP datagram destined to the client port.
    pub fn on_receive<I: NetworkInterface, C: Clock>(&self, iface: &mut I, clock: &C, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let packet = match Packet::new_checked(data) {
            Ok(packet) => packet,
            Err(_) => {
                log::debug!("dhcpv4: dropping truncated packet");
                return;
            }
        };
        if packet.op() != OpCode::BootReply || packet.xid() != inner.transaction_id {
            return;
        }
        let repr = match Repr::parse(&packet) {
            Ok(repr) => repr,
            Err(_) => {
                log::debug!("dhcpv4: dropping malformed packet");
                return;
            }
        };

        match (inner.state, repr.message_type) {
            (State::Selecting, Some(MessageType::Offer)) => {
                log::trace!("dhcpv4: got OFFER from {:?}", repr.server_identifier);
                inner.requested_ip = Some(repr.yiaddr);
                inner.server_identifier = repr.server_identifier;
                set_state(&mut inner, State::Requesting);
                inner.retransmit_count = 0;
                inner.retransmit_timeout = REQUEST_INIT_RT;
                let server_id = repr.server_identifier;
                let requested = repr.yiaddr;
                if let Err(err) = send_request_select(&mut inner, iface, requested, server_id) {
                    log::debug!("dhcpv4: failed to send REQUEST: {err}");
                }
            }
            (State::Requesting | State::Renewing | State::Rebinding | State::Rebooting, Some(MessageType::Ack)) => {
                commit_ack(&mut inner, iface, clock, repr);
            }
            (State::Requesting | State::Renewing | State::Rebinding | State::Rebooting, Some(MessageType::Nak)) => {
                log::warn!("dhcpv4: got NAK, restarting");
                iface.set_host_addr(AddrState::Invalid);
                set_state(&mut inner, State::Init);
                inner.lease = None;
            }
            _ => {}
        }
    }
}

/// Mark the start of a fresh acquisition attempt: resets the user-timeout
/// deadline and its fired-once flag (§5).
fn begin_acquisition<C: Clock>(inner: &mut Inner, clock: &C) {
    inner.config_start = clock.now();
    inner.timeout_fired = false;
}

fn set_state(inner: &mut Inner, new_state: State) {
    if inner.state != new_state {
        inner.state = new_state;
        if let Some(cb) = inner.settings.on_state_change.as_mut() {
            cb(new_state);
        }
    }
}

fn commit_ack<I: NetworkInterface, C: Clock>(inner: &mut Inner, iface: &mut I, clock: &C, repr: Repr) {
    let lease_secs = repr.lease_time_secs.unwrap_or(0) as u64;
    let t1_secs = repr.renewal_time_t1_secs.map(u64::from).unwrap_or(lease_secs / 2);
    let t2_secs = repr.rebinding_time_t2_secs.map(u64::from).unwrap_or(lease_secs * 7 / 8);
    let lease = Lease {
        address: repr.yiaddr,
        server_identifier: repr.server_identifier.unwrap_or(Ipv4Addr::UNSPECIFIED),
        lease: Duration::from_secs(lease_secs),
        t1: Duration::from_secs(t1_secs),
        t2: Duration::from_secs(t2_secs),
    };

    iface.set_host_addr(AddrState::Valid(lease.address));
    if let Some(mask) = repr.subnet_mask {
        iface.set_subnet_mask(mask);
    }
    iface.set_default_gateway(repr.router);
    if !repr.dns_servers.is_empty() && !inner.settings.manual_dns_config {
        iface.set_dns_servers_v4(&repr.dns_servers);
    }
    if let Some(mtu) = repr.mtu {
        iface.set_mtu_v4(mtu);
    }

    log::debug!("dhcpv4: bound {} for {}s", lease.address, lease_secs);
    inner.lease = Some(lease);
    inner.lease_obtained_at = clock.now();
    set_state(inner, State::Bound);
}

fn retransmit<I: NetworkInterface, C: Clock, R: RandomSource>(
    inner: &mut Inner,
    iface: &mut I,
    clock: &C,
    rand: &mut R,
) -> Result<()> {
    inner.retransmit_count += 1;
    if inner.state == State::Requesting && inner.retransmit_count > REQUEST_MAX_RC {
        log::debug!("dhcpv4: REQUEST retries exhausted, restarting");
        set_state(inner, State::Init);
        return Ok(());
    }
    match inner.state {
        State::Selecting => send_discover(inner, iface, clock, rand),
        State::Requesting => {
            let requested = inner.requested_ip;
            let server_id = inner.server_identifier;
            schedule_next(inner, clock, REQUEST_MAX_RT, rand);
            if let Some(requested) = requested {
                let repr = Repr {
                    message_type: Some(MessageType::Request),
                    transaction_id: inner.transaction_id,
                    client_hardware_address: iface.mac_address(),
                    client_identifier: Some(iface.mac_address()),
                    broadcast: true,
                    requested_ip: Some(requested),
                    server_identifier: server_id,
                    hostname: inner.settings.hostname.clone(),
                    parameter_request_list: Some(inner.settings.requested_parameters.clone()),
                    ..Repr::default()
                };
                send(&repr, iface)
            } else {
                Ok(())
            }
        }
        State::Rebooting => {
            let requested = inner.requested_ip;
            schedule_next(inner, clock, REQUEST_MAX_RT, rand);
            if let Some(requested) = requested {
                send_request_reboot(inner, iface, requested)
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

fn schedule_next<C: Clock, R: RandomSource>(inner: &mut Inner, clock: &C, max_rt: Duration, rand: &mut R) {
    let doubled = Duration::from_millis((inner.retransmit_timeout.total_millis() * 2).min(max_rt.total_millis()));
    let jitter_ms = rand.rand_sym((doubled.total_millis() as i64) / 10);
    let jittered = (doubled.total_millis() as i64 + jitter_ms).max(1000) as u64;
    inner.retransmit_timeout = Duration::from_millis(jittered);
    inner.retransmit_at = clock.now() + inner.retransmit_timeout;
}

fn send_discover<I: NetworkInterface, C: Clock, R: RandomSource>(
    inner: &mut Inner,
    iface: &mut I,
    clock: &C,
    rand: &mut R,
) -> Result<()> {
    schedule_next(inner, clock, DISCOVER_MAX_RT, rand);
    let repr = Repr {
        message_type: Some(MessageType::Discover),
        transaction_id: inner.transaction_id,
        broadcast: true,
        client_hardware_address: iface.mac_address(),
        client_identifier: Some(iface.mac_address()),
        hostname: inner.settings.hostname.clone(),
        rapid_commit: inner.settings.rapid_commit,
        parameter_request_list: Some(inner.settings.requested_parameters.clone()),
        ..Repr::default()
    };
    send(&repr, iface)
}

fn send_request_select<I: NetworkInterface>(
    inner: &mut Inner,
    iface: &mut I,
    requested: Ipv4Addr,
    server_id: Option<Ipv4Addr>,
) -> Result<()> {
    let repr = Repr {
        message_type: Some(MessageType::Request),
        transaction_id: inner.transaction_id,
        broadcast: true,
        client_hardware_address: iface.mac_address(),
        client_identifier: Some(iface.mac_address()),
        requested_ip: Some(requested),
        server_identifier: server_id,
        hostname: inner.settings.hostname.clone(),
        parameter_request_list: Some(inner.settings.requested_parameters.clone()),
        ..Repr::default()
    };
    send(&repr, iface)
}

/// REBOOTING's REQUEST: `ciaddr = 0`, broadcast, Requested-IP from the
/// cached lease, no Server Identifier (§4.1).
fn send_request_reboot<I: NetworkInterface>(inner: &mut Inner, iface: &mut I, requested: Ipv4Addr) -> Result<()> {
    let repr = Repr {
        message_type: Some(MessageType::Request),
        transaction_id: inner.transaction_id,
        broadcast: true,
        ciaddr: Ipv4Addr::UNSPECIFIED,
        client_hardware_address: iface.mac_address(),
        client_identifier: Some(iface.mac_address()),
        requested_ip: Some(requested),
        hostname: inner.settings.hostname.clone(),
        parameter_request_list: Some(inner.settings.requested_parameters.clone()),
        ..Repr::default()
    };
    send(&repr, iface)
}

fn send_request_renew<I: NetworkInterface>(
    inner: &mut Inner,
    iface: &mut I,
    server_id: Option<Ipv4Addr>,
) -> Result<()> {
    let ciaddr = inner.lease.map(|l| l.address).unwrap_or(Ipv4Addr::UNSPECIFIED);
    let repr = Repr {
        message_type: Some(MessageType::Request),
        transaction_id: inner.transaction_id,
        client_hardware_address: iface.mac_address(),
        client_identifier: Some(iface.mac_address()),
        ciaddr,
        server_identifier: server_id,
        hostname: inner.settings.hostname.clone(),
        parameter_request_list: Some(inner.settings.requested_parameters.clone()),
        ..Repr::default()
    };
    send(&repr, iface)
}

fn send<I: NetworkInterface>(repr: &Repr, iface: &mut I) -> Result<()> {
    let mut buffer = vec![0u8; dhcpv4::MAX_MESSAGE_LEN];
    let mut packet = Packet::new_unchecked(&mut buffer[..]);
    let len = repr.emit(OpCode::BootRequest, &mut packet)?;
    buffer.truncate(len.max(dhcpv4::MIN_MESSAGE_LEN));
    iface.send_udp_v4(
        dhcpv4::CLIENT_PORT,
        Ipv4Endpoint { addr: Ipv4Addr::BROADCAST, port: dhcpv4::SERVER_PORT },
        &buffer,
        64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Ipv4Config, Ipv6Config, Ipv6Endpoint};
    use std::net::Ipv6Addr;

    struct FakeClock(std::cell::Cell<i64>);
    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            Instant::from_millis(self.0.get())
        }
    }

    struct FakeRand(u32);
    impl RandomSource for FakeRand {
        fn rand_u32(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(1);
            self.0
        }
    }

    #[derive(Default)]
    struct FakeIface {
        mac: [u8; 6],
        sent: Vec<Vec<u8>>,
        address: Option<Ipv4Addr>,
        gateway: Option<Ipv4Addr>,
    }

    impl NetworkInterface for FakeIface {
        fn mac_address(&self) -> [u8; 6] {
            self.mac
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
        fn set_host_addr(&mut self, state: AddrState<Ipv4Addr>) {
            self.address = state.address();
        }
        fn set_subnet_mask(&mut self, _mask: Ipv4Addr) {}
        fn set_default_gateway(&mut self, gw: Option<Ipv4Addr>) {
            self.gateway = gw;
        }
        fn set_mtu_v4(&mut self, _mtu: u16) {}
        fn set_dns_servers_v4(&mut self, _servers: &[Ipv4Addr]) {}
        fn set_link_local_addr(&mut self, _state: AddrState<Ipv6Addr>) {}
        fn set_global_addr(&mut self, _state: AddrState<Ipv6Addr>) {}
        fn set_prefix(&mut self, _prefix: Ipv6Addr, _len: u8) {}
        fn set_dns_servers_v6(&mut self, _servers: &[Ipv6Addr]) {}
        fn send_udp_v4(&mut self, _src: u16, _dst: Ipv4Endpoint, buf: &[u8], _ttl: u8) -> Result<()> {
            self.sent.push(buf.to_vec());
            Ok(())
        }
        fn send_udp_v6(&mut self, _src: u16, _dst: Ipv6Endpoint, _buf: &[u8], _hl: u8) -> Result<()> {
            Ok(())
        }
        fn send_neighbor_solicit(&mut self, _target: Ipv6Addr, _multicast: bool) -> Result<()> {
            Ok(())
        }
        fn send_router_solicit(&mut self) -> Result<()> {
            Ok(())
        }
        fn duplicate_detected(&self, _candidate: Ipv6Addr) -> bool {
            false
        }
    }

    #[test]
    fn full_discover_offer_request_ack_commits_lease() {
        let client = Dhcpv4Client::init(Settings::default()).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand(0);
        let mut iface = FakeIface::default();

        client.start(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(client.get_state(), State::Selecting);
        assert_eq!(iface.sent.len(), 1);

        let xid = client.inner.lock().unwrap().transaction_id;
        let offer = Repr {
            message_type: Some(MessageType::Offer),
            transaction_id: xid,
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_identifier: Some(Ipv4Addr::new(192, 0, 2, 1)),
            ..Repr::default()
        };
        let mut buffer = vec![0u8; dhcpv4::MAX_MESSAGE_LEN];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            offer.emit(OpCode::BootReply, &mut packet).unwrap();
        }
        client.on_receive(&mut iface, &clock, &buffer);
        assert_eq!(client.get_state(), State::Requesting);

        let ack = Repr {
            message_type: Some(MessageType::Ack),
            transaction_id: xid,
            yiaddr: Ipv4Addr::new(192, 0, 2, 50),
            server_identifier: Some(Ipv4Addr::new(192, 0, 2, 1)),
            subnet_mask: Some(Ipv4Addr::new(255, 255, 255, 0)),
            router: Some(Ipv4Addr::new(192, 0, 2, 1)),
            lease_time_secs: Some(3600),
            ..Repr::default()
        };
        let mut buffer = vec![0u8; dhcpv4::MAX_MESSAGE_LEN];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            ack.emit(OpCode::BootReply, &mut packet).unwrap();
        }
        client.on_receive(&mut iface, &clock, &buffer);

        assert_eq!(client.get_state(), State::Bound);
        assert_eq!(iface.address, Some(Ipv4Addr::new(192, 0, 2, 50)));
        assert_eq!(iface.gateway, Some(Ipv4Addr::new(192, 0, 2, 1)));
        let lease = client.lease().unwrap();
        assert_eq!(lease.t1, Duration::from_secs(1800));
    }

    #[test]
    fn nak_restarts_from_requesting() {
        let client = Dhcpv4Client::init(Settings::default()).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand(0);
        let mut iface = FakeIface::default();
        client.start(&mut iface, &clock, &mut rand).unwrap();
        let xid = client.inner.lock().unwrap().transaction_id;
        client.inner.lock().unwrap().state = State::Requesting;

        let nak = Repr {
            message_type: Some(MessageType::Nak),
            transaction_id: xid,
            ..Repr::default()
        };
        let mut buffer = vec![0u8; dhcpv4::MAX_MESSAGE_LEN];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            nak.emit(OpCode::BootReply, &mut packet).unwrap();
        }
        client.on_receive(&mut iface, &clock, &buffer);
        assert_eq!(client.get_state(), State::Init);
    }

    #[test]
    fn link_change_with_prior_lease_reboots_without_server_identifier() {
        let client = Dhcpv4Client::init(Settings::default()).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand(0);
        let mut iface = FakeIface::default();
        client.inner.lock().unwrap().lease = Some(Lease {
            address: Ipv4Addr::new(192, 0, 2, 50),
            server_identifier: Ipv4Addr::new(192, 0, 2, 1),
            lease: Duration::from_secs(600),
            t1: Duration::from_secs(300),
            t2: Duration::from_secs(525),
        });

        client.on_link_change(&mut iface, &clock, &mut rand, true).unwrap();
        assert_eq!(client.get_state(), State::Rebooting);

        let sent = iface.sent.last().unwrap();
        let packet = Packet::new_checked(&sent[..]).unwrap();
        let repr = Repr::parse(&packet).unwrap();
        assert_eq!(repr.requested_ip, Some(Ipv4Addr::new(192, 0, 2, 50)));
        assert_eq!(repr.server_identifier, None);
        assert!(repr.broadcast);
        assert_eq!(repr.ciaddr, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn arp_conflict_sends_decline_and_returns_to_init() {
        let client = Dhcpv4Client::init(Settings::default()).unwrap();
        let mut iface = FakeIface::default();
        client.inner.lock().unwrap().lease = Some(Lease {
            address: Ipv4Addr::new(192, 0, 2, 50),
            server_identifier: Ipv4Addr::new(192, 0, 2, 1),
            ..Lease::default()
        });

        client.on_arp_conflict_detected(&mut iface, Ipv4Addr::new(192, 0, 2, 50)).unwrap();
        assert_eq!(client.get_state(), State::Init);
        assert!(client.lease().is_none());

        let sent = iface.sent.last().unwrap();
        let packet = Packet::new_checked(&sent[..]).unwrap();
        let repr = Repr::parse(&packet).unwrap();
        assert_eq!(repr.message_type, Some(MessageType::Decline));
        assert_eq!(repr.requested_ip, Some(Ipv4Addr::new(192, 0, 2, 50)));
        assert_eq!(repr.server_identifier, Some(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn state_change_callback_fires_on_transition() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let settings = Settings {
            on_state_change: Some(Box::new(move |_state| {
                calls_cb.fetch_add(1, Ordering::SeqCst);
            })),
            ..Settings::default()
        };
        let client = Dhcpv4Client::init(settings).unwrap();
        let clock = FakeClock(std::cell::Cell::new(0));
        let mut rand = FakeRand(0);
        let mut iface = FakeIface::default();

        client.start(&mut iface, &clock, &mut rand).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
