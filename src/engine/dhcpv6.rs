//! DHCPv6 client state machine (RFC 8415 §18, §15).

use std::net::Ipv6Addr;
use std::sync::Mutex;

use crate::duid::Duid;
use crate::error::Result;
use crate::interface::{AddrState, Clock, Ipv6Endpoint, NetworkInterface, RandomSource};
use crate::time::{Duration, Instant};
use crate::wire::dhcpv6::{self, field, IaAddr, IaNa, MessageType, Packet, Repr, StatusCode};

/// Retransmission parameters for one exchange type (RFC 8415 §15, table 1):
/// initial/max retransmit timeout, max retransmit count (0 = unbounded) and
/// max retransmit duration (0 = unbounded).
#[derive(Debug, Clone, Copy)]
struct RetransmitParams {
    irt: Duration,
    mrt: Duration,
    mrc: u32,
    mrd: Duration,
}

const SOLICIT: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(1_000),
    mrt: Duration::from_millis(120_000),
    mrc: 0,
    mrd: Duration::ZERO,
};
const REQUEST: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(1_000),
    mrt: Duration::from_millis(30_000),
    mrc: 10,
    mrd: Duration::ZERO,
};
const CONFIRM: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(1_000),
    mrt: Duration::from_millis(4_000),
    mrc: 0,
    mrd: Duration::from_millis(10_000),
};
const RENEW: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(10_000),
    mrt: Duration::from_millis(600_000),
    mrc: 0,
    mrd: Duration::ZERO,
};
const REBIND: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(10_000),
    mrt: Duration::from_millis(600_000),
    mrc: 0,
    mrd: Duration::ZERO,
};
const DECLINE: RetransmitParams = RetransmitParams {
    irt: Duration::from_millis(1_000),
    mrt: Duration::ZERO,
    mrc: 5,
    mrd: Duration::ZERO,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Solicit,
    Request,
    InitConfirm,
    Confirm,
    Bound,
    Renew,
    Rebind,
    Decline,
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub fqdn: Option<String>,
    pub rapid_commit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Lease {
    pub addresses: Vec<IaAddr>,
    pub server_id: Vec<u8>,
    pub t1: Duration,
    pub t2: Duration,
}

struct Inner {
    state: State,
    settings: Settings,
    duid: Duid,
    iaid: u32,
    transaction_id: u32,
    lease: Option<Lease>,
    retransmit_at: Instant,
    retransmit_timeout: Duration,
    retransmit_count: u32,
    exchange_start: Instant,
    lease_obtained_at: Instant,
    elapsed_base: Instant,
    /// Highest ADVERTISE Preference seen so far in the current SOLICIT
    /// exchange (RFC 8415 §18.2.1), and the Server Identifier that sent it.
    best_preference: Option<u8>,
    best_server_id: Option<Vec<u8>>,
}

pub struct Dhcpv6Client {
    inner: Mutex<Inner>,
}

impl Dhcpv6Client {
    pub fn get_default_settings() -> Settings {
        Settings::default()
    }

    pub fn init(mac: [u8; 6], iaid: u32, settings: Settings) -> Result<Dhcpv6Client> {
        Ok(Dhcpv6Client {
            inner: Mutex::new(Inner {
                state: State::Init,
                settings,
                duid: Duid::link_layer(mac),
                iaid,
                transaction_id: 0,
                lease: None,
                retransmit_at: Instant::ZERO,
                retransmit_timeout: SOLICIT.irt,
                retransmit_count: 0,
                exchange_start: Instant::ZERO,
                lease_obtained_at: Instant::ZERO,
                elapsed_base: Instant::ZERO,
                best_preference: None,
                best_server_id: None,
            }),
        })
    }

    pub fn get_state(&self) -> State {
        self.inner.lock().unwrap().state
    }

    pub fn lease(&self) -> Option<Lease> {
        self.inner.lock().unwrap().lease.clone()
    }

    pub fn start<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Solicit;
        inner.best_preference = None;
        inner.best_server_id = None;
        begin_exchange(&mut inner, clock, rand, SOLICIT);
        send_solicit(&mut inner, iface)
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = State::Init;
        inner.lease = None;
    }

    pub fn release<I: NetworkInterface>(&self, iface: &mut I) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let lease = match inner.lease.take() {
            Some(lease) => lease,
            None => return Ok(()),
        };
        let repr = Repr {
            message_type: Some(MessageType::Release),
            transaction_id: inner.transaction_id,
            client_id: Some(inner.duid.as_bytes().to_vec()),
            server_id: Some(lease.server_id),
            ia_na: Some(IaNa {
                iaid: inner.iaid,
                addresses: lease.addresses,
                ..IaNa::default()
            }),
            ..Repr::default()
        };
        send(&repr, iface)?;
        inner.state = State::Init;
        Ok(())
    }

    /// Trigger RFC 8415 Decline for an address the NDP layer has flagged as
    /// a duplicate; a supplement wiring the `DECLINE` state to a concrete
    /// caller, since DHCPv6 Decline has no analogue to the ARP-conflict
    /// signal DHCPv4 uses.
    pub fn on_duplicate_detected<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
        address: Ipv6Addr,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let lease = match &mut inner.lease {
            Some(lease) => lease,
            None => return Ok(()),
        };
        lease.addresses.retain(|a| a.addr != address);
        let declined = IaAddr { addr: address, preferred_lifetime_secs: 0, valid_lifetime_secs: 0 };
        inner.state = State::Decline;
        begin_exchange(&mut inner, clock, rand, DECLINE);
        let repr = Repr {
            message_type: Some(MessageType::Decline),
            transaction_id: inner.transaction_id,
            client_id: Some(inner.duid.as_bytes().to_vec()),
            server_id: inner.lease.as_ref().map(|l| l.server_id.clone()),
            ia_na: Some(IaNa {
                iaid: inner.iaid,
                addresses: vec![declined],
                ..IaNa::default()
            }),
            ..Repr::default()
        };
        send(&repr, iface)
    }

    /// Link state change: on link-down, invalidate the current address and
    /// return to INIT. On link-up, CONFIRM the cached lease if one exists
    /// (RFC 8415 §18.2.2), otherwise start a fresh SOLICIT.
    pub fn on_link_change<I: NetworkInterface, C: Clock, R: RandomSource>(
        &self,
        iface: &mut I,
        clock: &C,
        rand: &mut R,
        link_up: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !link_up {
            iface.set_global_addr(AddrState::Invalid);
            inner.state = State::Init;
            return Ok(());
        }
        if inner.lease.is_some() {
            inner.state = State::InitConfirm;
            inner.best_preference = None;
            inner.best_server_id = None;
            inner.state = State::Confirm;
            begin_exchange(&mut inner, clock, rand, CONFIRM);
            send_confirm(&mut inner, iface)
        } else {
            inner.state = State::Solicit;
            inner.best_preference = None;
            inner.best_server_id = None;
            begin_exchange(&mut inner, clock, rand, SOLICIT);
            send_solicit(&mut inner, iface)
        }
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
            State::Solicit | State::Request | State::Confirm | State::Renew | State::Rebind | State::Decline => {
                if now >= inner.retransmit_at {
                    retransmit(&mut inner, iface, clock, rand)?;
                }
            }
            State::Bound => {
                if let Some(lease) = inner.lease.clone() {
                    let elapsed = now.saturating_duration_since(inner.lease_obtained_at);
                    if elapsed >= lease.t2 {
                        log::debug!("dhcpv6: T2 expired, rebinding");
                        inner.state = State::Rebind;
                        begin_exchange(&mut inner, clock, rand, REBIND);
                        send_renew_rebind(&mut inner, iface, false)?;
                    } else if elapsed >= lease.t1 {
                        log::debug!("dhcpv6: T1 expired, renewing");
                        inner.state = State::Renew;
                        begin_exchange(&mut inner, clock, rand, RENEW);
                        send_renew_rebind(&mut inner, iface, true)?;
                    }
                }
            }
            State::Init | State::InitConfirm => {}
        }
        Ok(())
    }

    pub fn on_receive<I: NetworkInterface, C: Clock>(&self, iface: &mut I, clock: &C, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let packet = match Packet::new_checked(data) {
            Ok(packet) => packet,
            Err(_) => return,
        };
        if packet.transaction_id() != inner.transaction_id {
            return;
        }
        let repr = match Repr::parse(&packet) {
            Ok(repr) => repr,
            Err(_) => return,
        };

        match (inner.state, repr.message_type) {
            (State::Solicit, Some(MessageType::Advertise)) => {
                if repr.rapid_commit {
                    return;
                }
                let preference = repr.preference.unwrap_or(0);
                let is_better = match inner.best_preference {
                    Some(best) => preference > best,
                    None => true,
                };
                if is_better {
                    inner.best_preference = Some(preference);
                    inner.best_server_id = repr.server_id.clone();
                }
                log::trace!("dhcpv6: got ADVERTISE, preference={preference}");
                if preference == 255 || inner.retransmit_count > 1 {
                    log::trace!("dhcpv6: selecting server immediately");
                    inner.state = State::Request;
                    let chosen = inner.best_server_id.clone();
                    begin_exchange_from(&mut inner, clock, REQUEST);
                    if let Err(err) = send_request(&mut inner, iface, chosen) {
                        log::debug!("dhcpv6: failed to send REQUEST: {err}");
                    }
                }
            }
            (State::Solicit, Some(MessageType::Reply)) if repr.rapid_commit => {
                commit_reply(&mut inner, iface, clock, repr);
            }
            (State::Request | State::Renew | State::Rebind | State::Confirm, Some(MessageType::Reply)) => {
                if let Some(StatusCode::NoBinding) | Some(StatusCode::NotOnLink) = repr.status_code {
                    log::warn!("dhcpv6: server reports {:?}, restarting", repr.status_code);
                    inner.state = State::Init;
                    inner.lease = None;
                    return;
                }
                commit_reply(&mut inner, iface, clock, repr);
            }
            (State::Decline, Some(MessageType::Reply)) => {
                log::debug!("dhcpv6: decline acknowledged");
                inner.state = State::Init;
            }
            _ => {}
        }
    }
}

fn commit_reply<I: NetworkInterface, C: Clock>(inner: &mut Inner, iface: &mut I, clock: &C, repr: Repr) {
    let ia_na = match repr.ia_na {
        Some(ia_na) => ia_na,
        None => return,
    };
    let (t1_secs, t2_secs) = if ia_na.t1_secs == 0 && ia_na.t2_secs == 0 {
        // RFC 8415 §18.2.4/§21.4: server left it to the client to pick
        // T1/T2 when it sends 0/0; follow the RFC 8415 recommendation of
        // T1 = 0.5 * preferred-lifetime, T2 = 0.8 * preferred-lifetime.
        let preferred = ia_na.addresses.first().map(|a| a.preferred_lifetime_secs).unwrap_or(0);
        let t1 = preferred / 2;
        let t2 = t1 + t1 / 2;
        (t1, t2)
    } else {
        (ia_na.t1_secs, ia_na.t2_secs)
    };
    let lease = Lease {
        addresses: ia_na.addresses.clone(),
        server_id: repr.server_id.unwrap_or_default(),
        t1: Duration::from_secs(t1_secs as u64),
        t2: Duration::from_secs(t2_secs as u64),
    };
    for addr in &ia_na.addresses {
        iface.set_global_addr(AddrState::Valid(addr.addr));
    }
    if !repr.dns_servers.is_empty() {
        iface.set_dns_servers_v6(&repr.dns_servers);
    }
    log::debug!("dhcpv6: bound {} address(es)", lease.addresses.len());
    inner.lease = Some(lease);
    inner.lease_obtained_at = clock.now();
    inner.state = State::Bound;
}

fn begin_exchange<C: Clock, R: RandomSource>(inner: &mut Inner, clock: &C, rand: &mut R, params: RetransmitParams) {
    inner.transaction_id = rand.rand_u32() & 0x00FF_FFFF;
    inner.retransmit_count = 0;
    inner.retransmit_timeout = params.irt;
    inner.exchange_start = clock.now();
    inner.elapsed_base = clock.now();
    inner.retransmit_at = clock.now() + jittered(params.irt, rand);
}

fn begin_exchange_from<C: Clock>(inner: &mut Inner, clock: &C, params: RetransmitParams) {
    inner.retransmit_count = 0;
    inner.retransmit_timeout = params.irt;
    inner.exchange_start = clock.now();
    inner.elapsed_base = clock.now();
    inner.retransmit_at = clock.now() + params.irt;
}

fn jittered<R: RandomSource>(base: Duration, rand: &mut R) -> Duration {
    let jitter = rand.rand_sym((base.total_millis() as i64) / 10);
    Duration::from_millis((base.total_millis() as i64 + jitter).max(1) as u64)
}

fn retransmit<I: NetworkInterface, C: Clock, R: RandomSource>(
    inner: &mut Inner,
    iface: &mut I,
    clock: &C,
    rand: &mut R,
) -> Result<()> {
    if inner.state == State::Solicit && inner.best_server_id.is_some() {
        // RFC 8415 §18.2.1: wait out the initial retransmission timeout
        // for further (potentially better) ADVERTISEs, then proceed with
        // the best one seen so far.
        log::trace!("dhcpv6: SOLICIT IRT elapsed, selecting best advertised server");
        inner.state = State::Request;
        let chosen = inner.best_server_id.take();
        begin_exchange_from(inner, clock, REQUEST);
        return send_request(inner, iface, chosen);
    }

    let params = match inner.state {
        State::Solicit => SOLICIT,
        State::Request => REQUEST,
        State::Confirm => CONFIRM,
        State::Renew => RENEW,
        State::Rebind => REBIND,
        State::Decline => DECLINE,
        _ => return Ok(()),
    };
    inner.retransmit_count += 1;
    if params.mrc > 0 && inner.retransmit_count > params.mrc {
        log::debug!("dhcpv6: {:?} retries exhausted", inner.state);
        inner.state = State::Init;
        return Ok(());
    }
    if params.mrd.total_millis() > 0 {
        let elapsed = clock.now().saturating_duration_since(inner.exchange_start);
        if elapsed >= params.mrd {
            log::debug!("dhcpv6: {:?} max duration exceeded", inner.state);
            inner.state = State::Init;
            return Ok(());
        }
    }

    let doubled_ms = (inner.retransmit_timeout.total_millis() * 2).min(params.mrt.total_millis().max(1));
    inner.retransmit_timeout = Duration::from_millis(doubled_ms);
    inner.retransmit_at = clock.now() + jittered(inner.retransmit_timeout, rand);

    match inner.state {
        State::Solicit => send_solicit(inner, iface),
        State::Request => send_request(inner, iface, None),
        State::Confirm => send_confirm(inner, iface),
        State::Renew => send_renew_rebind(inner, iface, true),
        State::Rebind => send_renew_rebind(inner, iface, false),
        State::Decline => Ok(()),
        _ => Ok(()),
    }
}

fn elapsed_centisecs(inner: &Inner, clock: &impl Clock) -> u16 {
    let ms = clock.now().saturating_duration_since(inner.elapsed_base).total_millis();
    (ms / 10).min(u16::MAX as u64) as u16
}

fn send_solicit<I: NetworkInterface>(inner: &mut Inner, iface: &mut I) -> Result<()> {
    let mut repr = Repr {
        message_type: Some(MessageType::Solicit),
        transaction_id: inner.transaction_id,
        client_id: Some(inner.duid.as_bytes().to_vec()),
        ia_na: Some(IaNa { iaid: inner.iaid, ..IaNa::default() }),
        elapsed_time_centisecs: Some(0),
        rapid_commit: inner.settings.rapid_commit,
        ..Repr::default()
    };
    repr.add_request_option(field::OPT_DNS_SERVERS);
    repr.add_request_option(field::OPT_DOMAIN_LIST);
    if inner.settings.fqdn.is_some() {
        repr.fqdn = inner.settings.fqdn.clone();
        repr.add_request_option(field::OPT_FQDN);
    }
    send(&repr, iface)
}

fn send_request<I: NetworkInterface>(inner: &mut Inner, iface: &mut I, server_id: Option<Vec<u8>>) -> Result<()> {
    let ia_na = inner
        .lease
        .as_ref()
        .map(|l| IaNa { iaid: inner.iaid, addresses: l.addresses.clone(), ..IaNa::default() })
        .unwrap_or(IaNa { iaid: inner.iaid, ..IaNa::default() });
    let repr = Repr {
        message_type: Some(MessageType::Request),
        transaction_id: inner.transaction_id,
        client_id: Some(inner.duid.as_bytes().to_vec()),
        server_id,
        ia_na: Some(ia_na),
        elapsed_time_centisecs: Some(0),
        ..Repr::default()
    };
    send(&repr, iface)
}

/// RFC 8415 §18.2.2: CONFIRM carries the client's current addresses in IA_NA
/// but no Server Identifier — any server on link may answer.
fn send_confirm<I: NetworkInterface>(inner: &mut Inner, iface: &mut I) -> Result<()> {
    let lease = inner.lease.clone().unwrap_or_default();
    let repr = Repr {
        message_type: Some(MessageType::Confirm),
        transaction_id: inner.transaction_id,
        client_id: Some(inner.duid.as_bytes().to_vec()),
        ia_na: Some(IaNa { iaid: inner.iaid, addresses: lease.addresses, ..IaNa::default() }),
        elapsed_time_centisecs: Some(0),
        ..Repr::default()
    };
    send(&repr, iface)
}

fn send_renew_rebind<I: NetworkInterface>(inner: &mut Inner, iface: &mut I, include_server_id: bool) -> Result<()> {
    let lease = inner.lease.clone().unwrap_or_default();
    let message_type = if include_server_id { MessageType::Renew } else { MessageType::Rebind };
    let repr = Repr {
        message_type: Some(message_type),
        transaction_id: inner.transaction_id,
        client_id: Some(inner.duid.as_bytes().to_vec()),
        server_id: if include_server_id { Some(lease.server_id) } else { None },
        ia_na: Some(IaNa { iaid: inner.iaid, addresses: lease.addresses, ..IaNa::default() }),
        elapsed_time_centisecs: Some(0),
        ..Repr::default()
    };
    send(&repr, iface)
}

fn send<I: NetworkInterface>(repr: &Repr, iface: &mut I) -> Result<()> {
    let mut buffer = vec![0u8; 512];
    let mut packet = Packet::new_unchecked(&mut buffer[..]);
    let len = repr.emit(&mut packet)?;
    buffer.truncate(len);
    iface.send_udp_v6(
        dhcpv6::CLIENT_PORT,
        Ipv6Endpoint { addr: "ff02::1:2".parse().unwrap(), port: dhcpv6::SERVER_PORT },
        &buffer,
        64,
    )
}

#[allow(dead_code)]
fn debug_elapsed(inner: &Inner, clock: &impl Clock) -> u16 {
    elapsed_centisecs(inner, clock)
}
