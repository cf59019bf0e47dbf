use std::net::IpAddr;

use portico::{DefaultPolicy, IpMask, PolicyState};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn scenario_state(default_policy: DefaultPolicy) -> PolicyState {
    let mut state = PolicyState::new(default_policy);
    state.bans.insert(IpMask::parse("10.0.0.0/8").unwrap());
    state.allowances.insert(IpMask::parse("10.1.2.3").unwrap());
    state
}

#[test]
fn accept_policy_admits_unless_banned() {
    let state = scenario_state(DefaultPolicy::Accept);

    // Inside the banned /8 and not allowed: rejected.
    assert!(!state.admits(&ip("10.0.0.5")));
    // Inside the banned /8 but explicitly allowed: admitted.
    assert!(state.admits(&ip("10.1.2.3")));
    // Untouched by either set: admitted.
    assert!(state.admits(&ip("192.168.0.1")));
}

#[test]
fn reject_policy_requires_explicit_allowance() {
    let state = scenario_state(DefaultPolicy::Reject);

    assert!(state.admits(&ip("10.1.2.3")));
    assert!(!state.admits(&ip("192.168.0.1")));
    assert!(!state.admits(&ip("10.0.0.5")));
}

#[test]
fn reject_policy_ban_beats_allowance() {
    let mut state = PolicyState::new(DefaultPolicy::Reject);
    state.allowances.insert(IpMask::parse("172.16.0.0/12").unwrap());
    state.bans.insert(IpMask::parse("172.16.5.1").unwrap());

    assert!(state.admits(&ip("172.16.0.9")));
    assert!(!state.admits(&ip("172.16.5.1")));
}

#[test]
fn v6_masks_cover_v6_peers() {
    let mut state = PolicyState::new(DefaultPolicy::Accept);
    state.bans.insert(IpMask::parse("2001:db8::/32").unwrap());

    assert!(!state.admits(&ip("2001:db8::1")));
    assert!(state.admits(&ip("2001:db9::1")));
}

#[test]
fn v4_ban_covers_mapped_v6_form_of_same_host() {
    let mut state = PolicyState::new(DefaultPolicy::Accept);
    state.bans.insert(IpMask::parse("192.0.2.7").unwrap());

    assert!(!state.admits(&ip("192.0.2.7")));
    assert!(!state.admits(&ip("::ffff:192.0.2.7")));
}

#[test]
fn removing_a_ban_restores_admission() {
    let mut state = PolicyState::new(DefaultPolicy::Accept);
    let mask = IpMask::parse("10.0.0.0/8").unwrap();
    state.bans.insert(mask);
    assert!(!state.admits(&ip("10.2.3.4")));

    state.bans.remove(&mask);
    assert!(state.admits(&ip("10.2.3.4")));
}
