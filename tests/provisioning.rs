mod common;

use std::time::Duration;

use common::{Harness, PASSWORD, SSID};
use pool_common::Attribute;
use pool_controller::{
    controller::Flow,
    credentials::Credentials,
    link::LinkState,
    platform::{CredentialStore, RadioEvent},
    timer::TimerPhase,
};

fn write(harness: &Harness, attribute: Attribute, value: &str) {
    harness.board.radio.push_event(RadioEvent::Write {
        attribute,
        value: value.as_bytes().to_vec(),
    });
}

#[test]
fn fresh_device_advertises() {
    let mut harness = Harness::new(false);
    assert_eq!(harness.controller.boot(), Flow::Continue);

    assert!(harness.controller.provisioning_active());
    assert!(!harness.controller.channel_connected());
    let name = harness.board.radio.advertised_name().unwrap();
    assert!(name.starts_with("Smart Pool-"));
}

#[test]
fn provisioned_over_radio_then_online() {
    let mut harness = Harness::new(false);
    harness.controller.boot();

    harness.board.radio.push_event(RadioEvent::ClientConnected);
    write(&harness, Attribute::Ssid, SSID);
    write(&harness, Attribute::Password, PASSWORD);
    harness.poll();
    assert_eq!(
        harness.board.radio.status_history(),
        vec![
            "waiting",
            "connected",
            "identifier_received",
            "secret_received",
            "credentials_ready"
        ]
    );

    harness.advance(Duration::from_secs(1));
    assert_eq!(harness.poll(), Flow::Continue);

    assert!(!harness.controller.provisioning_active());
    assert!(!harness.board.radio.is_active());
    assert!(harness.controller.channel_connected());
    assert_eq!(
        harness.board.store.contents(),
        Some(Credentials::new(SSID, PASSWORD))
    );
}

#[test]
fn scan_request_over_radio() {
    let mut harness = Harness::new(false);
    harness.board.link.set_scan(vec![pool_controller::platform::ScannedNetwork {
        ssid: SSID.to_string(),
        rssi: -61,
        open: false,
    }]);
    harness.controller.boot();

    write(&harness, Attribute::Networks, "");
    harness.poll();

    let listing = harness.board.radio.attribute(Attribute::Networks).unwrap();
    let parsed: Vec<pool_common::NetworkEntry> = serde_json::from_str(&listing).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].ssid, SSID);
}

#[test]
fn wrong_password_keeps_advertising() {
    let mut harness = Harness::new(false);
    harness.controller.boot();

    write(&harness, Attribute::Ssid, SSID);
    write(&harness, Attribute::Password, "not-it");
    harness.advance(Duration::from_secs(1));
    harness.poll();

    assert!(harness.controller.provisioning_active());
    assert!(harness.board.radio.is_active());
    assert_eq!(harness.board.store.contents(), None);
}

#[test]
fn radio_clear_without_channel_stays_in_provisioning() {
    let mut harness = Harness::new(false);
    harness.controller.boot();

    write(&harness, Attribute::Command, "clear_wifi");
    harness.advance(Duration::from_secs(1));

    assert_eq!(harness.poll(), Flow::Continue);
    assert_eq!(harness.board.store.clears(), 1);
    assert!(harness.controller.provisioning_active());
    assert_eq!(
        harness.board.radio.attribute(Attribute::Status).as_deref(),
        Some("waiting")
    );
}

#[test]
fn reconnect_keeps_stored_credentials() {
    let mut harness = Harness::online();
    harness.board.link.set_router_up(false);
    harness.board.channel.drop_connection();

    // Inside the grace window
    harness.poll();
    assert_eq!(harness.controller.link_state(), LinkState::Connected);

    // Degraded; one rejoin attempt that fails
    harness.advance(Duration::from_secs(4));
    harness.poll();
    assert!(matches!(
        harness.controller.link_state(),
        LinkState::Degraded { .. }
    ));

    harness.board.link.set_router_up(true);
    harness.advance(Duration::from_secs(10));
    harness.poll();

    assert_eq!(harness.controller.link_state(), LinkState::Connected);
    assert!(harness.controller.channel_connected());
    assert!(!harness.controller.provisioning_active());
    assert!(!harness.board.link.erased());
    assert_eq!(
        harness.board.store.contents(),
        Some(Credentials::new(SSID, PASSWORD))
    );
}

#[test]
fn commands_wait_while_link_is_down() {
    let mut harness = Harness::online();
    harness.board.link.set_router_up(false);
    let pump = harness.topics.pump_set.clone();
    harness.board.channel.inject(&pump, "ON");

    harness.poll();

    assert!(!harness.controller.equipment_state().pump_on);
}

#[test]
fn losing_link_without_credentials_starts_provisioning() {
    let mut harness = Harness::online();
    let mut store = harness.board.store.clone();
    store.clear().unwrap();

    harness.board.link.set_router_up(false);
    harness.poll();
    harness.advance(Duration::from_secs(4));

    assert_eq!(harness.poll(), Flow::Continue);
    assert!(harness.controller.provisioning_active());
    assert!(harness.board.radio.is_active());
    assert_eq!(harness.controller.link_state(), LinkState::Unprovisioned);
}

#[test]
fn entering_provisioning_ends_a_running_timer() {
    let mut harness = Harness::online();
    let timer = harness.topics.timer_set.clone();
    harness.send(&timer, r#"{"mode":2,"duration":600}"#);
    assert!(harness.board.pump.is_energized());

    let mut store = harness.board.store.clone();
    store.clear().unwrap();
    harness.board.link.set_router_up(false);
    harness.poll();
    harness.advance(Duration::from_secs(4));
    harness.poll();

    assert!(harness.controller.provisioning_active());
    assert!(!harness.board.pump.is_energized());
    assert_eq!(harness.controller.timer_state().phase, TimerPhase::Idle);
}

#[test]
fn stale_credentials_fall_back_to_radio() {
    let mut harness = Harness::new(false);
    let mut store = harness.board.store.clone();
    store
        .save(&Credentials::new(SSID, "changed-since"))
        .unwrap();

    assert_eq!(harness.controller.boot(), Flow::Continue);

    assert_eq!(harness.board.link.begin_calls().len(), 3);
    assert!(harness.controller.provisioning_active());
    assert!(harness.board.store.contents().is_some());
}

#[test]
fn radio_fault_and_portal_timeout_restart() {
    let mut harness = Harness::new(false);
    harness.board.radio.fail_start();

    assert_eq!(harness.controller.boot(), Flow::Restart);
    assert_eq!(harness.board.portal.runs(), 1);
}

#[test]
fn portal_credentials_bring_the_device_online() {
    let mut harness = Harness::new(false);
    harness.board.radio.fail_start();
    harness.board.portal.offer(Credentials::new(SSID, PASSWORD));

    assert_eq!(harness.controller.boot(), Flow::Continue);
    assert!(harness.controller.channel_connected());
    assert_eq!(
        harness.board.store.contents(),
        Some(Credentials::new(SSID, PASSWORD))
    );
}
