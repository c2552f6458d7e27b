mod common;

use std::time::Duration;

use common::Harness;
use pool_common::{TimerReport, ValveMode, WifiReport};
use pool_controller::{
    controller::Flow,
    link::LinkState,
    platform::sim::ChannelEvent,
    timer::TimerPhase,
};

fn timer_reports(harness: &Harness) -> Vec<TimerReport> {
    harness
        .published(&harness.topics.timer_state)
        .iter()
        .map(|json| serde_json::from_str(json).unwrap())
        .collect()
}

#[test]
fn connect_publishes_full_snapshot() {
    let harness = Harness::online();
    let topics = &harness.topics;

    assert_eq!(harness.retained(&topics.pump_state).as_deref(), Some("OFF"));
    assert_eq!(harness.retained(&topics.valve_state).as_deref(), Some("1"));
    assert_eq!(harness.retained(&topics.temperature_state).as_deref(), Some("25.0"));

    let wifi: WifiReport =
        serde_json::from_str(&harness.retained(&topics.wifi_state).unwrap()).unwrap();
    assert_eq!(wifi.ssid.as_deref(), Some("home"));

    let timer: TimerReport =
        serde_json::from_str(&harness.retained(&topics.timer_state).unwrap()).unwrap();
    assert!(!timer.active);

    let subscribed: Vec<String> = harness
        .board
        .channel
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ChannelEvent::Subscribed(topic) => Some(topic),
            _ => None,
        })
        .collect();
    assert_eq!(subscribed.len(), 4);
    assert!(subscribed.contains(&topics.wifi_clear));
}

#[test]
fn timer_runs_to_completion() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    let topic = harness.topics.timer_set.clone();

    harness.send(&topic, r#"{"mode":1,"duration":5}"#);

    assert_eq!(harness.published(&harness.topics.valve_state), vec!["1"]);
    assert_eq!(harness.published(&harness.topics.pump_state), vec!["ON"]);
    assert_eq!(
        timer_reports(&harness)[0],
        TimerReport {
            active: true,
            remaining: 5,
            mode: 1,
            duration: 5
        }
    );
    assert!(harness.board.pump.is_energized());

    for _ in 0..10 {
        harness.advance(Duration::from_secs(1));
        harness.poll();
    }

    let reports = timer_reports(&harness);
    let terminal: Vec<&TimerReport> = reports.iter().filter(|r| !r.active).collect();
    assert_eq!(
        terminal,
        vec![&TimerReport {
            active: false,
            remaining: 0,
            mode: 1,
            duration: 5
        }]
    );
    assert_eq!(harness.published(&harness.topics.pump_state), vec!["ON", "OFF"]);
    assert!(!harness.board.pump.is_energized());
    assert_eq!(harness.controller.timer_state().phase, TimerPhase::Idle);
}

#[test]
fn timer_expires_while_the_link_is_down() {
    let mut harness = Harness::online();
    let topic = harness.topics.timer_set.clone();
    harness.send(&topic, r#"{"mode":1,"duration":5}"#);
    assert!(harness.board.pump.is_energized());

    harness.board.link.set_router_up(false);
    for _ in 0..10 {
        harness.advance(Duration::from_secs(1));
        harness.poll();
    }

    assert!(!harness.board.pump.is_energized());
    assert!(!harness.controller.equipment_state().pump_on);
    assert_eq!(harness.controller.timer_state().phase, TimerPhase::Idle);
    assert_eq!(harness.controller.timer_state().remaining, 0);
    assert!(matches!(
        harness.controller.link_state(),
        LinkState::Degraded { .. }
    ));
}

#[test]
fn zero_duration_stops_a_running_timer() {
    let mut harness = Harness::online();
    let topic = harness.topics.timer_set.clone();

    harness.send(&topic, r#"{"mode":2,"duration":600}"#);
    assert_eq!(harness.controller.equipment_state().valve, ValveMode::Mode2);

    harness.send(&topic, r#"{"mode":2,"duration":0}"#);

    let last = *timer_reports(&harness).last().unwrap();
    assert_eq!(
        last,
        TimerReport {
            active: false,
            remaining: 0,
            mode: 2,
            duration: 600
        }
    );
    assert!(!harness.controller.equipment_state().pump_on);
}

#[test]
fn invalid_timer_commands_change_nothing() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    let topic = harness.topics.timer_set.clone();

    harness.send(&topic, r#"{"mode":3,"duration":60}"#);
    harness.send(&topic, r#"{"mode":1}"#);
    harness.send(&topic, "start please");

    assert!(harness.board.channel.events().is_empty());
    assert_eq!(harness.controller.timer_state().phase, TimerPhase::Idle);
}

#[test]
fn pump_toggle_twice() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    let topic = harness.topics.pump_set.clone();

    harness.send(&topic, "TOGGLE");
    harness.send(&topic, "TOGGLE");

    assert_eq!(harness.published(&harness.topics.pump_state), vec!["ON", "OFF"]);
    assert_eq!(harness.board.pump.writes(), vec![false, true, false]);
}

#[test]
fn repeated_valve_mode_moves_the_relay_once() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    let topic = harness.topics.valve_set.clone();

    harness.send(&topic, "2");
    harness.send(&topic, "2");

    assert_eq!(harness.board.valve.writes(), vec![false, true]);
    assert_eq!(harness.published(&harness.topics.valve_state), vec!["2", "2"]);

    harness.send(&topic, "toggle");
    assert_eq!(harness.controller.equipment_state().valve, ValveMode::Mode1);
}

#[test]
fn manual_pump_off_leaves_timer_running() {
    let mut harness = Harness::online();
    let timer = harness.topics.timer_set.clone();
    let pump = harness.topics.pump_set.clone();

    harness.send(&timer, r#"{"mode":1,"duration":60}"#);
    harness.send(&pump, "OFF");

    assert!(!harness.controller.equipment_state().pump_on);
    assert_eq!(harness.controller.timer_state().phase, TimerPhase::Running);
}

#[test]
fn foreign_and_malformed_messages_are_dropped() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();

    assert_eq!(harness.send("devices/elsewhere/pump/set", "ON"), Flow::Continue);
    let pump = harness.topics.pump_set.clone();
    assert_eq!(harness.send(&pump, "FULL BLAST"), Flow::Continue);

    assert!(harness.board.channel.events().is_empty());
    assert!(!harness.controller.equipment_state().pump_on);
}

#[test]
fn wifi_clear_announces_then_wipes_then_restarts() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    let topic = harness.topics.wifi_clear.clone();

    assert_eq!(harness.send(&topic, ""), Flow::Restart);

    assert_eq!(
        harness.board.channel.events(),
        vec![
            ChannelEvent::Published {
                topic: harness.topics.wifi_state.clone(),
                payload: r#"{"status":"disconnected"}"#.to_string(),
                retain: true,
            },
            ChannelEvent::Disconnected,
        ]
    );
    assert_eq!(harness.board.store.contents(), None);
    assert!(harness.board.link.erased());
}

#[test]
fn periodic_telemetry() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();

    harness.advance(Duration::from_secs(30));
    harness.poll();
    assert_eq!(harness.published(&harness.topics.wifi_state).len(), 1);
    assert!(harness.published(&harness.topics.temperature_state).is_empty());

    harness.board.sensor.set(Some(27.44));
    harness.advance(Duration::from_secs(30));
    harness.poll();
    assert_eq!(harness.published(&harness.topics.wifi_state).len(), 2);
    assert_eq!(harness.published(&harness.topics.temperature_state), vec!["27.4"]);
}

#[test]
fn sensor_fault_skips_temperature() {
    let mut harness = Harness::online();
    harness.board.channel.clear_events();
    harness.board.sensor.set(None);

    harness.advance(Duration::from_secs(60));
    harness.poll();

    assert!(harness.published(&harness.topics.temperature_state).is_empty());
    assert_eq!(harness.published(&harness.topics.wifi_state).len(), 1);
}

#[test]
fn broker_drop_reconnects_on_next_pass() {
    let mut harness = Harness::online();
    harness.advance(Duration::from_secs(20));
    harness.board.channel.drop_connection();
    harness.board.channel.clear_events();
    let pump = harness.topics.pump_set.clone();
    harness.board.channel.inject(&pump, "ON");

    harness.poll();

    assert!(harness.controller.channel_connected());
    assert_eq!(harness.board.channel.connects(), 2);
    let will = harness.board.channel.last_connect().unwrap().last_will;
    assert_eq!(will.topic, harness.topics.wifi_state);

    // Applied in the same pass, after the fresh session's snapshot
    assert!(harness.controller.equipment_state().pump_on);
    let events = harness.board.channel.events();
    let connected = events
        .iter()
        .position(|e| *e == ChannelEvent::Connected)
        .unwrap();
    let pump_states: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ChannelEvent::Published { topic, .. } if *topic == harness.topics.pump_state => Some(i),
            _ => None,
        })
        .collect();
    assert!(pump_states.iter().all(|&i| i > connected));
    assert_eq!(harness.published(&harness.topics.pump_state), vec!["OFF", "ON"]);
}

#[test]
fn refused_broker_is_retried_on_interval() {
    let mut harness = Harness::new(true);
    harness.board.channel.refuse_with(5);
    harness.controller.boot();
    assert!(!harness.controller.channel_connected());

    harness.poll();
    assert_eq!(harness.board.channel.connects(), 1);

    harness.board.channel.accept();
    harness.advance(Duration::from_secs(5));
    harness.poll();

    assert_eq!(harness.board.channel.connects(), 2);
    assert!(harness.controller.channel_connected());
}

#[test]
fn shutdown_switches_pump_off_cleanly() {
    let mut harness = Harness::online();
    let pump = harness.topics.pump_set.clone();
    harness.send(&pump, "ON");
    harness.board.channel.clear_events();

    harness.controller.shutdown();

    assert!(!harness.board.pump.is_energized());
    assert_eq!(
        harness.board.channel.events(),
        vec![
            ChannelEvent::Published {
                topic: harness.topics.pump_state.clone(),
                payload: "OFF".to_string(),
                retain: true,
            },
            ChannelEvent::Disconnected,
        ]
    );
}
