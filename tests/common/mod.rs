#![allow(dead_code)]

use std::time::Duration;

use pool_controller::{
    config::Config,
    controller::{Flow, PoolController},
    credentials::Credentials,
    platform::sim::SimBoard,
};
use pool_common::Topics;

pub const SSID: &str = "home";
pub const PASSWORD: &str = "hunter22";

pub fn config() -> Config {
    let mut config = Config::default();
    config.device.id = "pool".to_string();
    config
}

pub struct Harness {
    pub board: SimBoard,
    pub controller: PoolController,
    pub topics: Topics,
}

impl Harness {
    /// Board with a reachable network. `stored` seeds the credential store.
    pub fn new(stored: bool) -> Self {
        let board = SimBoard::default();
        board.link.add_network(SSID, PASSWORD);
        board.sensor.set(Some(25.0));
        if stored {
            use pool_controller::platform::CredentialStore;
            let mut store = board.store.clone();
            store.save(&Credentials::new(SSID, PASSWORD)).unwrap();
        }

        let config = config();
        let controller = PoolController::new(board.platform(), &config);
        Self {
            board,
            controller,
            topics: Topics::for_device(&config.device.id),
        }
    }

    /// Booted, joined and connected to the broker.
    pub fn online() -> Self {
        let mut harness = Self::new(true);
        assert_eq!(harness.controller.boot(), Flow::Continue);
        assert!(harness.controller.channel_connected());
        harness
    }

    pub fn poll(&mut self) -> Flow {
        self.controller.poll()
    }

    pub fn advance(&mut self, by: Duration) {
        self.board.clock.advance(by);
    }

    /// Deliver a broker message and run the pass that handles it.
    pub fn send(&mut self, topic: &str, payload: &str) -> Flow {
        self.board.channel.inject(topic, payload);
        self.poll()
    }

    pub fn published(&self, topic: &str) -> Vec<String> {
        self.board.channel.published(topic)
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.board.channel.retained(topic)
    }
}
