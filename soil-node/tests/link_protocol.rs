//! End-to-end sender behavior against the scripted link.

use std::time::Duration;

use soil_core::{MacAddress, SenderConfig, SensorReading, DATA_FRAME_LEN};
use soil_node::config::NodeConfig;
use soil_node::sim::{SimHub, SimLink};
use soil_node::state::LinkState;
use soil_node::{SendOutcome, Sender};

fn hub() -> MacAddress {
    MacAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
}

fn reading() -> SensorReading {
    SensorReading {
        device_id: "SOIL_020000000001".to_string(),
        timestamp_ms: 1_700_000_000_000,
        soil_voltage: 1.31,
        soil_moisture_pct: 44.0,
        soil_raw: 1650,
        battery_voltage: 0.0,
        battery_pct: -1.0,
    }
}

fn unicast(channel: u8) -> SenderConfig {
    SenderConfig {
        target: hub(),
        starting_channel: channel,
        ..SenderConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn sweep_stops_at_the_channel_that_answers() {
    let link = SimLink::new(1).with_hub(SimHub {
        address: hub(),
        channel: 7,
    });
    let mut sender = Sender::initialize(link.clone(), SenderConfig::default()).unwrap();

    let outcome = sender.send_telemetry(&reading()).await;
    assert_eq!(
        outcome,
        SendOutcome::Success {
            channel: 7,
            responder: Some(hub())
        }
    );

    let rec = link.record();
    let mut expected = vec![1; 6];
    for ch in 2..=6 {
        expected.extend([ch; 3]);
    }
    expected.push(7);
    assert_eq!(rec.send_channels(), expected);
    assert_eq!(rec.channel_sets, vec![1, 1, 2, 3, 4, 5, 6, 7]);
    assert!(rec
        .sends
        .iter()
        .all(|s| s.dest.is_broadcast() && s.bytes.len() == DATA_FRAME_LEN));
}

#[tokio::test(start_paused = true)]
async fn silent_air_exhausts_every_channel() {
    let link = SimLink::new(4);
    let config = SenderConfig {
        starting_channel: 4,
        max_retries: 2,
        ..SenderConfig::default()
    };
    let mut sender = Sender::initialize(link.clone(), config).unwrap();

    assert_eq!(
        sender.send_telemetry(&reading()).await,
        SendOutcome::AllChannelsFailed
    );
    let channels = link.record().send_channels();
    assert_eq!(channels.len(), 2 + 13 * 2);
    assert_eq!(&channels[..2], &[4, 4]);
    assert_eq!(channels.last(), Some(&13));
}

#[tokio::test(start_paused = true)]
async fn fixed_channel_never_switches() {
    let link = SimLink::new(4).with_hub(SimHub {
        address: hub(),
        channel: 9,
    });
    let mut sender = Sender::initialize_on_fixed_channel(link.clone(), unicast(9)).unwrap();

    assert_eq!(sender.send_telemetry(&reading()).await, SendOutcome::NoAck);
    let rec = link.record();
    assert_eq!(rec.send_channels(), vec![4, 4, 4]);
    assert!(rec.channel_sets.is_empty());
    assert_eq!(rec.peer_adds, vec![(hub(), 4)]);
}

#[tokio::test(start_paused = true)]
async fn unicast_sweep_moves_the_hub_peer() {
    let link = SimLink::new(3).with_hub(SimHub {
        address: hub(),
        channel: 8,
    });
    let mut sender = Sender::initialize(link.clone(), unicast(3)).unwrap();

    assert_eq!(
        sender.send_telemetry(&reading()).await,
        SendOutcome::Success {
            channel: 8,
            responder: Some(hub())
        }
    );
    let rec = link.record();
    assert!(rec.sends.iter().all(|s| s.dest == hub()));
    let homes: Vec<u8> = rec.peer_adds.iter().map(|(_, ch)| *ch).collect();
    assert_eq!(homes, vec![3, 1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(link.peers().get(&hub()), Some(&8));

    sender.shutdown();
    assert!(link.peers().is_empty());
    assert_eq!(
        sender.send_telemetry(&reading()).await,
        SendOutcome::NotInitialized
    );
}

#[tokio::test(start_paused = true)]
async fn ack_arriving_inside_the_window_completes_the_send() {
    let link = SimLink::new(2)
        .with_hub(SimHub {
            address: hub(),
            channel: 2,
        })
        .with_ack_delay(Duration::from_millis(300));
    let config = SenderConfig {
        starting_channel: 2,
        ..SenderConfig::default()
    };
    let mut sender = Sender::initialize(link.clone(), config).unwrap();

    let started = tokio::time::Instant::now();
    let outcome = sender.send_telemetry(&reading()).await;
    assert!(outcome.is_success());
    assert_eq!(link.record().sends.len(), 1);
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn discovered_hub_is_used_on_the_next_wake() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("link.toml");
    let cfg = NodeConfig {
        state_path: state_path.clone(),
        ..NodeConfig::default()
    };
    let link = SimLink::new(1).with_hub(SimHub {
        address: hub(),
        channel: 5,
    });

    // First wake: nothing stored, discover by broadcast.
    let mut state = LinkState::load(&state_path).unwrap();
    let first = cfg.sender_config(&state);
    assert!(first.is_discovery());
    let mut sender = Sender::initialize(link.clone(), first).unwrap();
    let SendOutcome::Success { channel, responder } = sender.send_telemetry(&reading()).await
    else {
        panic!("discovery failed");
    };
    sender.shutdown();
    assert_eq!((channel, responder), (5, Some(hub())));
    assert!(state.record_delivery(channel, responder, true));
    state.save(&state_path).unwrap();

    // Second wake: unicast straight to the stored hub on the stored channel.
    let state = LinkState::load(&state_path).unwrap();
    let second = cfg.sender_config(&state);
    assert_eq!(second.target, hub());
    assert_eq!(second.starting_channel, 5);
    let before = link.record().sends.len();
    let mut sender = Sender::initialize(link.clone(), second).unwrap();
    assert!(sender.send_telemetry(&reading()).await.is_success());
    let rec = link.record();
    assert_eq!(rec.sends.len(), before + 1);
    assert_eq!(rec.sends[before].dest, hub());
    assert_eq!(rec.sends[before].channel, 5);
}
