mod common;
use common::*;

use entities::{Flag, Numeric, Select};
use pi30_bridge::mqtt::{ChannelData, Message};

/// Send whatever is queued, answering each with ACK.
fn flush(h: &mut Harness) -> Vec<String> {
    let before = h.link.sent().len();
    for _ in 0..10 {
        h.step();
        if *h.coordinator.state() == State::Idle {
            break;
        }
        h.link.feed(&reply("ACK"));
    }
    h.link.sent()[before..].to_vec()
}

#[test]
fn switch_sends_flag_command_and_reads_back() {
    common_setup();
    let mut h = Factory::harness();

    h.coordinator
        .handle_control(ControlRequest::Flag(Flag::BuzzerControl, false));
    assert_eq!(h.recorder.last("buzzer_control").as_deref(), Some("false"));
    assert_eq!(flush(&mut h), vec!["PDa", "QFLAG"]);

    h.coordinator
        .handle_control(ControlRequest::Flag(Flag::SolarFeedToGrid, true));
    assert_eq!(flush(&mut h), vec!["PEd", "QFLAG"]);
}

#[test]
fn select_sends_parameter() {
    common_setup();
    let mut h = Factory::harness();

    h.coordinator
        .select_option(Select::EqualizationEnable, "Enabled")
        .unwrap();
    assert_eq!(flush(&mut h), vec!["PBEQE1", "QBEQI"]);
    assert_eq!(
        h.coordinator
            .entities()
            .select_state(Select::EqualizationEnable),
        Some("Enabled")
    );
}

#[test]
fn select_rejections() {
    common_setup();
    let mut h = Factory::harness();

    assert!(matches!(
        h.coordinator
            .select_option(Select::EqualizationActive, "Sometimes"),
        Err(ProtocolError::UnknownOption { .. })
    ));
    assert!(matches!(
        h.coordinator.select_option(Select::BatteryType, "AGM"),
        Err(ProtocolError::ReadOnly(_))
    ));
    assert_eq!(h.coordinator.scheduler().priority_len(), 0);
}

#[test]
fn configured_select_prefix_makes_it_writable() {
    common_setup();
    let yaml = format!(
        "{}{}",
        Factory::YAML,
        r#"
selects:
  battery_type: { prefix: PBT, parameters: ["00", "01", "02"], options: [AGM, Flooded, User] }
"#
    );
    let mut h = Factory::harness_with(&yaml, SharedStore::default());
    h.step();
    h.settle();

    h.coordinator.select_option(Select::BatteryType, "User").unwrap();
    assert_eq!(flush(&mut h), vec!["PBT02", "QPIRI"]);
}

#[test]
fn number_is_formatted() {
    common_setup();
    let mut h = Factory::harness();

    h.coordinator
        .control_number(Numeric::EqualizationVoltage, 58.4)
        .unwrap();
    assert_eq!(h.recorder.last("equalization_voltage").as_deref(), Some("58.4"));
    assert_eq!(flush(&mut h), vec!["PBEQV58.40", "QBEQI"]);

    h.coordinator
        .control_number(Numeric::BatteryRechargeVoltage, 46.0)
        .unwrap();
    h.coordinator
        .control_number(Numeric::MaxChargingCurrent, 30.0)
        .unwrap();
    assert_eq!(
        flush(&mut h),
        vec!["PBCV46.0", "QPIRI", "MNCHGC030", "QPIRI"]
    );
}

#[test]
fn number_rejections() {
    common_setup();
    let mut h = Factory::harness();

    assert!(matches!(
        h.coordinator.control_number(Numeric::MaxChargingCurrent, 500.0),
        Err(ProtocolError::OutOfRange { .. })
    ));
    assert!(matches!(
        h.coordinator.control_number(Numeric::GridVoltage, 230.0),
        Err(ProtocolError::ReadOnly(_))
    ));
    assert_eq!(h.coordinator.scheduler().priority_len(), 0);
    assert!(h.recorder.last("max_charging_current").is_none());
}

#[test]
fn unformattable_number_is_rejected() {
    common_setup();
    let yaml = format!(
        "{}{}",
        Factory::YAML,
        r#"
numbers:
  max_charging_current: { format: "%020d", min: 0, max: 1000 }
"#
    );
    let mut h = Factory::harness_with(&yaml, SharedStore::default());

    assert!(matches!(
        h.coordinator.control_number(Numeric::MaxChargingCurrent, 30.0),
        Err(ProtocolError::Format { .. })
    ));
    assert_eq!(h.coordinator.scheduler().priority_len(), 0);
}

#[test]
fn raw_command_is_sent_verbatim() {
    common_setup();
    let mut h = Factory::harness();

    h.coordinator
        .handle_control(ControlRequest::Raw(Command::new("POP02")));
    assert_eq!(flush(&mut h), vec!["POP02"]);
}

#[tokio::test]
async fn controls_arrive_over_mqtt() {
    common_setup();
    let h = Factory::harness();
    let link = h.link.clone();
    let store = h.store.clone();
    let channels = Channels::new();

    let driver = {
        let channels = channels.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            channels.from_mqtt.send(ChannelData::Message(Message {
                topic: "cmd/switch/power_saving".to_string(),
                retain: false,
                payload: "ON".to_string(),
            }))?;
            channels.from_mqtt.send(ChannelData::Message(Message {
                topic: "cmd/number/nonsense".to_string(),
                retain: false,
                payload: "1".to_string(),
            }))?;
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            channels.shutdown.send(())?;
            Ok::<(), anyhow::Error>(())
        }
    };

    let (run, driver) = tokio::join!(h.coordinator.run(channels.clone(), 10), driver);
    run.unwrap();
    driver.unwrap();

    assert_eq!(link.last_sent().as_deref(), Some("PEw"));
    // final save on shutdown
    assert!(store.commits() >= 1);
}
