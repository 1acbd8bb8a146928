//! Integration tests for the hub and the sub-device adapters against a
//! simulated controller.

mod common;

use common::{hub_on_mock, simulate_controller, STATUS_10_3};
use lambda_link::devices::{
    keywords, ControllerType, Dg4Gate, Dg4Shutter, Dg4Wheel, FilterWheel, LambdaVf5, PropertyValue, Shutter, ShutterId,
    ShutterMode, SubDevice, TtlConfig, WheelId,
};
use lambda_link::port::MockFault;
use lambda_link::protocol::{ProtocolError, TERMINATOR};
use lambda_link::{ConnectError, DeviceError};
use pretty_assertions::assert_eq;
use std::sync::Arc;

// =============================================================================
// Hub
// =============================================================================

#[test]
fn test_initialize_goes_online_and_identifies() {
    // Arrange
    let (mock, hub) = hub_on_mock(None);
    simulate_controller(&mock, hub.port(), b"10-3SN", Vec::new());

    // Act
    let info = hub.initialize().unwrap();

    // Assert
    assert_eq!(info.controller_type, ControllerType::Lambda10_3);
    assert_eq!(info.id, "10-3");
    assert_eq!(mock.writes(hub.port()), vec![vec![0xEE], vec![0xFD]]);

    // Cached after the first query
    assert_eq!(hub.controller_type(), ControllerType::Lambda10_3);
    assert_eq!(mock.writes(hub.port()).len(), 2);
}

#[test]
fn test_smart_shutter_is_recognised() {
    let (mock, hub) = hub_on_mock(None);
    simulate_controller(&mock, hub.port(), b"SC v2", Vec::new());

    let info = hub.identify();
    assert_eq!(info.controller_type, ControllerType::SmartShutter);
    assert_eq!(info.id, "SC ");
}

#[test]
fn test_unanswered_type_query_assumes_10_2() {
    let (mock, hub) = hub_on_mock(None);
    mock.set_responder(hub.port(), |command| command.to_vec());

    let info = hub.identify();
    assert_eq!(info.controller_type, ControllerType::Lambda10_2);
}

#[test]
fn test_go_online_gives_up_after_all_attempts() {
    let (mock, hub) = hub_on_mock(None);

    let err = hub.go_online().unwrap_err();

    assert!(matches!(
        err,
        DeviceError::Connect(ConnectError::NoAnswer { attempts: 4, .. })
    ));
    assert_eq!(mock.writes(hub.port()), vec![vec![0xEE]; 4]);
    assert!(err.user_message().contains("MOCK0"));
}

#[test]
fn test_go_online_does_not_retry_transport_failures() {
    let (mock, hub) = hub_on_mock(None);
    mock.inject_fault(hub.port(), MockFault::Write);

    let err = hub.go_online().unwrap_err();

    assert!(err.is_transport());
    assert!(mock.writes(hub.port()).is_empty());
}

#[test]
fn test_go_online_succeeds_on_a_later_attempt() {
    let (mock, hub) = hub_on_mock(None);
    mock.script_reply(hub.port(), &[]);
    mock.script_reply(hub.port(), &[0xEE]);

    hub.go_online().unwrap();
    assert_eq!(mock.writes(hub.port()).len(), 2);
}

#[test]
fn test_oversized_status_is_malformed() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    let mut reply = vec![0xCC];
    reply.extend(std::iter::repeat(0x01).take(22));
    reply.push(TERMINATOR);
    mock.script_reply(hub.port(), &reply);

    let err = hub.status().unwrap_err();
    assert!(matches!(err, DeviceError::MalformedResponse { what: "status", len: 22 }));
}

#[test]
fn test_hub_properties() {
    let (_mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));

    assert_eq!(
        hub.get_property(keywords::CONTROLLER_INFO).unwrap(),
        PropertyValue::Text("SC".to_string())
    );
    hub.set_property(keywords::ANSWER_TIMEOUT, PropertyValue::Integer(250))
        .unwrap();
    assert_eq!(hub.answer_timeout().as_millis(), 250);
    assert!(matches!(
        hub.set_property(keywords::BUSY, PropertyValue::Integer(1)),
        Err(DeviceError::ReadOnlyProperty(_))
    ));
}

// =============================================================================
// Filter wheels
// =============================================================================

#[test]
fn test_wheel_moves_with_speed_in_high_nibble() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    mock.echo_commands(hub.port(), true);
    let a = FilterWheel::new(Arc::clone(&hub), WheelId::A);
    let b = FilterWheel::new(Arc::clone(&hub), WheelId::B);

    a.set_position(4).unwrap();
    b.set_speed(1).unwrap();
    b.set_position(2).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![0x34], vec![0x80 + 0x12]]);
    assert_eq!(a.position(), 4);
    assert_eq!(b.position(), 2);
}

#[test]
fn test_wheel_c_accepts_position_only_echo() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_2));
    mock.script_reply(hub.port(), &[252, 5, TERMINATOR]);
    let c = FilterWheel::new(Arc::clone(&hub), WheelId::C);

    c.set_position(5).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![252, 0x35]]);
    assert_eq!(c.position(), 5);
}

#[test]
fn test_same_position_is_not_resent() {
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), true);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);

    wheel.set_position(3).unwrap();
    wheel.set_position(3).unwrap();

    assert_eq!(mock.writes(hub.port()).len(), 1);
}

#[test]
fn test_closed_gate_parks_wheel_and_remembers_position() {
    // Arrange
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), true);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);
    wheel.set_closed_position(9).unwrap();
    wheel.set_position(2).unwrap();

    // Act: close, request a new position, reopen
    wheel.set_gate_open(false).unwrap();
    wheel.set_position(7).unwrap();
    wheel.set_position(6).unwrap();
    wheel.set_gate_open(true).unwrap();

    // Assert: one park move, no moves while closed, then the remembered position
    assert_eq!(
        mock.writes(hub.port()),
        vec![vec![0x32], vec![0x39], vec![0x36]]
    );
    assert_eq!(wheel.position(), 6);
    assert!(wheel.gate_open());
}

#[test]
fn test_wheel_retries_once_after_missing_echo() {
    let (mock, hub) = hub_on_mock(None);
    mock.script_reply(hub.port(), &[]);
    mock.echo_commands(hub.port(), true);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);

    wheel.set_position(1).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![0x31], vec![0x31]]);
    assert_eq!(wheel.position(), 1);
}

#[test]
fn test_failed_move_leaves_cached_position() {
    let (mock, hub) = hub_on_mock(None);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);

    let err = wheel.set_position(5).unwrap_err();

    assert!(matches!(
        err,
        DeviceError::Protocol(ProtocolError::EchoTimeout { matched: 0 })
    ));
    assert_eq!(wheel.position(), 0);
    assert_eq!(wheel.get_property(keywords::STATE).unwrap(), PropertyValue::Integer(0));
    // One original attempt plus one retry
    assert_eq!(mock.writes(hub.port()).len(), 2);
}

#[test]
fn test_completion_timeout_is_not_retried() {
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), false);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::A);

    let err = wheel.set_position(5).unwrap_err();

    assert!(matches!(
        err,
        DeviceError::Protocol(ProtocolError::CompletionTimeout { .. })
    ));
    assert_eq!(mock.writes(hub.port()).len(), 1);
}

#[test]
fn test_wheel_property_errors() {
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), true);
    let wheel = FilterWheel::new(Arc::clone(&hub), WheelId::B);

    assert!(matches!(
        wheel.set_property(keywords::STATE, PropertyValue::Integer(10)),
        Err(DeviceError::PositionOutOfRange { position: 10, max: 9 })
    ));
    assert!(matches!(
        wheel.set_property(keywords::SPEED, PropertyValue::Integer(8)),
        Err(DeviceError::InvalidSpeed { speed: 8, max: 7 })
    ));
    assert!(matches!(
        wheel.set_property(keywords::BUSY, PropertyValue::Integer(0)),
        Err(DeviceError::ReadOnlyProperty(_))
    ));
    assert!(matches!(
        wheel.get_property("Colour"),
        Err(DeviceError::UnknownProperty(_))
    ));
    assert!(mock.writes(hub.port()).is_empty());

    wheel
        .set_property(keywords::STATE, PropertyValue::Text("3".to_string()))
        .unwrap();
    assert_eq!(wheel.get_property(keywords::STATE).unwrap(), PropertyValue::Integer(3));
}

// =============================================================================
// Shutters
// =============================================================================

#[test]
fn test_shutter_accepts_inverted_echo() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));
    mock.script_reply(hub.port(), &[172, TERMINATOR]);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    shutter.set_open(true).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![170]]);
    assert!(shutter.is_open());
}

#[test]
fn test_shutter_b_bytes() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    mock.echo_commands(hub.port(), true);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::B);

    shutter.set_open(true).unwrap();
    shutter.set_open(false).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![186], vec![188]]);
    assert!(!shutter.is_open());
}

#[test]
fn test_modes_are_unsupported_on_10_2() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_2));
    mock.echo_commands(hub.port(), true);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    let err = shutter.set_mode(ShutterMode::Soft).unwrap_err();

    assert!(matches!(err, DeviceError::UnsupportedByController { .. }));
    assert!(err.user_message().contains("10-2"));
    assert!(mock.writes(hub.port()).is_empty());
    assert_eq!(shutter.mode(), ShutterMode::Fast);
}

#[test]
fn test_mode_commands_address_the_shutter_on_10_3() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    mock.echo_commands(hub.port(), true);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::B);

    shutter.set_mode(ShutterMode::Soft).unwrap();
    shutter.set_mode(ShutterMode::Nd).unwrap();
    shutter.set_nd(50).unwrap();

    assert_eq!(
        mock.writes(hub.port()),
        vec![vec![0xDD, 2], vec![0xDE, 2, 1], vec![0xDE, 2, 50]]
    );
    assert_eq!(shutter.nd(), 50);
}

#[test]
fn test_nd_on_smart_shutter_is_sent_only_in_nd_mode() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));
    mock.echo_commands(hub.port(), true);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    shutter.set_nd(20).unwrap();
    assert!(mock.writes(hub.port()).is_empty());

    shutter.set_mode(ShutterMode::Nd).unwrap();
    shutter.set_mode(ShutterMode::Fast).unwrap();

    assert_eq!(mock.writes(hub.port()), vec![vec![0xDE, 20], vec![0xDC]]);
    assert_eq!(shutter.mode(), ShutterMode::Fast);
}

#[test]
fn test_nd_range_is_checked() {
    let (_mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    assert!(matches!(shutter.set_nd(0), Err(DeviceError::InvalidValue { .. })));
    assert!(matches!(shutter.set_nd(145), Err(DeviceError::InvalidValue { .. })));
    assert_eq!(shutter.nd(), 1);
}

#[test]
fn test_sync_from_status_on_10_3() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    simulate_controller(&mock, hub.port(), b"10-3SN", STATUS_10_3.to_vec());
    let a = Shutter::new(Arc::clone(&hub), ShutterId::A);
    let b = Shutter::new(Arc::clone(&hub), ShutterId::B);

    a.sync_from_status().unwrap();
    b.sync_from_status().unwrap();

    assert!(a.is_open());
    assert_eq!(a.mode(), ShutterMode::Nd);
    assert_eq!(a.nd(), 12);
    assert!(!b.is_open());
    assert_eq!(b.mode(), ShutterMode::Soft);
    assert_eq!(mock.writes(hub.port()), vec![vec![0xCC], vec![0xCC]]);
}

#[test]
fn test_sync_from_status_tolerates_silence() {
    let (_mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    let status = shutter.sync_from_status().unwrap();

    assert_eq!(status.open, None);
    assert!(!shutter.is_open());
}

#[test]
fn test_sync_from_status_reports_transport_failure() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::SmartShutter));
    mock.inject_fault(hub.port(), MockFault::Purge);
    let shutter = Shutter::new(Arc::clone(&hub), ShutterId::A);

    let err = shutter.sync_from_status().unwrap_err();
    assert!(err.is_transport());
}

// =============================================================================
// VF-5
// =============================================================================

#[test]
fn test_vf5_reads_wavelength() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    simulate_controller(&mock, hub.port(), b"10-3SN", Vec::new());
    let vf5 = LambdaVf5::new(Arc::clone(&hub));

    assert_eq!(vf5.wavelength().unwrap(), 520);
    assert_eq!(vf5.cached_wavelength(), 520);
    assert_eq!(
        vf5.get_property(keywords::WAVELENGTH).unwrap(),
        PropertyValue::Integer(520)
    );
}

#[test]
fn test_vf5_sets_wavelength_tilt_and_ttl() {
    let (mock, hub) = hub_on_mock(Some(ControllerType::Lambda10_3));
    mock.echo_commands(hub.port(), true);
    let vf5 = LambdaVf5::new(Arc::clone(&hub));

    vf5.set_speed(1).unwrap();
    vf5.set_wavelength(600).unwrap();
    vf5.set_tilt(42).unwrap();
    vf5.set_white_light_mode(true).unwrap();
    vf5.configure_ttl(TtlConfig {
        channel: 1,
        rising_edge: true,
        enabled: true,
        output: false,
    })
    .unwrap();

    // 600 nm = 0x0258, speed 1 in the top two bits
    assert_eq!(
        mock.writes(hub.port()),
        vec![
            vec![0xDA, 0x01, 0x42, 0x58],
            vec![0xDE, 42],
            vec![0xAA],
            vec![0xFA, 0xA3, 1],
        ]
    );
    assert_eq!(vf5.cached_wavelength(), 600);
    assert_eq!(vf5.tilt(), 42);
    assert!(vf5.white_light_mode());
}

#[test]
fn test_vf5_rejects_out_of_range_values() {
    let (mock, hub) = hub_on_mock(None);
    let vf5 = LambdaVf5::new(Arc::clone(&hub));

    assert!(vf5.set_wavelength(337).is_err());
    assert!(vf5.set_wavelength(901).is_err());
    assert!(matches!(vf5.set_speed(4), Err(DeviceError::InvalidSpeed { max: 3, .. })));
    assert!(vf5.set_tilt(256).is_err());
    assert!(vf5
        .configure_ttl(TtlConfig {
            channel: 3,
            rising_edge: false,
            enabled: false,
            output: true,
        })
        .is_err());
    assert!(mock.writes(hub.port()).is_empty());
    assert_eq!(vf5.cached_wavelength(), 500);
}

// =============================================================================
// DG-4
// =============================================================================

#[test]
fn test_dg4_wheel_moves_are_gated_by_shutter() {
    // Arrange
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), true);
    let gate = Dg4Gate::new();
    let wheel = Dg4Wheel::new(Arc::clone(&hub), gate.clone());
    let shutter = Dg4Shutter::new(Arc::clone(&hub), gate.clone());

    // Act
    wheel.initialize().unwrap();
    shutter.initialize().unwrap();
    wheel.set_property(keywords::STATE, PropertyValue::Integer(5)).unwrap();
    shutter.set_property(keywords::STATE, PropertyValue::from("open")).unwrap();
    wheel.set_property(keywords::STATE, PropertyValue::Integer(11)).unwrap();

    // Assert
    assert_eq!(
        mock.writes(hub.port()),
        vec![vec![0xEE], vec![0], vec![5], vec![11]]
    );
    assert_eq!(wheel.get_property(keywords::STATE).unwrap(), PropertyValue::Integer(11));
    assert_eq!(shutter.get_property(keywords::STATE).unwrap(), PropertyValue::Integer(1));
    assert!(gate.is_open());
}

#[test]
fn test_dg4_failed_move_keeps_position() {
    let (mock, hub) = hub_on_mock(None);
    mock.echo_commands(hub.port(), true);
    let gate = Dg4Gate::new();
    let wheel = Dg4Wheel::new(Arc::clone(&hub), gate.clone());
    let shutter = Dg4Shutter::new(Arc::clone(&hub), gate);
    wheel.set_position(2).unwrap();
    shutter.set_open(true).unwrap();

    mock.set_responder(hub.port(), |_| Vec::new());
    assert!(matches!(
        wheel.set_position(8),
        Err(DeviceError::Protocol(ProtocolError::EchoTimeout { .. }))
    ));
    assert_eq!(wheel.position(), 2);
    assert!(wheel
        .set_property(keywords::DELAY, PropertyValue::Float(1e300))
        .is_err());
}
