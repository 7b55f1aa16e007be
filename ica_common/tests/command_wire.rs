//! The command name doubles as the wire discriminator for the excluded
//! messaging layer.

use ica_common::prelude::*;
use std::time::Duration;

#[test]
fn serialized_tag_is_the_command_name() {
    let cmd = Command::new(CommandKind::Device(DeviceCommand::new(7, "Attach")))
        .with_timeout(Duration::from_millis(500))
        .allowed_in(StatePermissions::IDLE);

    let json = serde_json::to_value(&cmd).unwrap();
    assert_eq!(json["kind"]["name"], names::DEVICE);
    assert_eq!(json["kind"]["args"]["instance_id"], 7);
}

#[test]
fn every_variant_tag_matches_name() {
    let kinds = vec![
        CommandKind::OperationEvent(OperationEvent::MonitorStart),
        CommandKind::SetAvailability { active: true, cause: 1 },
        CommandKind::InitStageProgress { stage: InitStage::Settings, success: true },
        CommandKind::Shutdown,
        CommandKind::OperationStateChanged(OperationState::Idle),
        CommandKind::AvailabilityStateChanged(AvailabilityState::Error),
        CommandKind::DataChanged { key: "k".into(), value: "v".into() },
        CommandKind::Device(DeviceCommand::new(1, "Home")),
        CommandKind::DayLogEntry { text: "t".into() },
        CommandKind::RaiseEvent { code: 3, active: false },
        CommandKind::RemoteCareNotify { payload: "p".into() },
        CommandKind::GuiNotify { text: "g".into() },
    ];

    for kind in kinds {
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["name"], kind.name(), "{kind:?}");
        let back: CommandKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }
}

#[test]
fn missing_timeout_and_permissions_take_defaults() {
    let json = serde_json::json!({ "kind": { "name": "CmdShutdown" } });
    let cmd: Command = serde_json::from_value(json).unwrap();
    assert_eq!(cmd.timeout(), CmdTimeout::After(DEFAULT_CMD_TIMEOUT));
    assert!(cmd.permissions().is_empty());
}
