//! Binary lighting bus with group on/off control.
//!
//! Frames are fixed length: `[0x05, application, 0x00, action, group, xor]`.
//! The controller echoes every command it executes and broadcasts the same
//! frame when a group changes at a wall panel, so one parser serves both
//! acknowledgements and unsolicited status.

use std::sync::Arc;

use avwire_engine::{
    Classification, Classifier, Command, CommandDef, CommandTable, ConfigSnapshot, Encoding,
    EngineError, EnumTable, ReconcileRule, Result, SessionBuilder, Slot, StatusKey,
};
use avwire_frame::{Checksum, CodecProfile, Frame, FrameCodec, Framing, FramingProfile};
use bytes::Bytes;
use tracing::debug;

pub const INDICATOR: u8 = 0x05;

/// Bytes after the indicator, checksum included.
pub const FRAME_LEN: usize = 5;

/// Lighting application id used when the device config does not name one.
pub const DEFAULT_APPLICATION: u8 = 0x38;

/// Status attribute holding each group's on/off state.
pub const GROUP_ON: &str = "group_on";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    On,
    Off,
}

pub const ACTIONS: EnumTable<Action, u8> =
    EnumTable::new(&[(Action::On, 0x79), (Action::Off, 0x01)]);

pub const COMMANDS: CommandTable = CommandTable::new(&[
    CommandDef::new(
        "on",
        Encoding::Layout(&[Slot::Arg(0), Slot::Byte(0x00), Slot::Byte(0x79), Slot::Arg(1)]),
    ),
    CommandDef::new(
        "off",
        Encoding::Layout(&[Slot::Arg(0), Slot::Byte(0x00), Slot::Byte(0x01), Slot::Arg(1)]),
    ),
]);

pub const fn group_key(group: u8) -> StatusKey {
    StatusKey::indexed(GROUP_ON, group as u32)
}

pub fn codec() -> FrameCodec {
    FrameCodec::new(Framing::FixedLength {
        indicator: Bytes::from_static(&[INDICATOR]),
        length: FRAME_LEN,
    })
    .with_checksum(Checksum::Xor)
}

/// Same framing as [`codec`], as data.
pub fn profile() -> CodecProfile {
    CodecProfile {
        checksum: Checksum::Xor,
        ..CodecProfile::new(FramingProfile::FixedLength {
            indicator: vec![INDICATOR],
            length: FRAME_LEN,
        })
    }
}

/// One decoded group frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEvent {
    pub application: u8,
    pub group: u8,
    pub action: Action,
}

impl GroupEvent {
    pub fn parse(body: &[u8]) -> Option<Self> {
        match *body {
            [application, 0x00, action, group] => Some(Self {
                application,
                group,
                action: ACTIONS.value(action)?,
            }),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<[u8; 4]> {
        let action = ACTIONS.wire(self.action)?;
        Some([self.application, 0x00, action, self.group])
    }
}

/// Switch one group. A newer command for the same group replaces any that is
/// still queued.
pub fn command(application: u8, group: u8, action: Action) -> Result<Command> {
    let name = match action {
        Action::On => "on",
        Action::Off => "off",
    };
    Ok(COMMANDS
        .build(name, &[application.into(), group.into()])?
        .with_group(format!("group:{group}"))
        .replacing())
}

/// Matches echoes to the in-flight command and reports every group frame as
/// status.
#[derive(Debug, Default, Clone, Copy)]
pub struct LightingClassifier;

impl Classifier for LightingClassifier {
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification {
        let Some(event) = GroupEvent::parse(&frame.body) else {
            debug!(frame = ?frame.body, "not a group frame");
            return Classification::ignore();
        };
        let echo = match (in_flight, event.body()) {
            (Some(command), Some(body)) => command.payload()[..] == body,
            _ => false,
        };
        let classification = if echo {
            Classification::success()
        } else {
            Classification::ignore()
        };
        classification.with_status(group_key(event.group), event.action == Action::On)
    }
}

/// Drive `group` toward its requested on/off state.
pub fn rule(application: u8, group: u8) -> ReconcileRule {
    ReconcileRule::new(group_key(group), move |target| {
        let action = if target.as_bool()? {
            Action::On
        } else {
            Action::Off
        };
        command(application, group, action).ok()
    })
}

/// Session for one lighting controller.
///
/// Reads `application` (number, default `0x38`) and `groups` (array of group
/// numbers to reconcile) from the device config.
pub fn session(snapshot: &ConfigSnapshot) -> Result<SessionBuilder> {
    let application = match snapshot.get_u64("application") {
        Some(id) => u8::try_from(id).map_err(|_| {
            EngineError::InvalidConfig(format!("application id {id} does not fit in a byte"))
        })?,
        None => DEFAULT_APPLICATION,
    };
    let groups: Vec<u8> = snapshot.get_as("groups")?.unwrap_or_default();

    Ok(
        SessionBuilder::new(codec(), Arc::new(LightingClassifier))
            .with_snapshot(snapshot.clone())
            .with_rules(groups.into_iter().map(|group| rule(application, group))),
    )
}
