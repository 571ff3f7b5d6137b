//! ASCII display/projector protocol.
//!
//! CR-terminated lines. Commands are `POWR 1|0`, `POWR?`, `INPT n`, `INPT?`
//! and `PASS <password>`; the device answers `OK`, `ERR n`, `LOGIN OK`,
//! `LOGIN FAIL` or a status line (`POWR=1`, `INPT=2`). Status lines also
//! arrive unprompted when someone uses the front panel.

use std::sync::Arc;
use std::time::Duration;

use avwire_engine::{
    Classification, Classifier, Command, CommandArg, CommandDef, CommandTable, ConfigSnapshot,
    Encoding, EngineError, EnumTable, Priority, ReconcileRule, Result, SessionBuilder, StatusKey,
};
use avwire_frame::{CodecProfile, Frame, FrameCodec, FramingProfile};
use bytes::Bytes;
use tracing::debug;

pub const POWER: StatusKey = StatusKey::new("power");
pub const INPUT: StatusKey = StatusKey::new("input");

/// Lamp warm-up; power state is not re-checked before it elapses.
pub const WARM_UP: Duration = Duration::from_secs(20);

/// `ERR 4`: busy, try again.
pub const ERR_BUSY: u32 = 4;

const DELIMITER: &[u8] = b"\r";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Hdmi1,
    Hdmi2,
    DisplayPort,
    Vga,
}

impl Input {
    pub fn name(self) -> &'static str {
        match self {
            Input::Hdmi1 => "hdmi1",
            Input::Hdmi2 => "hdmi2",
            Input::DisplayPort => "displayport",
            Input::Vga => "vga",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        INPUTS.values().find(|input| input.name() == name)
    }
}

pub const INPUTS: EnumTable<Input, u32> = EnumTable::new(&[
    (Input::Hdmi1, 1),
    (Input::Hdmi2, 2),
    (Input::DisplayPort, 3),
    (Input::Vga, 4),
]);

pub const COMMANDS: CommandTable = CommandTable::new(&[
    CommandDef::new("power", Encoding::Template("POWR {}")),
    CommandDef::query("power?", Encoding::Literal(b"POWR?")),
    CommandDef::new("input", Encoding::Template("INPT {}")),
    CommandDef::query("input?", Encoding::Literal(b"INPT?")),
    CommandDef {
        priority: Priority::HANDSHAKE,
        ..CommandDef::new("login", Encoding::Template("PASS {}"))
    },
]);

pub fn codec() -> FrameCodec {
    FrameCodec::delimited(Bytes::from_static(DELIMITER))
}

pub fn profile() -> CodecProfile {
    CodecProfile::new(FramingProfile::Delimited {
        delimiter: DELIMITER.to_vec(),
    })
}

pub fn power(on: bool) -> Result<Command> {
    Ok(COMMANDS
        .build("power", &[CommandArg::Int(i64::from(on))])?
        .with_group("power")
        .replacing())
}

pub fn select_input(input: Input) -> Result<Command> {
    let wire = INPUTS
        .wire(input)
        .ok_or_else(|| EngineError::InvalidArgument {
            command: "input".to_string(),
            reason: format!("no wire code for {}", input.name()),
        })?;
    Ok(COMMANDS
        .build("input", &[wire.into()])?
        .with_group("input")
        .replacing())
}

/// Login, when the device config carries a `password`.
pub fn handshake(snapshot: &ConfigSnapshot) -> Vec<Command> {
    let Some(password) = snapshot.get_str("password") else {
        return Vec::new();
    };
    match COMMANDS.build("login", &[password.into()]) {
        Ok(command) => vec![command],
        Err(err) => {
            debug!(error = %err, "login command not built");
            Vec::new()
        }
    }
}

/// Status queries. They do not hold the line; answers are matched by prefix.
pub fn polls(_snapshot: &ConfigSnapshot) -> Vec<Command> {
    ["power?", "input?"]
        .into_iter()
        .filter_map(|name| COMMANDS.build(name, &[]).ok())
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayClassifier;

impl Classifier for DisplayClassifier {
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification {
        let Some(line) = frame.text().map(str::trim) else {
            return Classification::ignore();
        };
        let payload: &[u8] = in_flight.map(|c| &c.payload()[..]).unwrap_or_default();

        if let Some(state) = line.strip_prefix("POWR=") {
            let Some(on) = parse_flag(state) else {
                return Classification::ignore();
            };
            return answer(payload == b"POWR?").with_status(POWER, on);
        }
        if let Some(code) = line.strip_prefix("INPT=") {
            let Some(input) = code.parse().ok().and_then(|code| INPUTS.value(code)) else {
                debug!(line, "unknown input code");
                return Classification::ignore();
            };
            return answer(payload == b"INPT?").with_status(INPUT, input.name());
        }
        if in_flight.is_none() {
            return Classification::ignore();
        }

        match line {
            "OK" => acknowledged(payload),
            "LOGIN OK" if payload.starts_with(b"PASS ") => Classification::success(),
            "LOGIN FAIL" => Classification::abort("login rejected"),
            _ => match line.strip_prefix("ERR ").map(|code| code.trim().parse::<u32>()) {
                Some(Ok(ERR_BUSY)) => Classification::retry("busy"),
                Some(Ok(code)) => Classification::abort(format!("device error {code}")),
                Some(Err(_)) => Classification::abort(line),
                None => Classification::ignore(),
            },
        }
    }
}

fn answer(is_reply: bool) -> Classification {
    if is_reply {
        Classification::success()
    } else {
        Classification::ignore()
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// `OK` to a set command implies the new state.
fn acknowledged(payload: &[u8]) -> Classification {
    let ok = Classification::success();
    let Ok(text) = std::str::from_utf8(payload) else {
        return ok;
    };
    if let Some(on) = text.strip_prefix("POWR ").and_then(parse_flag) {
        return ok.with_status(POWER, on);
    }
    if let Some(input) = text
        .strip_prefix("INPT ")
        .and_then(|code| code.parse().ok())
        .and_then(|code| INPUTS.value(code))
    {
        return ok.with_status(INPUT, input.name());
    }
    ok
}

pub fn power_rule() -> ReconcileRule {
    ReconcileRule::new(POWER, |target| power(target.as_bool()?).ok()).with_settle(WARM_UP)
}

pub fn input_rule() -> ReconcileRule {
    ReconcileRule::new(INPUT, |target| {
        select_input(Input::from_name(target.as_text()?)?).ok()
    })
}

/// Session for one display: login handshake, power/input polls and
/// reconciliation of both.
pub fn session(snapshot: &ConfigSnapshot) -> SessionBuilder {
    SessionBuilder::new(codec(), Arc::new(DisplayClassifier))
        .with_snapshot(snapshot.clone())
        .with_handshake(handshake)
        .with_polls(polls)
        .with_rules([power_rule(), input_rule()])
}

#[cfg(test)]
mod tests {
    use avwire_engine::{StatusValue, Verdict};

    use super::*;

    fn line(text: &'static str) -> Frame {
        Frame::new(Bytes::from_static(text.as_bytes()))
    }

    #[test]
    fn command_bodies() {
        assert_eq!(power(true).unwrap().payload().as_ref(), b"POWR 1");
        assert_eq!(power(false).unwrap().payload().as_ref(), b"POWR 0");
        assert_eq!(
            select_input(Input::DisplayPort).unwrap().payload().as_ref(),
            b"INPT 3"
        );

        let polls = polls(&ConfigSnapshot::new());
        assert_eq!(polls.len(), 2);
        assert!(polls.iter().all(|c| !c.wait() && c.priority() == Priority::LOW));
    }

    #[test]
    fn handshake_needs_password() {
        assert!(handshake(&ConfigSnapshot::new()).is_empty());

        let commands = handshake(&ConfigSnapshot::new().with("password", "1234"));
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].payload().as_ref(), b"PASS 1234");
        assert_eq!(commands[0].priority(), Priority::HANDSHAKE);
    }

    #[test]
    fn ok_implies_requested_state() {
        let command = select_input(Input::Hdmi2).unwrap();
        let classification = DisplayClassifier.classify(&line("OK"), Some(&command));
        assert_eq!(classification.verdict, Verdict::Success);
        let patch: Vec<_> = classification.patch.into_iter().collect();
        assert_eq!(patch, vec![(INPUT, StatusValue::from("hdmi2"))]);
    }

    #[test]
    fn error_codes() {
        let command = power(true).unwrap();
        let busy = DisplayClassifier.classify(&line("ERR 4"), Some(&command));
        assert_eq!(busy.verdict, Verdict::Retry);

        let fatal = DisplayClassifier.classify(&line("ERR 2"), Some(&command));
        assert_eq!(fatal.verdict, Verdict::Abort);
        assert_eq!(fatal.reason.as_deref(), Some("device error 2"));
    }

    #[test]
    fn status_lines_patch_without_resolving() {
        let command = power(true).unwrap();
        let classification = DisplayClassifier.classify(&line("INPT=4"), Some(&command));
        assert_eq!(classification.verdict, Verdict::Ignore);
        let patch: Vec<_> = classification.patch.into_iter().collect();
        assert_eq!(patch, vec![(INPUT, StatusValue::from("vga"))]);

        let unsolicited = DisplayClassifier.classify(&line("POWR=0"), None);
        assert_eq!(unsolicited.verdict, Verdict::Ignore);
        assert_eq!(unsolicited.patch.len(), 1);
    }

    #[test]
    fn login_replies() {
        let login = &handshake(&ConfigSnapshot::new().with("password", "x"))[0];
        assert_eq!(
            DisplayClassifier.classify(&line("LOGIN OK"), Some(login)).verdict,
            Verdict::Success
        );
        assert_eq!(
            DisplayClassifier.classify(&line("LOGIN FAIL"), Some(login)).verdict,
            Verdict::Abort
        );
    }

    #[test]
    fn input_names_roundtrip() {
        for input in INPUTS.values() {
            assert_eq!(Input::from_name(input.name()), Some(input));
        }
        assert_eq!(Input::from_name("composite"), None);
    }
}
