//! Driver contract: turning inbound frames into verdicts and state patches.

use std::fmt;
use std::sync::Arc;

use avwire_frame::Frame;
use bytes::{BufMut, BytesMut};
use serde::Serialize;

use crate::command::{Command, Priority};
use crate::error::{EngineError, Result};
use crate::status::{StatusKey, StatusValue};

/// Classification of a received frame relative to the in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The frame answers the in-flight command.
    Success,
    /// Unrelated frame; keep waiting.
    Ignore,
    /// Device asked for a resend (busy, not ready).
    Retry,
    /// Device rejected the command; resend while retries remain.
    Failed,
    /// Device rejected the command for good.
    Abort,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::Ignore => "ignore",
            Verdict::Retry => "retry",
            Verdict::Failed => "failed",
            Verdict::Abort => "abort",
        }
    }
}

/// Status updates carried by one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    changes: Vec<(StatusKey, StatusValue)>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: StatusKey, value: impl Into<StatusValue>) {
        self.changes.push((key, value.into()));
    }

    pub fn with(mut self, key: StatusKey, value: impl Into<StatusValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StatusKey, StatusValue)> {
        self.changes.iter()
    }
}

impl IntoIterator for StatePatch {
    type Item = (StatusKey, StatusValue);
    type IntoIter = std::vec::IntoIter<(StatusKey, StatusValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: Verdict,
    pub patch: StatePatch,
    /// Device error text or code, for logs and failure reasons.
    pub reason: Option<String>,
}

impl Classification {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            patch: StatePatch::default(),
            reason: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Verdict::Success)
    }

    pub fn ignore() -> Self {
        Self::new(Verdict::Ignore)
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Retry).with_reason(reason)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Failed).with_reason(reason)
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self::new(Verdict::Abort).with_reason(reason)
    }

    pub fn with_patch(mut self, patch: StatePatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_status(mut self, key: StatusKey, value: impl Into<StatusValue>) -> Self {
        self.patch.set(key, value);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Maps a decoded frame to a verdict and a state patch.
///
/// Implementations must be pure: the same frame and in-flight command always
/// classify the same way. `in_flight` is `None` for unsolicited frames; the
/// correlator only applies the patch for those, whatever the verdict.
pub trait Classifier: Send + Sync {
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification;
}

impl<T: Classifier + ?Sized> Classifier for Arc<T> {
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification {
        (**self).classify(frame, in_flight)
    }
}

impl<T: Classifier + ?Sized> Classifier for Box<T> {
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification {
        (**self).classify(frame, in_flight)
    }
}

/// Classifier backed by a plain function.
pub struct FnClassifier<F>(pub F);

impl<F> Classifier for FnClassifier<F>
where
    F: Fn(&Frame, Option<&Command>) -> Classification + Send + Sync,
{
    fn classify(&self, frame: &Frame, in_flight: Option<&Command>) -> Classification {
        (self.0)(frame, in_flight)
    }
}

/// Bidirectional lookup between a value and its wire representation.
///
/// Built from one static slice, so every accepted value reports back
/// identically.
#[derive(Debug, Clone, Copy)]
pub struct EnumTable<T: 'static, W: 'static> {
    entries: &'static [(T, W)],
}

impl<T: Copy + PartialEq, W: Copy + PartialEq> EnumTable<T, W> {
    pub const fn new(entries: &'static [(T, W)]) -> Self {
        Self { entries }
    }

    pub fn wire(&self, value: T) -> Option<W> {
        self.entries.iter().find(|(v, _)| *v == value).map(|(_, w)| *w)
    }

    pub fn value(&self, wire: W) -> Option<T> {
        self.entries.iter().find(|(_, w)| *w == wire).map(|(v, _)| *v)
    }

    pub fn values(&self) -> impl Iterator<Item = T> + '_ {
        self.entries.iter().map(|(v, _)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Argument to a table-driven command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    Int(i64),
    Text(String),
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandArg::Int(v) => write!(f, "{v}"),
            CommandArg::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for CommandArg {
    fn from(v: i64) -> Self {
        CommandArg::Int(v)
    }
}

impl From<u8> for CommandArg {
    fn from(v: u8) -> Self {
        CommandArg::Int(i64::from(v))
    }
}

impl From<u32> for CommandArg {
    fn from(v: u32) -> Self {
        CommandArg::Int(i64::from(v))
    }
}

impl From<&str> for CommandArg {
    fn from(v: &str) -> Self {
        CommandArg::Text(v.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(v: String) -> Self {
        CommandArg::Text(v)
    }
}

/// One byte of a binary body layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Literal byte.
    Byte(u8),
    /// The n-th argument, which must fit in a byte.
    Arg(usize),
}

/// How a table entry turns arguments into a frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Fixed body, no arguments.
    Literal(&'static [u8]),
    /// ASCII template; each `{}` takes the next argument.
    Template(&'static str),
    /// Binary body assembled slot by slot.
    Layout(&'static [Slot]),
}

impl Encoding {
    fn encode(&self, command: &str, args: &[CommandArg]) -> Result<BytesMut> {
        let mut body = BytesMut::new();
        match self {
            Encoding::Literal(bytes) => body.put_slice(bytes),
            Encoding::Template(template) => {
                let mut parts = template.split("{}");
                if let Some(first) = parts.next() {
                    body.put_slice(first.as_bytes());
                }
                let mut args = args.iter();
                for part in parts {
                    let arg = args.next().ok_or_else(|| missing(command))?;
                    body.put_slice(arg.to_string().as_bytes());
                    body.put_slice(part.as_bytes());
                }
            }
            Encoding::Layout(slots) => {
                for slot in slots.iter() {
                    match slot {
                        Slot::Byte(byte) => body.put_u8(*byte),
                        Slot::Arg(n) => body.put_u8(byte_arg(command, args.get(*n))?),
                    }
                }
            }
        }
        Ok(body)
    }
}

fn missing(command: &str) -> EngineError {
    EngineError::InvalidArgument {
        command: command.to_string(),
        reason: "missing argument".to_string(),
    }
}

fn byte_arg(command: &str, arg: Option<&CommandArg>) -> Result<u8> {
    match arg {
        Some(CommandArg::Int(v)) => u8::try_from(*v).map_err(|_| EngineError::InvalidArgument {
            command: command.to_string(),
            reason: format!("{v} does not fit in a byte"),
        }),
        Some(CommandArg::Text(v)) => Err(EngineError::InvalidArgument {
            command: command.to_string(),
            reason: format!("expected a number, got '{v}'"),
        }),
        None => Err(missing(command)),
    }
}

/// One entry of a driver's command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandDef {
    pub name: &'static str,
    pub encoding: Encoding,
    pub priority: Priority,
    pub wait: bool,
}

impl CommandDef {
    pub const fn new(name: &'static str, encoding: Encoding) -> Self {
        Self {
            name,
            encoding,
            priority: Priority::NORMAL,
            wait: true,
        }
    }

    /// Poll-style entry: low priority, does not hold the half-duplex slot.
    pub const fn query(name: &'static str, encoding: Encoding) -> Self {
        Self {
            name,
            encoding,
            priority: Priority::LOW,
            wait: false,
        }
    }
}

/// Static table mapping command names to encode rules, consumed by one
/// generic [`CommandTable::build`].
#[derive(Debug, Clone, Copy)]
pub struct CommandTable {
    defs: &'static [CommandDef],
}

impl CommandTable {
    pub const fn new(defs: &'static [CommandDef]) -> Self {
        Self { defs }
    }

    pub fn get(&self, name: &str) -> Option<&'static CommandDef> {
        self.defs.iter().find(|def| def.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.defs.iter().map(|def| def.name)
    }

    /// Build the named command from its table entry.
    pub fn build(&self, name: &str, args: &[CommandArg]) -> Result<Command> {
        let def = self
            .get(name)
            .ok_or_else(|| EngineError::UnknownCommand(name.to_string()))?;
        let body = def.encoding.encode(def.name, args)?;
        Ok(Command::new(def.name, body.freeze())
            .with_priority(def.priority)
            .with_wait(def.wait))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Input {
        Hdmi1,
        Hdmi2,
        Vga,
    }

    const INPUTS: EnumTable<Input, u32> =
        EnumTable::new(&[(Input::Hdmi1, 31), (Input::Hdmi2, 32), (Input::Vga, 11)]);

    const TABLE: CommandTable = CommandTable::new(&[
        CommandDef::new("power", Encoding::Template("POWR {}")),
        CommandDef::query("power?", Encoding::Literal(b"POWR ?")),
        CommandDef::new(
            "on",
            Encoding::Layout(&[Slot::Arg(0), Slot::Byte(0x00), Slot::Byte(0x79), Slot::Arg(1)]),
        ),
    ]);

    #[test]
    fn enum_table_roundtrips() {
        for input in INPUTS.values() {
            let wire = INPUTS.wire(input).unwrap();
            assert_eq!(INPUTS.value(wire), Some(input));
        }
        assert_eq!(INPUTS.value(99), None);
        assert_eq!(INPUTS.len(), 3);
    }

    #[test]
    fn template_command() {
        let cmd = TABLE.build("power", &[1u8.into()]).unwrap();
        assert_eq!(cmd.payload().as_ref(), b"POWR 1");
        assert!(cmd.wait());
    }

    #[test]
    fn query_command_does_not_wait() {
        let cmd = TABLE.build("power?", &[]).unwrap();
        assert_eq!(cmd.payload().as_ref(), b"POWR ?");
        assert!(!cmd.wait());
        assert_eq!(cmd.priority(), Priority::LOW);
    }

    #[test]
    fn layout_command() {
        let cmd = TABLE.build("on", &[0x38u8.into(), 5u8.into()]).unwrap();
        assert_eq!(cmd.payload().as_ref(), &[0x38, 0x00, 0x79, 0x05]);
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(matches!(
            TABLE.build("on", &[0x38u8.into()]),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            TABLE.build("on", &[CommandArg::Int(300), 5u8.into()]),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            TABLE.build("reboot", &[]),
            Err(EngineError::UnknownCommand(name)) if name == "reboot"
        ));
    }

    #[test]
    fn fn_classifier_dispatches() {
        let classifier = FnClassifier(|frame: &Frame, in_flight: Option<&Command>| {
            match (frame.text(), in_flight) {
                (Some("OK"), Some(_)) => Classification::success(),
                _ => Classification::ignore(),
            }
        });
        let cmd = Command::new("power", Bytes::from_static(b"POWR 1"));
        let ok = Frame::new(Bytes::from_static(b"OK"));

        assert_eq!(classifier.classify(&ok, Some(&cmd)).verdict, Verdict::Success);
        assert_eq!(classifier.classify(&ok, None).verdict, Verdict::Ignore);
    }
}
