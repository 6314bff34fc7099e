//! Transitions and persisted traces
//!
//! The path from the initial state to the current one is a list of [`Transition`]s. Each one
//! records the choices it was taken with (kind, origin, index among how many, and the value) so
//! that a run can be replayed without deciding anything, and optionally every instruction it
//! executed. A [`Trace`] is such a path, with a compact binary encoding.

use super::{ChoiceKind, ChoiceValue, Origin};
use crate::jvm::class_graph::MethodId;
use crate::jvm::code::Pc;
use crate::util::{Deserialize, Serialize};
use crate::vm::ThreadId;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Error, ErrorKind, Result, Write};
use std::path::Path;

/// File magic, followed by a format version
const MAGIC: u32 = 0x4a56_4d43;
const VERSION: u16 = 1;

/// One choice a transition was taken with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChoiceRecord {
    pub kind: ChoiceKind,
    pub origin: Origin,

    /// Index of the choice taken
    pub index: u32,

    /// Number of choices the generator had
    pub total: u32,
    pub value: ChoiceValue,
}

/// Instruction executed during a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    /// Method, as `Class.name(descriptor)`
    pub method: String,
    pub pc: u32,
    pub instruction: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Thread that ran
    pub thread: ThreadId,

    /// Choice frame the transition was taken from, outermost generator first
    pub choices: Vec<ChoiceRecord>,

    /// Executed instructions (only when recording steps)
    pub steps: Vec<StepRecord>,
}

/// Replayable path of transitions, from the initial state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    pub transitions: Vec<Transition>,
}

impl Trace {
    pub fn new() -> Trace {
        Trace::default()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Write the trace to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.serialize(&mut writer)?;
        writer.flush()
    }

    /// Read a trace written by [`Trace::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Trace> {
        let mut reader = BufReader::new(File::open(path)?);
        Trace::deserialize(&mut reader)
    }
}

impl Serialize for ThreadId {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ThreadId {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(ThreadId(u32::deserialize(reader)?))
    }
}

impl Serialize for Origin {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.thread.serialize(writer)?;
        self.method.map(|method| method.0).serialize(writer)?;
        self.pc.0.serialize(writer)
    }
}

impl Deserialize for Origin {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let thread = ThreadId::deserialize(reader)?;
        let method = Option::<u32>::deserialize(reader)?.map(MethodId);
        let pc = Pc(u32::deserialize(reader)?);
        Ok(Origin { thread, method, pc })
    }
}

impl Serialize for ChoiceValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            ChoiceValue::Thread(thread) => {
                0u8.serialize(writer)?;
                thread.serialize(writer)
            }
            ChoiceValue::Int(value) => {
                1u8.serialize(writer)?;
                value.serialize(writer)
            }
            ChoiceValue::Bool(value) => {
                2u8.serialize(writer)?;
                value.serialize(writer)
            }
        }
    }
}

impl Deserialize for ChoiceValue {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        match u8::deserialize(reader)? {
            0 => Ok(ChoiceValue::Thread(ThreadId::deserialize(reader)?)),
            1 => Ok(ChoiceValue::Int(i32::deserialize(reader)?)),
            2 => Ok(ChoiceValue::Bool(bool::deserialize(reader)?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid choice value tag {}", other),
            )),
        }
    }
}

impl Serialize for ChoiceRecord {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.kind.code().serialize(writer)?;
        self.origin.serialize(writer)?;
        self.index.serialize(writer)?;
        self.total.serialize(writer)?;
        self.value.serialize(writer)
    }
}

impl Deserialize for ChoiceRecord {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let code = u8::deserialize(reader)?;
        let kind = ChoiceKind::from_code(code).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Invalid choice kind {}", code),
            )
        })?;
        Ok(ChoiceRecord {
            kind,
            origin: Origin::deserialize(reader)?,
            index: u32::deserialize(reader)?,
            total: u32::deserialize(reader)?,
            value: ChoiceValue::deserialize(reader)?,
        })
    }
}

impl Serialize for StepRecord {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.method.serialize(writer)?;
        self.pc.serialize(writer)?;
        self.instruction.serialize(writer)
    }
}

impl Deserialize for StepRecord {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(StepRecord {
            method: String::deserialize(reader)?,
            pc: u32::deserialize(reader)?,
            instruction: String::deserialize(reader)?,
        })
    }
}

impl Serialize for Transition {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.thread.serialize(writer)?;
        self.choices.serialize(writer)?;
        self.steps.serialize(writer)
    }
}

impl Deserialize for Transition {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        Ok(Transition {
            thread: ThreadId::deserialize(reader)?,
            choices: Vec::deserialize(reader)?,
            steps: Vec::deserialize(reader)?,
        })
    }
}

impl Serialize for Trace {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        MAGIC.serialize(writer)?;
        VERSION.serialize(writer)?;
        self.transitions.serialize(writer)
    }
}

impl Deserialize for Trace {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        if u32::deserialize(reader)? != MAGIC {
            return Err(Error::new(ErrorKind::InvalidData, "Not a trace file"));
        }
        let version = u16::deserialize(reader)?;
        if version != VERSION {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Unsupported trace version {}", version),
            ));
        }
        Ok(Trace {
            transitions: Vec::deserialize(reader)?,
        })
    }
}

impl fmt::Display for ChoiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} = {} (from {}",
            self.kind,
            self.index + 1,
            self.total,
            self.value,
            self.origin.thread
        )?;
        if let Some(method) = self.origin.method {
            write!(f, " in m{}@{}", method.0, self.origin.pc)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, transition) in self.transitions.iter().enumerate() {
            writeln!(f, "transition #{} thread {}", idx, transition.thread)?;
            for choice in &transition.choices {
                writeln!(f, "  choice {}", choice)?;
            }
            for step in &transition.steps {
                writeln!(f, "    {}@{}: {}", step.method, step.pc, step.instruction)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> Trace {
        let origin = Origin {
            thread: ThreadId(1),
            method: Some(MethodId(12)),
            pc: Pc(3),
        };
        Trace {
            transitions: vec![
                Transition {
                    thread: ThreadId::MAIN,
                    choices: vec![ChoiceRecord {
                        kind: ChoiceKind::Threads,
                        origin: Origin::root(),
                        index: 0,
                        total: 1,
                        value: ChoiceValue::Thread(ThreadId::MAIN),
                    }],
                    steps: vec![StepRecord {
                        method: String::from("demo/Main.main([Ljava/lang/String;)V"),
                        pc: 0,
                        instruction: String::from("New(demo/Worker)"),
                    }],
                },
                Transition {
                    thread: ThreadId(1),
                    choices: vec![
                        ChoiceRecord {
                            kind: ChoiceKind::Ints,
                            origin,
                            index: 2,
                            total: 3,
                            value: ChoiceValue::Int(-4),
                        },
                        ChoiceRecord {
                            kind: ChoiceKind::Bools,
                            origin,
                            index: 1,
                            total: 2,
                            value: ChoiceValue::Bool(true),
                        },
                    ],
                    steps: vec![],
                },
            ],
        }
    }

    #[test]
    fn binary_encoding() {
        let trace = sample();
        let mut bytes = vec![];
        trace.serialize(&mut bytes).unwrap();
        assert_eq!(&bytes[0..6], &[0x4a, 0x56, 0x4d, 0x43, 0x00, 0x01]);
        assert_eq!(Trace::deserialize(&mut bytes.as_slice()).unwrap(), trace);

        bytes[5] = 9;
        assert!(Trace::deserialize(&mut bytes.as_slice()).is_err());
        assert!(Trace::deserialize(&mut &bytes[0..3]).is_err());
    }

    #[test]
    fn display_lists_choices() {
        let rendered = sample().to_string();
        assert!(rendered.contains("transition #1 thread T1"));
        assert!(rendered.contains("choice ints 3/3 = -4 (from T1 in m12@3)"));
    }
}
