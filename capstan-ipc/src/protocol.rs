//! Message variants and their wire encoding

use std::collections::BTreeMap;

use crate::error::IpcError;
use crate::wire::{FrameReader, FrameWriter};

/// Peer identifier in the transport's address space.
pub type Rank = i32;

/// On-wire discriminator values. Part of the wire contract; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Command = 1,
    Result = 2,
    Shutdown = 3,
    Registration = 4,
    Hostrank = 5,
    IoData = 6,
}

impl MessageType {
    /// Map a raw discriminator back to a variant.
    pub fn from_tag(tag: u32) -> Result<Self, IpcError> {
        match tag {
            1 => Ok(Self::Command),
            2 => Ok(Self::Result),
            3 => Ok(Self::Shutdown),
            4 => Ok(Self::Registration),
            5 => Ok(Self::Hostrank),
            6 => Ok(Self::IoData),
            other => Err(IpcError::UnknownType(other)),
        }
    }
}

/// A protocol message between the master and a worker.
///
/// Each variant encodes to a single contiguous frame; see the per-variant
/// layout in [`Message::encode`]. The discriminator travels next to the
/// frame, not inside it.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Master -> worker: run a task.
    Command {
        name: String,
        command: String,
        id: String,
        memory: u32,
        cpus: u32,
        /// Task-local output path -> destination path the worker must copy
        /// the file to after the task completes.
        forwards: BTreeMap<String, String>,
    },

    /// Worker -> master: a task finished.
    Result {
        name: String,
        exitcode: i32,
        runtime: f64,
    },

    /// Either direction: stop processing and exit.
    Shutdown,

    /// Worker -> master: announce this host's capacity.
    Registration {
        hostname: String,
        memory: u32,
        cpus: u32,
    },

    /// Master -> worker: the rank assigned to the worker's host.
    Hostrank { hostrank: i32 },

    /// Worker -> master: forwarded output data for one task file.
    IoData {
        task: String,
        filename: String,
        data: Vec<u8>,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Command { .. } => MessageType::Command,
            Message::Result { .. } => MessageType::Result,
            Message::Shutdown => MessageType::Shutdown,
            Message::Registration { .. } => MessageType::Registration,
            Message::Hostrank { .. } => MessageType::Hostrank,
            Message::IoData { .. } => MessageType::IoData,
        }
    }

    /// Encode into a single contiguous frame.
    ///
    /// Fields are laid out in declared order: strings and the io-data blob
    /// as length-prefixed byte runs, scalars fixed-width, all in host byte
    /// order. The `forwards` map encodes as a pair count followed by that
    /// many key/value strings; the sorted map keeps the encoding
    /// deterministic. Pure: identical messages produce identical frames.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        match self {
            Message::Shutdown => {}
            Message::Command {
                name,
                command,
                id,
                memory,
                cpus,
                forwards,
            } => {
                w.put_str(name);
                w.put_str(command);
                w.put_str(id);
                w.put_u32(*memory);
                w.put_u32(*cpus);
                w.put_u32(forwards.len() as u32);
                for (key, value) in forwards {
                    w.put_str(key);
                    w.put_str(value);
                }
            }
            Message::Result {
                name,
                exitcode,
                runtime,
            } => {
                w.put_str(name);
                w.put_i32(*exitcode);
                w.put_f64(*runtime);
            }
            Message::Registration {
                hostname,
                memory,
                cpus,
            } => {
                w.put_str(hostname);
                w.put_u32(*memory);
                w.put_u32(*cpus);
            }
            Message::Hostrank { hostrank } => {
                w.put_i32(*hostrank);
            }
            Message::IoData {
                task,
                filename,
                data,
            } => {
                w.put_str(task);
                w.put_str(filename);
                w.put_blob(data);
            }
        }
        w.finish()
    }

    /// Rebuild the variant named by `tag` from a received frame.
    ///
    /// The discriminator is validated before the buffer is touched. The
    /// frame must be consumed exactly: a field read past the end or bytes
    /// left over both fail with [`IpcError::MalformedFrame`].
    pub fn decode(tag: u32, frame: &[u8], source: Rank) -> Result<Envelope, IpcError> {
        let mtype = MessageType::from_tag(tag)?;
        let mut r = FrameReader::new(frame);
        let message = match mtype {
            MessageType::Shutdown => Message::Shutdown,
            MessageType::Command => {
                let name = r.take_str("task name")?;
                let command = r.take_str("command line")?;
                let id = r.take_str("task id")?;
                let memory = r.take_u32("memory")?;
                let cpus = r.take_u32("cpus")?;
                let count = r.take_u32("forward count")?;
                let mut forwards = BTreeMap::new();
                for _ in 0..count {
                    let key = r.take_str("forward source")?;
                    let value = r.take_str("forward destination")?;
                    forwards.insert(key, value);
                }
                Message::Command {
                    name,
                    command,
                    id,
                    memory,
                    cpus,
                    forwards,
                }
            }
            MessageType::Result => Message::Result {
                name: r.take_str("task name")?,
                exitcode: r.take_i32("exitcode")?,
                runtime: r.take_f64("runtime")?,
            },
            MessageType::Registration => Message::Registration {
                hostname: r.take_str("hostname")?,
                memory: r.take_u32("memory")?,
                cpus: r.take_u32("cpus")?,
            },
            MessageType::Hostrank => Message::Hostrank {
                hostrank: r.take_i32("hostrank")?,
            },
            MessageType::IoData => Message::IoData {
                task: r.take_str("task name")?,
                filename: r.take_str("filename")?,
                data: r.take_blob("io data")?,
            },
        };
        r.finish()?;
        Ok(Envelope { source, message })
    }
}

/// A decoded message plus the rank it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: Rank,
    pub message: Message,
}
