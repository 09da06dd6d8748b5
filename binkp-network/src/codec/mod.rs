/*!
# BinkP frame encoder/decoder

every unit exchanged on the wire is a frame: a 2 bytes big endian header
followed by the payload. The most significant bit of the header tells if the
payload is a command (`1`) or raw data of the item being transferred (`0`),
the 15 remaining bits are the length of the payload.

```text
+-+---------------+----------------------------------+
|T|     SIZE      |  PAYLOAD (SIZE bytes)            |
+-+---------------+----------------------------------+
```

A command payload starts with the command byte (see [`Command`]) and is
followed by an optional text argument.
*/

mod command;

pub use self::command::Command;
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use std::{
    fmt::{self, Formatter},
    io,
};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// length of the frame header
pub const HEAD_LENGTH: usize = std::mem::size_of::<u16>();

/// the largest payload the 15 bits of the header can describe
pub const MAX_PAYLOAD_LENGTH: usize = 0x7FFF;

const COMMAND_FLAG: u16 = 0x8000;

/// a decoded BinkP frame
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Frame {
    /// a command and its (possibly empty) argument
    Command { command: Command, argument: String },
    /// a chunk of the item currently being transferred
    Data(Bytes),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the maximum of {} bytes", MAX_PAYLOAD_LENGTH)]
    TooLong(usize),
    #[error("frame is truncated, expected {expected} bytes of payload but only {actual} available")]
    Truncated { expected: usize, actual: usize },
    #[error("I/O error on the frame stream")]
    Io(#[from] io::Error),
}

/// the [tokio codec] shared by the drivers
///
/// frames of zero length and commands we do not know are consumed
/// from the stream and dropped: they never reach the session.
///
/// [tokio codec]: tokio_util::codec
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: State,
}

/// state of the data being read
///
/// we first expect the [`State::Head`] which has a fixed size and tells
/// how many bytes of payload to wait for with [`State::Payload`].
#[derive(Debug, Clone, Copy)]
enum State {
    Head,
    Payload { command: bool, length: usize },
}

impl Default for State {
    fn default() -> Self {
        Self::Head
    }
}

impl Frame {
    /// a command frame with the given argument
    pub fn command(command: Command, argument: impl Into<String>) -> Self {
        Self::Command {
            command,
            argument: argument.into(),
        }
    }

    /// a command frame without argument
    pub fn bare(command: Command) -> Self {
        Self::command(command, String::new())
    }

    pub fn data(bytes: impl Into<Bytes>) -> Self {
        Self::Data(bytes.into())
    }

    /// length of the payload once encoded (without the header)
    pub fn payload_length(&self) -> usize {
        match self {
            Self::Command { argument, .. } => Command::SIZE + argument.len(),
            Self::Data(bytes) => bytes.len(),
        }
    }

    pub fn is_command(&self, expected: Command) -> bool {
        matches!(self, Self::Command { command, .. } if *command == expected)
    }

    /// append the encoded frame (header and payload) to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let length = self.payload_length();
        if length > MAX_PAYLOAD_LENGTH {
            return Err(FrameError::TooLong(length));
        }

        dst.reserve(HEAD_LENGTH + length);
        match self {
            Self::Command { command, argument } => {
                dst.put_u16(COMMAND_FLAG | length as u16);
                dst.put_u8(command.to_u8());
                dst.put_slice(argument.as_bytes());
            }
            Self::Data(bytes) => {
                dst.put_u16(length as u16);
                dst.put_slice(bytes.as_ref());
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut bytes = BytesMut::with_capacity(HEAD_LENGTH + self.payload_length());
        self.encode(&mut bytes)?;
        Ok(bytes.freeze())
    }
}

/// decode the frame at the start of `src`
///
/// returns `None` for the frames that are accepted but dropped: the empty
/// frames and the commands we do not know of.
pub fn decode(src: &[u8]) -> Result<Option<Frame>, FrameError> {
    if src.len() < HEAD_LENGTH {
        return Err(FrameError::Truncated {
            expected: HEAD_LENGTH,
            actual: src.len(),
        });
    }

    let (command, length) = parse_head(u16::from_be_bytes([src[0], src[1]]));
    let payload = &src[HEAD_LENGTH..];
    if payload.len() < length {
        return Err(FrameError::Truncated {
            expected: length,
            actual: payload.len(),
        });
    }

    Ok(parse_payload(
        command,
        Bytes::copy_from_slice(&payload[..length]),
    ))
}

fn parse_head(head: u16) -> (bool, usize) {
    (
        head & COMMAND_FLAG == COMMAND_FLAG,
        (head & !COMMAND_FLAG) as usize,
    )
}

fn parse_payload(command: bool, mut payload: Bytes) -> Option<Frame> {
    if payload.is_empty() {
        tracing::trace!("dropping empty frame");
        return None;
    }

    if !command {
        return Some(Frame::Data(payload));
    }

    let code = payload.get_u8();
    let command = match Command::try_from_u8(code) {
        Some(command) => command,
        None => {
            tracing::debug!(code, "ignoring unknown command");
            return None;
        }
    };

    let mut argument = payload.as_ref();
    if let Some((0, rest)) = argument.split_last() {
        argument = rest;
    }

    Some(Frame::Command {
        command,
        argument: String::from_utf8_lossy(argument).into_owned(),
    })
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Option<(bool, usize)> {
        if src.len() < HEAD_LENGTH {
            return None;
        }

        let (command, length) = parse_head(src.get_u16());
        src.reserve(length);

        Some((command, length))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let (command, length) = match self.state {
                State::Head => match self.decode_head(src) {
                    Some((command, length)) => {
                        self.state = State::Payload { command, length };
                        (command, length)
                    }
                    None => return Ok(None),
                },
                State::Payload { command, length } => (command, length),
            };

            if src.len() < length {
                return Ok(None);
            }

            let payload = src.split_to(length).freeze();
            self.state = State::Head;
            src.reserve(HEAD_LENGTH);

            if let Some(frame) = parse_payload(command, payload) {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => match self.state {
                State::Head if src.is_empty() => Ok(None),
                State::Head => Err(FrameError::Truncated {
                    expected: HEAD_LENGTH,
                    actual: src.len(),
                }),
                State::Payload { length, .. } => Err(FrameError::Truncated {
                    expected: length,
                    actual: src.len(),
                }),
            },
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

/// passwords never end up in the logs
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                command: Command::Pwd,
                ..
            } => write!(f, "{} ********", Command::Pwd),
            Self::Command { command, argument } if argument.is_empty() => command.fmt(f),
            Self::Command { command, argument } => write!(f, "{} {}", command, argument),
            Self::Data(bytes) => write!(f, "DATA {} bytes", bytes.len()),
        }
    }
}
