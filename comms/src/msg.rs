use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const DATA_KIND: Header = 2;

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { rank: usize },
    Leave,
}

/// A single frame exchanged between two ranks of a group.
#[derive(Debug)]
pub enum Msg<'a> {
    Err(Cow<'a, str>),
    Control(Command),
    Data(&'a [u8]),
}

impl Msg<'_> {
    /// A short name of the variant, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Err(_) => "err",
            Msg::Control(Command::Join { .. }) => "control/join",
            Msg::Control(Command::Leave) => "control/leave",
            Msg::Data(_) => "data",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived, it has no
                //         maps with non string keys so it can't fail.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(bytes) => {
                buf.extend_from_slice(&DATA_KIND.to_be_bytes());
                Some(bytes)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        match Header::from_be_bytes(*kind_buf) {
            ERR_KIND => {
                let text = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(text)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            DATA_KIND => Ok(Self::Data(rest)),
            kind => Self::invalid_kind(kind),
        }
    }
}
