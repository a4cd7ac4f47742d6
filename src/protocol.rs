//! Message kinds and envelopes multiplexed over one connection.
//!
//! Every message starts with a one byte [`MessageKind`] discriminator, followed by the body of the matching
//! envelope. Request and response envelopes end with the raw payload bytes, which are decoded by whoever
//! knows the payload type.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::Bytes,
    consts::MAX_MESSAGE_SIZE,
    error::{Error, Result},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Data = 0,
    Request = 1,
    Response = 2,
    SyncCreate = 3,
    SyncDestroy = 4,
    SyncUpdate = 5,
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::Data,
            1 => Self::Request,
            2 => Self::Response,
            3 => Self::SyncCreate,
            4 => Self::SyncDestroy,
            5 => Self::SyncUpdate,
            _ => return Err(Error::UnknownMessageKind(tag)),
        })
    }
}

/// Writes `kind` followed by `body` into a fresh buffer.
pub fn encode(kind: MessageKind, body: &impl Bytes) -> Result<Vec<u8>> {
    let mut buf = vec![kind as u8];
    body.write_to(&mut buf)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(Error::MessageSizeExceeded(buf.len()));
    }
    Ok(buf)
}

/// Splits a raw message into its kind and body.
pub fn decode(buf: &[u8]) -> Result<(MessageKind, &[u8])> {
    let (&tag, body) = buf
        .split_first()
        .ok_or_else(|| Error::Malformed(io::ErrorKind::UnexpectedEof.into()))?;
    Ok((MessageKind::try_from(tag)?, body))
}

/// Decodes an envelope body, mapping any I/O failure to [`Error::Malformed`].
pub fn read_body<T: Bytes>(body: &[u8]) -> Result<T> {
    T::from_slice(body).map_err(Error::Malformed)
}

fn read_rest(reader: &mut impl ReadBytesExt) -> io::Result<Vec<u8>> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest)?;
    Ok(rest)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: u16,
    pub payload_kind: u16,
    pub payload: Vec<u8>,
}

impl Bytes for RequestEnvelope {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.id)?;
        writer.write_u16::<LittleEndian>(self.payload_kind)?;
        writer.write_all(&self.payload)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        Ok(Self {
            id: reader.read_u16::<LittleEndian>()?,
            payload_kind: reader.read_u16::<LittleEndian>()?,
            payload: read_rest(reader)?,
        })
    }
}

/// Outcome of a request as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0,
    Failed = 1,
    /// Synthesized locally by the sweep, never sent on the wire.
    TimedOut = 2,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = io::Error;

    fn try_from(tag: u8) -> io::Result<Self> {
        match tag {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Failed),
            2 => Ok(Self::TimedOut),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown response status {tag}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: u16,
    pub status: ResponseStatus,
    pub payload_kind: u16,
    pub payload: Vec<u8>,
}

impl Bytes for ResponseEnvelope {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.id)?;
        writer.write_u8(self.status as u8)?;
        writer.write_u16::<LittleEndian>(self.payload_kind)?;
        writer.write_all(&self.payload)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        Ok(Self {
            id: reader.read_u16::<LittleEndian>()?,
            status: ResponseStatus::try_from(reader.read_u8()?)?,
            payload_kind: reader.read_u16::<LittleEndian>()?,
            payload: read_rest(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEnvelope {
    pub type_name: String,
    pub parent: u16,
    pub values: Vec<Value>,
}

impl Bytes for CreateEnvelope {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        self.type_name.write_to(writer)?;
        writer.write_u16::<LittleEndian>(self.parent)?;
        let len = u8::try_from(self.values.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many properties"))?;
        writer.write_u8(len)?;
        for value in &self.values {
            value.write_to(writer)?;
        }
        Ok(())
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        let type_name = String::read_from(reader)?;
        let parent = reader.read_u16::<LittleEndian>()?;
        let len = reader.read_u8()?;
        let values = (0..len)
            .map(|_| Value::read_from(reader))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            type_name,
            parent,
            values,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyEnvelope {
    pub parent: u16,
}

impl Bytes for DestroyEnvelope {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.parent)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        Ok(Self {
            parent: reader.read_u16::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub parent: u16,
    pub index: u8,
    pub value: Value,
}

impl Bytes for UpdateEnvelope {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.parent)?;
        writer.write_u8(self.index)?;
        self.value.write_to(writer)
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> io::Result<Self> {
        Ok(Self {
            parent: reader.read_u16::<LittleEndian>()?,
            index: reader.read_u8()?,
            value: Value::read_from(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_prefixes_every_message() {
        let msg = encode(MessageKind::SyncDestroy, &DestroyEnvelope { parent: 9 }).unwrap();
        assert_eq!(msg, vec![MessageKind::SyncDestroy as u8, 9, 0]);
        let (kind, body) = decode(&msg).unwrap();
        assert_eq!(kind, MessageKind::SyncDestroy);
        assert_eq!(read_body::<DestroyEnvelope>(body).unwrap().parent, 9);
    }

    #[test]
    fn request_payload_runs_to_end_of_message() {
        let envelope = RequestEnvelope {
            id: 300,
            payload_kind: 7,
            payload: vec![1, 2, 3, 4],
        };
        let msg = encode(MessageKind::Request, &envelope).unwrap();
        let (_, body) = decode(&msg).unwrap();
        assert_eq!(read_body::<RequestEnvelope>(body).unwrap(), envelope);
    }

    #[test]
    fn unknown_kind_and_empty_message_are_errors() {
        assert!(matches!(decode(&[0x7f]), Err(Error::UnknownMessageKind(0x7f))));
        assert!(matches!(decode(&[]), Err(Error::Malformed(_))));
        assert!(matches!(
            read_body::<UpdateEnvelope>(&[1, 0]),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn oversized_message_is_refused() {
        let envelope = RequestEnvelope {
            id: 0,
            payload_kind: 0,
            payload: vec![0; MAX_MESSAGE_SIZE],
        };
        assert!(matches!(
            encode(MessageKind::Request, &envelope),
            Err(Error::MessageSizeExceeded(_))
        ));
    }
}
