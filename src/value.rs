use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::{read_blob, write_blob, Bytes};

/// The type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Bool = 0,
    U8 = 1,
    I32 = 2,
    U32 = 3,
    I64 = 4,
    U64 = 5,
    F32 = 6,
    F64 = 7,
    Str = 8,
    Blob = 9,
}

impl TryFrom<u8> for ValueKind {
    type Error = io::Error;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => Self::Bool,
            1 => Self::U8,
            2 => Self::I32,
            3 => Self::U32,
            4 => Self::I64,
            5 => Self::U64,
            6 => Self::F32,
            7 => Self::F64,
            8 => Self::Str,
            9 => Self::Blob,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown value tag {tag}"),
                ))
            }
        })
    }
}

/// A single typed value carried inside a [`DataPack`] or a synchronized property.
///
/// The tag is written before the value, so a decoder always recovers the concrete type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::U8(_) => ValueKind::U8,
            Value::I32(_) => ValueKind::I32,
            Value::U32(_) => ValueKind::U32,
            Value::I64(_) => ValueKind::I64,
            Value::U64(_) => ValueKind::U64,
            Value::F32(_) => ValueKind::F32,
            Value::F64(_) => ValueKind::F64,
            Value::Str(_) => ValueKind::Str,
            Value::Blob(_) => ValueKind::Blob,
        }
    }
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    u8 => U8,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
    Vec<u8> => Blob,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl Bytes for Value {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u8(self.kind() as u8)?;
        match self {
            Value::Bool(v) => writer.write_u8(*v as u8),
            Value::U8(v) => writer.write_u8(*v),
            Value::I32(v) => writer.write_i32::<LittleEndian>(*v),
            Value::U32(v) => writer.write_u32::<LittleEndian>(*v),
            Value::I64(v) => writer.write_i64::<LittleEndian>(*v),
            Value::U64(v) => writer.write_u64::<LittleEndian>(*v),
            Value::F32(v) => writer.write_f32::<LittleEndian>(*v),
            Value::F64(v) => writer.write_f64::<LittleEndian>(*v),
            Value::Str(v) => write_blob(writer, v.as_bytes()),
            Value::Blob(v) => write_blob(writer, v),
        }
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let kind = ValueKind::try_from(reader.read_u8()?)?;
        Ok(match kind {
            ValueKind::Bool => Value::Bool(reader.read_u8()? != 0),
            ValueKind::U8 => Value::U8(reader.read_u8()?),
            ValueKind::I32 => Value::I32(reader.read_i32::<LittleEndian>()?),
            ValueKind::U32 => Value::U32(reader.read_u32::<LittleEndian>()?),
            ValueKind::I64 => Value::I64(reader.read_i64::<LittleEndian>()?),
            ValueKind::U64 => Value::U64(reader.read_u64::<LittleEndian>()?),
            ValueKind::F32 => Value::F32(reader.read_f32::<LittleEndian>()?),
            ValueKind::F64 => Value::F64(reader.read_f64::<LittleEndian>()?),
            ValueKind::Str => Value::Str(String::read_from(reader)?),
            ValueKind::Blob => Value::Blob(read_blob(reader)?),
        })
    }
}

/// An ordered, heterogeneous collection of values sent as one logical unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPack(pub Vec<Value>);

impl DataPack {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.0.push(value.into());
        self
    }
    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }
}

impl FromIterator<Value> for DataPack {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Bytes for DataPack {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        if self.0.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "data pack holds too many values",
            ));
        }
        writer.write_u16::<LittleEndian>(self.0.len() as u16)?;
        for value in &self.0 {
            value.write_to(writer)?;
        }
        Ok(())
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        let len = reader.read_u16::<LittleEndian>()?;
        (0..len).map(|_| Value::read_from(reader)).collect()
    }
}
