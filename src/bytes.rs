use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::consts::MAX_STRING_SIZE;

pub trait Bytes: Sized {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error>;
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error>;

    fn to_vec(&self) -> Result<Vec<u8>, io::Error> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
    fn from_slice(mut buf: &[u8]) -> Result<Self, io::Error> {
        Self::read_from(&mut buf)
    }
}

impl Bytes for () {
    fn write_to(&self, _: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        Ok(())
    }
    fn read_from(_: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(())
    }
}

impl Bytes for String {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        write_blob(writer, self.as_bytes())
    }
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        String::from_utf8(read_blob(reader)?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

pub(crate) fn write_blob(writer: &mut impl WriteBytesExt, blob: &[u8]) -> Result<(), io::Error> {
    if blob.len() > MAX_STRING_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("blob of {} bytes exceeds {MAX_STRING_SIZE}", blob.len()),
        ));
    }
    writer.write_u16::<LittleEndian>(blob.len() as u16)?;
    writer.write_all(blob)
}

pub(crate) fn read_blob(reader: &mut impl ReadBytesExt) -> Result<Vec<u8>, io::Error> {
    let len = reader.read_u16::<LittleEndian>()? as usize;
    let mut blob = vec![0u8; len];
    reader.read_exact(&mut blob)?;
    Ok(blob)
}
