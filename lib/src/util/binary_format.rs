use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Error, ErrorKind, Result};

/// Utility trait for serializing data into the persisted trace format
///
/// The format is deliberately simple:
///
///   - everything is big-endian
///   - tags are always `u8`
///   - sequences and strings are prefixed with their length as a `u32`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

/// Inverse of [`Serialize`]
pub trait Deserialize: Sized {
    /// Read the construct back from a binary input stream
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Deserialize for u8 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u8()
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Deserialize for u16 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u16::<BigEndian>()
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u32::<BigEndian>()
    }
}

impl Serialize for u64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<BigEndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_u64::<BigEndian>()
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        reader.read_i32::<BigEndian>()
    }
}

impl Serialize for bool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(u8::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid boolean tag {}", other),
            )),
        }
    }
}

impl Serialize for String {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.as_bytes();
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "String too long"))?;
        len.serialize(writer)?;
        writer.write_all(bytes)
    }
}

impl Deserialize for String {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u32::deserialize(reader)? as usize;
        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|err| Error::new(ErrorKind::InvalidData, err))
    }
}

impl<A: Serialize> Serialize for Option<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        match self {
            None => 0u8.serialize(writer),
            Some(value) => {
                1u8.serialize(writer)?;
                value.serialize(writer)
            }
        }
    }
}

impl<A: Deserialize> Deserialize for Option<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        match u8::deserialize(reader)? {
            0 => Ok(None),
            1 => Ok(Some(A::deserialize(reader)?)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid option tag {}", other),
            )),
        }
    }
}

/// Vectors are serialized with a `u32` length prefix
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "Sequence too long"))?;
        len.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self> {
        let len = u32::deserialize(reader)? as usize;
        let mut elems = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strings_and_options() {
        let mut buf: Vec<u8> = vec![];
        String::from("héllo").serialize(&mut buf).unwrap();
        Some(7u32).serialize(&mut buf).unwrap();
        None::<u32>.serialize(&mut buf).unwrap();

        let mut reader = &buf[..];
        assert_eq!(String::deserialize(&mut reader).unwrap(), "héllo");
        assert_eq!(Option::<u32>::deserialize(&mut reader).unwrap(), Some(7));
        assert_eq!(Option::<u32>::deserialize(&mut reader).unwrap(), None);
        assert!(reader.is_empty());
    }

    #[test]
    fn big_endian_layout() {
        let mut buf: Vec<u8> = vec![];
        vec![1u16, 0x0203].serialize(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, 0, 1, 2, 3]);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let buf: Vec<u8> = vec![0, 0, 0, 5, b'a'];
        assert!(String::deserialize(&mut &buf[..]).is_err());
    }
}
