use super::DecodeError;

/// Bounds-checked cursor over a binary payload.
///
/// Every read returns `DecodeError::Eof` instead of panicking so a truncated
/// payload surfaces as a decode failure, never as a crash.
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn read_bytes(&mut self, count: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::Eof(what));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1, "u8")?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2, "u16")?;
        Ok(u16::from_le_bytes(bytes.try_into().expect("2 bytes")))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4, "u32")?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8, "u64")?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    pub fn read_u128(&mut self) -> Result<u128, DecodeError> {
        let bytes = self.read_bytes(16, "u128")?;
        Ok(u128::from_le_bytes(bytes.try_into().expect("16 bytes")))
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_i128(&mut self) -> Result<i128, DecodeError> {
        Ok(self.read_u128()? as i128)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(
            self.read_bytes(4, "f32")?.try_into().expect("4 bytes"),
        ))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(
            self.read_bytes(8, "f64")?.try_into().expect("8 bytes"),
        ))
    }

    // LEB128, at most 5 bytes for a 32 bit value
    pub fn read_varuint32(&mut self) -> Result<u32, DecodeError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            if shift >= 35 {
                return Err(DecodeError::VarintOverflow);
            }
            let byte = self.read_u8()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(value as u32)
    }

    // Zigzag-encoded signed counterpart of varuint32
    pub fn read_varint32(&mut self) -> Result<i32, DecodeError> {
        let value = self.read_varuint32()?;
        Ok(((value >> 1) as i32) ^ -((value & 1) as i32))
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_varuint32()? as usize;
        let bytes = self.read_bytes(len, "string")?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_sized_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varuint32()? as usize;
        self.read_bytes(len, "bytes")
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varuint32() {
        let data = [0x00, 0x7f, 0x80, 0x01, 0xff, 0xff, 0xff, 0xff, 0x0f];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_varuint32().unwrap(), 0);
        assert_eq!(reader.read_varuint32().unwrap(), 127);
        assert_eq!(reader.read_varuint32().unwrap(), 128);
        assert_eq!(reader.read_varuint32().unwrap(), u32::MAX);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_varint32_zigzag() {
        let data = [0x00, 0x01, 0x02, 0x03];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_varint32().unwrap(), 0);
        assert_eq!(reader.read_varint32().unwrap(), -1);
        assert_eq!(reader.read_varint32().unwrap(), 1);
        assert_eq!(reader.read_varint32().unwrap(), -2);
    }

    #[test]
    fn test_varuint_overflow() {
        let data = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        let mut reader = ByteReader::new(&data);
        assert!(matches!(
            reader.read_varuint32(),
            Err(DecodeError::VarintOverflow)
        ));
    }

    #[test]
    fn test_string() {
        let data = [0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_eof() {
        let data = [0x01];
        let mut reader = ByteReader::new(&data);
        assert!(matches!(reader.read_u32(), Err(DecodeError::Eof(_))));
    }
}
