use crate::error::{CodecError, CodecResult};

/// Encode a variable-length integer (LEB128).
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub(crate) fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

/// Cursor over an envelope body.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn u8(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn array16(&mut self) -> CodecResult<[u8; 16]> {
        let at = self.pos;
        self.take(16)?
            .try_into()
            .map_err(|_| CodecError::Truncated(at))
    }

    pub(crate) fn varint(&mut self) -> CodecResult<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(CodecError::Malformed(format!(
                    "varint overflow at offset {start}"
                )));
            }
        }
    }

    pub(crate) fn varint_u32(&mut self) -> CodecResult<u32> {
        let at = self.pos;
        u32::try_from(self.varint()?)
            .map_err(|_| CodecError::Malformed(format!("value at offset {at} exceeds u32")))
    }

    pub(crate) fn bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.varint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::Truncated(self.pos))?;
        self.take(len)
    }

    pub(crate) fn string(&mut self) -> CodecResult<String> {
        let at = self.pos;
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CodecError::Malformed(format!("invalid utf-8 at offset {at}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip_boundaries() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.varint().unwrap(), value);
            assert!(reader.is_empty());
        }
    }

    #[test]
    fn small_varints_take_one_byte() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 127);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let mut reader = Reader::new(&[0x80]);
        assert_eq!(reader.varint(), Err(CodecError::Truncated(1)));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 50);
        buf.extend_from_slice(b"short");
        let mut reader = Reader::new(&buf);
        assert!(matches!(reader.bytes(), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn strings_roundtrip() {
        let mut buf = Vec::new();
        put_str(&mut buf, "Person");
        let mut reader = Reader::new(&buf);
        assert_eq!(reader.string().unwrap(), "Person");
        assert_eq!(reader.remaining(), 0);
    }
}
