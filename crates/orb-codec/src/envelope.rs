//! Envelope entries and their byte layout.
//!
//! | kind | byte | body |
//! |------|------|------|
//! | immutable | `0` | varint len, payload |
//! | volatile | `1` | varint tag, class string, varint len, payload |
//! | persistent | `2` | 16-byte identity, class string, hint flag (+16 bytes) |
//! | back-reference | `3` | varint tag |
//!
//! Payloads are bincode-encoded [`Slot`] trees. A slot refers to another
//! object through [`Slot::Ref`], the index of the entry describing it.

use orb_types::{BackendId, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::wire::{encode_varint, put_bytes, put_str, Reader};

pub const MAGIC: &[u8; 4] = b"ORBG";
pub const ENVELOPE_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 32;

const KIND_IMMUTABLE: u8 = 0;
const KIND_VOLATILE: u8 = 1;
const KIND_PERSISTENT: u8 = 2;
const KIND_BACK_REFERENCE: u8 = 3;

/// Deepest list or map nesting allowed inside one payload.
pub const MAX_NESTING: usize = 128;

/// Serialized form of a value inside an entry payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Slot {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Slot>),
    Map(Vec<(String, Slot)>),
    /// Index of the entry describing a referenced object.
    Ref(u32),
}

/// One element of an envelope, tagged with its reference kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    /// Inline value (a bincode [`Slot`]).
    Immutable { payload: Vec<u8> },
    /// Object flattened by value; `payload` is its bincode field list.
    Volatile {
        tag: u32,
        class: String,
        payload: Vec<u8>,
    },
    /// Object already persistent, sent by reference only.
    Persistent {
        id: ObjectId,
        class: String,
        hint: Option<BackendId>,
    },
    /// Second or later encounter of a volatile instance.
    BackReference { tag: u32 },
}

impl Entry {
    pub fn kind_byte(&self) -> u8 {
        match self {
            Self::Immutable { .. } => KIND_IMMUTABLE,
            Self::Volatile { .. } => KIND_VOLATILE,
            Self::Persistent { .. } => KIND_PERSISTENT,
            Self::BackReference { .. } => KIND_BACK_REFERENCE,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Immutable { .. } => "immutable",
            Self::Volatile { .. } => "volatile",
            Self::Persistent { .. } => "persistent",
            Self::BackReference { .. } => "back-reference",
        }
    }
}

/// An encoded object graph. Entry 0 is the root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub entries: Vec<Entry>,
}

impl Envelope {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Class of the root when the root is an object flattened by value.
    pub fn root_class(&self) -> Option<&str> {
        match self.entries.first() {
            Some(Entry::Volatile { class, .. }) | Some(Entry::Persistent { class, .. }) => {
                Some(class)
            }
            _ => None,
        }
    }

    /// Identities referenced by persistent entries.
    pub fn persistent_refs(&self) -> Vec<ObjectId> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Persistent { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Serialize to the wire layout with a BLAKE3 trailer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(ENVELOPE_VERSION);
        encode_varint(&mut buf, self.entries.len() as u64);

        for entry in &self.entries {
            buf.push(entry.kind_byte());
            match entry {
                Entry::Immutable { payload } => put_bytes(&mut buf, payload),
                Entry::Volatile {
                    tag,
                    class,
                    payload,
                } => {
                    encode_varint(&mut buf, *tag as u64);
                    put_str(&mut buf, class);
                    put_bytes(&mut buf, payload);
                }
                Entry::Persistent { id, class, hint } => {
                    buf.extend_from_slice(id.as_bytes());
                    put_str(&mut buf, class);
                    match hint {
                        Some(backend) => {
                            buf.push(1);
                            buf.extend_from_slice(backend.as_bytes());
                        }
                        None => buf.push(0),
                    }
                }
                Entry::BackReference { tag } => encode_varint(&mut buf, *tag as u64),
            }
        }

        let checksum = *blake3::hash(&buf).as_bytes();
        buf.extend_from_slice(&checksum);
        buf
    }

    /// Parse the wire layout, verifying magic, version and checksum.
    pub fn from_bytes(data: &[u8]) -> CodecResult<Self> {
        if data.len() < MAGIC.len() + 1 + CHECKSUM_LEN {
            return Err(CodecError::Truncated(data.len()));
        }
        let (body, trailer) = data.split_at(data.len() - CHECKSUM_LEN);
        if blake3::hash(body).as_bytes() != trailer {
            return Err(CodecError::ChecksumMismatch);
        }

        let mut reader = Reader::new(body);
        if reader.take(MAGIC.len())? != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = reader.u8()?;
        if version != ENVELOPE_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let count = reader.varint()?;
        // Every entry takes at least two bytes.
        if count > (reader.remaining() / 2) as u64 {
            return Err(CodecError::Malformed(format!(
                "entry count {count} exceeds envelope size"
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = reader.u8()?;
            let entry = match kind {
                KIND_IMMUTABLE => Entry::Immutable {
                    payload: reader.bytes()?.to_vec(),
                },
                KIND_VOLATILE => Entry::Volatile {
                    tag: reader.varint_u32()?,
                    class: reader.string()?,
                    payload: reader.bytes()?.to_vec(),
                },
                KIND_PERSISTENT => {
                    let id = ObjectId::from_bytes(reader.array16()?);
                    let class = reader.string()?;
                    let hint = match reader.u8()? {
                        0 => None,
                        1 => Some(BackendId::from_bytes(reader.array16()?)),
                        other => {
                            return Err(CodecError::Malformed(format!("bad hint flag {other}")))
                        }
                    };
                    Entry::Persistent { id, class, hint }
                }
                KIND_BACK_REFERENCE => Entry::BackReference {
                    tag: reader.varint_u32()?,
                },
                other => return Err(CodecError::UnknownKind(other)),
            };
            entries.push(entry);
        }

        if !reader.is_empty() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after entries",
                reader.remaining()
            )));
        }
        Ok(Self { entries })
    }
}

pub(crate) fn to_payload<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

pub(crate) fn from_payload<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> CodecResult<T> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Payload(e.to_string()))
}

/// A single slot, as carried by an immutable entry.
pub(crate) fn slot_from_payload(bytes: &[u8]) -> CodecResult<Slot> {
    check_nesting(bytes, false)?;
    from_payload(bytes)
}

/// A field list, as carried by a volatile entry.
pub(crate) fn fields_from_payload(bytes: &[u8]) -> CodecResult<Vec<(String, Slot)>> {
    check_nesting(bytes, true)?;
    from_payload(bytes)
}

/// Remaining items of one open list or map.
enum Open {
    Slots(u64),
    Pairs(u64),
}

/// Walk the bincode layout of a payload with an explicit stack and
/// reject it if lists and maps nest deeper than [`MAX_NESTING`].
///
/// Deserializing an arbitrarily deep payload would recurse once per level.
fn check_nesting(bytes: &[u8], fields: bool) -> CodecResult<()> {
    let mut scan = Scan { bytes, pos: 0 };
    let mut open = vec![if fields {
        Open::Pairs(scan.u64()?)
    } else {
        Open::Slots(1)
    }];
    while let Some(top) = open.last_mut() {
        let (remaining, pairs) = match top {
            Open::Slots(n) => (n, false),
            Open::Pairs(n) => (n, true),
        };
        if *remaining == 0 {
            open.pop();
            continue;
        }
        *remaining -= 1;
        if pairs {
            let key_len = scan.u64()?;
            scan.skip(key_len)?;
        }
        // Variant order of `Slot`.
        match scan.u32()? {
            0 => {}
            1 => scan.skip(1)?,
            2 | 3 => scan.skip(8)?,
            4 | 5 => {
                let len = scan.u64()?;
                scan.skip(len)?;
            }
            6 => open.push(Open::Slots(scan.u64()?)),
            7 => open.push(Open::Pairs(scan.u64()?)),
            8 => scan.skip(4)?,
            other => return Err(CodecError::Payload(format!("unknown slot variant {other}"))),
        }
        if open.len() > MAX_NESTING + 1 {
            return Err(CodecError::TooDeep(MAX_NESTING));
        }
    }
    Ok(())
}

struct Scan<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Scan<'_> {
    fn take(&mut self, len: u64) -> CodecResult<&[u8]> {
        let available = (self.bytes.len() - self.pos) as u64;
        if len > available {
            return Err(CodecError::Payload(format!(
                "payload truncated at byte {}",
                self.pos
            )));
        }
        let start = self.pos;
        self.pos += len as usize;
        Ok(&self.bytes[start..self.pos])
    }

    fn skip(&mut self, len: u64) -> CodecResult<()> {
        self.take(len).map(|_| ())
    }

    fn u32(&mut self) -> CodecResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}
