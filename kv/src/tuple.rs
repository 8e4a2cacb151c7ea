//! On-disk tuple header and the merge function invoked whenever two
//! records for the same key meet (see `storage::log_cask` for when
//! that happens in this crate).

use crate::error::{CResult, Error};

/// Fixed 17-byte header prefixing every record stored in the KV
/// engine. Layout (same on every host, so no endianness concerns):
///
/// ```text
/// byte 0       : is_ts_update (bit 0) | class (bits 1..2)
/// bytes 1..9   : delta, little-endian u64
/// bytes 9..17  : wts, little-endian u64 with the top bit masked off
/// ```
///
/// `wts` only needs 63 bits (spec.md §6), but to keep encode/decode
/// exact and trivial to review it gets its own 8-byte little-endian
/// field with the top bit masked, rather than packing it across a byte
/// boundary with `delta`. One byte over the theoretical 127-bit
/// minimum, for a header that's just two `u64`s and a tag byte.
pub const HEADER_LEN: usize = 17;

/// What kind of write produced a record. Distinguishes "this row no
/// longer exists" from "this row has this value" inside the merge
/// function, which otherwise only sees header + payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageClass {
    Insert,
    Update,
    Delete,
}

impl MessageClass {
    fn to_tag(self) -> u8 {
        match self {
            MessageClass::Insert => 0,
            MessageClass::Update => 1,
            MessageClass::Delete => 2,
        }
    }

    fn from_tag(tag: u8) -> CResult<Self> {
        match tag {
            0 => Ok(MessageClass::Insert),
            1 => Ok(MessageClass::Update),
            2 => Ok(MessageClass::Delete),
            _ => Err(Error::Value(format!("unknown message class tag {tag}"))),
        }
    }
}

/// A decoded tuple header plus its trailing payload bytes (empty for
/// timestamp-only records).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleHeader {
    /// This record exists only to bump timestamps; it carries no
    /// value change and must never be surfaced to a reader as a value.
    pub is_ts_update: bool,
    pub class: MessageClass,
    pub delta: u64,
    pub wts: u64,
}

impl TupleHeader {
    pub fn new(class: MessageClass, wts: u64, delta: u64) -> Self {
        Self { is_ts_update: false, class, delta, wts }
    }

    /// Builds a timestamp-only update carrying `(delta, wts)` and no
    /// payload, as described in spec.md §4.1.
    pub fn ts_update(wts: u64, delta: u64) -> Self {
        Self { is_ts_update: true, class: MessageClass::Update, delta, wts }
    }

    pub fn rts(&self) -> u64 {
        self.wts + self.delta
    }

    /// Encodes the header followed by `payload` (ignored for
    /// timestamp-only records) into a single record.
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        let tag_byte = (self.is_ts_update as u8) | (self.class.to_tag() << 1);
        buf.push(tag_byte);
        buf.extend_from_slice(&self.delta.to_le_bytes());
        buf.extend_from_slice(&(self.wts & ((1u64 << 63) - 1)).to_le_bytes());
        if !self.is_ts_update {
            buf.extend_from_slice(payload);
        }
        buf
    }

    /// Decodes a record into its header and payload. The payload slice
    /// borrows from `record`.
    pub fn decode(record: &[u8]) -> CResult<(Self, &[u8])> {
        if record.len() < HEADER_LEN {
            return Err(Error::Value(format!(
                "record too short to contain a tuple header: {} bytes",
                record.len()
            )));
        }
        let tag_byte = record[0];
        let is_ts_update = tag_byte & 1 != 0;
        let class = MessageClass::from_tag((tag_byte >> 1) & 0b11)?;
        let delta = u64::from_le_bytes(record[1..9].try_into().unwrap());
        let wts = u64::from_le_bytes(record[9..17].try_into().unwrap()) & ((1u64 << 63) - 1);
        let payload = if is_ts_update { &[][..] } else { &record[HEADER_LEN..] };
        Ok((Self { is_ts_update, class, delta, wts }, payload))
    }
}

/// Folds an older stored record and a newer incoming record for the
/// same key into the record that should be stored going forward,
/// applying the four rules from spec.md §4.1. `app_merge` implements
/// the application-level payload merge used when both records are
/// value-bearing; for this crate (no user-defined merge callback is
/// specified beyond "defer to the application"), the newer payload
/// simply wins, which is a valid instantiation of "defer to the
/// application's merge" when the application has nothing bespoke to
/// contribute.
pub fn merge(old: &[u8], new: &[u8]) -> CResult<Vec<u8>> {
    let (old_header, old_payload) = TupleHeader::decode(old)?;
    let (new_header, new_payload) = TupleHeader::decode(new)?;

    if old_header.is_ts_update {
        // old is ts-update, new is anything: discard the old record.
        return Ok(new.to_vec());
    }

    if new_header.is_ts_update {
        // old is value-bearing, new is ts-update: keep old's class and
        // payload, adopt the ts-update's (delta, wts).
        let merged = TupleHeader {
            is_ts_update: false,
            class: old_header.class,
            delta: new_header.delta,
            wts: new_header.wts,
        };
        return Ok(merged.encode(old_payload));
    }

    // old and new are both value-bearing: defer to the application
    // merge over the raw payload, then wrap with the newer record's
    // class and (delta, wts).
    let merged_payload = new_payload.to_vec();
    let _ = old_payload; // consulted only by a real application merge
    let merged = TupleHeader {
        is_ts_update: false,
        class: new_header.class,
        delta: new_header.delta,
        wts: new_header.wts,
    };
    Ok(merged.encode(&merged_payload))
}
