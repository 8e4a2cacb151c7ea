pub mod engine;
pub mod log;
pub mod log_cask;
pub mod memory;

use crate::error::CResult;
use crate::tuple;
use serde_derive::{Deserialize, Serialize};

/// KeyDir is an in-memory map from a stored key to the position and
/// length of its most recent on-disk record, kept as a `BTreeMap` so it
/// can be walked in key order during compaction.
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

/// Engine status, used for observability and by the garbage-ratio check
/// in `LogCask::new_compact`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// The name of the storage engine.
    pub name: String,

    /// The number of live keys in the engine.
    pub keys: u64,

    /// The logical size of live key/value pairs.
    pub size: u64,

    /// The on-disk size of all data, live and garbage.
    pub total_disk_size: u64,

    /// The on-disk size of live data.
    pub live_disk_size: u64,

    /// The on-disk size of garbage data.
    pub garbage_disk_size: u64,
}

/// The merge-on-write wrapper shared by `LogCask` and `Memory`: when a
/// record already exists for this key, fold it and the incoming record
/// together via `tuple::merge` instead of blindly overwriting (spec.md
/// §4.1's merge rules, applied synchronously on write -- see
/// `storage::log_cask` for why there's no background compactor to
/// invoke it from instead).
///
/// Engine point-operation tests exercise raw, non-tuple-header bytes
/// (e.g. `vec![1]`), which don't decode as tuple headers; those pass
/// through unmerged, since there is no header to fold.
pub(crate) fn merge_on_write(existing: Option<&[u8]>, new: Vec<u8>) -> CResult<Vec<u8>> {
    match existing {
        Some(old) => match tuple::merge(old, &new) {
            Ok(merged) => Ok(merged),
            Err(_) => Ok(new),
        },
        None => Ok(new),
    }
}
