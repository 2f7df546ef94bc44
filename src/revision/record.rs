use cbordata::Cborize;

use crate::{util, Result};

const RECORD_VER: u32 = 0x00010001;

/// Serialized document snapshot, as appended into a
/// [RevisionChunk][crate::revision::RevisionChunk].
///
/// Records are cbor encoded, hence self describing their length, which
/// lets a chunk be walked record by record.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Record {
    pub revision: u64,
    pub body: Vec<u8>,
}

impl Record {
    const ID: u32 = RECORD_VER;

    pub fn new(revision: u64, body: &[u8]) -> Record {
        Record {
            revision,
            body: body.to_vec(),
        }
    }

    /// Encode record into bytes.
    pub fn encode(self) -> Result<Vec<u8>> {
        util::into_cbor_bytes(self)
    }

    /// Decode record from the front of `data`, return the record and
    /// number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Record, usize)> {
        util::from_cbor_bytes(data)
    }
}
