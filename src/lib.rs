//! Package implement the memory layer underneath a document store's
//! read path and secondary indexes.
//!
//! * [pool], fixed-size block allocation. Blocks are carved out of 256KB
//!   bricks, bricks are carved out of large chunks, and chunks are owned
//!   by an [pool::Arena]. Each thread allocates from its own current brick
//!   without taking a lock, while blocks can be freed from any thread.
//! * [revision], the document revision cache. Serialized document
//!   snapshots are appended into [revision::RevisionChunk]s, and a per
//!   collection [revision::RevisionsCache] maps revision-ids either to a
//!   write-ahead-log position or to a chunk location. Chunks carry a
//!   version and a reference count packed into a single atomic, readers
//!   lease a chunk for the duration of a read and writers invalidate it
//!   when its contents are compacted away.
//! * [assoc], a multi-valued hash table, [assoc::AssocMulti], that allows
//!   many elements under the same key. It backs edge and hash indexes.
//!
//! None of the types here know about transactions, they only promise that
//! a revision is never reported missing because its cache slot got
//! recycled, and that an index lookup sees every element inserted for a
//! key.

/// Short form to compose Error values.
///
/// Here are few possible ways:
///
/// ```ignore
/// use crate::Error;
/// err_at!(InvalidInput, msg: "bad argument");
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(IOError, std::fs::read(file_path));
/// ```
///
/// ```ignore
/// use crate::Error;
/// err_at!(FailConvert, u32::try_from(n), "offset {}", n);
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod error;

pub mod assoc;
pub mod hash;
pub mod pool;
pub mod revision;
pub mod util;

pub use crate::error::{Error, Result};
