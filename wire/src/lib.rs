//! Byte buffers for the protoplex binary descriptor format.
//!
//! Integers are stored as little-endian base-128 var-ints (signed values are
//! zigzag encoded first), strings as UTF-8 followed by a single NUL byte.
//!
//! ```
//! use protoplex_wire::*;
//!
//! let mut out = ByteBufferMut::new();
//! out.write_string("api.proto");
//! out.write_var_uint(300);
//!
//! let data = out.data();
//! let mut bb = ByteBuffer::new(&data);
//! assert_eq!(bb.read_string().unwrap(), "api.proto");
//! assert_eq!(bb.read_var_uint().unwrap(), 300);
//! assert!(bb.is_empty());
//! ```

pub mod bb;

pub use bb::*;
