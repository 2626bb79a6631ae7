//! Serialize structured data.
//!
//! # Overview
//!
//! A binary serialization library designed to:
//! - Serialize replicated state and peer messages into a canonical binary format
//! - Deserialize untrusted binary input into structured data, bounding every allocation
//!
//! # Supported Types
//!
//! Natively supports:
//! - Primitives: `u8`, `u16`, `u32`, `u64`, `i64`, `bool`
//! - Collections: `Vec<T>`, `Option<T>`, `BTreeMap<K, V>`, `Bytes`, `String`, and `[u8; N]`
//!
//! User-defined types implement [Write], [Read] and either [EncodeSize] or [FixedSize].
//!
//! # Example
//!
//! ```
//! use bytes::{Buf, BufMut};
//! use epochal_codec::{DecodeExt, Encode, EncodeSize, Error, Read, ReadExt, Write};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Item {
//!     round: u64,
//!     seed: Option<u64>,
//! }
//!
//! impl Write for Item {
//!     fn write(&self, buf: &mut impl BufMut) {
//!         self.round.write(buf);
//!         self.seed.write(buf);
//!     }
//! }
//!
//! impl Read for Item {
//!     type Cfg = ();
//!
//!     fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
//!         let round = u64::read(buf)?;
//!         let seed = Option::<u64>::read(buf)?;
//!         Ok(Self { round, seed })
//!     }
//! }
//!
//! impl EncodeSize for Item {
//!     fn encode_size(&self) -> usize {
//!         self.round.encode_size() + self.seed.encode_size()
//!     }
//! }
//!
//! let item = Item { round: 7, seed: Some(42) };
//! assert_eq!(Item::decode(item.encode()).unwrap(), item);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod types;
pub mod util;
pub mod varint;

pub use codec::{Codec, Decode, DecodeExt, Encode, EncodeSize, FixedSize, Read, ReadExt, Write};
pub use config::RangeCfg;
pub use error::Error;
