//! Codec implementation for [BTreeMap].
//!
//! Maps encode their entries in ascending key order and decoding rejects any other order,
//! so every map has exactly one encoding.

use crate::{
    types::{len_size, read_len, write_len},
    EncodeSize, Error, RangeCfg, Read, Write,
};
use bytes::{Buf, BufMut};
use std::collections::BTreeMap;

impl<K: Write, V: Write> Write for BTreeMap<K, V> {
    #[inline]
    fn write(&self, buf: &mut impl BufMut) {
        write_len(self.len(), buf);
        for (key, value) in self {
            key.write(buf);
            value.write(buf);
        }
    }
}

impl<K: EncodeSize, V: EncodeSize> EncodeSize for BTreeMap<K, V> {
    #[inline]
    fn encode_size(&self) -> usize {
        len_size(self.len())
            + self
                .iter()
                .map(|(k, v)| k.encode_size() + v.encode_size())
                .sum::<usize>()
    }
}

impl<K: Read + Ord, V: Read> Read for BTreeMap<K, V> {
    type Cfg = (RangeCfg, (K::Cfg, V::Cfg));

    fn read_cfg(buf: &mut impl Buf, (range, (k_cfg, v_cfg)): &Self::Cfg) -> Result<Self, Error> {
        let len = read_len(buf, range)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::read_cfg(buf, k_cfg)?;
            if let Some((last, _)) = map.last_key_value() {
                if key <= *last {
                    return Err(Error::UnorderedKeys);
                }
            }
            let value = V::read_cfg(buf, v_cfg)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}
