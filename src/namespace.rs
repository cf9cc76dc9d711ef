// src/namespace.rs

//! Wraps a [`Kv`] and transparently prefixes every request key with a fixed byte
//! prefix, stripping it back off on the way out — a decorator over the inner `Kv`,
//! used by the election and lock subsystems to scope themselves under
//! `election/<name>/` and similar namespaces without leaking the prefix to callers.

use bytes::Bytes;

use crate::error::Result;
use crate::kv::Kv;
use crate::range::KeyRange;

#[derive(Clone)]
pub struct Namespace {
    inner: Kv,
    prefix: Bytes,
}

impl Namespace {
    pub fn new(inner: Kv, prefix: impl Into<Bytes>) -> Self {
        Namespace { inner, prefix: prefix.into() }
    }

    fn prefixed(&self, key: &[u8]) -> Bytes {
        let mut buf = Vec::with_capacity(self.prefix.len() + key.len());
        buf.extend_from_slice(&self.prefix);
        buf.extend_from_slice(key);
        Bytes::from(buf)
    }

    fn prefixed_range(&self, range: KeyRange) -> KeyRange {
        let start = self.prefixed(&range.start);
        let end = if range.end.as_ref() == [0u8] && range.start.as_ref() == [0u8] {
            // Caller asked for "everything"; scope that to the whole namespace prefix.
            crate::range::prefix_end(&self.prefix)
        } else if range.end.is_empty() {
            Bytes::new()
        } else {
            self.prefixed(&range.end)
        };
        KeyRange { start, end }
    }

    fn strip(&self, key: &[u8]) -> Bytes {
        Bytes::copy_from_slice(key.strip_prefix(self.prefix.as_ref()).unwrap_or(key))
    }

    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        self.inner.get(self.prefixed(&key.into())).buffer().await
    }

    pub async fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.inner.put(self.prefixed(&key.into()), value).exec().await?;
        Ok(())
    }

    pub async fn delete(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.inner.delete(self.prefixed(&key.into())).exec().await
    }

    /// All keys under this namespace's prefix, with the prefix stripped, preserving
    /// server-returned order.
    pub async fn keys_in(&self, range: KeyRange) -> Result<Vec<Bytes>> {
        let scoped = self.prefixed_range(range);
        let kvs = self.inner.get(Bytes::new()).range(scoped).all().await?;
        Ok(kvs.into_iter().map(|kv| self.strip(&kv.key)).collect())
    }

    pub fn prefix(&self) -> Bytes {
        self.prefix.clone()
    }

    pub fn inner(&self) -> &Kv {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_composition_is_additive() {
        // Pure byte-math check independent of a live pool.
        let prefix = Bytes::from_static(b"election/name/");
        let mut buf = Vec::new();
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(b"123");
        assert_eq!(buf, b"election/name/123".to_vec());
    }
}
