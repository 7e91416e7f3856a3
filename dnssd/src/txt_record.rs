//! TXT record storage and wire encoding.
//!
//! A TXT record is a sequence of entries, each a one byte length followed by `key` or
//! `key=value`. Keys are printable ASCII and compared case-insensitively; only the first
//! occurrence of a key counts.

use crate::{Error, Result};
use bytes::BufMut;
use std::collections::HashMap;
use std::ops::Index;

/// Largest encoded TXT record accepted by the daemon.
pub const MAX_TXT_RECORD_LEN: usize = 65535;

/// Largest single entry (`key=value`), bounded by its one byte length prefix.
pub const MAX_ENTRY_LEN: usize = 255;

/// A single `key[=value]` entry of a [`TxtRecord`].
#[derive(Debug, Clone, Getters, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxtEntry {
    key: String,
    value: Option<Vec<u8>>,
}

impl TxtEntry {
    fn encoded_len(&self) -> usize {
        self.key.len() + self.value.as_ref().map_or(0, |v| v.len() + 1)
    }
}

/// Ordered key/value metadata attached to a service.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TxtRecord {
    entries: Vec<TxtEntry>,
}

impl TxtRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a record from its wire form, copying the data.
    ///
    /// Decoding stops at the first entry whose length runs past the end of `bytes`; the entries
    /// before it are kept. Empty entries, entries with an empty or non-printable key and
    /// repeated keys are skipped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut record = Self::new();
        let mut rest = bytes;

        while let Some((&len, tail)) = rest.split_first() {
            let len = len as usize;
            if len > tail.len() {
                debug!(
                    "TXT entry of {} bytes runs past end of record, {} bytes left",
                    len,
                    tail.len()
                );
                break;
            }

            let (entry, next) = tail.split_at(len);
            rest = next;

            if entry.is_empty() {
                continue;
            }

            let (key, value) = match entry.iter().position(|&b| b == b'=') {
                Some(eq) => (&entry[..eq], Some(entry[eq + 1..].to_vec())),
                None => (entry, None),
            };

            if key.is_empty() || !key.iter().all(|&b| is_key_byte(b)) {
                debug!("skipping TXT entry with invalid key: {:?}", key);
                continue;
            }

            // checked above: every byte is printable ASCII
            let key = String::from_utf8_lossy(key).into_owned();

            if record.position(&key).is_some() {
                trace!("skipping repeated TXT key `{}`", key);
                continue;
            }

            record.entries.push(TxtEntry { key, value });
        }

        record
    }

    /// Returns the value of `key`, or `None` if the key is absent or has no value.
    ///
    /// Use [`TxtRecord::contains_key()`] to tell a value-less key from a missing one.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entry(key).and_then(|e| e.value.as_deref())
    }

    /// Returns the value of `key` as UTF-8, if present and valid.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Returns the entry for `key`.
    pub fn entry(&self, key: &str) -> Option<&TxtEntry> {
        self.position(key).map(|i| &self.entries[i])
    }

    /// Returns true if `key` is present, with or without a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Sets `key` to `value`, replacing any existing entry for the key in place.
    pub fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<()> {
        self.put(key, Some(value.as_ref().to_vec()))
    }

    /// Sets `key` without a value, the form used for boolean attributes.
    pub fn set_flag(&mut self, key: &str) -> Result<()> {
        self.put(key, None)
    }

    /// Removes `key`, returning its entry.
    pub fn remove(&mut self, key: &str) -> Option<TxtEntry> {
        self.position(key).map(|i| self.entries.remove(i))
    }

    /// Returns the keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Returns `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&[u8]>)> {
        self.entries
            .iter()
            .map(|e| (e.key.as_str(), e.value.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the size of the wire encoding in bytes.
    pub fn encoded_len(&self) -> usize {
        self.entries.iter().map(|e| e.encoded_len() + 1).sum()
    }

    /// Encodes the record in its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = self.encoded_len();
        if size > MAX_TXT_RECORD_LEN {
            return Err(Error::RecordTooLarge { size });
        }

        let mut buf = Vec::with_capacity(size);
        for entry in &self.entries {
            // entry length was bounded by `put()`
            buf.put_u8(entry.encoded_len() as u8);
            buf.put_slice(entry.key.as_bytes());
            if let Some(value) = &entry.value {
                buf.put_u8(b'=');
                buf.put_slice(value);
            }
        }

        Ok(buf)
    }

    /// Returns the record as a map of UTF-8 values; value-less keys map to an empty string.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.iter()
            .map(|(k, v)| {
                (
                    k.to_ascii_lowercase(),
                    v.map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default(),
                )
            })
            .collect()
    }

    fn put(&mut self, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        check_key(key)?;

        let entry = TxtEntry {
            key: key.to_string(),
            value,
        };

        if entry.encoded_len() > MAX_ENTRY_LEN {
            return Err(Error::InvalidTxtEntry(format!(
                "entry for `{}` is {} bytes, limit is {}",
                key.get(..16).unwrap_or(key),
                entry.encoded_len(),
                MAX_ENTRY_LEN
            )));
        }

        match self.position(key) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }

        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key.eq_ignore_ascii_case(key))
    }
}

impl PartialEq for TxtRecord {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|e| other.entry(&e.key).is_some_and(|o| o.value == e.value))
    }
}

impl Eq for TxtRecord {}

impl Index<&str> for TxtRecord {
    type Output = [u8];

    fn index(&self, key: &str) -> &Self::Output {
        match self.get(key) {
            Some(value) => value,
            None => panic!("no value for TXT key `{key}`"),
        }
    }
}

impl TryFrom<HashMap<&str, &str>> for TxtRecord {
    type Error = Error;

    fn try_from(map: HashMap<&str, &str>) -> Result<Self> {
        let mut pairs = map.into_iter().collect::<Vec<_>>();
        pairs.sort_unstable();

        let mut record = Self::new();
        for (key, value) in pairs {
            record.set(key, value)?;
        }

        Ok(record)
    }
}

fn is_key_byte(b: u8) -> bool {
    (0x20..=0x7e).contains(&b) && b != b'='
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(Error::InvalidTxtEntry("key cannot be empty".into()))
    } else if !key.bytes().all(is_key_byte) {
        Err(Error::InvalidTxtEntry(format!(
            "key `{}` must be printable ASCII without `=`",
            key.escape_debug()
        )))
    } else {
        Ok(())
    }
}
