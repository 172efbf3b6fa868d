//! External key material store.
//!
//! Keys are loaded at call time from a JSON file mapping hex slot
//! numbers to hex-encoded 32-byte keys, e.g. `{"00": "<64 hex chars>",
//! "0e": ...}`. Slot 0 holds the factory root key; the provisioner
//! diversifies it per device before it ever reaches a chip. Key bytes
//! are wiped on drop.

use std::fmt;
use std::fs;
use std::path::Path;

use std::collections::BTreeMap;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::{Block, SLOT_COUNT};

/// In-memory key material for the 16 data slots.
pub struct KeyStore {
    keys: [Option<Block>; SLOT_COUNT],
}

impl KeyStore {
    /// Load a store from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::InvalidSecrets(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Parse a store from JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidSecrets(e.to_string()))?;

        let mut keys: [Option<Block>; SLOT_COUNT] = [None; SLOT_COUNT];
        for (slot_hex, key_hex) in &entries {
            let slot = u8::from_str_radix(slot_hex, 16)
                .ok()
                .filter(|&s| (s as usize) < SLOT_COUNT)
                .ok_or_else(|| Error::InvalidSecrets(format!("bad slot number {slot_hex:?}")))?;

            let mut key = [0u8; 32];
            hex::decode_to_slice(key_hex, &mut key)
                .map_err(|_| Error::InvalidSecrets(format!("slot {slot:#04x}: key must be 64 hex chars")))?;

            if keys[slot as usize].replace(key).is_some() {
                return Err(Error::InvalidSecrets(format!("duplicate entry for slot {slot:#04x}")));
            }
        }
        Ok(Self { keys })
    }

    /// The key configured for a slot.
    pub fn key(&self, slot: u8) -> Result<&Block> {
        self.keys
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::MissingKey { slot })
    }

    /// The factory root key (slot 0's entry).
    pub fn root_key(&self) -> Result<&Block> {
        self.key(0)
    }

    /// Whether a key is configured for the slot.
    pub fn contains(&self, slot: u8) -> bool {
        matches!(self.keys.get(slot as usize), Some(Some(_)))
    }
}

impl Drop for KeyStore {
    fn drop(&mut self) {
        for key in self.keys.iter_mut().flatten() {
            key.zeroize();
        }
    }
}

// Key bytes never appear in debug output.
impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<usize> = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.map(|_| i))
            .collect();
        f.debug_struct("KeyStore").field("slots", &slots).finish()
    }
}
