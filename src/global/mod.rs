// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod defaults;

use std::fmt;

use anyhow::{Result, bail};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const ID_LENGTH: usize = blake3::OUT_LEN;

/// Content hash used throughout the engine. The hash of a blob is always
/// computed over its plaintext so that the same bytes produce the same ID
/// no matter how they end up encoded at rest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ID([u8; ID_LENGTH]);

impl ID {
    pub fn from_content(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 2 * ID_LENGTH {
            bail!("Invalid ID length: {}", hex.len());
        }

        let mut bytes = [0u8; ID_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|e| anyhow::anyhow!("Invalid ID '{hex}': {e}"))?;
        }

        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Short hex form for display (`len` bytes).
    pub fn to_short_hex(&self, len: usize) -> String {
        self.0
            .iter()
            .take(len)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID({})", self.to_short_hex(defaults::SHORT_ID_LEN))
    }
}

impl Serialize for ID {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ID::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Options affecting the whole process (CLI verbosity and quiet mode).
#[derive(Debug, Clone, Copy)]
pub struct GlobalOpts {
    pub quiet: bool,
    pub verbosity: u32,
}

impl GlobalOpts {
    const fn initial() -> Self {
        Self {
            quiet: false,
            verbosity: defaults::DEFAULT_VERBOSITY,
        }
    }
}

static GLOBAL_OPTS: RwLock<GlobalOpts> = RwLock::new(GlobalOpts::initial());

pub fn global_opts() -> GlobalOpts {
    *GLOBAL_OPTS.read()
}

pub fn set_global_opts(opts: GlobalOpts) {
    *GLOBAL_OPTS.write() = opts;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_round_trip() -> Result<()> {
        let id = ID::from_content(b"urraca was here");
        let parsed = ID::from_hex(&id.to_hex())?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn test_id_is_stable() {
        assert_eq!(
            ID::from_content(b"lorem ipsum"),
            ID::from_content(b"lorem ipsum")
        );
        assert_ne!(
            ID::from_content(b"lorem ipsum"),
            ID::from_content(b"lorem ipsum dolor")
        );
    }

    #[test]
    fn test_id_rejects_bad_hex() {
        assert!(ID::from_hex("abcd").is_err());
        assert!(ID::from_hex(&"zz".repeat(ID_LENGTH)).is_err());
    }
}
