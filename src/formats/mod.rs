//! RAR format detection, signatures, and compression method tags.

use std::fmt;

/// RAR file signature detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// RAR 1.5 to 4.x
    Rar15,
    /// RAR 5.0+
    Rar50,
}

impl Signature {
    pub const RAR15: &[u8; 7] = b"Rar!\x1a\x07\x00";
    pub const RAR50: &[u8; 8] = b"Rar!\x1a\x07\x01\x00";

    /// Longest signature length; enough bytes to tell both formats apart.
    pub const MAX_LEN: usize = 8;

    pub fn size(&self) -> u64 {
        match self {
            Self::Rar15 => 7,
            Self::Rar50 => 8,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() >= 8 && data.starts_with(Self::RAR50) {
            Some(Self::Rar50)
        } else if data.len() >= 7 && data.starts_with(Self::RAR15) {
            Some(Self::Rar15)
        } else {
            None
        }
    }

    /// Locate the first signature in `data` (SFX archives carry an
    /// executable stub before it).
    pub fn find(data: &[u8]) -> Option<(usize, Self)> {
        // Both signatures share the 6-byte "Rar!\x1a\x07" prefix.
        let prefix = &Self::RAR15[..6];
        let mut start = 0;
        while start + prefix.len() <= data.len() {
            let pos = data[start..]
                .windows(prefix.len())
                .position(|w| w == prefix)?;
            let at = start + pos;
            if let Some(sig) = Self::from_bytes(&data[at..]) {
                return Some((at, sig));
            }
            start = at + 1;
        }
        None
    }
}

/// Compression method of an archive member, normalized across RAR 4 and
/// RAR 5 encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CompressionMethod {
    /// Store (no compression)
    Store,
    Fastest,
    Fast,
    Normal,
    Good,
    Best,
    /// Any other method code, kept verbatim.
    Unknown(u8),
}

impl CompressionMethod {
    /// RAR 1.5-4.x method byte: `0x30` (store) to `0x35` (best).
    pub fn from_rar4(code: u8) -> Self {
        match code {
            0x30 => Self::Store,
            0x31 => Self::Fastest,
            0x32 => Self::Fast,
            0x33 => Self::Normal,
            0x34 => Self::Good,
            0x35 => Self::Best,
            other => Self::Unknown(other),
        }
    }

    /// RAR 5.0 method field from the compression info: `0` (store) to `5`.
    pub fn from_rar5(code: u8) -> Self {
        match code {
            0 => Self::Store,
            1..=5 => Self::from_rar4(0x30 + code),
            other => Self::Unknown(other),
        }
    }

    pub fn is_store(&self) -> bool {
        *self == Self::Store
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Store => "Store",
            Self::Fastest => "Fastest",
            Self::Fast => "Fast",
            Self::Normal => "Normal",
            Self::Good => "Good",
            Self::Best => "Best",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown (0x{:02x})", code),
            other => f.write_str(other.name()),
        }
    }
}
