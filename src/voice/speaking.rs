use serde::{Deserialize, Serialize};

/// Speaking state bits sent with voice op 5.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeakingFlags(u32);

impl SpeakingFlags {
    pub const MICROPHONE: Self = Self(1 << 0);
    pub const SOUNDSHARE: Self = Self(1 << 1);
    pub const PRIORITY: Self = Self(1 << 2);

    pub const ALL: Self = Self(0b111);

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Unknown bits are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SpeakingFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SpeakingFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for SpeakingFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::MICROPHONE, "MICROPHONE"),
            (Self::SOUNDSHARE, "SOUNDSHARE"),
            (Self::PRIORITY, "PRIORITY"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            f.write_str("SpeakingFlags(empty)")
        } else {
            write!(f, "SpeakingFlags({})", names.join(" | "))
        }
    }
}
