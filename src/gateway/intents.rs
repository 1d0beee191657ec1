use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use serde::{Deserialize, Serialize};

/// Bitmask of event groups requested in Identify.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayIntents(u64);

impl GatewayIntents {
    pub const NONE: Self = Self(0);
    pub const GUILDS: Self = Self(1 << 0);
    pub const GUILD_MEMBERS: Self = Self(1 << 1);
    pub const GUILD_MODERATION: Self = Self(1 << 2);
    pub const GUILD_EXPRESSIONS: Self = Self(1 << 3);
    pub const GUILD_INTEGRATIONS: Self = Self(1 << 4);
    pub const GUILD_WEBHOOKS: Self = Self(1 << 5);
    pub const GUILD_INVITES: Self = Self(1 << 6);
    pub const GUILD_VOICE_STATES: Self = Self(1 << 7);
    pub const GUILD_PRESENCES: Self = Self(1 << 8);
    pub const GUILD_MESSAGES: Self = Self(1 << 9);
    pub const GUILD_MESSAGE_REACTIONS: Self = Self(1 << 10);
    pub const GUILD_MESSAGE_TYPING: Self = Self(1 << 11);
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Self = Self(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Self = Self(1 << 14);
    pub const MESSAGE_CONTENT: Self = Self(1 << 15);
    pub const GUILD_SCHEDULED_EVENTS: Self = Self(1 << 16);
    pub const AUTO_MODERATION_CONFIGURATION: Self = Self(1 << 20);
    pub const AUTO_MODERATION_EXECUTION: Self = Self(1 << 21);
    pub const GUILD_MESSAGE_POLLS: Self = Self(1 << 24);
    pub const DIRECT_MESSAGE_POLLS: Self = Self(1 << 25);

    /// Intents that must be enabled for the application before use.
    pub const PRIVILEGED: Self =
        Self(Self::GUILD_MEMBERS.0 | Self::GUILD_PRESENCES.0 | Self::MESSAGE_CONTENT.0);

    pub const ALL: Self = Self(
        Self::GUILDS.0
            | Self::GUILD_MEMBERS.0
            | Self::GUILD_MODERATION.0
            | Self::GUILD_EXPRESSIONS.0
            | Self::GUILD_INTEGRATIONS.0
            | Self::GUILD_WEBHOOKS.0
            | Self::GUILD_INVITES.0
            | Self::GUILD_VOICE_STATES.0
            | Self::GUILD_PRESENCES.0
            | Self::GUILD_MESSAGES.0
            | Self::GUILD_MESSAGE_REACTIONS.0
            | Self::GUILD_MESSAGE_TYPING.0
            | Self::DIRECT_MESSAGES.0
            | Self::DIRECT_MESSAGE_REACTIONS.0
            | Self::DIRECT_MESSAGE_TYPING.0
            | Self::MESSAGE_CONTENT.0
            | Self::GUILD_SCHEDULED_EVENTS.0
            | Self::AUTO_MODERATION_CONFIGURATION.0
            | Self::AUTO_MODERATION_EXECUTION.0
            | Self::GUILD_MESSAGE_POLLS.0
            | Self::DIRECT_MESSAGE_POLLS.0,
    );

    pub const NON_PRIVILEGED: Self = Self(Self::ALL.0 & !Self::PRIVILEGED.0);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_privileged(self) -> bool {
        self.0 & Self::PRIVILEGED.0 != 0
    }
}

impl Default for GatewayIntents {
    fn default() -> Self {
        Self::NON_PRIVILEGED
    }
}

impl BitOr for GatewayIntents {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for GatewayIntents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for GatewayIntents {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for GatewayIntents {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

impl std::fmt::Debug for GatewayIntents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GatewayIntents({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_privileged_excludes_privileged() {
        assert!(!GatewayIntents::NON_PRIVILEGED.is_privileged());
        assert!(GatewayIntents::NON_PRIVILEGED.contains(GatewayIntents::GUILD_VOICE_STATES));
        assert!(!GatewayIntents::NON_PRIVILEGED.contains(GatewayIntents::MESSAGE_CONTENT));
    }

    #[test]
    fn combine_and_serialize() {
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES;
        assert_eq!(intents.bits(), 513);
        assert_eq!(serde_json::to_string(&intents).unwrap(), "513");
        assert_eq!(!GatewayIntents::ALL, GatewayIntents::NONE);
    }
}
