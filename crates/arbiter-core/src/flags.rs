//! Route flag bitmask.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipe::PipeRole;

bitflags::bitflags! {
    /// Pipe tier selection bits plus the call-mode modifier.
    ///
    /// An empty value means the flag has not been resolved yet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct RouteFlag: u32 {
        const OUTPUT_NORMAL           = 0x0000_0001;
        const OUTPUT_DIRECT           = 0x0000_0002;
        const OUTPUT_MULTICHANNEL     = 0x0000_0008;
        const OUTPUT_LOWPOWER         = 0x0000_0010;
        const OUTPUT_FAST             = 0x0000_0020;
        const OUTPUT_VOIP             = 0x0000_0040;
        const OUTPUT_COMPRESS_OFFLOAD = 0x0000_0400;
        const INPUT_NORMAL            = 0x0000_1000;
        const INPUT_FAST              = 0x0000_2000;
        const INPUT_VOIP              = 0x0000_4000;
    }
}

impl RouteFlag {
    /// Tiers that cannot be shared and are reclaimed when empty.
    const SCARCE: Self = Self::OUTPUT_FAST
        .union(Self::INPUT_FAST)
        .union(Self::OUTPUT_DIRECT)
        .union(Self::OUTPUT_COMPRESS_OFFLOAD);

    /// Tiers backed by dedicated hardware buffers.
    const DEDICATED: Self = Self::OUTPUT_FAST.union(Self::INPUT_FAST).union(Self::OUTPUT_DIRECT);

    /// The normal tier for a pipe role.
    #[must_use]
    pub const fn normal_for(role: PipeRole) -> Self {
        match role {
            PipeRole::Output => Self::OUTPUT_NORMAL,
            PipeRole::Input => Self::INPUT_NORMAL,
        }
    }

    /// Whether the flag still needs resolving.
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.is_empty()
    }

    /// Whether the flag occupies a fast, direct or offload tier.
    #[must_use]
    pub const fn is_scarce(self) -> bool {
        self.intersects(Self::SCARCE)
    }

    /// Whether a session on this tier must be recreated rather than moved.
    #[must_use]
    pub const fn is_dedicated(self) -> bool {
        self.intersects(Self::DEDICATED)
    }
}

impl Default for RouteFlag {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for RouteFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        bitflags::parser::to_writer(self, f)
    }
}
