//! The four logical storage spaces.

use core::fmt;

/// Logical namespace of a stored record.
///
/// Each space maps to one subdirectory of the instance directory; keys are
/// flat within a space (modulo optional hash bucketing under `objects/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    /// Canonical microdata for objects, raw bytes for BLOBs, UTF-8 for CLOBs.
    Objects,
    /// One head pointer per identity hash.
    Vheads,
    /// Newline-separated reverse-map sets.
    Rmaps,
    /// Opaque host storage for keys and settings.
    Private,
}

impl Space {
    pub const ALL: [Space; 4] = [Space::Objects, Space::Vheads, Space::Rmaps, Space::Private];

    /// The on-disk directory name of this space.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Space::Objects => "objects",
            Space::Vheads => "vheads",
            Space::Rmaps => "rmaps",
            Space::Private => "private",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_names_are_stable() {
        assert_eq!(Space::Objects.dir_name(), "objects");
        assert_eq!(Space::Vheads.dir_name(), "vheads");
        assert_eq!(Space::Rmaps.dir_name(), "rmaps");
        assert_eq!(Space::Private.dir_name(), "private");
        assert_eq!(Space::ALL.len(), 4);
    }
}
