//! Type-safe value types shared by settings, planner and executor.
//!
//! Stringly-typed settings values are parsed into these enums once, so the
//! rest of the crate matches exhaustively instead of comparing strings.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Filesystem for the root volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    #[default]
    Ext4,
    Btrfs,
    Xfs,
}

impl Filesystem {
    /// Formatter binary for this filesystem.
    pub fn mkfs_program(self) -> &'static str {
        match self {
            Self::Ext4 => "mkfs.ext4",
            Self::Btrfs => "mkfs.btrfs",
            Self::Xfs => "mkfs.xfs",
        }
    }

    /// Flag that makes the formatter overwrite an existing signature.
    pub fn force_flag(self) -> &'static str {
        match self {
            Self::Ext4 => "-F",
            Self::Btrfs | Self::Xfs => "-f",
        }
    }
}

/// Yes/no settings toggle, written as `yes`/`no` in `key=value` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Toggle {
    #[strum(to_string = "yes", serialize = "true", serialize = "1")]
    Yes,
    #[default]
    #[strum(to_string = "no", serialize = "false", serialize = "0")]
    No,
}

impl Toggle {
    pub fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }
}

impl From<bool> for Toggle {
    fn from(value: bool) -> Self {
        if value { Self::Yes } else { Self::No }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_parse_and_display() {
        assert_eq!("ext4".parse::<Filesystem>().expect("valid"), Filesystem::Ext4);
        assert_eq!("BTRFS".parse::<Filesystem>().expect("case insensitive"), Filesystem::Btrfs);
        assert_eq!(Filesystem::Xfs.to_string(), "xfs");
        assert!("fat32".parse::<Filesystem>().is_err());
    }

    #[test]
    fn test_filesystem_formatter() {
        assert_eq!(Filesystem::Ext4.mkfs_program(), "mkfs.ext4");
        assert_eq!(Filesystem::Ext4.force_flag(), "-F");
        assert_eq!(Filesystem::Btrfs.force_flag(), "-f");
    }

    #[test]
    fn test_toggle_aliases() {
        assert_eq!("yes".parse::<Toggle>().expect("valid"), Toggle::Yes);
        assert_eq!("true".parse::<Toggle>().expect("valid"), Toggle::Yes);
        assert_eq!("0".parse::<Toggle>().expect("valid"), Toggle::No);
        assert_eq!(Toggle::Yes.to_string(), "yes");
        assert_eq!(Toggle::from(false), Toggle::No);
    }
}
