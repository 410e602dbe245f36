// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BytecodeError;

/// A CPython release line, identified by its major and minor number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// How instructions are laid out in the `co_code` byte string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// One opcode byte, followed by a 16-bit little endian argument for opcodes
    /// at or above `HAVE_ARGUMENT`.
    Legacy,
    /// Fixed two byte units: opcode, then an 8-bit argument.
    Wordcode,
}

impl Version {
    pub const V3_4: Version = Version::new(3, 4);
    pub const V3_5: Version = Version::new(3, 5);
    pub const V3_6: Version = Version::new(3, 6);
    pub const V3_7: Version = Version::new(3, 7);

    /// Every version the tables know about, oldest first. Each entry's dialect is a delta
    /// against the one before it.
    pub const SUPPORTED: [Version; 4] = [Self::V3_4, Self::V3_5, Self::V3_6, Self::V3_7];

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_supported(&self) -> bool {
        Self::SUPPORTED.contains(self)
    }

    /// The version this one is expressed as a delta against, or None for the chain root.
    pub fn parent(&self) -> Option<Version> {
        let idx = Self::SUPPORTED.iter().position(|v| v == self)?;
        idx.checked_sub(1).map(|i| Self::SUPPORTED[i])
    }

    /// The chain from the root up to and including this version.
    pub fn lineage(&self) -> Result<Vec<Version>, BytecodeError> {
        let idx = Self::SUPPORTED
            .iter()
            .position(|v| v == self)
            .ok_or(BytecodeError::UnsupportedVersion(*self))?;
        Ok(Self::SUPPORTED[..=idx].to_vec())
    }

    pub fn encoding(&self) -> Encoding {
        if *self >= Self::V3_6 {
            Encoding::Wordcode
        } else {
            Encoding::Legacy
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = BytecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BytecodeError::InvalidVersion(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        // Accept "3.6.1" style strings; the micro release never changes the instruction set.
        let minor = minor.split('.').next().ok_or_else(invalid)?;
        let major = major.parse::<u8>().map_err(|_| invalid())?;
        let minor = minor.parse::<u8>().map_err(|_| invalid())?;
        Ok(Version::new(major, minor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("3.4", Version::V3_4; "plain")]
    #[test_case("3.6.8", Version::V3_6; "with micro")]
    #[test_case(" 3.7 ", Version::V3_7; "whitespace")]
    fn parse_version(input: &str, expected: Version) {
        assert_eq!(input.parse::<Version>().unwrap(), expected);
    }

    #[test]
    fn reject_garbage() {
        assert!("three".parse::<Version>().is_err());
        assert!("3".parse::<Version>().is_err());
    }

    #[test]
    fn lineage_walks_from_root() {
        assert_eq!(
            Version::V3_6.lineage().unwrap(),
            vec![Version::V3_4, Version::V3_5, Version::V3_6]
        );
        assert_eq!(Version::V3_4.parent(), None);
        assert_eq!(Version::V3_7.parent(), Some(Version::V3_6));
        assert!(Version::new(2, 7).lineage().is_err());
    }

    #[test]
    fn encoding_switches_at_3_6() {
        assert_eq!(Version::V3_5.encoding(), Encoding::Legacy);
        assert_eq!(Version::V3_6.encoding(), Encoding::Wordcode);
    }
}
