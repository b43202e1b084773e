use std::fmt;
use std::str::FromStr;

/// Cardinal direction of a merge link. North is -Z, East is +X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MergeDirection {
    North,
    East,
    South,
    West,
}

impl MergeDirection {
    pub const ALL: [MergeDirection; 4] = [Self::North, Self::East, Self::South, Self::West];

    pub const fn dx(self) -> i32 {
        match self {
            Self::East => 1,
            Self::West => -1,
            Self::North | Self::South => 0,
        }
    }

    pub const fn dz(self) -> i32 {
        match self {
            Self::South => 1,
            Self::North => -1,
            Self::East | Self::West => 0,
        }
    }

    pub const fn opposite(self) -> MergeDirection {
        match self {
            Self::North => Self::South,
            Self::East => Self::West,
            Self::South => Self::North,
            Self::West => Self::East,
        }
    }

    /// Lower-case name, used as the storage key.
    pub const fn name(self) -> &'static str {
        match self {
            Self::North => "north",
            Self::East => "east",
            Self::South => "south",
            Self::West => "west",
        }
    }

    /// Direction a player is facing for a given yaw in degrees
    /// (0 = south, 90 = west, 180 = north, 270 = east).
    pub fn from_yaw(yaw: f64) -> MergeDirection {
        let yaw = yaw.rem_euclid(360.0);
        if (45.0..135.0).contains(&yaw) {
            Self::West
        } else if (135.0..225.0).contains(&yaw) {
            Self::North
        } else if (225.0..315.0).contains(&yaw) {
            Self::East
        } else {
            Self::South
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for MergeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge direction {0:?}")]
pub struct ParseDirectionError(String);

impl FromStr for MergeDirection {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        MergeDirection::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseDirectionError(s.to_string()))
    }
}

/// Set of merge directions packed into four bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirectionSet(u8);

impl DirectionSet {
    pub const EMPTY: DirectionSet = DirectionSet(0);

    pub const fn contains(self, direction: MergeDirection) -> bool {
        self.0 & direction.bit() != 0
    }

    #[must_use]
    pub const fn with(self, direction: MergeDirection) -> DirectionSet {
        DirectionSet(self.0 | direction.bit())
    }

    #[must_use]
    pub const fn without(self, direction: MergeDirection) -> DirectionSet {
        DirectionSet(self.0 & !direction.bit())
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Members in North, East, South, West order.
    pub fn iter(self) -> impl Iterator<Item = MergeDirection> {
        MergeDirection::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl FromIterator<MergeDirection> for DirectionSet {
    fn from_iter<I: IntoIterator<Item = MergeDirection>>(iter: I) -> Self {
        iter.into_iter().fold(DirectionSet::EMPTY, DirectionSet::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposites() {
        for d in MergeDirection::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(d.dx() + d.opposite().dx(), 0);
            assert_eq!(d.dz() + d.opposite().dz(), 0);
        }
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("EAST".parse::<MergeDirection>().unwrap(), MergeDirection::East);
        assert_eq!(" north ".parse::<MergeDirection>().unwrap(), MergeDirection::North);
        assert!("up".parse::<MergeDirection>().is_err());
        assert!("".parse::<MergeDirection>().is_err());
    }

    #[test]
    fn test_from_yaw() {
        assert_eq!(MergeDirection::from_yaw(0.0), MergeDirection::South);
        assert_eq!(MergeDirection::from_yaw(90.0), MergeDirection::West);
        assert_eq!(MergeDirection::from_yaw(180.0), MergeDirection::North);
        assert_eq!(MergeDirection::from_yaw(270.0), MergeDirection::East);
        assert_eq!(MergeDirection::from_yaw(-90.0), MergeDirection::East);
        assert_eq!(MergeDirection::from_yaw(315.0), MergeDirection::South);
    }

    #[test]
    fn test_direction_set() {
        let set = DirectionSet::EMPTY
            .with(MergeDirection::South)
            .with(MergeDirection::East);
        assert_eq!(set.len(), 2);
        assert!(set.contains(MergeDirection::East));
        assert!(!set.contains(MergeDirection::West));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![MergeDirection::East, MergeDirection::South]
        );
        assert!(set.without(MergeDirection::East).without(MergeDirection::South).is_empty());
    }
}
