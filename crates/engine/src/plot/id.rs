use std::fmt;
use std::str::FromStr;

use super::direction::MergeDirection;

/// Grid cell coordinate of a plot. Ordered by `x`, then `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PlotId {
    pub x: i32,
    pub z: i32,
}

impl PlotId {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The neighbouring cell one step in `direction`.
    pub const fn adjacent(&self, direction: MergeDirection) -> PlotId {
        PlotId {
            x: self.x.wrapping_add(direction.dx()),
            z: self.z.wrapping_add(direction.dz()),
        }
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid plot id {input:?}: expected \"x;z\"")]
pub struct ParsePlotIdError {
    input: String,
}

impl FromStr for PlotId {
    type Err = ParsePlotIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePlotIdError { input: s.to_string() };
        let (x, z) = s.split_once(';').ok_or_else(err)?;
        let x = x.trim().parse().map_err(|_| err())?;
        let z = z.trim().parse().map_err(|_| err())?;
        Ok(PlotId { x, z })
    }
}

/// Inclusive block rectangle on the X/Z plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlotBounds {
    pub min_x: i32,
    pub max_x: i32,
    pub min_z: i32,
    pub max_z: i32,
}

impl PlotBounds {
    pub const fn new(min_x: i32, max_x: i32, min_z: i32, max_z: i32) -> Self {
        Self { min_x, max_x, min_z, max_z }
    }

    pub const fn contains(&self, x: i32, z: i32) -> bool {
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &PlotBounds) -> PlotBounds {
        PlotBounds {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_z: self.min_z.min(other.min_z),
            max_z: self.max_z.max(other.max_z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form() {
        assert_eq!(PlotId::new(-3, 12).to_string(), "-3;12");
        assert_eq!("-3;12".parse::<PlotId>().unwrap(), PlotId::new(-3, 12));
        assert_eq!(" 4 ; -1 ".parse::<PlotId>().unwrap(), PlotId::new(4, -1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<PlotId>().is_err());
        assert!("1,2".parse::<PlotId>().is_err());
        assert!("1;".parse::<PlotId>().is_err());
        assert!("a;2".parse::<PlotId>().is_err());
    }

    #[test]
    fn test_ordering_x_then_z() {
        let mut ids = vec![PlotId::new(1, 0), PlotId::new(0, 5), PlotId::new(0, -1)];
        ids.sort();
        assert_eq!(ids, vec![PlotId::new(0, -1), PlotId::new(0, 5), PlotId::new(1, 0)]);
    }

    #[test]
    fn test_bounds_contains_edges() {
        let b = PlotBounds::new(0, 34, 0, 34);
        assert!(b.contains(0, 0));
        assert!(b.contains(34, 34));
        assert!(!b.contains(35, 0));
        assert!(!b.contains(0, -1));
    }
}
