//! Parsing for the generator's coordinate-locator output.

use std::sync::LazyLock;

use regex::Regex;

/// A point in the locator's normalized screen space: both axes run 0 to 999
/// regardless of the frame's pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    /// Whether either axis carries the negative "no location found" sentinel.
    pub fn is_sentinel(self) -> bool {
        self.x < 0 || self.y < 0
    }
}

/// Exactly two signed integers separated by a comma.
#[allow(clippy::unwrap_used)]
static COORDINATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+,\s*-?\d+$").unwrap());

/// Parse locator output. Anything that is not two comma-separated signed
/// integers means "no coordinate found" and yields `None`, never an error.
pub fn parse_coordinates(text: &str) -> Option<Coordinate> {
    if !COORDINATE_RE.is_match(text) {
        return None;
    }
    let (x, y) = text.split_once(',')?;
    let x = x.parse().ok()?;
    let y = y.trim_start().parse().ok()?;
    Some(Coordinate { x, y })
}
