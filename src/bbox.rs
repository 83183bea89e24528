//! Bounding boxes on a bounded plane.
//!
//! A query box may wrap around the seam of a bounded coordinate plane (for
//! example a longitude range crossing the antimeridian). Such a box is written
//! with `min > max` on the wrapping axis and is called *flipped*. Before it can
//! be searched it has to be decomposed into ordinary boxes against the plane
//! bounds, which is what [`split_bbox_if_flipped`] does.

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};

/// A closed `[min, max]` range on one axis.
///
/// Serialized as a two element array so keys always round-trip as
/// `[[min, max], ...]` regardless of dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// True when the interval wraps, i.e. `max < min`.
    pub fn is_flipped(&self) -> bool {
        self.max < self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl From<[f64; 2]> for Interval {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl From<Interval> for [f64; 2] {
    fn from(interval: Interval) -> Self {
        [interval.min, interval.max]
    }
}

impl From<(f64, f64)> for Interval {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

/// A two dimensional box: `[(west, east), (south, north)]`.
pub type Box2 = [Interval; 2];

/// Up to four boxes, kept inline.
pub type SplitBoxes = SmallVec<[Box2; 4]>;

/// Which axes of a [`Box2`] wrap around the plane seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    None,
    X,
    Y,
    Both,
}

impl Flip {
    pub fn is_flipped(self) -> bool {
        self != Flip::None
    }
}

/// Reports whether `bbox` is flipped in x (`east < west`), in y
/// (`north < south`), in both, or not at all.
pub fn bbox_is_flipped(bbox: &Box2) -> Flip {
    match (bbox[0].is_flipped(), bbox[1].is_flipped()) {
        (true, true) => Flip::Both,
        (true, false) => Flip::X,
        (false, true) => Flip::Y,
        (false, false) => Flip::None,
    }
}

/// Decomposes a flipped box into non-flipped boxes against `bounds`.
///
/// A box that is not flipped comes back unchanged as the only element.
/// Otherwise every flipped axis is cut at the plane seam, giving two or four
/// candidates. A candidate that is still flipped after substituting the plane
/// bound lies entirely outside the plane on that axis and is dropped.
///
/// # Examples
///
/// ```
/// use geoview::bbox::{Interval, split_bbox_if_flipped};
///
/// let bbox = [Interval::new(170.0, -170.0), Interval::new(10.0, 20.0)];
/// let bounds = [Interval::new(-180.0, 180.0), Interval::new(-90.0, 90.0)];
///
/// let parts = split_bbox_if_flipped(bbox, bounds);
/// assert_eq!(parts.len(), 2);
/// assert!(parts.contains(&[Interval::new(170.0, 180.0), Interval::new(10.0, 20.0)]));
/// assert!(parts.contains(&[Interval::new(-180.0, -170.0), Interval::new(10.0, 20.0)]));
/// ```
pub fn split_bbox_if_flipped(bbox: Box2, bounds: Box2) -> SplitBoxes {
    let [Interval { min: w, max: e }, Interval { min: s, max: n }] = bbox;
    let [
        Interval {
            min: bound_w,
            max: bound_e,
        },
        Interval {
            min: bound_s,
            max: bound_n,
        },
    ] = bounds;

    let iv = Interval::new;
    let mut candidates: SplitBoxes = match bbox_is_flipped(&bbox) {
        Flip::None => return smallvec![bbox],
        Flip::X => smallvec![[iv(w, bound_e), iv(s, n)], [iv(bound_w, e), iv(s, n)]],
        Flip::Y => smallvec![[iv(w, e), iv(s, bound_n)], [iv(w, e), iv(bound_s, n)]],
        Flip::Both => smallvec![
            [iv(w, bound_e), iv(s, bound_n)],
            [iv(w, bound_e), iv(bound_s, n)],
            [iv(bound_w, e), iv(s, bound_n)],
            [iv(bound_w, e), iv(bound_s, n)],
        ],
    };

    candidates.retain(|candidate| !bbox_is_flipped(candidate).is_flipped());
    candidates
}
