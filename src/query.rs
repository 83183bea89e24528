//! Query arguments for spatial views and their validation.

use crate::bbox::{Box2, Interval, bbox_is_flipped, split_bbox_if_flipped};
use crate::error::{Result, SpatialError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::str::FromStr;

/// Row limit used when the caller does not ask for one.
pub const DEFAULT_LIMIT: u64 = 0x1000_0000;

pub(crate) const ERR_BBOX_AND_RANGE: &str = "bounding box and range both specified";
pub(crate) const ERR_BBOX_DIMENSIONS: &str = "`bbox` must have 2 dimensions";
pub(crate) const ERR_FLIPPED_WITHOUT_BOUNDS: &str = "flipped bbox requires `plane_bounds`";
pub(crate) const ERR_BOUNDS_DIMENSIONS: &str = "`plane_bounds` must have 2 dimensions";
pub(crate) const ERR_LIMIT: &str = "`limit` must be a positive integer";
pub(crate) const ERR_SKIP: &str = "`skip` must be >= 0";

/// How fresh the index must be before a read is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stale {
    /// Wait until the index has caught up with the database.
    #[default]
    Exact,
    /// Answer from whatever is indexed right now.
    Ok,
    /// Answer immediately, then refresh the index in the background.
    UpdateAfter,
}

impl Stale {
    pub fn as_str(self) -> &'static str {
        match self {
            Stale::Exact => "false",
            Stale::Ok => "ok",
            Stale::UpdateAfter => "update_after",
        }
    }
}

impl fmt::Display for Stale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stale {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "false" | "exact" => Ok(Stale::Exact),
            "ok" => Ok(Stale::Ok),
            "update_after" => Ok(Stale::UpdateAfter),
            other => Err(SpatialError::QueryParse(format!(
                "invalid value for `stale`: {}",
                other
            ))),
        }
    }
}

impl Serialize for Stale {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stale {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(false) => Ok(Stale::Exact),
            Repr::Flag(true) => Err(serde::de::Error::custom(
                "`stale` accepts false, \"ok\" or \"update_after\"",
            )),
            Repr::Name(name) => name.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Arguments of a spatial view query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryArgs {
    /// Two dimensional search box. Folded into `range` by [`validate_args`].
    pub bbox: Option<Vec<Interval>>,
    /// Extent of the plane a flipped `bbox` wraps around.
    #[serde(rename = "plane_bounds")]
    pub bounds: Option<Vec<Interval>>,
    /// N dimensional search box.
    pub range: Option<Vec<Interval>>,
    pub limit: u64,
    pub skip: i64,
    pub stale: Stale,
    /// Extension data. Passed through untouched and never part of a query signature.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            bbox: None,
            bounds: None,
            range: None,
            limit: DEFAULT_LIMIT,
            skip: 0,
            stale: Stale::Exact,
            extra: serde_json::Map::new(),
        }
    }
}

impl QueryArgs {
    pub fn with_bbox(mut self, bbox: Vec<Interval>) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_bounds(mut self, bounds: Vec<Interval>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_range(mut self, range: Vec<Interval>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: i64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_stale(mut self, stale: Stale) -> Self {
        self.stale = stale;
        self
    }
}

/// Views a slice of intervals as a [`Box2`] if it has exactly two.
pub fn as_box2(intervals: &[Interval]) -> Option<Box2> {
    <Box2>::try_from(intervals).ok()
}

/// Validates query arguments and folds `bbox` into `range`.
///
/// Rules are checked in order and the first failure is returned as a
/// [`SpatialError::QueryParse`].
pub fn validate_args(args: QueryArgs) -> Result<QueryArgs> {
    if args.bbox.is_some() && args.range.is_some() {
        return Err(SpatialError::query_parse(ERR_BBOX_AND_RANGE));
    }

    if let Some(bbox) = &args.bbox {
        let bbox = as_box2(bbox).ok_or_else(|| SpatialError::query_parse(ERR_BBOX_DIMENSIONS))?;
        if args.bounds.is_none() && bbox_is_flipped(&bbox).is_flipped() {
            return Err(SpatialError::query_parse(ERR_FLIPPED_WITHOUT_BOUNDS));
        }
    }

    if let Some(bounds) = &args.bounds
        && bounds.len() != 2
    {
        return Err(SpatialError::query_parse(ERR_BOUNDS_DIMENSIONS));
    }

    if args.limit == 0 {
        return Err(SpatialError::query_parse(ERR_LIMIT));
    }

    if args.skip < 0 {
        return Err(SpatialError::query_parse(ERR_SKIP));
    }

    let mut args = args;
    if let Some(bbox) = args.bbox.take() {
        args.range = Some(bbox);
    }
    Ok(args)
}

/// Concrete search boxes for validated arguments.
///
/// `None` means the query is unbounded. With `plane_bounds` set, the first
/// two dimensions of `range` are split around the plane seam and any further
/// dimensions are carried over to every piece.
pub fn query_boxes(args: &QueryArgs) -> Option<SmallVec<[Vec<Interval>; 4]>> {
    let range = args.range.as_ref()?;

    let split = match (args.bounds.as_deref().and_then(as_box2), range.get(..2)) {
        (Some(bounds), Some(head)) => as_box2(head).map(|head| (bounds, head)),
        _ => None,
    };
    let Some((bounds, head)) = split else {
        return Some(smallvec![range.clone()]);
    };

    Some(
        split_bbox_if_flipped(head, bounds)
            .into_iter()
            .map(|piece| {
                let mut boxed = piece.to_vec();
                boxed.extend_from_slice(&range[2..]);
                boxed
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(min: f64, max: f64) -> Interval {
        Interval::new(min, max)
    }

    fn parse_error(args: QueryArgs) -> String {
        match validate_args(args) {
            Err(SpatialError::QueryParse(msg)) => msg,
            other => panic!("expected a query parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bbox_and_range() {
        let args = QueryArgs::default()
            .with_bbox(vec![iv(0.0, 1.0), iv(0.0, 1.0)])
            .with_range(vec![iv(0.0, 1.0)]);
        assert_eq!(parse_error(args), ERR_BBOX_AND_RANGE);
    }

    #[test]
    fn test_rejects_bbox_with_wrong_dimensions() {
        let args = QueryArgs::default().with_bbox(vec![iv(0.0, 1.0), iv(0.0, 1.0), iv(0.0, 1.0)]);
        assert_eq!(parse_error(args), ERR_BBOX_DIMENSIONS);

        let args = QueryArgs::default().with_bbox(vec![iv(0.0, 1.0)]);
        assert_eq!(parse_error(args), ERR_BBOX_DIMENSIONS);
    }

    #[test]
    fn test_rejects_flipped_bbox_without_bounds() {
        let args = QueryArgs::default().with_bbox(vec![iv(170.0, -170.0), iv(0.0, 1.0)]);
        assert_eq!(parse_error(args), ERR_FLIPPED_WITHOUT_BOUNDS);

        let args = QueryArgs::default().with_bbox(vec![iv(0.0, 1.0), iv(10.0, -10.0)]);
        assert_eq!(parse_error(args), ERR_FLIPPED_WITHOUT_BOUNDS);
    }

    #[test]
    fn test_rejects_bounds_with_wrong_dimensions() {
        let args = QueryArgs::default()
            .with_bbox(vec![iv(170.0, -170.0), iv(0.0, 1.0)])
            .with_bounds(vec![iv(-180.0, 180.0)]);
        assert_eq!(parse_error(args), ERR_BOUNDS_DIMENSIONS);
    }

    #[test]
    fn test_rejects_zero_limit() {
        let args = QueryArgs::default().with_limit(0);
        assert_eq!(parse_error(args), ERR_LIMIT);
    }

    #[test]
    fn test_rejects_negative_skip() {
        let args = QueryArgs::default().with_skip(-1);
        assert_eq!(parse_error(args), ERR_SKIP);
    }

    #[test]
    fn test_first_failure_wins() {
        let args = QueryArgs::default()
            .with_bbox(vec![iv(0.0, 1.0)])
            .with_range(vec![iv(0.0, 1.0)])
            .with_limit(0)
            .with_skip(-5);
        assert_eq!(parse_error(args), ERR_BBOX_AND_RANGE);
    }

    #[test]
    fn test_bbox_is_moved_into_range() {
        let bbox = vec![iv(-10.0, 10.0), iv(-5.0, 5.0)];
        let args = QueryArgs::default()
            .with_bbox(bbox.clone())
            .with_limit(10)
            .with_skip(3)
            .with_stale(Stale::Ok);

        let validated = validate_args(args).unwrap();
        assert!(validated.bbox.is_none());
        assert_eq!(validated.range, Some(bbox));
        assert_eq!(validated.limit, 10);
        assert_eq!(validated.skip, 3);
        assert_eq!(validated.stale, Stale::Ok);
    }

    #[test]
    fn test_flipped_bbox_with_bounds_is_accepted() {
        let args = QueryArgs::default()
            .with_bbox(vec![iv(170.0, -170.0), iv(0.0, 1.0)])
            .with_bounds(vec![iv(-180.0, 180.0), iv(-90.0, 90.0)]);
        let validated = validate_args(args).unwrap();
        assert_eq!(validated.range.unwrap()[0], iv(170.0, -170.0));
    }

    #[test]
    fn test_range_and_defaults_pass_through() {
        let mut args = QueryArgs::default().with_range(vec![iv(0.0, 1.0); 3]);
        args.extra
            .insert("include_docs".to_string(), serde_json::json!(true));

        let validated = validate_args(args.clone()).unwrap();
        assert_eq!(validated, args);

        assert_eq!(validate_args(QueryArgs::default()).unwrap(), QueryArgs::default());
    }

    #[test]
    fn test_stale_parsing() {
        assert_eq!("false".parse::<Stale>().unwrap(), Stale::Exact);
        assert_eq!("ok".parse::<Stale>().unwrap(), Stale::Ok);
        assert_eq!("update_after".parse::<Stale>().unwrap(), Stale::UpdateAfter);
        assert!("sometimes".parse::<Stale>().is_err());

        let stale: Stale = serde_json::from_str("false").unwrap();
        assert_eq!(stale, Stale::Exact);
        let stale: Stale = serde_json::from_str("\"update_after\"").unwrap();
        assert_eq!(stale, Stale::UpdateAfter);
        assert!(serde_json::from_str::<Stale>("true").is_err());
    }

    #[test]
    fn test_args_from_json() {
        let args: QueryArgs = serde_json::from_str(
            r#"{"bbox": [[170, -170], [10, 20]],
                "plane_bounds": [[-180, 180], [-90, 90]],
                "stale": "ok",
                "limit": 5,
                "callback": "cb"}"#,
        )
        .unwrap();

        assert_eq!(args.bbox, Some(vec![iv(170.0, -170.0), iv(10.0, 20.0)]));
        assert_eq!(args.bounds, Some(vec![iv(-180.0, 180.0), iv(-90.0, 90.0)]));
        assert_eq!(args.stale, Stale::Ok);
        assert_eq!(args.limit, 5);
        assert_eq!(args.skip, 0);
        assert_eq!(args.extra.get("callback"), Some(&serde_json::json!("cb")));
    }

    #[test]
    fn test_query_boxes() {
        assert!(query_boxes(&QueryArgs::default()).is_none());

        let range = vec![iv(0.0, 1.0), iv(2.0, 3.0), iv(4.0, 5.0)];
        let args = QueryArgs::default().with_range(range.clone());
        assert_eq!(query_boxes(&args).unwrap().as_slice(), &[range]);

        let args = QueryArgs::default()
            .with_range(vec![iv(170.0, -170.0), iv(10.0, 20.0), iv(0.0, 100.0)])
            .with_bounds(vec![iv(-180.0, 180.0), iv(-90.0, 90.0)]);
        let boxes = query_boxes(&args).unwrap();
        assert_eq!(boxes.len(), 2);
        assert!(boxes.contains(&vec![iv(170.0, 180.0), iv(10.0, 20.0), iv(0.0, 100.0)]));
        assert!(boxes.contains(&vec![iv(-180.0, -170.0), iv(10.0, 20.0), iv(0.0, 100.0)]));
    }
}
