//! State management for spatial secondary indexes over a document database.
//!
//! Design documents declare spatial indexes; this crate compiles them into
//! signed index groups, persists and restores group headers, hands out pinned
//! views under the `stale` policies, validates query arguments, splits
//! bounding boxes that wrap around the plane, and shapes result rows.
//!
//! ```rust
//! use geoview::{Interval, QueryArgs, query_boxes, validate_args};
//!
//! // A box crossing the antimeridian on a longitude/latitude plane
//! let args = QueryArgs::default()
//!     .with_bbox(vec![Interval::new(170.0, -170.0), Interval::new(-10.0, 10.0)])
//!     .with_bounds(vec![Interval::new(-180.0, 180.0), Interval::new(-90.0, 90.0)]);
//!
//! let args = validate_args(args)?;
//! let boxes = query_boxes(&args).unwrap();
//! assert_eq!(boxes.len(), 2);
//! # Ok::<(), geoview::SpatialError>(())
//! ```

pub mod accessor;
pub mod bbox;
pub mod builder;
pub mod config;
pub mod design;
pub mod error;
pub mod header;
pub mod query;
pub mod rows;
pub mod server;
pub mod state;
pub mod storage;

pub use accessor::{PinnedView, query_signature};
pub use bbox::{Box2, Flip, Interval, SplitBoxes, bbox_is_flipped, split_bbox_if_flipped};
pub use builder::IndexServerBuilder;
pub use config::{Config, TreeDefaults};
pub use design::{
    DesignDocument, GroupDefinition, IndexDescriptor, Signature, SpatialKeySource, compile,
};
pub use error::{Result, SpatialError};
pub use header::{PersistedHeader, ViewState, checkpoint, dehydrate, materialize, reset};
pub use query::{DEFAULT_LIMIT, QueryArgs, Stale, query_boxes, validate_args};
#[cfg(feature = "geojson")]
pub use rows::GeoJsonEncoder;
pub use rows::{GeometryEncoder, Row, StoredRow, StoredValue, expand_dups, row_to_json};
pub use server::{Database, GroupInfo, IndexServer, Updater};
pub use state::{IdLookup, IndexGroupState, KeyCollation, SpatialTree, TreeConfig, ViewRuntime};
pub use storage::IndexFile;

pub use geo::Geometry;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{IndexServer, IndexServerBuilder, Result, SpatialError};

    pub use crate::{Database, Updater};

    pub use crate::{DesignDocument, PinnedView, QueryArgs, Stale};

    pub use crate::{Interval, expand_dups, row_to_json};

    #[cfg(feature = "geojson")]
    pub use crate::GeoJsonEncoder;

    pub use geo::Geometry;
}
