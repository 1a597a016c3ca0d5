//! Data produced by importers: vector features and raster sources.

mod feature;
mod raster;

pub use feature::{
    AttributeDef, AttributeKind, Feature, FeatureCollection, FeatureSchema, Geometry,
    GeometryKind, Position,
};
pub use raster::{find_world_file, RasterFormat, RasterSource};
