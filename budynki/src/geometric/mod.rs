pub mod bdot_buildings;
pub mod normalize;
pub mod osm_buildings;
