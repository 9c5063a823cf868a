pub mod bin;
pub mod bin_set;
pub mod binning;
pub mod collection;
pub mod color;
pub mod discretizer;
pub mod flat_index;
pub mod range_reducer;
pub mod shared;
pub mod utils;
pub mod vertex_generator;
pub mod viewport;
