//! trdesign-core
//!
//! Structure handling for trRosetta-based design: residue constants, a
//! `pdbtbx`-backed structure source, position selectors and the 6D pairwise
//! geometry that serves as the design target.
pub mod error;
pub mod geometry;
pub mod residue;
pub mod selection;
pub mod structure;

pub use error::StructureError;
pub use geometry::{bin_geometry, BinnedGeometry, GeometryChannel, PairGeometry};
pub use residue::{restype_char, restype_index, NUM_RESTYPES, RESTYPES, UNKNOWN_RESTYPE};
pub use selection::select_positions;
pub use structure::{ProteinStructure, ResidueId};
