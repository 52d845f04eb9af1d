pub mod config;
pub mod layers;
pub mod trrosetta;
