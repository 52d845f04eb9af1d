//! Interfaces between the design engine and the networks it drives.
use crate::geometry_map::GeometryMap;
use candle_core::{Device, Result, Tensor};

/// A differentiable map from an `[L, 20]` sequence matrix to pairwise
/// geometry logits, `[L, L, bins]` per channel.
pub trait StructurePredictor {
    fn predict(&self, seq: &Tensor) -> Result<GeometryMap>;
}

/// A sequence-free network producing geometry probabilities for a length.
///
/// The same `seed` must produce the same input noise.
pub trait BackgroundPredictor {
    fn predict_background(&self, length: usize, seed: u64, device: &Device) -> Result<GeometryMap>;
}

impl<P: StructurePredictor + ?Sized> StructurePredictor for Box<P> {
    fn predict(&self, seq: &Tensor) -> Result<GeometryMap> {
        (**self).predict(seq)
    }
}

impl<P: BackgroundPredictor + ?Sized> BackgroundPredictor for Box<P> {
    fn predict_background(&self, length: usize, seed: u64, device: &Device) -> Result<GeometryMap> {
        (**self).predict_background(length, seed, device)
    }
}
