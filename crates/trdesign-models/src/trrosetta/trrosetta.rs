//! trRosetta geometry predictor.
//!
//! - [paper](https://www.pnas.org/doi/10.1073/pnas.1914677117)
//! - [trDesign](https://www.pnas.org/doi/10.1073/pnas.2017228118)
//!
//! A deep 2D residual network mapping pairwise sequence features to
//! distributions over CB distance and the three inter-residue orientations.
//! The design variant reads a single (relaxed) sequence: the MSA profile is
//! the sequence itself and the coupling features are the outer product of the
//! sequence with itself.
use super::config::TrRosettaConfig;
use super::layers::{GeometryHeads, Trunk};
use crate::geometry_map::GeometryMap;
use crate::predictor::{BackgroundPredictor, StructurePredictor};
use candle_core::{Device, Module, Result, Tensor};
use candle_nn::VarBuilder;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use trdesign_core::NUM_RESTYPES;

/// Amino acids plus the alignment gap.
pub const SEQ_CHANNELS: usize = NUM_RESTYPES + 1;

/// 1D features (sequence and profile) for both residues of a pair, the
/// coupling outer product and its APC correction channel.
pub const PAIR_FEATURE_CHANNELS: usize = 4 * SEQ_CHANNELS + SEQ_CHANNELS * SEQ_CHANNELS + 1;

/// `[L, 20]` sequence matrix to `[1, PAIR_FEATURE_CHANNELS, L, L]` pair features.
pub fn pair_features(seq: &Tensor) -> Result<Tensor> {
    let (length, naa) = seq.dims2()?;
    if naa != NUM_RESTYPES {
        candle_core::bail!("expected a [L, {NUM_RESTYPES}] sequence matrix, got [{length}, {naa}]");
    }
    let seq21 = seq.pad_with_zeros(1, 0, 1)?;
    let f1d = Tensor::cat(&[&seq21, &seq21], 1)?;
    let width = f1d.dim(1)?;
    let left = f1d.unsqueeze(1)?.broadcast_as((length, length, width))?;
    let right = f1d.unsqueeze(0)?.broadcast_as((length, length, width))?;

    let coupling = seq21
        .unsqueeze(1)?
        .unsqueeze(3)?
        .broadcast_mul(&seq21.unsqueeze(0)?.unsqueeze(2)?)?
        .reshape((length, length, SEQ_CHANNELS * SEQ_CHANNELS))?;
    let apc = Tensor::zeros((length, length, 1), seq.dtype(), seq.device())?;

    Tensor::cat(
        &[
            &left.contiguous()?,
            &right.contiguous()?,
            &coupling,
            &apc,
        ],
        2,
    )?
    .permute((2, 0, 1))?
    .unsqueeze(0)?
    .contiguous()
}

/// The sequence-conditioned network; returns unnormalized logits.
#[derive(Debug)]
pub struct TrRosetta {
    trunk: Trunk,
    heads: GeometryHeads,
    device: Device,
}

impl TrRosetta {
    pub fn load(vb: VarBuilder, cfg: &TrRosettaConfig) -> Result<Self> {
        let device = vb.device().clone();
        let trunk = Trunk::load(vb.clone(), cfg, PAIR_FEATURE_CHANNELS)?;
        let heads = GeometryHeads::load(vb.pp("heads"), cfg)?;
        Ok(Self {
            trunk,
            heads,
            device,
        })
    }

    pub fn get_device(&self) -> &Device {
        &self.device
    }

    pub fn forward(&self, seq: &Tensor) -> Result<GeometryMap> {
        let features = pair_features(seq)?;
        let xs = self.trunk.forward(&features)?;
        self.heads.forward(&xs)
    }
}

impl StructurePredictor for TrRosetta {
    fn predict(&self, seq: &Tensor) -> Result<GeometryMap> {
        self.forward(seq)
    }
}

/// The sequence-free network used to estimate background distributions;
/// returns probabilities.
#[derive(Debug)]
pub struct TrRosettaBackground {
    trunk: Trunk,
    heads: GeometryHeads,
    channels: usize,
}

impl TrRosettaBackground {
    pub fn load(vb: VarBuilder, cfg: &TrRosettaConfig) -> Result<Self> {
        let trunk = Trunk::load(vb.clone(), cfg, cfg.background_channels)?;
        let heads = GeometryHeads::load(vb.pp("heads"), cfg)?;
        Ok(Self {
            trunk,
            heads,
            channels: cfg.background_channels,
        })
    }

    /// Standard-normal input `[1, channels, L, L]` drawn from `seed`.
    pub fn noise(&self, length: usize, seed: u64, device: &Device) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Vec<f32> = (0..self.channels * length * length)
            .map(|_| StandardNormal.sample(&mut rng))
            .collect();
        Tensor::from_vec(values, (1, self.channels, length, length), device)
    }

    pub fn forward(&self, noise: &Tensor) -> Result<GeometryMap> {
        let xs = self.trunk.forward(noise)?;
        self.heads.forward(&xs)?.softmax()
    }
}

impl BackgroundPredictor for TrRosettaBackground {
    fn predict_background(&self, length: usize, seed: u64, device: &Device) -> Result<GeometryMap> {
        debug!("background prediction for L={length} seed={seed}");
        let noise = self.noise(length, seed, device)?;
        self.forward(&noise)
    }
}
