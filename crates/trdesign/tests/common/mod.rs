#![allow(dead_code)]
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use trdesign::{DesignSession, Ensemble, Protocol};
use trdesign_core::ProteinStructure;
use trdesign_models::{
    BackgroundPredictor, GeometryMap, StructurePredictor, TrRosetta, TrRosettaBackground,
    TrRosettaConfig,
};
use trdesign_test_data::TestFile;

/// Logits linear in the pairwise sequence overlap, `scale * <s_i, s_j> * k / K`
/// for bin `k`.
#[derive(Debug, Clone, Copy)]
pub struct OverlapPredictor {
    pub scale: f64,
}

impl StructurePredictor for OverlapPredictor {
    fn predict(&self, seq: &Tensor) -> Result<GeometryMap> {
        let overlap = seq.matmul(&seq.t()?.contiguous()?)?.unsqueeze(2)?;
        GeometryMap::try_from_fn(|c| {
            let k = c.num_bins();
            let ramp = Tensor::arange(0f32, k as f32, seq.device())?
                .affine(self.scale / k as f64, 0.0)?
                .reshape((1, 1, k))?;
            overlap.broadcast_mul(&ramp)
        })
    }
}

/// Softmax of a fixed ramp, identical for every pair.
#[derive(Debug, Clone, Copy)]
pub struct RampBackground {
    pub slope: f64,
}

impl BackgroundPredictor for RampBackground {
    fn predict_background(
        &self,
        length: usize,
        _seed: u64,
        device: &Device,
    ) -> Result<GeometryMap> {
        GeometryMap::try_from_fn(|c| {
            let k = c.num_bins();
            let ramp = Tensor::arange(0f32, k as f32, device)?
                .affine(self.slope, 0.0)?
                .reshape((1, 1, k))?
                .broadcast_as((length, length, k))?
                .contiguous()?;
            candle_nn::ops::softmax(&ramp, D::Minus1)
        })
    }
}

pub type ToySession = DesignSession<OverlapPredictor, RampBackground>;

pub fn toy_members() -> Vec<OverlapPredictor> {
    [0.5, 1.0, 1.5, 2.0, 2.5]
        .iter()
        .map(|&scale| OverlapPredictor { scale })
        .collect()
}

pub fn toy_session(protocol: Protocol, members: Vec<OverlapPredictor>) -> ToySession {
    let background = [0.1, 0.2, 0.3, 0.4, 0.5]
        .iter()
        .map(|&slope| RampBackground { slope })
        .collect();
    DesignSession::new(
        protocol,
        Ensemble::new(members).unwrap(),
        Some(Ensemble::new(background).unwrap()),
        &Device::Cpu,
    )
    .unwrap()
}

pub fn tiny_trrosetta(protocol: Protocol) -> DesignSession<TrRosetta, TrRosettaBackground> {
    let device = Device::Cpu;
    let cfg = TrRosettaConfig::tiny();
    let members = (0..5)
        .map(|_| {
            let varmap = VarMap::new();
            TrRosetta::load(VarBuilder::from_varmap(&varmap, DType::F32, &device), &cfg)
        })
        .collect::<Result<Vec<_>>>()
        .unwrap();
    let background = (0..5)
        .map(|_| {
            let varmap = VarMap::new();
            TrRosettaBackground::load(VarBuilder::from_varmap(&varmap, DType::F32, &device), &cfg)
        })
        .collect::<Result<Vec<_>>>()
        .unwrap();
    DesignSession::new(
        protocol,
        Ensemble::new(members).unwrap(),
        Some(Ensemble::new(background).unwrap()),
        &device,
    )
    .unwrap()
}

pub fn helix(chains: Option<&str>) -> ProteinStructure {
    let (pdb_file, _temp) = TestFile::helix_01().create_temp().unwrap();
    ProteinStructure::from_pdb_file(&pdb_file, chains).unwrap()
}

pub fn random_logits(length: usize) -> Tensor {
    Tensor::randn(0f32, 1f32, (length, 20), &Device::Cpu).unwrap()
}

pub fn to_vec2(t: &Tensor) -> Vec<Vec<f32>> {
    t.to_vec2().unwrap()
}

pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .and_then(|d| d.abs())
        .and_then(|d| d.flatten_all())
        .and_then(|d| d.max(0))
        .and_then(|d| d.to_scalar::<f32>())
        .unwrap()
}
