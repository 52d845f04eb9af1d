//! Per-channel pairwise tensors.
//!
//! The same record carries predicted logits, target one-hot bins and
//! background probabilities; each channel is `[L, L, bins]`.
use candle_core::{Device, Result, Tensor, D};
use trdesign_core::{BinnedGeometry, GeometryChannel};

#[derive(Debug, Clone)]
pub struct GeometryMap {
    pub dist: Tensor,
    pub omega: Tensor,
    pub theta: Tensor,
    pub phi: Tensor,
}

impl GeometryMap {
    pub fn get(&self, channel: GeometryChannel) -> &Tensor {
        match channel {
            GeometryChannel::Dist => &self.dist,
            GeometryChannel::Omega => &self.omega,
            GeometryChannel::Theta => &self.theta,
            GeometryChannel::Phi => &self.phi,
        }
    }

    /// Build a map channel by channel.
    pub fn try_from_fn<F>(mut f: F) -> Result<Self>
    where
        F: FnMut(GeometryChannel) -> Result<Tensor>,
    {
        Ok(Self {
            dist: f(GeometryChannel::Dist)?,
            omega: f(GeometryChannel::Omega)?,
            theta: f(GeometryChannel::Theta)?,
            phi: f(GeometryChannel::Phi)?,
        })
    }

    pub fn try_map<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(GeometryChannel, &Tensor) -> Result<Tensor>,
    {
        Self::try_from_fn(|channel| f(channel, self.get(channel)))
    }

    /// Element-wise mean over several maps of identical shape.
    pub fn mean(maps: &[GeometryMap]) -> Result<Self> {
        match maps {
            [] => candle_core::bail!("cannot average an empty set of geometry maps"),
            [single] => Ok(single.clone()),
            _ => Self::try_from_fn(|channel| {
                let stacked: Vec<&Tensor> = maps.iter().map(|m| m.get(channel)).collect();
                Tensor::stack(&stacked, 0)?.mean(0)
            }),
        }
    }

    /// One-hot target bins as f32 tensors.
    pub fn from_binned(binned: &BinnedGeometry, device: &Device) -> Result<Self> {
        Self::try_from_fn(|channel| {
            let array = binned.channel(channel);
            let (l0, l1, k) = array.dim();
            let values: Vec<f32> = array.iter().copied().collect();
            Tensor::from_vec(values, (l0, l1, k), device)
        })
    }

    /// Sequence length `L`.
    pub fn length(&self) -> Result<usize> {
        self.dist.dim(0)
    }

    pub fn device(&self) -> &Device {
        self.dist.device()
    }

    pub fn detach(&self) -> Self {
        Self {
            dist: self.dist.detach(),
            omega: self.omega.detach(),
            theta: self.theta.detach(),
            phi: self.phi.detach(),
        }
    }

    pub fn softmax(&self) -> Result<Self> {
        self.try_map(|_, t| candle_nn::ops::softmax(t, D::Minus1))
    }

    pub fn log_softmax(&self) -> Result<Self> {
        self.try_map(|_, t| candle_nn::ops::log_softmax(t, D::Minus1))
    }
}
