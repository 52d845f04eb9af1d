use super::config::TrRosettaConfig;
use crate::geometry_map::GeometryMap;
use candle_core::{Module, Result, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder};
use trdesign_core::GeometryChannel;

const ELU_ALPHA: f64 = 1.0;

/// Instance normalization over the spatial axes of an `[N, C, H, W]` map.
#[derive(Debug)]
pub struct InstanceNorm2d {
    scale: Tensor,
    offset: Tensor,
    eps: f64,
}

impl InstanceNorm2d {
    pub fn load(vb: VarBuilder, channels: usize, eps: f64) -> Result<Self> {
        let scale = vb.get_with_hints(channels, "scale", candle_nn::Init::Const(1.0))?;
        let offset = vb.get_with_hints(channels, "offset", candle_nn::Init::Const(0.0))?;
        Ok(Self { scale, offset, eps })
    }
}

impl Module for InstanceNorm2d {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (n, c, h, w) = xs.dims4()?;
        let flat = xs.reshape((n, c, h * w))?;
        let mean = flat.mean_keepdim(2)?;
        let centered = flat.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(2)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed
            .reshape((n, c, h, w))?
            .broadcast_mul(&self.scale.reshape((1, c, 1, 1))?)?
            .broadcast_add(&self.offset.reshape((1, c, 1, 1))?)
    }
}

fn conv3x3(channels: usize, dilation: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: dilation,
        dilation,
        ..Default::default()
    };
    conv2d(channels, channels, 3, cfg, vb)
}

/// conv -> norm -> elu -> conv -> norm, added back onto the input.
#[derive(Debug)]
pub struct ResidualBlock {
    conv1: Conv2d,
    norm1: InstanceNorm2d,
    conv2: Conv2d,
    norm2: InstanceNorm2d,
}

impl ResidualBlock {
    pub fn load(vb: VarBuilder, cfg: &TrRosettaConfig, index: usize) -> Result<Self> {
        let vb = vb.pp(index.to_string());
        let dilation = cfg.dilation(index);
        Ok(Self {
            conv1: conv3x3(cfg.num_filters, dilation, vb.pp("conv1"))?,
            norm1: InstanceNorm2d::load(vb.pp("norm1"), cfg.num_filters, cfg.norm_eps)?,
            conv2: conv3x3(cfg.num_filters, dilation, vb.pp("conv2"))?,
            norm2: InstanceNorm2d::load(vb.pp("norm2"), cfg.num_filters, cfg.norm_eps)?,
        })
    }
}

impl Module for ResidualBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = self.norm1.forward(&self.conv1.forward(xs)?)?.elu(ELU_ALPHA)?;
        let ys = self.norm2.forward(&self.conv2.forward(&ys)?)?;
        (xs + ys)?.elu(ELU_ALPHA)
    }
}

/// 1x1 projection of the input features followed by the dilated residual stack.
#[derive(Debug)]
pub struct Trunk {
    input_conv: Conv2d,
    input_norm: InstanceNorm2d,
    blocks: Vec<ResidualBlock>,
}

impl Trunk {
    pub fn load(vb: VarBuilder, cfg: &TrRosettaConfig, in_channels: usize) -> Result<Self> {
        let input_conv = conv2d(
            in_channels,
            cfg.num_filters,
            1,
            Default::default(),
            vb.pp("input.conv"),
        )?;
        let input_norm = InstanceNorm2d::load(vb.pp("input.norm"), cfg.num_filters, cfg.norm_eps)?;
        let blocks = (0..cfg.num_blocks)
            .map(|i| ResidualBlock::load(vb.pp("blocks"), cfg, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input_conv,
            input_norm,
            blocks,
        })
    }
}

impl Module for Trunk {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = self
            .input_norm
            .forward(&self.input_conv.forward(xs)?)?
            .elu(ELU_ALPHA)?;
        for block in self.blocks.iter() {
            xs = block.forward(&xs)?;
        }
        Ok(xs)
    }
}

/// Per-channel 1x1 output projections.
///
/// `theta` and `phi` are asymmetric and read the trunk directly; `dist` and
/// `omega` read the symmetrized trunk.
#[derive(Debug)]
pub struct GeometryHeads {
    dist: Conv2d,
    omega: Conv2d,
    theta: Conv2d,
    phi: Conv2d,
}

impl GeometryHeads {
    pub fn load(vb: VarBuilder, cfg: &TrRosettaConfig) -> Result<Self> {
        let head = |channel: GeometryChannel| {
            conv2d(
                cfg.num_filters,
                channel.num_bins(),
                1,
                Default::default(),
                vb.pp(channel.to_string()),
            )
        };
        Ok(Self {
            dist: head(GeometryChannel::Dist)?,
            omega: head(GeometryChannel::Omega)?,
            theta: head(GeometryChannel::Theta)?,
            phi: head(GeometryChannel::Phi)?,
        })
    }

    /// `[1, C, L, L]` trunk features to `[L, L, bins]` logits per channel.
    pub fn forward(&self, xs: &Tensor) -> Result<GeometryMap> {
        let to_pairs = |t: Tensor| t.squeeze(0)?.permute((1, 2, 0))?.contiguous();
        let theta = to_pairs(self.theta.forward(xs)?)?;
        let phi = to_pairs(self.phi.forward(xs)?)?;
        let sym = ((xs + xs.transpose(2, 3)?)? * 0.5)?;
        let dist = to_pairs(self.dist.forward(&sym)?)?;
        let omega = to_pairs(self.omega.forward(&sym)?)?;
        Ok(GeometryMap {
            dist,
            omega,
            theta,
            phi,
        })
    }
}
