//! Target-matching and background-divergence losses.
use crate::error::{DesignError, Result};
use crate::options::{LossTerm, LossWeights};
use candle_core::{Tensor, D};
use trdesign_core::GeometryChannel;
use trdesign_models::GeometryMap;

/// Scalar loss tensors of one term, one per channel.
#[derive(Debug, Clone)]
pub struct ChannelLosses {
    pub dist: Tensor,
    pub omega: Tensor,
    pub theta: Tensor,
    pub phi: Tensor,
}

impl ChannelLosses {
    fn try_from_fn<F>(mut f: F) -> Result<Self>
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

    pub fn get(&self, channel: GeometryChannel) -> &Tensor {
        match channel {
            GeometryChannel::Dist => &self.dist,
            GeometryChannel::Omega => &self.omega,
            GeometryChannel::Theta => &self.theta,
            GeometryChannel::Phi => &self.phi,
        }
    }

    pub fn values(&self) -> Result<ChannelValues> {
        let value = |t: &Tensor| -> Result<f64> {
            Ok(t.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?)
        };
        Ok(ChannelValues {
            dist: value(&self.dist)?,
            omega: value(&self.omega)?,
            theta: value(&self.theta)?,
            phi: value(&self.phi)?,
        })
    }
}

/// Host-side loss values of one term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValues {
    pub dist: f64,
    pub omega: f64,
    pub theta: f64,
    pub phi: f64,
}

impl ChannelValues {
    pub fn get(&self, channel: GeometryChannel) -> f64 {
        match channel {
            GeometryChannel::Dist => self.dist,
            GeometryChannel::Omega => self.omega,
            GeometryChannel::Theta => self.theta,
            GeometryChannel::Phi => self.phi,
        }
    }

    pub fn mean(values: &[ChannelValues]) -> Option<ChannelValues> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let avg = |channel| values.iter().map(|v| v.get(channel)).sum::<f64>() / n;
        Some(ChannelValues {
            dist: avg(GeometryChannel::Dist),
            omega: avg(GeometryChannel::Omega),
            theta: avg(GeometryChannel::Theta),
            phi: avg(GeometryChannel::Phi),
        })
    }
}

/// Per-term losses of one evaluation; absent terms were not computed.
#[derive(Debug, Clone, Default)]
pub struct TermLosses {
    pub cce: Option<ChannelLosses>,
    pub bkg: Option<ChannelLosses>,
}

impl TermLosses {
    pub fn term(&self, term: LossTerm) -> Option<&ChannelLosses> {
        match term {
            LossTerm::Cce => self.cce.as_ref(),
            LossTerm::Bkg => self.bkg.as_ref(),
        }
    }

    pub fn values(&self) -> Result<LossValues> {
        Ok(LossValues {
            cce: self.cce.as_ref().map(ChannelLosses::values).transpose()?,
            bkg: self.bkg.as_ref().map(ChannelLosses::values).transpose()?,
        })
    }
}

/// Host-side per-term per-channel losses, as reported in the auxiliary record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    pub cce: Option<ChannelValues>,
    pub bkg: Option<ChannelValues>,
}

impl LossValues {
    pub fn term(&self, term: LossTerm) -> Option<&ChannelValues> {
        match term {
            LossTerm::Cce => self.cce.as_ref(),
            LossTerm::Bkg => self.bkg.as_ref(),
        }
    }

    /// Sum of the channel losses of `term` under `weights`.
    pub fn weighted(&self, term: LossTerm, weights: &LossWeights) -> Option<f64> {
        self.term(term).map(|values| {
            GeometryChannel::ALL
                .iter()
                .map(|&c| values.get(c) * weights.weight(term, c))
                .sum()
        })
    }

    pub fn mean(values: &[LossValues]) -> LossValues {
        let collect = |term| {
            let terms: Vec<ChannelValues> =
                values.iter().filter_map(|v| v.term(term).copied()).collect();
            ChannelValues::mean(&terms)
        };
        LossValues {
            cce: collect(LossTerm::Cce),
            bkg: collect(LossTerm::Bkg),
        }
    }
}

fn check_shape(what: &str, expected: &Tensor, found: &Tensor) -> Result<()> {
    if expected.dims() != found.dims() {
        return Err(DesignError::Shape {
            what: what.to_string(),
            expected: format!("{:?}", expected.dims()),
            found: format!("{:?}", found.dims()),
        });
    }
    Ok(())
}

/// `-sum(target * log_softmax(predicted))` averaged over pairs. With `pos`
/// the prediction is first restricted to the `pos x pos` sub-matrix.
pub fn cce_loss(
    predicted: &GeometryMap,
    target: &GeometryMap,
    pos: Option<&[usize]>,
) -> Result<ChannelLosses> {
    let log_p = predicted.log_softmax()?;
    let index = pos
        .map(|pos| {
            let pos: Vec<u32> = pos.iter().map(|&p| p as u32).collect();
            Tensor::new(pos.as_slice(), predicted.device())
        })
        .transpose()?;
    ChannelLosses::try_from_fn(|channel| {
        let log_p = match &index {
            Some(index) => log_p.get(channel).index_select(index, 0)?.index_select(index, 1)?,
            None => log_p.get(channel).clone(),
        };
        let q = target.get(channel);
        check_shape(&format!("cce {channel} target"), &log_p, q)?;
        Ok((q * log_p)?.sum(D::Minus1)?.mean_all()?.neg()?)
    })
}

/// `-sum(p * (log p - log_softmax(background)))` averaged over pairs, where
/// `p = softmax(predicted)`.
pub fn bkg_loss(predicted: &GeometryMap, background: &GeometryMap) -> Result<ChannelLosses> {
    let p = predicted.softmax()?;
    let log_p = predicted.log_softmax()?;
    let log_q = background.detach().log_softmax()?;
    ChannelLosses::try_from_fn(|channel| {
        let log_q = log_q.get(channel);
        check_shape(&format!("bkg {channel} background"), log_p.get(channel), log_q)?;
        let divergence = (log_p.get(channel) - log_q)?;
        Ok((p.get(channel) * divergence)?.sum(D::Minus1)?.mean_all()?.neg()?)
    })
}

/// What the composer compares predictions against.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossTargets<'a> {
    /// One-hot target bins; enables the `cce` term.
    pub target: Option<&'a GeometryMap>,
    /// Rows and columns of the prediction matched against `target`.
    pub pos: Option<&'a [usize]>,
    /// Background probabilities; enables the `bkg` term.
    pub background: Option<&'a GeometryMap>,
}

/// Weighted sum of every active term, plus the unweighted breakdown.
pub fn compose(
    predicted: &GeometryMap,
    targets: &LossTargets,
    weights: &LossWeights,
) -> Result<(Tensor, TermLosses)> {
    let losses = TermLosses {
        cce: targets
            .target
            .map(|target| cce_loss(predicted, target, targets.pos))
            .transpose()?,
        bkg: targets
            .background
            .map(|background| bkg_loss(predicted, background))
            .transpose()?,
    };

    let mut total = Tensor::zeros((), predicted.dist.dtype(), predicted.device())?;
    for term in [LossTerm::Bkg, LossTerm::Cce] {
        let Some(channel_losses) = losses.term(term) else {
            continue;
        };
        for channel in GeometryChannel::ALL {
            let weight = weights.weight(term, channel);
            if weight != 0.0 {
                total = (total + channel_losses.get(channel).affine(weight, 0.0)?)?;
            }
        }
    }
    Ok((total, losses))
}
