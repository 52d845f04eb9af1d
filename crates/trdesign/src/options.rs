//! Session options and their merge-update rules.
//!
//! `Options` holds the full state; `OptionsUpdate` mirrors it with every
//! field optional. Merging an update only touches the fields it sets, at
//! any depth.
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumString};
use trdesign_core::GeometryChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Fixed backbone: match the geometry of a target structure.
    Fixbb,
    /// No structure: diverge from the background distribution.
    Hallucination,
    /// Keep part of a structure, hallucinate the rest.
    Partial,
}

impl Protocol {
    pub fn uses_target(&self) -> bool {
        matches!(self, Protocol::Fixbb | Protocol::Partial)
    }

    pub fn uses_background(&self) -> bool {
        matches!(self, Protocol::Hallucination | Protocol::Partial)
    }
}

/// Loss terms the session can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LossTerm {
    /// Cross-entropy against the target structure.
    Cce,
    /// Divergence from the background distribution.
    Bkg,
}

/// How many ensemble members a run uses and whether they are drawn at random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSampling {
    pub num: usize,
    pub sample: bool,
}

impl Default for ModelSampling {
    fn default() -> Self {
        Self {
            num: 1,
            sample: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSamplingUpdate {
    pub num: Option<usize>,
    pub sample: Option<bool>,
}

/// Weights of one loss term.
///
/// A channel without a weight does not contribute. `scale` multiplies every
/// channel and defaults to 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omega: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl ChannelWeights {
    /// dist 1/6, omega 1/6, theta 2/6, phi 2/6
    pub fn trdesign() -> Self {
        Self {
            dist: Some(1.0 / 6.0),
            omega: Some(1.0 / 6.0),
            theta: Some(2.0 / 6.0),
            phi: Some(2.0 / 6.0),
            scale: None,
        }
    }

    fn slot(&self, channel: GeometryChannel) -> Option<f64> {
        match channel {
            GeometryChannel::Dist => self.dist,
            GeometryChannel::Omega => self.omega,
            GeometryChannel::Theta => self.theta,
            GeometryChannel::Phi => self.phi,
        }
    }

    /// Effective weight of a channel, scale included.
    pub fn weight(&self, channel: GeometryChannel) -> f64 {
        self.scale.unwrap_or(1.0) * self.slot(channel).unwrap_or(0.0)
    }

    pub fn merge(&mut self, update: &ChannelWeights) {
        self.dist = update.dist.or(self.dist);
        self.omega = update.omega.or(self.omega);
        self.theta = update.theta.or(self.theta);
        self.phi = update.phi.or(self.phi);
        self.scale = update.scale.or(self.scale);
    }
}

/// Per-term weights. A term without weights contributes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cce: Option<ChannelWeights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bkg: Option<ChannelWeights>,
}

impl LossWeights {
    pub fn term(&self, term: LossTerm) -> Option<&ChannelWeights> {
        match term {
            LossTerm::Cce => self.cce.as_ref(),
            LossTerm::Bkg => self.bkg.as_ref(),
        }
    }

    pub fn weight(&self, term: LossTerm, channel: GeometryChannel) -> f64 {
        self.term(term).map_or(0.0, |w| w.weight(channel))
    }

    pub fn merge(&mut self, update: &WeightsUpdate) {
        for (slot, term_update) in [(&mut self.cce, &update.cce), (&mut self.bkg, &update.bkg)] {
            if let Some(term_update) = term_update {
                slot.get_or_insert_with(ChannelWeights::default)
                    .merge(term_update);
            }
        }
    }
}

/// Partial weights; channel weights are already optional so they merge as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsUpdate {
    pub cce: Option<ChannelWeights>,
    pub bkg: Option<ChannelWeights>,
}

impl WeightsUpdate {
    pub fn term(term: LossTerm, weights: ChannelWeights) -> Self {
        let mut update = Self::default();
        match term {
            LossTerm::Cce => update.cce = Some(weights),
            LossTerm::Bkg => update.bkg = Some(weights),
        }
        update
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Softmax temperature of the soft sequence.
    pub temp: f64,
    /// Blend between raw logits (0) and the soft sequence (1).
    pub soft: f64,
    /// Blend between the soft blend (0) and the one-hot sequence (1).
    pub hard: f64,
    pub model: ModelSampling,
    pub weights: LossWeights,
    /// Positions pinned to the reference sequence in partial design.
    pub pos: Option<Vec<usize>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            temp: 1.0,
            soft: 1.0,
            hard: 1.0,
            model: ModelSampling::default(),
            weights: LossWeights::default(),
            pos: None,
        }
    }
}

impl Options {
    pub fn merge(&mut self, update: &OptionsUpdate) {
        if let Some(temp) = update.temp {
            self.temp = temp;
        }
        if let Some(soft) = update.soft {
            self.soft = soft;
        }
        if let Some(hard) = update.hard {
            self.hard = hard;
        }
        if let Some(model) = &update.model {
            self.model.num = model.num.unwrap_or(self.model.num);
            self.model.sample = model.sample.unwrap_or(self.model.sample);
        }
        if let Some(weights) = &update.weights {
            self.weights.merge(weights);
        }
        if let Some(pos) = &update.pos {
            self.pos = Some(pos.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsUpdate {
    pub temp: Option<f64>,
    pub soft: Option<f64>,
    pub hard: Option<f64>,
    pub model: Option<ModelSamplingUpdate>,
    pub weights: Option<WeightsUpdate>,
    pub pos: Option<Vec<usize>>,
}

impl OptionsUpdate {
    pub fn from_json_str(update: &str) -> Result<Self> {
        Ok(serde_json::from_str(update)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let update = std::fs::read_to_string(path)?;
        Self::from_json_str(&update)
    }

    pub fn temp(mut self, temp: f64) -> Self {
        self.temp = Some(temp);
        self
    }

    pub fn soft(mut self, soft: f64) -> Self {
        self.soft = Some(soft);
        self
    }

    pub fn hard(mut self, hard: f64) -> Self {
        self.hard = Some(hard);
        self
    }

    pub fn model_num(mut self, num: usize) -> Self {
        self.model.get_or_insert_with(Default::default).num = Some(num);
        self
    }

    pub fn model_sample(mut self, sample: bool) -> Self {
        self.model.get_or_insert_with(Default::default).sample = Some(sample);
        self
    }

    pub fn weights(mut self, weights: WeightsUpdate) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn pos(mut self, pos: Vec<usize>) -> Self {
        self.pos = Some(pos);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults() {
        let opt = Options::default();
        assert_eq!(opt.temp, 1.0);
        assert_eq!(opt.model, ModelSampling { num: 1, sample: true });
        assert!(opt.weights.cce.is_none());
        assert_eq!(opt.weights.weight(LossTerm::Bkg, GeometryChannel::Phi), 0.0);
    }

    #[test]
    fn test_nested_merge_keeps_unset_fields() {
        let mut opt = Options::default();
        opt.weights.merge(&WeightsUpdate::term(LossTerm::Cce, ChannelWeights::trdesign()));
        opt.merge(
            &OptionsUpdate::default()
                .temp(0.5)
                .model_num(3)
                .weights(WeightsUpdate::term(
                    LossTerm::Cce,
                    ChannelWeights {
                        dist: Some(2.0),
                        ..Default::default()
                    },
                )),
        );
        assert_eq!(opt.temp, 0.5);
        assert_eq!(opt.soft, 1.0);
        assert_eq!(opt.model.num, 3);
        assert!(opt.model.sample);
        assert_eq!(opt.weights.weight(LossTerm::Cce, GeometryChannel::Dist), 2.0);
        let theta = opt.weights.weight(LossTerm::Cce, GeometryChannel::Theta);
        assert!((theta - 2.0 / 6.0).abs() < 1e-12);
        assert!(opt.weights.bkg.is_none());
    }

    #[test]
    fn test_term_scale() {
        let weights = ChannelWeights {
            scale: Some(3.0),
            ..ChannelWeights::trdesign()
        };
        assert!((weights.weight(GeometryChannel::Phi) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_update_from_json() {
        let update = OptionsUpdate::from_json_str(
            r#"{"hard": 0.0, "model": {"sample": false}, "weights": {"bkg": {"phi": 1.5}}, "pos": [0, 2]}"#,
        )
        .unwrap();
        let mut opt = Options::default();
        opt.merge(&update);
        assert_eq!(opt.hard, 0.0);
        assert_eq!(opt.model, ModelSampling { num: 1, sample: false });
        assert_eq!(opt.weights.weight(LossTerm::Bkg, GeometryChannel::Phi), 1.5);
        assert_eq!(opt.weights.weight(LossTerm::Bkg, GeometryChannel::Dist), 0.0);
        assert_eq!(opt.pos, Some(vec![0, 2]));
        assert!(OptionsUpdate::from_json_str(r#"{"temp": "hot"}"#).is_err());
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::from_str("partial").unwrap(), Protocol::Partial);
        assert_eq!(Protocol::Hallucination.to_string(), "hallucination");
        assert!(Protocol::Fixbb.uses_target() && !Protocol::Fixbb.uses_background());
        assert!(Protocol::Partial.uses_target() && Protocol::Partial.uses_background());
        assert!(Protocol::from_str("denovo").is_err());
    }
}
