//! The design session.
//!
//! A session owns the sequence logits being optimized, the options, the
//! random key that samples ensemble members and the cached target and
//! background distributions. `prep_inputs` fixes the problem, `run`
//! evaluates the current logits and `restart` resets the optimization.
use crate::background::estimate_background;
use crate::ensemble::{Ensemble, PrngKey};
use crate::error::{DesignError, Result};
use crate::loss::{compose, LossTargets, LossValues};
use crate::options::{ChannelWeights, LossTerm, Options, OptionsUpdate, Protocol, WeightsUpdate};
use crate::relax::{relax, FixedPositions};
use candle_core::{DType, Device, Tensor, Var, D};
use log::{debug, info, warn};
use rand::Rng;
use std::path::Path;
use trdesign_core::{restype_char, select_positions, ProteinStructure, NUM_RESTYPES};
use trdesign_models::{
    load_background_ensemble, load_ensemble, BackgroundPredictor, GeometryMap, StructurePredictor,
    TrRosetta, TrRosettaBackground,
};

/// Upper bound (exclusive) of randomly drawn seeds.
const MAX_SEED: u64 = 2147483647;

/// What `prep_inputs` designs against.
#[derive(Debug, Clone, Default)]
pub struct PrepInputs {
    /// Target structure, required by fixbb and partial.
    pub structure: Option<ProteinStructure>,
    /// Design length. Required by hallucination; in partial design it
    /// overrides the structure length.
    pub length: Option<usize>,
    /// Partial design: residues of `structure` to keep, e.g. `"A1-10,A15"`.
    pub pos: Option<String>,
    pub seed: Option<u64>,
    pub options: Option<OptionsUpdate>,
    pub weights: Option<WeightsUpdate>,
}

impl PrepInputs {
    pub fn with_pdb(path: impl AsRef<Path>, chains: Option<&str>) -> Result<Self> {
        Ok(Self {
            structure: Some(ProteinStructure::from_pdb_file(path, chains)?),
            ..Default::default()
        })
    }

    pub fn with_structure(structure: ProteinStructure) -> Self {
        Self {
            structure: Some(structure),
            ..Default::default()
        }
    }

    pub fn with_length(length: usize) -> Self {
        Self {
            length: Some(length),
            ..Default::default()
        }
    }
}

/// Per-call overrides for `run`. Overrides persist in the session.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub seq: Option<Tensor>,
    pub options: Option<OptionsUpdate>,
    pub weights: Option<WeightsUpdate>,
    pub backprop: bool,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            seq: None,
            options: None,
            weights: None,
            backprop: true,
        }
    }
}

impl RunRequest {
    pub fn seq(mut self, seq: Tensor) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn options(mut self, options: OptionsUpdate) -> Self {
        self.options = Some(options);
        self
    }

    pub fn weights(mut self, weights: WeightsUpdate) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn backprop(mut self, backprop: bool) -> Self {
        self.backprop = backprop;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuxOutputs {
    /// Predicted logits, averaged over the members used.
    pub outputs: GeometryMap,
    /// Unweighted per-term per-channel losses, averaged over the members used.
    pub losses: LossValues,
    /// Ensemble members used, in evaluation order.
    pub model_num: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub loss: f64,
    pub aux: AuxOutputs,
    /// Gradient of `loss` with respect to the logits, `[L, 20]`.
    pub grad: Tensor,
}

#[derive(Debug, Clone)]
struct Prepared {
    length: usize,
    target: Option<GeometryMap>,
    reference_aatype: Option<Vec<usize>>,
    background: Option<GeometryMap>,
}

struct MemberOutput {
    loss: f64,
    outputs: GeometryMap,
    losses: LossValues,
    grad: Option<Tensor>,
}

pub struct DesignSession<P, B> {
    protocol: Protocol,
    ensemble: Ensemble<P>,
    background_ensemble: Option<Ensemble<B>>,
    device: Device,
    opt: Options,
    prepared: Option<Prepared>,
    seed: u64,
    key: PrngKey,
    seq: Option<Tensor>,
    last: Option<RunOutput>,
}

/// A session over the pretrained trRosetta networks.
pub type TrDesign = DesignSession<TrRosetta, TrRosettaBackground>;

impl TrDesign {
    /// Load the primary ensemble, and the background ensemble when the
    /// protocol needs one, from a data directory.
    pub fn from_pretrained(
        protocol: Protocol,
        data_dir: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self> {
        let ensemble = Ensemble::new(load_ensemble(&data_dir, device)?)?;
        let background = if protocol.uses_background() {
            Some(Ensemble::new(load_background_ensemble(&data_dir, device)?)?)
        } else {
            None
        };
        Self::new(protocol, ensemble, background, device)
    }
}

impl<P: StructurePredictor, B: BackgroundPredictor> DesignSession<P, B> {
    pub fn new(
        protocol: Protocol,
        ensemble: Ensemble<P>,
        background_ensemble: Option<Ensemble<B>>,
        device: &Device,
    ) -> Result<Self> {
        if protocol.uses_background() && background_ensemble.is_none() {
            return Err(DesignError::Configuration(format!(
                "protocol {protocol} needs background networks"
            )));
        }
        Ok(Self {
            protocol,
            ensemble,
            background_ensemble,
            device: device.clone(),
            opt: Options::default(),
            prepared: None,
            seed: 0,
            key: PrngKey::new(0),
            seq: None,
            last: None,
        })
    }

    /// Set up the design problem: target geometry, background distribution,
    /// default loss weights. Ends with a `restart`.
    pub fn prep_inputs(&mut self, inputs: PrepInputs) -> Result<()> {
        let PrepInputs {
            structure,
            length,
            pos,
            seed,
            options,
            weights,
        } = inputs;

        let mut opt = self.opt.clone();
        let mut target = None;
        let mut reference_aatype = None;
        let mut design_length = None;

        if self.protocol.uses_target() {
            let mut structure = structure.ok_or_else(|| {
                DesignError::Configuration(format!(
                    "protocol {} needs a target structure",
                    self.protocol
                ))
            })?;
            if let Some(selector) = &pos {
                if self.protocol == Protocol::Partial {
                    let indices = select_positions(selector, &structure)?;
                    structure = structure.select(&indices)?;
                    opt.pos = Some((0..structure.len()).collect());
                } else {
                    warn!(
                        "Position selector '{selector}' is ignored by protocol {}",
                        self.protocol
                    );
                }
            }
            info!(
                "Target structure: {} residues, sequence {}",
                structure.len(),
                structure.sequence()
            );
            target = Some(GeometryMap::from_binned(&structure.binned_geometry()?, &self.device)?);
            reference_aatype = Some(structure.aatype().to_vec());
            design_length = Some(structure.len());
            opt.weights.cce = Some(ChannelWeights::trdesign());
        } else if structure.is_some() {
            warn!("Structure is ignored by protocol {}", self.protocol);
        }

        let mut background = None;
        if self.protocol.uses_background() {
            design_length = length.or(design_length);
            let length = design_length.ok_or_else(|| {
                DesignError::Configuration(format!("protocol {} needs a length", self.protocol))
            })?;
            let ensemble = self.background_ensemble.as_ref().ok_or_else(|| {
                DesignError::Configuration("no background networks loaded".to_string())
            })?;
            background = Some(estimate_background(length, ensemble, &self.device)?);
            opt.weights.bkg = Some(ChannelWeights::trdesign());
        } else if length.is_some() {
            warn!("Length is ignored by protocol {}", self.protocol);
        }

        let length = design_length.ok_or_else(|| {
            DesignError::Configuration("could not determine the design length".to_string())
        })?;
        if self.protocol == Protocol::Partial {
            let reference = reference_aatype.as_ref().map_or(0, Vec::len);
            match &opt.pos {
                Some(pos) if pos.iter().any(|&p| p >= length) => {
                    return Err(DesignError::Configuration(format!(
                        "{} kept residues do not fit a design of length {length}",
                        pos.len()
                    )));
                }
                None if reference != length => {
                    return Err(DesignError::Configuration(format!(
                        "partial design of length {length} needs a position selector for a \
                         structure of {reference} residues"
                    )));
                }
                _ => {}
            }
        }

        info!("Prepared {} design of length {length}", self.protocol);
        self.opt = opt;
        self.prepared = Some(Prepared {
            length,
            target,
            reference_aatype,
            background,
        });
        self.restart(seed, options.as_ref(), weights.as_ref())
    }

    /// Zero the logits, reseed the key and apply option updates. Keeps the
    /// cached target and background.
    pub fn restart(
        &mut self,
        seed: Option<u64>,
        options: Option<&OptionsUpdate>,
        weights: Option<&WeightsUpdate>,
    ) -> Result<()> {
        let length = self.prepared()?.length;
        self.seed = seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..MAX_SEED));
        self.key = PrngKey::new(self.seed);
        self.seq = Some(Tensor::zeros((length, NUM_RESTYPES), DType::F32, &self.device)?);
        self.last = None;
        if let Some(options) = options {
            self.set_options(options);
        }
        if let Some(weights) = weights {
            self.set_weights(weights);
        }
        info!("Restarted with seed {}", self.seed);
        Ok(())
    }

    pub fn set_options(&mut self, update: &OptionsUpdate) {
        self.opt.merge(update);
    }

    pub fn set_weights(&mut self, update: &WeightsUpdate) {
        self.opt.weights.merge(update);
    }

    /// Replace the logits, e.g. after an optimizer step.
    pub fn set_logits(&mut self, seq: &Tensor) -> Result<()> {
        let seq = self.checked_logits(seq)?;
        self.seq = Some(seq);
        Ok(())
    }

    /// Evaluate the current logits on the sampled ensemble members. A
    /// `seq` in the request replaces the stored logits.
    pub fn run(&mut self, request: RunRequest) -> Result<RunOutput> {
        let ensemble = &self.ensemble;
        let prepared = self.prepared()?;

        let mut opt = self.opt.clone();
        if let Some(options) = &request.options {
            opt.merge(options);
        }
        if let Some(weights) = &request.weights {
            opt.weights.merge(weights);
        }
        let seq = match &request.seq {
            Some(seq) => self.checked_logits(seq)?,
            None => self.logits()?.clone(),
        };

        let fixed = match (&opt.pos, &prepared.reference_aatype) {
            (Some(pos), Some(aatype)) if self.protocol == Protocol::Partial => {
                Some(FixedPositions::new(pos.clone(), aatype.clone())?)
            }
            _ => None,
        };
        let targets = LossTargets {
            target: prepared.target.as_ref(),
            pos: match self.protocol {
                Protocol::Partial => opt.pos.as_deref(),
                _ => None,
            },
            background: prepared.background.as_ref(),
        };

        let (model_num, next_key) = ensemble.select(&opt.model, self.key)?;
        let mut members = Vec::with_capacity(model_num.len());
        for &n in &model_num {
            let model = ensemble.member(n).ok_or_else(|| {
                DesignError::Configuration(format!("ensemble member {n} does not exist"))
            })?;
            let member = evaluate(model, &seq, &opt, fixed.as_ref(), &targets, request.backprop)?;
            debug!("model {n}: loss {:.4}", member.loss);
            members.push(member);
        }

        let output = average(members, model_num, &seq, request.backprop)?;

        self.opt = opt;
        self.seq = Some(seq);
        self.key = next_key;
        self.last = Some(output.clone());
        Ok(output)
    }

    /// Argmax sequence of the current logits; kept residues show their
    /// reference identity.
    pub fn sequence(&self) -> Result<String> {
        let argmax: Vec<u32> = self.logits()?.argmax(D::Minus1)?.to_vec1()?;
        let mut sequence: Vec<char> = argmax.iter().map(|&a| restype_char(a as usize)).collect();
        if let (Protocol::Partial, Some(pos), Some(aatype)) = (
            self.protocol,
            &self.opt.pos,
            self.prepared.as_ref().and_then(|p| p.reference_aatype.as_ref()),
        ) {
            for (&row, &aa) in pos.iter().zip(aatype.iter()) {
                if let Some(slot) = sequence.get_mut(row) {
                    *slot = restype_char(aa);
                }
            }
        }
        Ok(sequence.into_iter().collect())
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn options(&self) -> &Options {
        &self.opt
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble.len()
    }

    pub fn length(&self) -> Option<usize> {
        self.prepared.as_ref().map(|p| p.length)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn key(&self) -> PrngKey {
        self.key
    }

    pub fn logits(&self) -> Result<&Tensor> {
        self.seq.as_ref().ok_or_else(not_prepared)
    }

    /// One-hot target bins (`fixbb`, `partial`).
    pub fn target(&self) -> Option<&GeometryMap> {
        self.prepared.as_ref().and_then(|p| p.target.as_ref())
    }

    /// Background probabilities (`hallucination`, `partial`).
    pub fn background(&self) -> Option<&GeometryMap> {
        self.prepared.as_ref().and_then(|p| p.background.as_ref())
    }

    pub fn last_run(&self) -> Option<&RunOutput> {
        self.last.as_ref()
    }

    fn prepared(&self) -> Result<&Prepared> {
        self.prepared.as_ref().ok_or_else(not_prepared)
    }

    fn checked_logits(&self, seq: &Tensor) -> Result<Tensor> {
        let length = self.prepared()?.length;
        if seq.dims() != [length, NUM_RESTYPES] {
            return Err(DesignError::Shape {
                what: "sequence logits".to_string(),
                expected: format!("[{length}, {NUM_RESTYPES}]"),
                found: format!("{:?}", seq.dims()),
            });
        }
        Ok(seq.to_device(&self.device)?.to_dtype(DType::F32)?.detach())
    }
}

fn not_prepared() -> DesignError {
    DesignError::Configuration("prep_inputs must be called before running".to_string())
}

fn evaluate<P: StructurePredictor>(
    model: &P,
    seq: &Tensor,
    opt: &Options,
    fixed: Option<&FixedPositions>,
    targets: &LossTargets,
    backprop: bool,
) -> Result<MemberOutput> {
    let var = if backprop {
        Some(Var::from_tensor(seq)?)
    } else {
        None
    };
    let input = var.as_ref().map_or(seq, |v| v.as_tensor());

    let views = relax(input, opt, fixed)?;
    let outputs = model.predict(&views.pseudo)?;
    let (loss, losses) = compose(&outputs, targets, &opt.weights)?;

    let grad = match &var {
        Some(var) => {
            let grads = loss.backward()?;
            Some(match grads.get(var.as_tensor()) {
                Some(grad) => grad.detach(),
                None => var.as_tensor().zeros_like()?,
            })
        }
        None => None,
    };

    Ok(MemberOutput {
        loss: loss.to_dtype(DType::F64)?.to_scalar::<f64>()?,
        outputs: outputs.detach(),
        losses: losses.values()?,
        grad,
    })
}

fn average(
    members: Vec<MemberOutput>,
    model_num: Vec<usize>,
    seq: &Tensor,
    backprop: bool,
) -> Result<RunOutput> {
    let zeros = || seq.zeros_like();
    if let [single] = members.as_slice() {
        let grad = match (&single.grad, backprop) {
            (Some(grad), true) => grad.clone(),
            _ => zeros()?,
        };
        return Ok(RunOutput {
            loss: single.loss,
            aux: AuxOutputs {
                outputs: single.outputs.clone(),
                losses: single.losses,
                model_num,
            },
            grad,
        });
    }

    let n = members.len() as f64;
    let loss = members.iter().map(|m| m.loss).sum::<f64>() / n;
    let outputs: Vec<GeometryMap> = members.iter().map(|m| m.outputs.clone()).collect();
    let losses: Vec<LossValues> = members.iter().map(|m| m.losses).collect();
    let grads: Vec<&Tensor> = members.iter().filter_map(|m| m.grad.as_ref()).collect();
    let grad = if backprop && !grads.is_empty() {
        Tensor::stack(&grads, 0)?.mean(0)?
    } else {
        zeros()?
    };
    Ok(RunOutput {
        loss,
        aux: AuxOutputs {
            outputs: GeometryMap::mean(&outputs)?,
            losses: LossValues::mean(&losses),
            model_num,
        },
        grad,
    })
}

/// Weighted total of one term in the last run, `None` when the term is
/// inactive or nothing has run yet.
pub(crate) fn weighted_term_loss<P, B>(
    session: &DesignSession<P, B>,
    term: LossTerm,
) -> Option<f64> {
    let last = session.last.as_ref()?;
    last.aux.losses.weighted(term, &session.opt.weights)
}
