//! Small optimizers that drive a [`DesignSession`].
//!
//! [`descend`] steps the session's own logits with its gradient.
//! [`GradientDesigner`] keeps logits of its own and plugs the session in as
//! an auxiliary loss through [`DesignSession::inject`], the way a larger
//! optimizer would.
use candle_core::{Device, Tensor};
use log::info;
use std::collections::BTreeMap;
use trdesign::{DesignSession, ExternalDesign, ExternalOptions, RunRequest};
use trdesign_models::{BackgroundPredictor, StructurePredictor};

const EPS: f64 = 1e-8;

/// `logits - lr * sqrt(L) * grad / |grad|`. A zero gradient leaves the
/// logits unchanged.
pub fn normalized_step(
    logits: &Tensor,
    grad: &Tensor,
    learning_rate: f64,
) -> candle_core::Result<Tensor> {
    let length = logits.dim(0)? as f64;
    let norm = grad.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()? as f64;
    let scale = learning_rate * length.sqrt() / (norm + EPS);
    logits - grad.affine(scale, 0.0)?
}

/// Run `steps` gradient steps on the session's logits, returning the loss
/// before each step.
pub fn descend<P: StructurePredictor, B: BackgroundPredictor>(
    session: &mut DesignSession<P, B>,
    steps: usize,
    learning_rate: f64,
) -> trdesign::Result<Vec<f64>> {
    let mut losses = Vec::with_capacity(steps);
    for step in 0..steps {
        let out = session.run(RunRequest::default())?;
        info!("step {step}: loss {:.4} models {:?}", out.loss, out.aux.model_num);
        let logits = normalized_step(session.logits()?, &out.grad, learning_rate)?;
        session.set_logits(&logits)?;
        losses.push(out.loss);
    }
    Ok(losses)
}

/// Gradient descent on its own logits, with losses contributed by callbacks.
pub struct GradientDesigner {
    logits: Tensor,
    grad: Tensor,
    loss: f64,
    aux: BTreeMap<String, f64>,
    options: ExternalOptions,
    learning_rate: f64,
}

impl GradientDesigner {
    pub fn new(length: usize, learning_rate: f64, device: &Device) -> candle_core::Result<Self> {
        let logits = Tensor::zeros((length, 20), candle_core::DType::F32, device)?;
        Self::from_logits(logits, learning_rate)
    }

    pub fn from_logits(logits: Tensor, learning_rate: f64) -> candle_core::Result<Self> {
        Ok(Self {
            grad: logits.zeros_like()?,
            logits,
            loss: 0.0,
            aux: BTreeMap::new(),
            options: ExternalOptions::default(),
            learning_rate,
        })
    }

    /// Relaxation settings shared with the sessions this designer calls.
    pub fn with_options(mut self, options: ExternalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn aux(&self) -> &BTreeMap<String, f64> {
        &self.aux
    }

    /// Apply the accumulated gradient and clear the accumulators.
    pub fn step(&mut self) -> candle_core::Result<()> {
        self.logits = normalized_step(&self.logits, &self.grad, self.learning_rate)?;
        self.grad = self.grad.zeros_like()?;
        self.loss = 0.0;
        self.aux.clear();
        Ok(())
    }

    /// Evaluate the session `steps` times with `weight`, stepping after each.
    /// Returns the loss seen before each step.
    pub fn design<P: StructurePredictor, B: BackgroundPredictor>(
        &mut self,
        session: &mut DesignSession<P, B>,
        steps: usize,
        weight: f64,
    ) -> trdesign::Result<Vec<f64>> {
        let mut losses = Vec::with_capacity(steps);
        for step in 0..steps {
            session.inject(self, weight, true)?;
            info!("step {step}: loss {:.4} {:?}", self.loss, self.aux);
            losses.push(self.loss);
            self.step()?;
        }
        Ok(losses)
    }
}

impl ExternalDesign for GradientDesigner {
    fn options(&self) -> ExternalOptions {
        self.options.clone()
    }

    fn sequence(&self) -> candle_core::Result<Tensor> {
        Ok(self.logits.clone())
    }

    fn add_gradient(&mut self, grad: &Tensor) -> candle_core::Result<()> {
        self.grad = (&self.grad + grad)?;
        Ok(())
    }

    fn add_loss(&mut self, loss: f64) {
        self.loss += loss;
    }

    fn record_aux_loss(&mut self, name: &str, value: f64) {
        self.aux.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{VarBuilder, VarMap};
    use trdesign::{Ensemble, PrepInputs, Protocol};
    use trdesign_core::ProteinStructure;
    use trdesign_models::{TrRosetta, TrRosettaBackground, TrRosettaConfig};
    use trdesign_test_data::TestFile;

    fn tiny_session(protocol: Protocol) -> DesignSession<TrRosetta, TrRosettaBackground> {
        let device = Device::Cpu;
        let cfg = TrRosettaConfig::tiny();
        let members: Vec<_> = (0..2)
            .map(|_| {
                let varmap = VarMap::new();
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
                TrRosetta::load(vb, &cfg).unwrap()
            })
            .collect();
        let background: Vec<_> = (0..2)
            .map(|_| {
                let varmap = VarMap::new();
                let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
                TrRosettaBackground::load(vb, &cfg).unwrap()
            })
            .collect();
        DesignSession::new(
            protocol,
            Ensemble::new(members).unwrap(),
            Some(Ensemble::new(background).unwrap()),
            &device,
        )
        .unwrap()
    }

    #[test]
    fn test_normalized_step() {
        let device = Device::Cpu;
        let logits = Tensor::ones((4, 20), DType::F32, &device).unwrap();
        let zero = logits.zeros_like().unwrap();
        let same = normalized_step(&logits, &zero, 0.1).unwrap();
        assert_eq!(same.to_vec2::<f32>().unwrap(), logits.to_vec2::<f32>().unwrap());

        let grad = Tensor::ones((4, 20), DType::F32, &device).unwrap();
        let moved = normalized_step(&logits, &grad, 0.1).unwrap();
        // step length is lr * sqrt(L) whatever the gradient scale
        let delta = (&logits - &moved).unwrap().sqr().unwrap().sum_all().unwrap().sqrt().unwrap();
        assert!((delta.to_scalar::<f32>().unwrap() - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_descend_updates_logits() {
        let mut session = tiny_session(Protocol::Hallucination);
        session.prep_inputs(PrepInputs::with_length(6)).unwrap();
        let losses = descend(&mut session, 3, 0.5).unwrap();
        assert_eq!(losses.len(), 3);
        assert!(losses.iter().all(|l| l.is_finite()));
        let moved = session.logits().unwrap().abs().unwrap().sum_all().unwrap();
        assert!(moved.to_scalar::<f32>().unwrap() > 0.0);
        assert_eq!(session.sequence().unwrap().len(), 6);
    }

    #[test]
    fn test_designer_collects_callback_losses() {
        let (pdb_file, _temp) = TestFile::helix_01().create_temp().unwrap();
        let structure = ProteinStructure::from_pdb_file(&pdb_file, Some("A")).unwrap();
        let mut session = tiny_session(Protocol::Fixbb);
        session.prep_inputs(PrepInputs::with_structure(structure)).unwrap();

        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1f32, (12, 20), &device).unwrap();
        let mut designer = GradientDesigner::from_logits(logits.clone(), 0.1).unwrap();
        session.inject(&mut designer, 1.0, true).unwrap();
        assert!(designer.loss() > 0.0);
        assert!(designer.aux().contains_key("TrD_cce"));
        let grad_sum = designer.grad().abs().unwrap().sum_all().unwrap();
        assert!(grad_sum.to_scalar::<f32>().unwrap() > 0.0);

        designer.step().unwrap();
        assert_eq!(designer.loss(), 0.0);
        assert!(designer.aux().is_empty());
        assert_ne!(designer.logits().to_vec2::<f32>().unwrap(), logits.to_vec2::<f32>().unwrap());

        let losses = designer.design(&mut session, 2, 0.5).unwrap();
        assert_eq!(losses.len(), 2);
        assert!(losses.iter().all(|&l| l > 0.0));
    }
}
