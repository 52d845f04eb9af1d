//! Using a session as an auxiliary loss inside another optimizer.
use crate::error::Result;
use crate::options::{LossTerm, OptionsUpdate};
use crate::session::{weighted_term_loss, DesignSession, RunRequest};
use candle_core::Tensor;
use trdesign_models::{BackgroundPredictor, StructurePredictor};

/// Name of the per-term entries written into the external auxiliary losses.
pub fn aux_loss_key(term: LossTerm) -> &'static str {
    match term {
        LossTerm::Bkg => "TrD_bkg",
        LossTerm::Cce => "TrD_cce",
    }
}

/// Relaxation settings exposed by the external optimizer. `None` means the
/// optimizer has no such option.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalOptions {
    pub soft: Option<f64>,
    pub temp: Option<f64>,
    pub hard: Option<f64>,
    pub pos: Option<Vec<usize>>,
}

/// The optimizer a session plugs into through [`DesignSession::af_callback`].
pub trait ExternalDesign {
    fn options(&self) -> ExternalOptions;

    /// Current `[L, 20]` sequence logits.
    fn sequence(&self) -> candle_core::Result<Tensor>;

    /// Add to the gradient accumulated for the sequence.
    fn add_gradient(&mut self, grad: &Tensor) -> candle_core::Result<()>;

    fn add_loss(&mut self, loss: f64);

    /// Report a named loss alongside the optimizer's own.
    fn record_aux_loss(&mut self, name: &str, value: f64);
}

impl<P: StructurePredictor, B: BackgroundPredictor> DesignSession<P, B> {
    /// A callback that evaluates the external optimizer's sequence with this
    /// session and folds `weight` times the result into its accumulators.
    ///
    /// With `weight <= 0` no gradient is computed or injected; the losses are
    /// still reported. The loss is added only when `add_loss` is set.
    pub fn af_callback(
        &mut self,
        weight: f64,
        add_loss: bool,
    ) -> impl FnMut(&mut dyn ExternalDesign) -> Result<()> + '_ {
        move |external: &mut dyn ExternalDesign| self.inject(external, weight, add_loss)
    }

    /// One callback invocation.
    pub fn inject(
        &mut self,
        external: &mut dyn ExternalDesign,
        weight: f64,
        add_loss: bool,
    ) -> Result<()> {
        let backprop = weight > 0.0;

        let shared = external.options();
        let mut update = OptionsUpdate {
            soft: shared.soft,
            temp: shared.temp,
            hard: shared.hard,
            ..Default::default()
        };
        if self.options().pos.is_some() {
            update.pos = shared.pos;
        }
        self.set_options(&update);

        let seq = external.sequence()?;
        let output = self.run(RunRequest::default().seq(seq).backprop(backprop))?;

        if backprop {
            external.add_gradient(&output.grad.affine(weight, 0.0)?)?;
        }
        if add_loss {
            external.add_loss(weight * output.loss);
        }
        for term in [LossTerm::Bkg, LossTerm::Cce] {
            if let Some(value) = weighted_term_loss(self, term) {
                external.record_aux_loss(aux_loss_key(term), value);
            }
        }
        Ok(())
    }
}
