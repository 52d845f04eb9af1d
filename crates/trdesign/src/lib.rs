//! trdesign
//!
//! Protein sequence design against trRosetta geometry predictions.
//!
//! A [`DesignSession`] relaxes `[L, 20]` sequence logits into a pseudo
//! sequence, runs it through a sampled subset of an ensemble of geometry
//! networks and scores the predictions against a target structure
//! (`fixbb`), against a sequence-free background (`hallucination`) or both
//! (`partial`). Each run returns the loss, the per-term breakdown and the
//! gradient with respect to the logits, ready for an outer optimizer.
//!
//! ```ignore
//! use trdesign::{DesignSession, PrepInputs, Protocol, RunRequest, TrDesign};
//!
//! let device = trdesign_models::device(false)?;
//! let mut session = TrDesign::from_pretrained(Protocol::Fixbb, "params", &device)?;
//! session.prep_inputs(PrepInputs::with_pdb("1qys.pdb", Some("A"))?)?;
//! let out = session.run(RunRequest::default())?;
//! println!("loss {} from models {:?}", out.loss, out.aux.model_num);
//! ```
pub mod background;
pub mod callback;
pub mod ensemble;
pub mod error;
pub mod loss;
pub mod options;
pub mod relax;
pub mod session;

pub use callback::{aux_loss_key, ExternalDesign, ExternalOptions};
pub use ensemble::{Ensemble, PrngKey};
pub use error::{DesignError, Result};
pub use loss::{ChannelValues, LossValues};
pub use options::{
    ChannelWeights, LossTerm, LossWeights, ModelSampling, Options, OptionsUpdate, Protocol,
    WeightsUpdate,
};
pub use session::{AuxOutputs, DesignSession, PrepInputs, RunOutput, RunRequest, TrDesign};
