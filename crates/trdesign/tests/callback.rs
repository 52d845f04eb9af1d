mod common;

use candle_core::Tensor;
use common::*;
use std::collections::HashMap;
use trdesign::{
    aux_loss_key, ExternalDesign, ExternalOptions, LossTerm, PrepInputs, Protocol, RunRequest,
};

/// Minimal host optimizer that accumulates what the callback hands it.
struct Host {
    options: ExternalOptions,
    seq: Tensor,
    grad: Tensor,
    loss: f64,
    aux: HashMap<String, f64>,
}

impl Host {
    fn new(seq: Tensor, options: ExternalOptions) -> Self {
        let grad = seq.zeros_like().unwrap();
        Self {
            options,
            seq,
            grad,
            loss: 0.0,
            aux: HashMap::new(),
        }
    }
}

impl ExternalDesign for Host {
    fn options(&self) -> ExternalOptions {
        self.options.clone()
    }

    fn sequence(&self) -> candle_core::Result<Tensor> {
        Ok(self.seq.clone())
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

fn fixbb_session() -> anyhow::Result<ToySession> {
    let mut session = toy_session(Protocol::Fixbb, toy_members());
    session.prep_inputs(PrepInputs::with_structure(helix(Some("A"))))?;
    Ok(session)
}

#[test]
fn test_callback_scales_gradient_and_loss() -> anyhow::Result<()> {
    let logits = random_logits(12);

    let mut reference = fixbb_session()?;
    let direct = reference.run(RunRequest::default().seq(logits.clone()))?;

    let mut session = fixbb_session()?;
    let mut host = Host::new(logits, ExternalOptions::default());
    {
        let mut callback = session.af_callback(0.5, true);
        callback(&mut host)?;
    }

    assert!((host.loss - 0.5 * direct.loss).abs() < 1e-9);
    let expected = direct.grad.affine(0.5, 0.0)?;
    assert!(max_abs_diff(&host.grad, &expected) < 1e-6);

    let cce = direct
        .aux
        .losses
        .weighted(LossTerm::Cce, &reference.options().weights)
        .unwrap();
    assert!((host.aux[aux_loss_key(LossTerm::Cce)] - cce).abs() < 1e-9);
    assert!(!host.aux.contains_key(aux_loss_key(LossTerm::Bkg)));
    Ok(())
}

#[test]
fn test_zero_weight_reports_without_gradient() -> anyhow::Result<()> {
    let mut session = fixbb_session()?;
    let mut host = Host::new(random_logits(12), ExternalOptions::default());
    session.inject(&mut host, 0.0, true)?;

    assert!(to_vec2(&host.grad).iter().flatten().all(|&g| g == 0.0));
    assert_eq!(host.loss, 0.0);
    assert!(host.aux[aux_loss_key(LossTerm::Cce)] > 0.0);

    session.inject(&mut host, 1.0, false)?;
    assert_eq!(host.loss, 0.0);
    assert!(to_vec2(&host.grad).iter().flatten().any(|&g| g != 0.0));
    Ok(())
}

#[test]
fn test_callback_syncs_relaxation_options() -> anyhow::Result<()> {
    let options = ExternalOptions {
        soft: Some(0.25),
        temp: Some(2.0),
        hard: None,
        pos: Some(vec![3, 4, 5]),
    };

    let mut session = fixbb_session()?;
    let mut host = Host::new(random_logits(12), options.clone());
    session.inject(&mut host, 1.0, true)?;
    assert_eq!(session.options().soft, 0.25);
    assert_eq!(session.options().temp, 2.0);
    assert_eq!(session.options().hard, 1.0);
    // a session without kept positions does not adopt the host's
    assert!(session.options().pos.is_none());

    let mut partial = toy_session(Protocol::Partial, toy_members());
    partial.prep_inputs(PrepInputs {
        pos: Some("A1-3".to_string()),
        length: Some(6),
        ..PrepInputs::with_structure(helix(None))
    })?;
    let mut host = Host::new(random_logits(6), options);
    partial.inject(&mut host, 1.0, true)?;
    assert_eq!(partial.options().pos, Some(vec![3, 4, 5]));
    assert!(host.aux.contains_key(aux_loss_key(LossTerm::Bkg)));
    assert!(host.aux.contains_key(aux_loss_key(LossTerm::Cce)));
    Ok(())
}
