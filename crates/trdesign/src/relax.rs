//! Continuous relaxations of a sequence.
//!
//! From raw `[L, 20]` logits the relaxer derives a tempered softmax, a
//! one-hot sequence with straight-through gradients and the pseudo sequence
//! actually fed to the network, a blend of the three.
use crate::error::{DesignError, Result};
use crate::options::Options;
use candle_core::{Device, Tensor, D};
use trdesign_core::NUM_RESTYPES;

/// Fixed sharpening applied before the temperature.
const LOGIT_SCALE: f64 = 2.0;

#[derive(Debug, Clone)]
pub struct SequenceViews {
    pub input: Tensor,
    pub soft: Tensor,
    pub hard: Tensor,
    pub pseudo: Tensor,
}

/// Forward value of `hard`, gradient of `soft`.
pub fn straight_through(hard: &Tensor, soft: &Tensor) -> candle_core::Result<Tensor> {
    (hard - soft)?.detach() + soft
}

/// Rows pinned to a reference sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPositions {
    positions: Vec<usize>,
    aatype: Vec<usize>,
}

impl FixedPositions {
    /// Row `positions[k]` takes residue type `aatype[k]`. Types outside the
    /// 20 standard amino acids give an all-zero row.
    pub fn new(positions: Vec<usize>, aatype: Vec<usize>) -> Result<Self> {
        if positions.len() != aatype.len() {
            return Err(DesignError::Shape {
                what: "fixed positions".to_string(),
                expected: format!("{} positions", aatype.len()),
                found: format!("{} positions", positions.len()),
            });
        }
        Ok(Self { positions, aatype })
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// `pinned` is a `[L, 20]` u8 mask, set on fixed rows; `reference` is
    /// `[L, 20]`, the one-hot reference on fixed rows and zero elsewhere.
    fn overlays(&self, length: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        let mut pinned = vec![0u8; length * NUM_RESTYPES];
        let mut reference = vec![0f32; length * NUM_RESTYPES];
        for (&row, &aa) in self.positions.iter().zip(self.aatype.iter()) {
            if row >= length {
                return Err(DesignError::Shape {
                    what: "fixed position".to_string(),
                    expected: format!("index below {length}"),
                    found: row.to_string(),
                });
            }
            let cells = row * NUM_RESTYPES..(row + 1) * NUM_RESTYPES;
            pinned[cells.clone()].fill(1);
            reference[cells].fill(0.0);
            if aa < NUM_RESTYPES {
                reference[row * NUM_RESTYPES + aa] = 1.0;
            }
        }
        Ok((
            Tensor::from_vec(pinned, (length, NUM_RESTYPES), device)?,
            Tensor::from_vec(reference, (length, NUM_RESTYPES), device)?,
        ))
    }

    /// Fixed rows of `view` replaced by the reference, whatever they held.
    fn apply(&self, view: &Tensor, pinned: &Tensor, reference: &Tensor) -> Result<Tensor> {
        let reference = reference.to_dtype(view.dtype())?;
        Ok(pinned.where_cond(&reference, view)?)
    }
}

/// Derive every sequence view from `logits` under `opt.temp`, `opt.soft` and
/// `opt.hard`, then pin the fixed rows.
pub fn relax(
    logits: &Tensor,
    opt: &Options,
    fixed: Option<&FixedPositions>,
) -> Result<SequenceViews> {
    let (length, naa) = logits.dims2()?;
    if naa != NUM_RESTYPES {
        return Err(DesignError::Shape {
            what: "sequence logits".to_string(),
            expected: format!("[L, {NUM_RESTYPES}]"),
            found: format!("[{length}, {naa}]"),
        });
    }

    let input = logits.clone();
    let soft = candle_nn::ops::softmax(&(logits * (LOGIT_SCALE / opt.temp))?, D::Minus1)?;
    let one_hot = candle_nn::encoding::one_hot(soft.argmax(D::Minus1)?, NUM_RESTYPES, 1f32, 0f32)?
        .to_dtype(soft.dtype())?;
    let hard = straight_through(&one_hot, &soft)?;

    let pseudo = (soft.affine(opt.soft, 0.0)? + input.affine(1.0 - opt.soft, 0.0)?)?;
    let pseudo = (hard.affine(opt.hard, 0.0)? + pseudo.affine(1.0 - opt.hard, 0.0)?)?;

    let views = SequenceViews {
        input,
        soft,
        hard,
        pseudo,
    };
    match fixed {
        None => Ok(views),
        Some(fixed) => {
            let (pinned, reference) = fixed.overlays(length, logits.device())?;
            Ok(SequenceViews {
                input: fixed.apply(&views.input, &pinned, &reference)?,
                soft: fixed.apply(&views.soft, &pinned, &reference)?,
                hard: fixed.apply(&views.hard, &pinned, &reference)?,
                pseudo: fixed.apply(&views.pseudo, &pinned, &reference)?,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Var};

    fn logits(device: &Device) -> candle_core::Result<Tensor> {
        Tensor::randn(0f32, 2f32, (6, NUM_RESTYPES), device)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .and_then(|d| d.abs())
            .and_then(|d| d.flatten_all())
            .and_then(|d| d.max(0))
            .and_then(|d| d.to_scalar::<f32>())
            .unwrap()
    }

    #[test]
    fn test_soft_is_tempered_softmax() {
        let device = Device::Cpu;
        let x = logits(&device).unwrap();
        let opt = Options {
            temp: 4.0,
            ..Default::default()
        };
        let views = relax(&x, &opt, None).unwrap();
        let expected = candle_nn::ops::softmax(&(&x * 0.5).unwrap(), D::Minus1).unwrap();
        assert!(max_abs_diff(&views.soft, &expected) < 1e-6);
        assert!(max_abs_diff(&views.input, &x) == 0.0);
    }

    #[test]
    fn test_full_blend_is_hard_one_hot() {
        let device = Device::Cpu;
        let x = logits(&device).unwrap();
        let views = relax(&x, &Options::default(), None).unwrap();
        let argmax: Vec<u32> = x.argmax(D::Minus1).unwrap().to_vec1().unwrap();
        let pseudo: Vec<Vec<f32>> = views.pseudo.to_vec2().unwrap();
        for (row, &aa) in pseudo.iter().zip(argmax.iter()) {
            for (k, &v) in row.iter().enumerate() {
                let expected = if k == aa as usize { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-6);
            }
        }
        assert!(max_abs_diff(&views.pseudo, &views.hard) == 0.0);
    }

    #[test]
    fn test_zero_blend_is_input() {
        let device = Device::Cpu;
        let x = logits(&device).unwrap();
        let opt = Options {
            soft: 0.0,
            hard: 0.0,
            ..Default::default()
        };
        let views = relax(&x, &opt, None).unwrap();
        assert_eq!(max_abs_diff(&views.pseudo, &x), 0.0);
    }

    #[test]
    fn test_straight_through_gradient() {
        let device = Device::Cpu;
        let x = Var::from_tensor(&logits(&device).unwrap()).unwrap();
        let views = relax(x.as_tensor(), &Options::default(), None).unwrap();
        let w = Tensor::randn(0f32, 1f32, (6, NUM_RESTYPES), &device).unwrap();

        let via_hard = views.hard.mul(&w).unwrap().sum_all().unwrap().backward().unwrap();
        let via_soft = views.soft.mul(&w).unwrap().sum_all().unwrap().backward().unwrap();
        let g_hard = via_hard.get(x.as_tensor()).unwrap();
        let g_soft = via_soft.get(x.as_tensor()).unwrap();
        assert!(max_abs_diff(g_hard, g_soft) < 1e-6);
        assert!(g_hard.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap() > 0.0);
    }

    #[test]
    fn test_fixed_rows_overwritten() {
        let device = Device::Cpu;
        let x = Var::from_tensor(&logits(&device).unwrap()).unwrap();
        let fixed = FixedPositions::new(vec![1, 4], vec![7, 20]).unwrap();
        let opt = Options {
            soft: 0.3,
            hard: 0.6,
            ..Default::default()
        };
        let views = relax(x.as_tensor(), &opt, Some(&fixed)).unwrap();
        for view in [&views.input, &views.soft, &views.hard, &views.pseudo] {
            let rows: Vec<Vec<f32>> = view.to_vec2().unwrap();
            for (k, &v) in rows[1].iter().enumerate() {
                assert_eq!(v, if k == 7 { 1.0 } else { 0.0 });
            }
            // unknown reference residue
            assert!(rows[4].iter().all(|&v| v == 0.0));
        }

        let free: Vec<Vec<f32>> = views.input.to_vec2().unwrap();
        let raw: Vec<Vec<f32>> = x.as_tensor().to_vec2().unwrap();
        assert_eq!(free[0], raw[0]);

        // no gradient through pinned rows
        let grads = views.pseudo.sqr().unwrap().sum_all().unwrap().backward().unwrap();
        let grad: Vec<Vec<f32>> = grads.get(x.as_tensor()).unwrap().to_vec2().unwrap();
        assert!(grad[1].iter().all(|&g| g == 0.0));
        assert!(grad[4].iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_fixed_rows_ignore_non_finite_input() {
        let device = Device::Cpu;
        let x = logits(&device).unwrap();
        let mut raw: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
        raw[2 * NUM_RESTYPES + 5] = f32::NAN;
        raw[3 * NUM_RESTYPES] = f32::INFINITY;
        let x = Tensor::from_vec(raw, (6, NUM_RESTYPES), &device).unwrap();
        let fixed = FixedPositions::new(vec![2, 3], vec![0, 19]).unwrap();
        let opt = Options {
            temp: 1e-6,
            soft: 0.5,
            hard: 0.5,
            ..Default::default()
        };
        let views = relax(&x, &opt, Some(&fixed)).unwrap();
        for view in [&views.input, &views.soft, &views.hard, &views.pseudo] {
            let rows: Vec<Vec<f32>> = view.to_vec2().unwrap();
            for (k, &v) in rows[2].iter().enumerate() {
                assert_eq!(v, if k == 0 { 1.0 } else { 0.0 });
            }
            for (k, &v) in rows[3].iter().enumerate() {
                assert_eq!(v, if k == 19 { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn test_fixed_position_validation() {
        assert!(FixedPositions::new(vec![0, 1], vec![3]).is_err());
        let fixed = FixedPositions::new(vec![9], vec![3]).unwrap();
        let x = Tensor::zeros((4, NUM_RESTYPES), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            relax(&x, &Options::default(), Some(&fixed)),
            Err(DesignError::Shape { .. })
        ));
        let bad = Tensor::zeros((4, 21), DType::F32, &Device::Cpu).unwrap();
        assert!(relax(&bad, &Options::default(), None).is_err());
    }
}
