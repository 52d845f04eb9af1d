use crate::ensemble::Ensemble;
use crate::error::{DesignError, Result};
use candle_core::Device;
use log::info;
use trdesign_models::{BackgroundPredictor, GeometryMap};

/// Seed of the background input noise; every member sees the same noise.
pub const BACKGROUND_SEED: u64 = 0;

/// Average the sequence-free predictions of every background member for
/// proteins of `length` residues.
pub fn estimate_background<B: BackgroundPredictor>(
    length: usize,
    ensemble: &Ensemble<B>,
    device: &Device,
) -> Result<GeometryMap> {
    if length == 0 {
        return Err(DesignError::Configuration(
            "background estimation needs a positive length".to_string(),
        ));
    }
    info!(
        "Estimating background for L={length} from {} networks",
        ensemble.len()
    );
    let predictions = ensemble
        .iter()
        .map(|member| member.predict_background(length, BACKGROUND_SEED, device))
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(GeometryMap::mean(&predictions)?.detach())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Result as CandleResult, Tensor, D};
    use trdesign_core::GeometryChannel;

    /// Puts all mass on one bin.
    struct Peaked(usize);

    impl BackgroundPredictor for Peaked {
        fn predict_background(
            &self,
            length: usize,
            _seed: u64,
            device: &Device,
        ) -> CandleResult<GeometryMap> {
            GeometryMap::try_from_fn(|c| {
                let idx = Tensor::full(self.0 as u32, (length, length), device)?;
                candle_nn::encoding::one_hot(idx, c.num_bins(), 1f32, 0f32)
            })
        }
    }

    #[test]
    fn test_background_is_member_average() {
        let device = Device::Cpu;
        let members = vec![Peaked(0), Peaked(1), Peaked(1), Peaked(2), Peaked(2)];
        let ensemble = Ensemble::new(members).unwrap();
        let bkg = estimate_background(3, &ensemble, &device).unwrap();
        for channel in GeometryChannel::ALL {
            let probs = bkg.get(channel);
            assert_eq!(probs.dims(), &[3, 3, channel.num_bins()]);
            let sums: Vec<f32> = probs
                .sum(D::Minus1)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1()
                .unwrap();
            assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-6));
        }
        let pair: Vec<f32> = bkg.omega.get(0).unwrap().get(2).unwrap().to_vec1().unwrap();
        assert!((pair[0] - 0.2).abs() < 1e-6);
        assert!((pair[1] - 0.4).abs() < 1e-6);
        assert!((pair[2] - 0.4).abs() < 1e-6);

        assert!(estimate_background(0, &ensemble, &device).is_err());
    }
}
