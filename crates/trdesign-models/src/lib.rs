//! trdesign-models
//!
//! Candle implementations of the trRosetta geometry network and its
//! background variant, the `GeometryMap` record they produce, and loaders
//! for the pretrained ensembles.
//!
//! ```shell
//! cargo run --example design -- --help
//! cargo run --example design --features metal -- --help
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result};
use log::info;

pub use geometry_map::GeometryMap;
pub use predictor::{BackgroundPredictor, StructurePredictor};
pub use pretrained::{load_background_ensemble, load_ensemble, ENSEMBLE_SIZE};
pub use trrosetta::config::TrRosettaConfig;
pub use trrosetta::trrosetta::{TrRosetta, TrRosettaBackground};

pub mod geometry_map;
pub mod predictor;
pub mod pretrained;
pub mod trrosetta;

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            info!("Running on CPU, to run on GPU(metal), build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}
