//! Loading the pretrained trRosetta ensembles.
//!
//! A data directory holds the five primary networks and the five background
//! networks converted to safetensors, plus an optional `config.json`:
//!
//! ```text
//! <data_dir>/config.json
//! <data_dir>/models/model_xa{a,b,c,d,e}.safetensors
//! <data_dir>/bkgr_models/bkgr0{1,2,3,4,5}.safetensors
//! ```
use crate::trrosetta::config::TrRosettaConfig;
use crate::trrosetta::trrosetta::{TrRosetta, TrRosettaBackground};
use candle_core::{DType, Device, Result};
use candle_nn::VarBuilder;
use log::info;
use std::path::{Path, PathBuf};

pub const ENSEMBLE_SIZE: usize = 5;

pub fn primary_weight_paths(data_dir: impl AsRef<Path>) -> Vec<PathBuf> {
    ["a", "b", "c", "d", "e"]
        .iter()
        .map(|k| {
            data_dir
                .as_ref()
                .join("models")
                .join(format!("model_xa{k}.safetensors"))
        })
        .collect()
}

pub fn background_weight_paths(data_dir: impl AsRef<Path>) -> Vec<PathBuf> {
    (1..=ENSEMBLE_SIZE)
        .map(|n| {
            data_dir
                .as_ref()
                .join("bkgr_models")
                .join(format!("bkgr0{n}.safetensors"))
        })
        .collect()
}

/// `config.json` from the data directory, or the published defaults.
pub fn load_config(data_dir: impl AsRef<Path>) -> Result<TrRosettaConfig> {
    let path = data_dir.as_ref().join("config.json");
    if !path.exists() {
        return Ok(TrRosettaConfig::default());
    }
    let config_str = std::fs::read_to_string(&path)?;
    TrRosettaConfig::from_json_str(&config_str).map_err(candle_core::Error::wrap)
}

fn var_builder(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    if !path.exists() {
        candle_core::bail!("missing weights file {}", path.display());
    }
    unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
}

pub fn load_ensemble(data_dir: impl AsRef<Path>, device: &Device) -> Result<Vec<TrRosetta>> {
    let cfg = load_config(&data_dir)?;
    primary_weight_paths(&data_dir)
        .iter()
        .map(|path| {
            info!("Loading trRosetta weights from {}", path.display());
            TrRosetta::load(var_builder(path, device)?, &cfg)
        })
        .collect()
}

pub fn load_background_ensemble(
    data_dir: impl AsRef<Path>,
    device: &Device,
) -> Result<Vec<TrRosettaBackground>> {
    let cfg = load_config(&data_dir)?;
    background_weight_paths(&data_dir)
        .iter()
        .map(|path| {
            info!("Loading background weights from {}", path.display());
            TrRosettaBackground::load(var_builder(path, device)?, &cfg)
        })
        .collect()
}
