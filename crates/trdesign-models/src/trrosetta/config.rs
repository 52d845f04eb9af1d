use serde::Deserialize;

/// Hyper-parameters of the trRosetta residual network.
///
/// Deserialized from the `config.json` shipped next to the converted weights;
/// missing keys take the published trRosetta values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrRosettaConfig {
    /// Width of every 2D feature map in the trunk.
    pub num_filters: usize,
    pub num_blocks: usize,
    /// Dilation of block `i` is `dilation_cycle[i % len]`.
    pub dilation_cycle: Vec<usize>,
    /// Channels of the random input fed to the background network.
    pub background_channels: usize,
    pub norm_eps: f64,
}

impl Default for TrRosettaConfig {
    fn default() -> Self {
        Self {
            num_filters: 64,
            num_blocks: 61,
            dilation_cycle: vec![1, 2, 4, 8, 16],
            background_channels: 64,
            norm_eps: 1e-5,
        }
    }
}

impl TrRosettaConfig {
    /// A small network for tests and smoke runs.
    pub fn tiny() -> Self {
        Self {
            num_filters: 8,
            num_blocks: 2,
            dilation_cycle: vec![1],
            background_channels: 4,
            norm_eps: 1e-5,
        }
    }

    pub fn dilation(&self, block: usize) -> usize {
        match self.dilation_cycle.len() {
            0 => 1,
            n => self.dilation_cycle[block % n],
        }
    }

    pub fn from_json_str(config: &str) -> serde_json::Result<Self> {
        serde_json::from_str(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let cfg = TrRosettaConfig::from_json_str(r#"{"num_blocks": 12}"#).unwrap();
        assert_eq!(cfg.num_blocks, 12);
        assert_eq!(cfg.num_filters, 64);
        assert_eq!(cfg.dilation(0), 1);
        assert_eq!(cfg.dilation(4), 16);
        assert_eq!(cfg.dilation(5), 1);
    }
}
