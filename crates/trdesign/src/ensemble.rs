//! Ensembles of interchangeable networks and the random key that samples them.
use crate::error::{DesignError, Result};
use crate::options::ModelSampling;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A splittable random key.
///
/// Splitting yields the key to keep and a subkey to consume, so a session
/// can advance its randomness one step per run and replay it from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrngKey(u64);

impl PrngKey {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// `(next, subkey)`
    pub fn split(&self) -> (PrngKey, PrngKey) {
        let mut rng = StdRng::seed_from_u64(self.0);
        (Self(rng.gen()), Self(rng.gen()))
    }

    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }
}

/// Pretrained networks that can stand in for one another.
#[derive(Debug)]
pub struct Ensemble<P> {
    members: Vec<P>,
}

impl<P> Ensemble<P> {
    pub fn new(members: Vec<P>) -> Result<Self> {
        if members.is_empty() {
            return Err(DesignError::Configuration(
                "an ensemble needs at least one member".to_string(),
            ));
        }
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, index: usize) -> Option<&P> {
        self.members.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.members.iter()
    }

    /// Member indices for one run, and the key to keep afterwards.
    ///
    /// With sampling on and fewer members requested than available, the key
    /// is split once and `num` distinct members are drawn with the subkey.
    /// Otherwise members `0..num` are used and the key is returned unchanged.
    pub fn select(&self, sampling: &ModelSampling, key: PrngKey) -> Result<(Vec<usize>, PrngKey)> {
        let num = sampling.num;
        if num == 0 || num > self.len() {
            return Err(DesignError::Configuration(format!(
                "model.num must be between 1 and {}, got {num}",
                self.len()
            )));
        }
        if sampling.sample && num != self.len() {
            let (next, subkey) = key.split();
            let members = rand::seq::index::sample(&mut subkey.rng(), self.len(), num).into_vec();
            debug!("sampled ensemble members {members:?}");
            Ok((members, next))
        } else {
            Ok(((0..num).collect(), key))
        }
    }
}
