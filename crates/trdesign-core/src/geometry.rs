//! Inter-residue 6D geometry and its discretization.
//!
//! trRosetta describes every residue pair by the CB-CB distance and three
//! orientation angles:
//!
//! - `dist`:  |CB_i - CB_j|
//! - `omega`: dihedral CA_i, CB_i, CB_j, CA_j
//! - `theta`: dihedral N_i, CA_i, CB_i, CB_j
//! - `phi`:   planar angle CA_i, CB_i, CB_j
//!
//! CB is always the ideal virtual CB built from the backbone, so glycine and
//! structures without side chains are handled uniformly.
use crate::error::StructureError;
use crate::residue::{AAAtom, ATOM_TYPE_NUM};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::f64::consts::PI;
use strum::{Display, EnumIter, EnumString};

/// Pairs further apart than this are "no contact".
pub const MAX_CONTACT_DISTANCE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum GeometryChannel {
    Dist,
    Omega,
    Theta,
    Phi,
}

impl GeometryChannel {
    pub const ALL: [GeometryChannel; 4] = [Self::Dist, Self::Omega, Self::Theta, Self::Phi];

    pub fn num_bins(&self) -> usize {
        match self {
            Self::Dist => 37,
            Self::Omega => 25,
            Self::Theta => 25,
            Self::Phi => 13,
        }
    }

    /// `(start, end)` of the equally spaced bin thresholds.
    pub fn domain(&self) -> (f64, f64) {
        match self {
            Self::Dist => (2.0, MAX_CONTACT_DISTANCE),
            Self::Omega | Self::Theta => (-PI, PI),
            Self::Phi => (0.0, PI),
        }
    }

    /// Bin thresholds; bin `k` holds values in `[t[k-1], t[k])`.
    pub fn thresholds(&self) -> Vec<f64> {
        let (start, end) = self.domain();
        linspace(start, end, self.num_bins())
    }
}

pub fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    match num {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Left-closed digitization: the number of thresholds `<= value`.
///
/// Values at or beyond the last threshold are clamped into the last bin.
pub fn digitize(value: f64, thresholds: &[f64]) -> usize {
    let index = thresholds.partition_point(|&t| t <= value);
    index.min(thresholds.len().saturating_sub(1))
}

type Vec3 = [f64; 3];

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn scale(a: Vec3, s: f64) -> Vec3 {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

/// Ideal CB position from the backbone N, CA and C atoms.
pub fn virtual_cb(n: Vec3, ca: Vec3, c: Vec3) -> Vec3 {
    let b = sub(ca, n);
    let c = sub(c, ca);
    let a = cross(b, c);
    [0, 1, 2].map(|k: usize| -0.58273431 * a[k] + 0.56802827 * b[k] - 0.54067466 * c[k] + ca[k])
}

/// Dihedral angle in `(-pi, pi]` defined by four points.
pub fn dihedral(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> f64 {
    let b0 = sub(a, b);
    let b1 = sub(c, b);
    let b1 = scale(b1, 1.0 / norm(b1));
    let b2 = sub(d, c);
    let v = sub(b0, scale(b1, dot(b0, b1)));
    let w = sub(b2, scale(b1, dot(b2, b1)));
    let x = dot(v, w);
    let y = dot(cross(b1, v), w);
    y.atan2(x)
}

/// Planar angle at `b` in `[0, pi]`.
pub fn angle(a: Vec3, b: Vec3, c: Vec3) -> f64 {
    let v = sub(a, b);
    let w = sub(c, b);
    let cos = dot(v, w) / (norm(v) * norm(w));
    cos.clamp(-1.0, 1.0).acos()
}

/// Raw pairwise geometry, `[L, L]` per quantity.
#[derive(Debug, Clone)]
pub struct PairGeometry {
    pub dist: Array2<f64>,
    pub omega: Array2<f64>,
    pub theta: Array2<f64>,
    pub phi: Array2<f64>,
    /// residue has N, CA and C
    pub valid: Vec<bool>,
}

impl PairGeometry {
    pub fn from_atoms(
        positions: ArrayView3<f32>,
        atom_mask: ArrayView2<f32>,
    ) -> Result<Self, StructureError> {
        let length = positions.shape()[0];
        if positions.shape() != [length, ATOM_TYPE_NUM, 3] {
            return Err(StructureError::Shape(format!(
                "positions have shape {:?}, expected [L, {ATOM_TYPE_NUM}, 3]",
                positions.shape()
            )));
        }
        if atom_mask.shape() != [length, ATOM_TYPE_NUM] {
            return Err(StructureError::Shape(format!(
                "atom mask has shape {:?}, expected [{length}, {ATOM_TYPE_NUM}]",
                atom_mask.shape()
            )));
        }

        let atom = |i: usize, a: AAAtom| -> Vec3 {
            let k = a.to_index();
            [0, 1, 2].map(|x: usize| positions[[i, k, x]] as f64)
        };
        let backbone = [AAAtom::N, AAAtom::CA, AAAtom::C];
        let valid: Vec<bool> = (0..length)
            .map(|i| backbone.iter().all(|a| atom_mask[[i, a.to_index()]] > 0.0))
            .collect();

        let n: Vec<Vec3> = (0..length).map(|i| atom(i, AAAtom::N)).collect();
        let ca: Vec<Vec3> = (0..length).map(|i| atom(i, AAAtom::CA)).collect();
        let cb: Vec<Vec3> = (0..length)
            .map(|i| virtual_cb(n[i], ca[i], atom(i, AAAtom::C)))
            .collect();

        let mut dist = Array2::zeros((length, length));
        let mut omega = Array2::zeros((length, length));
        let mut theta = Array2::zeros((length, length));
        let mut phi = Array2::zeros((length, length));
        for i in 0..length {
            for j in 0..length {
                if i == j || !valid[i] || !valid[j] {
                    continue;
                }
                dist[[i, j]] = norm(sub(cb[i], cb[j]));
                omega[[i, j]] = dihedral(ca[i], cb[i], cb[j], ca[j]);
                theta[[i, j]] = dihedral(n[i], ca[i], cb[i], cb[j]);
                phi[[i, j]] = angle(ca[i], cb[i], cb[j]);
            }
        }

        Ok(Self {
            dist,
            omega,
            theta,
            phi,
            valid,
        })
    }

    pub fn len(&self) -> usize {
        self.valid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    pub fn channel(&self, channel: GeometryChannel) -> &Array2<f64> {
        match channel {
            GeometryChannel::Dist => &self.dist,
            GeometryChannel::Omega => &self.omega,
            GeometryChannel::Theta => &self.theta,
            GeometryChannel::Phi => &self.phi,
        }
    }

    /// Pairs that collapse to the no-contact bin: self pairs, pairs beyond
    /// the contact distance and pairs touching an incomplete residue.
    pub fn no_contact_mask(&self) -> Array2<bool> {
        Array2::from_shape_fn((self.len(), self.len()), |(i, j)| {
            i == j
                || !self.valid[i]
                || !self.valid[j]
                || self.dist[[i, j]] > MAX_CONTACT_DISTANCE
        })
    }
}

/// One-hot geometry distributions, `[L, L, bins]` per channel.
#[derive(Debug, Clone)]
pub struct BinnedGeometry {
    pub dist: Array3<f32>,
    pub omega: Array3<f32>,
    pub theta: Array3<f32>,
    pub phi: Array3<f32>,
}

impl BinnedGeometry {
    pub fn len(&self) -> usize {
        self.dist.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, channel: GeometryChannel) -> &Array3<f32> {
        match channel {
            GeometryChannel::Dist => &self.dist,
            GeometryChannel::Omega => &self.omega,
            GeometryChannel::Theta => &self.theta,
            GeometryChannel::Phi => &self.phi,
        }
    }

    /// Bin index of each pair for one channel.
    pub fn bin_indices(&self, channel: GeometryChannel) -> Array2<usize> {
        let one_hot = self.channel(channel);
        let length = self.len();
        Array2::from_shape_fn((length, length), |(i, j)| {
            one_hot
                .slice(ndarray::s![i, j, ..])
                .iter()
                .position(|&v| v > 0.5)
                .unwrap_or(0)
        })
    }
}

fn one_hot_bins(
    values: &Array2<f64>,
    mask: &Array2<bool>,
    channel: GeometryChannel,
) -> Array3<f32> {
    let thresholds = channel.thresholds();
    let length = values.shape()[0];
    let mut out = Array3::zeros((length, length, channel.num_bins()));
    for ((i, j), &value) in values.indexed_iter() {
        let bin = if mask[[i, j]] {
            0
        } else {
            digitize(value, &thresholds)
        };
        out[[i, j, bin]] = 1.0;
    }
    out
}

/// Discretize the pairwise geometry of atom37 coordinates into one-hot bins.
pub fn bin_geometry(
    positions: ArrayView3<f32>,
    atom_mask: ArrayView2<f32>,
) -> Result<BinnedGeometry, StructureError> {
    let geometry = PairGeometry::from_atoms(positions, atom_mask)?;
    let mask = geometry.no_contact_mask();
    let bins = |channel| one_hot_bins(geometry.channel(channel), &mask, channel);
    Ok(BinnedGeometry {
        dist: bins(GeometryChannel::Dist),
        omega: bins(GeometryChannel::Omega),
        theta: bins(GeometryChannel::Theta),
        phi: bins(GeometryChannel::Phi),
    })
}
