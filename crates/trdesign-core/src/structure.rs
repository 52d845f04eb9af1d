//! Protein structure source.
//!
//! Reads a PDB/mmCIF file with `pdbtbx` and lays the protein residues out as
//! atom37 coordinate arrays, the form consumed by the geometry binner.
use crate::error::StructureError;
use crate::geometry::{bin_geometry, BinnedGeometry};
use crate::residue::{aa3to1, restype_char, restype_index, AAAtom, ATOM_TYPE_NUM};
use itertools::Itertools;
use log::{debug, warn};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use pdbtbx::PDB;
use std::path::Path;
use std::str::FromStr;

/// Author numbering of a residue: chain, residue number and insertion code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResidueId {
    pub chain: String,
    pub number: isize,
    pub insertion_code: Option<String>,
}

impl std::fmt::Display for ResidueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.chain,
            self.number,
            self.insertion_code.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProteinStructure {
    /// atom37 coordinates `[L, 37, 3]`
    positions: Array3<f32>,
    /// atom37 presence `[L, 37]`, 1.0 where the atom exists
    atom_mask: Array2<f32>,
    /// residue type per position, `UNKNOWN_RESTYPE` for non-standard residues
    aatype: Vec<usize>,
    residue_ids: Vec<ResidueId>,
}

impl ProteinStructure {
    /// Parse a structure file. `chains` is a comma separated list of chain ids
    /// (`"A"` or `"A,B"`); `None` keeps every chain in file order.
    pub fn from_pdb_file(
        path: impl AsRef<Path>,
        chains: Option<&str>,
    ) -> Result<Self, StructureError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let (pdb, warnings) = pdbtbx::open(path.as_str()).map_err(|errors| {
            StructureError::Parse {
                path: path.clone(),
                message: errors.iter().map(|e| e.to_string()).join("; "),
            }
        })?;
        for warning in &warnings {
            debug!("{path}: {warning}");
        }
        Self::from_pdb(&pdb, chains)
    }

    pub fn from_pdb(pdb: &PDB, chains: Option<&str>) -> Result<Self, StructureError> {
        let requested: Option<Vec<&str>> = chains.map(|c| {
            c.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect()
        });

        let selected: Vec<&pdbtbx::Chain> = match &requested {
            None => pdb.chains().collect(),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    pdb.chains()
                        .find(|chain| chain.id() == *id)
                        .ok_or_else(|| StructureError::UnknownChain(id.to_string()))
                })
                .collect::<Result<_, _>>()?,
        };

        let mut coords: Vec<f32> = Vec::new();
        let mut mask: Vec<f32> = Vec::new();
        let mut aatype = Vec::new();
        let mut residue_ids = Vec::new();

        for chain in selected {
            let before = aatype.len();
            for residue in chain.residues() {
                if residue.atoms().all(|atom| atom.hetero()) {
                    continue;
                }
                let name = residue.name().unwrap_or("UNK");
                let code = aa3to1(name);
                if code == 'X' {
                    warn!(
                        "Non-standard residue {name} at {}{}, treated as unknown",
                        chain.id(),
                        residue.serial_number()
                    );
                }

                let mut res_coords = [0f32; ATOM_TYPE_NUM * 3];
                let mut res_mask = [0f32; ATOM_TYPE_NUM];
                for atom in residue.atoms() {
                    let Ok(slot) = AAAtom::from_str(atom.name()) else {
                        continue;
                    };
                    let idx = slot.to_index();
                    // first conformer wins
                    if res_mask[idx] > 0.0 {
                        continue;
                    }
                    let (x, y, z) = atom.pos();
                    res_coords[idx * 3] = x as f32;
                    res_coords[idx * 3 + 1] = y as f32;
                    res_coords[idx * 3 + 2] = z as f32;
                    res_mask[idx] = 1.0;
                }

                coords.extend_from_slice(&res_coords);
                mask.extend_from_slice(&res_mask);
                aatype.push(restype_index(code));
                let (number, insertion_code) = residue.id();
                residue_ids.push(ResidueId {
                    chain: chain.id().to_string(),
                    number,
                    insertion_code: insertion_code.map(str::to_string),
                });
            }
            if requested.is_some() && aatype.len() == before {
                return Err(StructureError::EmptyChain(chain.id().to_string()));
            }
        }

        if aatype.is_empty() {
            return Err(StructureError::EmptyStructure);
        }

        let length = aatype.len();
        let positions = Array3::from_shape_vec((length, ATOM_TYPE_NUM, 3), coords)
            .map_err(|e| StructureError::Shape(e.to_string()))?;
        let atom_mask = Array2::from_shape_vec((length, ATOM_TYPE_NUM), mask)
            .map_err(|e| StructureError::Shape(e.to_string()))?;

        Self::from_arrays(positions, atom_mask, aatype, residue_ids)
    }

    /// Assemble a structure from already-featurized arrays.
    pub fn from_arrays(
        positions: Array3<f32>,
        atom_mask: Array2<f32>,
        aatype: Vec<usize>,
        residue_ids: Vec<ResidueId>,
    ) -> Result<Self, StructureError> {
        let length = aatype.len();
        if length == 0 {
            return Err(StructureError::EmptyStructure);
        }
        if positions.dim() != (length, ATOM_TYPE_NUM, 3) {
            return Err(StructureError::Shape(format!(
                "positions have shape {:?}, expected [{length}, {ATOM_TYPE_NUM}, 3]",
                positions.shape()
            )));
        }
        if atom_mask.dim() != (length, ATOM_TYPE_NUM) {
            return Err(StructureError::Shape(format!(
                "atom mask has shape {:?}, expected [{length}, {ATOM_TYPE_NUM}]",
                atom_mask.shape()
            )));
        }
        if residue_ids.len() != length {
            return Err(StructureError::Shape(format!(
                "{} residue ids for {length} residues",
                residue_ids.len()
            )));
        }
        Ok(Self {
            positions,
            atom_mask,
            aatype,
            residue_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.aatype.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aatype.is_empty()
    }

    pub fn positions(&self) -> ArrayView3<'_, f32> {
        self.positions.view()
    }

    pub fn atom_mask(&self) -> ArrayView2<'_, f32> {
        self.atom_mask.view()
    }

    pub fn aatype(&self) -> &[usize] {
        &self.aatype
    }

    pub fn residue_ids(&self) -> &[ResidueId] {
        &self.residue_ids
    }

    /// One-letter sequence.
    pub fn sequence(&self) -> String {
        self.aatype.iter().map(|&a| restype_char(a)).collect()
    }

    /// Restrict to the residues at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, StructureError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.len()) {
            return Err(StructureError::IndexOutOfRange {
                index,
                length: self.len(),
            });
        }
        Self::from_arrays(
            self.positions.select(Axis(0), indices),
            self.atom_mask.select(Axis(0), indices),
            indices.iter().map(|&i| self.aatype[i]).collect(),
            indices.iter().map(|&i| self.residue_ids[i].clone()).collect(),
        )
    }

    /// The discretized pairwise geometry of this structure.
    pub fn binned_geometry(&self) -> Result<BinnedGeometry, StructureError> {
        bin_geometry(self.positions.view(), self.atom_mask.view())
    }
}
