use strum::{Display, EnumIter, EnumString};

/// Number of designable amino-acid types. Index 20 is reserved for unknown residues.
pub const NUM_RESTYPES: usize = 20;
pub const UNKNOWN_RESTYPE: usize = 20;

/// One-letter codes in model column order (AlphaFold `restype_order`).
pub const RESTYPES: [char; NUM_RESTYPES] = [
    'A', 'R', 'N', 'D', 'C', 'Q', 'E', 'G', 'H', 'I', 'L', 'K', 'M', 'F', 'P', 'S', 'T', 'W',
    'Y', 'V',
];

#[rustfmt::skip]
pub fn aa3to1(aa: &str) -> char {
    match aa {
        "ALA" => 'A', "CYS" => 'C', "ASP" => 'D',
        "GLU" => 'E', "PHE" => 'F', "GLY" => 'G',
        "HIS" => 'H', "ILE" => 'I', "LYS" => 'K',
        "LEU" => 'L', "MET" => 'M', "ASN" => 'N',
        "PRO" => 'P', "GLN" => 'Q', "ARG" => 'R',
        "SER" => 'S', "THR" => 'T', "VAL" => 'V',
        "TRP" => 'W', "TYR" => 'Y', "MSE" => 'M',
        _     => 'X',
    }
}

/// Column index of a one-letter code, `UNKNOWN_RESTYPE` for anything else.
pub fn restype_index(aa: char) -> usize {
    RESTYPES
        .iter()
        .position(|&r| r == aa.to_ascii_uppercase())
        .unwrap_or(UNKNOWN_RESTYPE)
}

pub fn restype_char(index: usize) -> char {
    RESTYPES.get(index).copied().unwrap_or('X')
}

/// Atom37 slots, the AlphaFold per-residue atom layout.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum AAAtom {
    N = 0,    CA = 1,   C = 2,    CB = 3,   O = 4,
    CG = 5,   CG1 = 6,  CG2 = 7,  OG = 8,   OG1 = 9,
    SG = 10,  CD = 11,  CD1 = 12, CD2 = 13, ND1 = 14,
    ND2 = 15, OD1 = 16, OD2 = 17, SD = 18,  CE = 19,
    CE1 = 20, CE2 = 21, CE3 = 22, NE = 23,  NE1 = 24,
    NE2 = 25, OE1 = 26, OE2 = 27, CH2 = 28, NH1 = 29,
    NH2 = 30, OH = 31,  CZ = 32,  CZ2 = 33, CZ3 = 34,
    NZ = 35,  OXT = 36,
}

pub const ATOM_TYPE_NUM: usize = 37;

impl AAAtom {
    pub fn to_index(&self) -> usize {
        *self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_restype_roundtrip() {
        for (idx, aa) in RESTYPES.iter().enumerate() {
            assert_eq!(restype_index(*aa), idx);
            assert_eq!(restype_char(idx), *aa);
        }
        assert_eq!(restype_index('X'), UNKNOWN_RESTYPE);
        assert_eq!(restype_index('b'), UNKNOWN_RESTYPE);
        assert_eq!(restype_char(UNKNOWN_RESTYPE), 'X');
    }

    #[test]
    fn test_atom37_layout() {
        assert_eq!(AAAtom::iter().count(), ATOM_TYPE_NUM);
        assert_eq!(AAAtom::from_str("CB").unwrap().to_index(), 3);
        assert_eq!(AAAtom::OXT.to_index(), 36);
        assert!(AAAtom::from_str("H1").is_err());
    }

    #[test]
    fn test_three_letter_codes() {
        assert_eq!(aa3to1("TRP"), 'W');
        assert_eq!(aa3to1("MSE"), 'M');
        assert_eq!(aa3to1("HOH"), 'X');
    }
}
