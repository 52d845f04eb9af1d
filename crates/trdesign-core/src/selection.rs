//! Position selectors.
//!
//! A selector is a comma separated list of residue numbers or inclusive
//! ranges in author numbering, each optionally prefixed with a chain id:
//! `"A1-10,A15,B3-4"`. Items without a chain id match the number on every
//! chain. The result lists internal indices in selector order, without
//! duplicates.
use crate::error::StructureError;
use crate::structure::{ProteinStructure, ResidueId};
use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectorItem {
    chain: Option<String>,
    start: isize,
    end: isize,
}

fn parse_item(selector: &str, item: &str) -> Result<SelectorItem, StructureError> {
    let invalid = |reason: String| StructureError::InvalidSelector {
        selector: selector.to_string(),
        reason,
    };

    let split = item
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .ok_or_else(|| invalid(format!("'{item}' has no residue number")))?;
    let (chain, range) = item.split_at(split);
    let chain = (!chain.is_empty()).then(|| chain.to_string());

    // a leading '-' belongs to a negative start number
    let dash = range
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i);
    let parse_number = |s: &str| {
        s.parse::<isize>()
            .map_err(|_| invalid(format!("'{s}' is not a residue number")))
    };
    let (start, end) = match dash {
        Some(i) => (parse_number(&range[..i])?, parse_number(&range[i + 1..])?),
        None => {
            let n = parse_number(range)?;
            (n, n)
        }
    };
    if start > end {
        return Err(invalid(format!("range {start}-{end} is reversed")));
    }
    Ok(SelectorItem { chain, start, end })
}

impl SelectorItem {
    fn matches(&self, id: &ResidueId, number: isize) -> bool {
        id.number == number && self.chain.as_deref().map_or(true, |c| c == id.chain)
    }
}

/// Map a human-readable position selector onto internal residue indices.
pub fn select_positions(
    selector: &str,
    structure: &ProteinStructure,
) -> Result<Vec<usize>, StructureError> {
    let items: Vec<SelectorItem> = selector
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_item(selector, item))
        .collect::<Result<_, _>>()?;

    if items.is_empty() {
        return Err(StructureError::InvalidSelector {
            selector: selector.to_string(),
            reason: "no positions given".to_string(),
        });
    }

    let ids = structure.residue_ids();
    let mut indices = Vec::new();
    for item in &items {
        for number in item.start..=item.end {
            let before = indices.len();
            indices.extend(
                ids.iter()
                    .enumerate()
                    .filter(|(_, id)| item.matches(id, number))
                    .map(|(i, _)| i),
            );
            if indices.len() == before {
                return Err(StructureError::UnmappablePosition(format!(
                    "{}{number}",
                    item.chain.as_deref().unwrap_or("")
                )));
            }
        }
    }
    Ok(indices.into_iter().unique().collect())
}
