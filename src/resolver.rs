use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::image::MemoryImage;

pub mod expr;

/// Upper bound on chain links: one per distinct word in a 64K space.
pub const MAX_CHAIN_LINKS: usize = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("external chain for '{symbol}' starting at {start:04X}h does not terminate within {MAX_CHAIN_LINKS} links")]
pub struct ChainError {
    pub symbol: String,
    pub start: u16,
}

/// Head of an unresolved chain of references to one external symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalReference {
    pub module: String,
    pub symbol: String,
    pub chain_start: u16,
}

/// Walks the chain whose links are stored in the image itself and
/// overwrites every link with `value` plus that address's recorded offset.
///
/// Returns the number of patched locations.
///
/// # Errors
/// `ChainError` when the walk doesn't reach a zero link within
/// `MAX_CHAIN_LINKS` steps.
pub fn resolve_chain(
    image: &mut MemoryImage,
    reference: &ExternalReference,
    value: u16,
    offsets: &HashMap<u16, u16>,
) -> Result<usize, ChainError> {
    let mut address = reference.chain_start;
    for patched in 1..=MAX_CHAIN_LINKS {
        let next = image.read_word(address);
        let offset = offsets.get(&address).copied().unwrap_or(0);
        image.write_word(address, value.wrapping_add(offset));
        if next == 0 {
            return Ok(patched);
        }
        address = next;
    }
    Err(ChainError {
        symbol: reference.symbol.clone(),
        start: reference.chain_start,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolOwner {
    module_index: usize,
    module: String,
}

/// Public symbols of the whole link.
///
/// A name defined by two different modules is pulled out of the table and
/// remembered with every module that defined it.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    values: BTreeMap<String, u16>,
    owners: HashMap<String, SymbolOwner>,
    duplicates: Vec<(String, Vec<String>)>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits `name`, unless another module already defined it.
    ///
    /// Returns `false` when the definition was a duplicate.
    pub fn define(&mut self, name: &str, value: u16, module_index: usize, module: &str) -> bool {
        let Some(owner) = self.owners.get(name) else {
            self.owners.insert(
                name.to_string(),
                SymbolOwner {
                    module_index,
                    module: module.to_string(),
                },
            );
            self.values.insert(name.to_string(), value);
            return true;
        };
        if owner.module_index == module_index {
            return true;
        }

        let first = owner.module.clone();
        self.values.remove(name);
        if let Some((_, modules)) = self.duplicates.iter_mut().find(|(n, _)| n == name) {
            if !modules.iter().any(|m| m == module) {
                modules.push(module.to_string());
            }
        } else {
            let mut modules = vec![first];
            if !modules.iter().any(|m| m == module) {
                modules.push(module.to_string());
            }
            self.duplicates.push((name.to_string(), modules));
        }
        false
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<u16> {
        self.values.get(name).copied()
    }

    #[must_use]
    pub fn is_known(&self, name: &str) -> bool {
        self.owners.contains_key(name)
    }

    #[must_use]
    pub fn is_duplicate(&self, name: &str) -> bool {
        self.duplicates.iter().any(|(n, _)| n == name)
    }

    /// Duplicated names with their defining modules, in detection order.
    #[must_use]
    pub fn duplicates(&self) -> &[(String, Vec<String>)] {
        &self.duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
