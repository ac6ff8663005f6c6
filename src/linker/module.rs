use std::collections::HashSet;

use crate::format::rel::{ExtensionItem, LinkRecord};
use crate::format::AddressSpace;
use crate::layout::ModulePlacement;
use crate::range::AddressRange;
use crate::resolver::expr::{ModuleBases, PendingExpression};
use crate::resolver::ExternalReference;

use super::{LinkError, LinkSession};

/// Load cursor and bookkeeping for the program being processed.
struct ModuleCursor {
    index: usize,
    space: AddressSpace,
    location: u16,
    common_base: u16,
    defined: HashSet<String>,
    absolute: Option<AddressRange>,
    wrapped: bool,
}

impl ModuleCursor {
    fn effective(&self, placement: &ModulePlacement, space: AddressSpace, value: u16) -> u16 {
        self.bases(placement).relocate(space, value)
    }

    fn cover_absolute(&mut self, start: u16, end: u16) {
        match &mut self.absolute {
            Some(range) => range.cover(start, end),
            None => self.absolute = Some(AddressRange::new(AddressSpace::Absolute, start, end)),
        }
    }

    fn bases(&self, placement: &ModulePlacement) -> ModuleBases {
        ModuleBases {
            code: placement.code_start,
            data: placement.data_start,
            common: self.common_base,
        }
    }
}

impl LinkSession<'_> {
    /// Walks one program's records, loading bytes into the image and
    /// collecting symbols, externals and expressions for later resolution.
    pub(super) fn process_module(
        &mut self,
        mut placement: ModulePlacement,
        records: &[LinkRecord],
    ) -> Result<ModulePlacement, LinkError> {
        let mut cursor = ModuleCursor {
            index: self.placements.len(),
            space: AddressSpace::Code,
            location: placement.code_start,
            common_base: placement.common_start,
            defined: HashSet::new(),
            absolute: None,
            wrapped: false,
        };

        let mut i = 0;
        while i < records.len() {
            match &records[i] {
                LinkRecord::RawBytes(bytes) => {
                    self.load_bytes(&mut cursor, &placement.name, bytes);
                }
                LinkRecord::RelocatableAddress {
                    space,
                    value,
                    is_byte,
                } => {
                    let address = cursor.effective(&placement, *space, *value);
                    let [lo, hi] = address.to_le_bytes();
                    if *is_byte {
                        self.load_bytes(&mut cursor, &placement.name, &[lo]);
                    } else {
                        self.load_bytes(&mut cursor, &placement.name, &[lo, hi]);
                    }
                }
                LinkRecord::SetLocationCounter { space, value } => {
                    let location = cursor.effective(&placement, *space, *value);
                    cursor.location = location;
                    cursor.space = *space;
                    if *space == AddressSpace::Absolute {
                        cursor.cover_absolute(location, location);
                    }
                }
                LinkRecord::DefineEntryPoint { space, value, name } => {
                    if cursor.defined.insert(name.clone()) {
                        let address = cursor.effective(&placement, *space, *value);
                        self.symbols
                            .define(name, address, cursor.index, &placement.name);
                        placement.public_symbols.push(name.clone());
                    }
                }
                LinkRecord::ChainExternal { space, value, name } => {
                    // absolute zero marks a symbol only used inside expressions
                    if *space != AddressSpace::Absolute || *value != 0 {
                        self.externals.push(ExternalReference {
                            module: placement.name.clone(),
                            symbol: name.clone(),
                            chain_start: cursor.effective(&placement, *space, *value),
                        });
                    }
                }
                LinkRecord::RequestLibrarySearch(name) => self.request_library(name)?,
                LinkRecord::ExternalPlusOffset(value) => {
                    self.offsets.insert(cursor.location, *value);
                }
                LinkRecord::ExternalMinusOffset(value) => {
                    self.offsets.insert(cursor.location, value.wrapping_neg());
                }
                LinkRecord::SelectCommonBlock(name) => match self.commons.find(name) {
                    Some(block) => cursor.common_base = block.address,
                    None => self.error(format!(
                        "program '{}' selects undeclared common block '{name}'",
                        placement.name
                    ))?,
                },
                LinkRecord::Extension(_) => {
                    let start = i;
                    while let Some(LinkRecord::Extension(_)) = records.get(i) {
                        i += 1;
                    }
                    let items: Vec<ExtensionItem> = records[start..i]
                        .iter()
                        .filter_map(|record| match record {
                            LinkRecord::Extension(item) => Some(item.clone()),
                            _ => None,
                        })
                        .collect();
                    self.expressions.push(PendingExpression::capture(
                        &placement.name,
                        cursor.location,
                        items,
                        cursor.bases(&placement),
                    ));
                    continue;
                }
                LinkRecord::EndProgram { .. } => break,
                LinkRecord::ProgramName(_)
                | LinkRecord::EntrySymbol(_)
                | LinkRecord::ProgramAreaSize(_)
                | LinkRecord::DataAreaSize(_)
                | LinkRecord::DefineCommonSize { .. }
                | LinkRecord::EndFile => {}
            }
            i += 1;
        }

        placement.ranges.extend(cursor.absolute);
        Ok(placement)
    }

    fn load_bytes(&mut self, cursor: &mut ModuleCursor, module: &str, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let start = cursor.location;
        let crossed = self.image.write_bytes(start, bytes);
        // the image is 64K, so only the low 16 bits of the length matter
        let advance = (bytes.len() & 0xffff) as u16;
        cursor.location = start.wrapping_add(advance);
        // reaching the top of memory exactly also moves the counter to 0000h
        let wrapped = usize::from(start) + bytes.len() >= 0x10000;

        if cursor.space == AddressSpace::Absolute {
            let end = if crossed {
                0xffff
            } else {
                start.wrapping_add(advance).wrapping_sub(1)
            };
            cursor.cover_absolute(start, end);
        }

        if wrapped && !cursor.wrapped {
            cursor.wrapped = true;
            self.pc_wrapped = true;
            self.warning(format!(
                "location counter of program '{module}' wrapped past FFFFh to 0000h"
            ));
        }
    }
}
