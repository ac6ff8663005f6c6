use std::collections::HashMap;

use thiserror::Error;

use crate::format::rel::LinkRecord;
use crate::format::AddressSpace;
use crate::range::AddressRange;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("sequencing mode can't be changed after a data segment address has been set, ignored")]
    IllegalModeSwitch,
    #[error("alignment value must be greater than zero")]
    ZeroAlignment,
    #[error("aligning {segment} segment address {address:04X}h to {value} goes past FFFFh")]
    AlignmentOverflow {
        segment: &'static str,
        address: u16,
        value: u16,
    },
    #[error("data segment address can only be aligned after a data segment address has been set")]
    DataAlignmentWithoutDataAddress,
}

/// How consecutive modules' segments are laid out in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequencingMode {
    #[default]
    DataBeforeCode,
    CodeBeforeData,
    CombineSameSegment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentSizes {
    pub code: u16,
    pub data: u16,
    pub commons: u16,
}

impl SegmentSizes {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code == 0 && self.data == 0 && self.commons == 0
    }
}

/// Segment start addresses computed for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub code_start: u16,
    pub data_start: u16,
    pub common_start: u16,
    pub sizes: SegmentSizes,
}

impl SegmentLayout {
    #[must_use]
    pub fn code_range(&self) -> Option<AddressRange> {
        AddressRange::with_size(AddressSpace::Code, self.code_start, self.sizes.code)
    }

    #[must_use]
    pub fn data_range(&self) -> Option<AddressRange> {
        AddressRange::with_size(AddressSpace::Data, self.data_start, self.sizes.data)
    }

    fn code_end(&self) -> Option<u16> {
        (self.sizes.code > 0).then(|| end_of(self.code_start, self.sizes.code))
    }

    /// End of the commons-then-data region.
    fn data_end(&self) -> Option<u16> {
        let size = self.sizes.commons.wrapping_add(self.sizes.data);
        (size > 0).then(|| end_of(self.common_start, size))
    }
}

fn end_of(start: u16, size: u16) -> u16 {
    start.wrapping_add(size).wrapping_sub(1)
}

/// Tracks the sequencing mode and pending explicit addresses, and computes
/// where the next module's segments go.
#[derive(Debug, Clone, Default)]
pub struct SegmentPlanner {
    mode: SequencingMode,
    next_code: Option<u16>,
    next_data: Option<u16>,
    last_code_end: Option<u16>,
    last_data_end: Option<u16>,
    last_max_end: Option<u16>,
}

impl SegmentPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mode(&self) -> SequencingMode {
        self.mode
    }

    pub fn set_code_address(&mut self, address: u16) {
        self.next_code = Some(address);
    }

    /// Setting a data address switches to combined placement for good.
    pub fn set_data_address(&mut self, address: u16) {
        self.next_data = Some(address);
        self.mode = SequencingMode::CombineSameSegment;
    }

    /// # Errors
    /// `LayoutError::IllegalModeSwitch` once combined placement is active; the
    /// mode is left unchanged.
    pub fn set_mode(&mut self, mode: SequencingMode) -> Result<(), LayoutError> {
        if self.mode == SequencingMode::CombineSameSegment {
            return Err(LayoutError::IllegalModeSwitch);
        }
        self.mode = mode;
        Ok(())
    }

    /// Rounds the pending code address up to a multiple of `value`.
    ///
    /// # Errors
    /// Zero alignment, or a result past the top of memory.
    pub fn align_code(&mut self, value: u16) -> Result<(), LayoutError> {
        let base = self.next_code.unwrap_or_else(|| self.default_code_start());
        self.next_code = Some(align_up(base, value, "code")?);
        Ok(())
    }

    /// Rounds the pending data address up to a multiple of `value`.
    ///
    /// # Errors
    /// Zero alignment, a result past the top of memory, or combined placement
    /// not being active yet.
    pub fn align_data(&mut self, value: u16) -> Result<(), LayoutError> {
        if value == 0 {
            return Err(LayoutError::ZeroAlignment);
        }
        if self.mode != SequencingMode::CombineSameSegment {
            return Err(LayoutError::DataAlignmentWithoutDataAddress);
        }
        let base = self.next_data.unwrap_or_else(|| after(self.last_data_end));
        self.next_data = Some(align_up(base, value, "data")?);
        Ok(())
    }

    #[must_use]
    pub fn plan(&self, sizes: SegmentSizes) -> SegmentLayout {
        let (code_start, common_start, data_start) = match self.mode {
            SequencingMode::DataBeforeCode => {
                // the explicit code address seeds the start of the commons/data region
                let common_start = self.next_code.unwrap_or_else(|| after(self.last_max_end));
                let data_start = common_start.wrapping_add(sizes.commons);
                let code_start = data_start.wrapping_add(sizes.data);
                (code_start, common_start, data_start)
            }
            SequencingMode::CodeBeforeData => {
                let code_start = self.next_code.unwrap_or_else(|| after(self.last_max_end));
                let common_start = code_start.wrapping_add(sizes.code);
                let data_start = common_start.wrapping_add(sizes.commons);
                (code_start, common_start, data_start)
            }
            SequencingMode::CombineSameSegment => {
                let code_start = self.next_code.unwrap_or_else(|| after(self.last_code_end));
                let common_start = self.next_data.unwrap_or_else(|| after(self.last_data_end));
                let data_start = common_start.wrapping_add(sizes.commons);
                (code_start, common_start, data_start)
            }
        };
        SegmentLayout {
            code_start,
            data_start,
            common_start,
            sizes,
        }
    }

    /// Records a placed module's ends and consumes the explicit addresses it used.
    pub fn commit(&mut self, layout: &SegmentLayout) {
        let code_end = layout.code_end();
        let data_end = layout.data_end();
        if code_end.is_some() {
            self.last_code_end = code_end;
        }
        if data_end.is_some() {
            self.last_data_end = data_end;
        }
        if let Some(max_end) = max_end(code_end, data_end) {
            self.last_max_end = Some(max_end);
        }

        match self.mode {
            SequencingMode::CombineSameSegment => {
                if code_end.is_some() {
                    self.next_code = None;
                }
                if data_end.is_some() {
                    self.next_data = None;
                }
            }
            SequencingMode::DataBeforeCode | SequencingMode::CodeBeforeData => {
                if !layout.sizes.is_empty() {
                    self.next_code = None;
                }
            }
        }
    }

    fn default_code_start(&self) -> u16 {
        match self.mode {
            SequencingMode::CombineSameSegment => after(self.last_code_end),
            SequencingMode::DataBeforeCode | SequencingMode::CodeBeforeData => {
                after(self.last_max_end)
            }
        }
    }
}

fn after(end: Option<u16>) -> u16 {
    end.map_or(0, |e| e.wrapping_add(1))
}

fn max_end(a: Option<u16>, b: Option<u16>) -> Option<u16> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn align_up(address: u16, value: u16, segment: &'static str) -> Result<u16, LayoutError> {
    if value == 0 {
        return Err(LayoutError::ZeroAlignment);
    }
    let value32 = u32::from(value);
    let aligned = u32::from(address).div_ceil(value32) * value32;
    u16::try_from(aligned).map_err(|_| LayoutError::AlignmentOverflow {
        segment,
        address,
        value,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonBlock {
    pub name: String,
    pub address: u16,
    pub size: u16,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "common block '{name}' is declared with size {new_size} in program '{module}', larger than the size {recorded_size} declared in program '{owner}'"
)]
pub struct CommonSizeConflict {
    pub name: String,
    pub module: String,
    pub new_size: u16,
    pub owner: String,
    pub recorded_size: u16,
}

/// Commons newly registered by one module, before its base is known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonAllocation {
    pub new_blocks: Vec<usize>,
    pub size: u16,
    pub conflicts: Vec<CommonSizeConflict>,
}

/// All common blocks of a link, keyed case-insensitively by name.
#[derive(Debug, Clone, Default)]
pub struct CommonBlockTable {
    blocks: Vec<CommonBlock>,
    index: HashMap<String, usize>,
}

impl CommonBlockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every `DefineCommonSize` of a module's records.
    ///
    /// New blocks get offsets from the module's common base in declaration
    /// order. A redeclaration larger than the recorded size is a conflict; a
    /// smaller or equal one is accepted and the recorded size stays.
    pub fn declare_module_commons(&mut self, records: &[LinkRecord], module: &str) -> CommonAllocation {
        let mut allocation = CommonAllocation::default();
        for record in records {
            let LinkRecord::DefineCommonSize { name, size } = record else {
                continue;
            };
            let key = name.to_ascii_uppercase();
            match self.index.get(&key) {
                Some(&idx) => {
                    let block = &self.blocks[idx];
                    if *size > block.size {
                        allocation.conflicts.push(CommonSizeConflict {
                            name: block.name.clone(),
                            module: module.to_string(),
                            new_size: *size,
                            owner: block.owner.clone(),
                            recorded_size: block.size,
                        });
                    }
                }
                None => {
                    let idx = self.blocks.len();
                    self.blocks.push(CommonBlock {
                        name: name.clone(),
                        address: allocation.size,
                        size: *size,
                        owner: module.to_string(),
                    });
                    self.index.insert(key, idx);
                    allocation.new_blocks.push(idx);
                    allocation.size = allocation.size.wrapping_add(*size);
                }
            }
        }
        allocation
    }

    /// Shifts a module's new blocks by its common segment start.
    pub fn place(&mut self, allocation: &CommonAllocation, base: u16) {
        for &idx in &allocation.new_blocks {
            let block = &mut self.blocks[idx];
            block.address = block.address.wrapping_add(base);
        }
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&CommonBlock> {
        self.index
            .get(&name.to_ascii_uppercase())
            .map(|&idx| &self.blocks[idx])
    }

    #[must_use]
    pub fn block(&self, idx: usize) -> Option<&CommonBlock> {
        self.blocks.get(idx)
    }

    #[must_use]
    pub fn blocks(&self) -> &[CommonBlock] {
        &self.blocks
    }
}

/// Where one module ended up. Frozen once the module has been processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePlacement {
    pub name: String,
    pub code_start: u16,
    pub data_start: u16,
    pub common_start: u16,
    pub ranges: Vec<AddressRange>,
    pub public_symbols: Vec<String>,
}

/// Sizes a module declares up front, before its first `EndProgram`.
#[must_use]
pub fn declared_sizes(records: &[LinkRecord]) -> (u16, u16) {
    let mut code = 0;
    let mut data = 0;
    for record in records {
        match record {
            LinkRecord::ProgramAreaSize(size) => code = *size,
            LinkRecord::DataAreaSize(size) => data = *size,
            LinkRecord::EndProgram { .. } => break,
            _ => {}
        }
    }
    (code, data)
}
