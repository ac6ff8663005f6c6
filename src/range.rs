use std::fmt;

use crate::format::AddressSpace;
use crate::layout::ModulePlacement;

/// Closed address interval `start..=end` owned by one segment of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub space: AddressSpace,
    pub start: u16,
    pub end: u16,
    /// Set for common-block ranges so modules sharing a block don't collide.
    pub common: Option<String>,
}

impl AddressRange {
    #[must_use]
    pub fn new(space: AddressSpace, start: u16, end: u16) -> Self {
        Self {
            space,
            start: start.min(end),
            end: start.max(end),
            common: None,
        }
    }

    /// Range of `size` bytes at `start`, clamped to the top of memory.
    /// Empty segments have no range.
    #[must_use]
    pub fn with_size(space: AddressSpace, start: u16, size: u16) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let end = (u32::from(start) + u32::from(size) - 1).min(0xffff);
        let end = u16::try_from(end).unwrap_or(u16::MAX);
        Some(Self::new(space, start, end))
    }

    #[must_use]
    pub fn common_block(name: &str, start: u16, size: u16) -> Option<Self> {
        Self::with_size(AddressSpace::Common, start, size).map(|range| Self {
            common: Some(name.to_string()),
            ..range
        })
    }

    /// Overlapping part of two ranges, regardless of their address spaces.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<(u16, u16)> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some((start, end))
    }

    /// Grows the range so it also covers `start..=end`.
    pub fn cover(&mut self, start: u16, end: u16) {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub module: String,
    pub space: AddressSpace,
    pub other_module: String,
    pub other_space: AddressSpace,
    pub start: u16,
    pub end: u16,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} segment of program '{}' overlaps {} segment of program '{}' at {:04X}h..{:04X}h",
            space_label(self.space),
            self.module,
            space_label(self.other_space),
            self.other_module,
            self.start,
            self.end
        )
    }
}

#[must_use]
pub fn space_label(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Absolute => "absolute",
        AddressSpace::Code => "code",
        AddressSpace::Data => "data",
        AddressSpace::Common => "common",
    }
}

/// Cross-checks every segment of `current` against every segment of the
/// modules placed before it. Different segment kinds are compared too,
/// since all of them share one physical address space.
#[must_use]
pub fn find_collisions(current: &ModulePlacement, previous: &[ModulePlacement]) -> Vec<Collision> {
    let mut collisions = Vec::new();
    for other in previous {
        for mine in &current.ranges {
            for theirs in &other.ranges {
                if mine.common.is_some()
                    && mine.common.as_deref().map(str::to_ascii_uppercase)
                        == theirs.common.as_deref().map(str::to_ascii_uppercase)
                {
                    continue;
                }
                if let Some((start, end)) = mine.intersection(theirs) {
                    collisions.push(Collision {
                        module: current.name.clone(),
                        space: mine.space,
                        other_module: other.name.clone(),
                        other_space: theirs.space,
                        start,
                        end,
                    });
                }
            }
        }
    }
    collisions
}
