use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::format::rel::{parse_rel, split_programs, ExtensionItem, LinkRecord};
use crate::format::FormatError;
use crate::image::MemoryImage;
use crate::layout::{
    declared_sizes, CommonBlock, CommonBlockTable, ModulePlacement, SegmentPlanner, SegmentSizes,
    SequencingMode,
};
use crate::range::{find_collisions, AddressRange};
use crate::resolver::expr::PendingExpression;
use crate::resolver::{resolve_chain, ExternalReference, SymbolTable};
use crate::writer::{render_output, OutputFormat};

mod module;

/// One step of the linking sequence, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceItem {
    ReferenceModule(String),
    SetCodeSegmentAddress(u16),
    SetDataSegmentAddress(u16),
    SetCodeBeforeDataMode,
    SetDataBeforeCodeMode,
    AlignCodeSegmentAddress(u16),
    AlignDataSegmentAddress(u16),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkConfig {
    pub sequence: Vec<SequenceItem>,
    pub output_format: OutputFormat,
    pub start_address: Option<u16>,
    pub end_address: Option<u16>,
    pub fill_byte: u8,
    /// Abort after this many errors; 0 means never.
    pub max_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// Everything the linker needs from its caller: file access, library name
/// lookup, and progress notifications.
pub trait LinkHost {
    /// # Errors
    /// Any I/O error; `NotFound` for missing files.
    fn open_file(&mut self, path: &str) -> io::Result<Vec<u8>>;

    /// Full path of a library requested by name from inside a module.
    fn library_path(&mut self, name: &str) -> String;

    fn module_started(&mut self, _name: &str) {}

    fn diagnostic(&mut self, _diagnostic: &Diagnostic) {}
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open {path}: {source}")]
    CannotOpen {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid relocatable file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: FormatError,
    },
    #[error("maximum error count ({0}) reached, linking aborted")]
    MaxErrorsReached(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicSymbol {
    pub name: String,
    /// `None` when the name was defined by more than one program.
    pub value: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSummary {
    pub name: String,
    pub file: String,
    pub ranges: Vec<AddressRange>,
    pub public_symbols: Vec<PublicSymbol>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkResult {
    pub start_address: u16,
    pub end_address: u16,
    /// Rendered binary or Intel-HEX text; only present when there were no errors.
    pub output: Option<Vec<u8>>,
    pub modules: Vec<ModuleSummary>,
    pub common_blocks: Vec<CommonBlock>,
    pub symbols: BTreeMap<String, u16>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub aborted: bool,
}

/// A library that was requested and has public symbols, but is only loaded
/// if it turns out to be needed.
#[derive(Debug, Clone)]
struct LibraryCandidate {
    name: String,
    path: String,
    programs: Vec<Vec<LinkRecord>>,
    publics: HashSet<String>,
    externals: HashSet<String>,
}

/// Links `config.sequence` into one memory image.
///
/// Never fails: fatal problems and the max-error abort end up in
/// `LinkResult::errors`.
pub fn link(config: &LinkConfig, host: &mut dyn LinkHost) -> LinkResult {
    let mut session = LinkSession::new(config, host);
    session.run();
    session.into_result()
}

/// State of one link invocation.
pub struct LinkSession<'a> {
    config: &'a LinkConfig,
    host: &'a mut dyn LinkHost,
    image: MemoryImage,
    planner: SegmentPlanner,
    commons: CommonBlockTable,
    symbols: SymbolTable,
    placements: Vec<ModulePlacement>,
    files: Vec<String>,
    externals: Vec<ExternalReference>,
    expressions: Vec<PendingExpression>,
    offsets: HashMap<u16, u16>,
    requested_libraries: HashSet<String>,
    candidates: Vec<LibraryCandidate>,
    errors: Vec<String>,
    warnings: Vec<String>,
    pc_wrapped: bool,
    aborted: bool,
    bounds: (u16, u16),
}

impl<'a> LinkSession<'a> {
    pub fn new(config: &'a LinkConfig, host: &'a mut dyn LinkHost) -> Self {
        Self {
            config,
            host,
            image: MemoryImage::new(config.fill_byte),
            planner: SegmentPlanner::new(),
            commons: CommonBlockTable::new(),
            symbols: SymbolTable::new(),
            placements: Vec::new(),
            files: Vec::new(),
            externals: Vec::new(),
            expressions: Vec::new(),
            offsets: HashMap::new(),
            requested_libraries: HashSet::new(),
            candidates: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            pc_wrapped: false,
            aborted: false,
            bounds: (0, 0),
        }
    }

    /// Runs every linking stage, turning a fatal error or the max-error
    /// abort into a final error message.
    pub fn run(&mut self) {
        match self.run_stages() {
            Ok(()) => {}
            Err(err) => {
                if matches!(err, LinkError::MaxErrorsReached(_)) {
                    self.aborted = true;
                }
                let message = err.to_string();
                tracing::error!("{message}");
                self.host.diagnostic(&Diagnostic {
                    severity: Severity::Error,
                    message: message.clone(),
                });
                self.errors.push(message);
            }
        }
    }

    fn run_stages(&mut self) -> Result<(), LinkError> {
        let config = self.config;
        for item in &config.sequence {
            match item {
                SequenceItem::ReferenceModule(path) => self.load_file(path)?,
                SequenceItem::SetCodeSegmentAddress(address) => self.planner.set_code_address(*address),
                SequenceItem::SetDataSegmentAddress(address) => self.planner.set_data_address(*address),
                SequenceItem::SetCodeBeforeDataMode => {
                    if let Err(err) = self.planner.set_mode(SequencingMode::CodeBeforeData) {
                        self.warning(err.to_string());
                    }
                }
                SequenceItem::SetDataBeforeCodeMode => {
                    if let Err(err) = self.planner.set_mode(SequencingMode::DataBeforeCode) {
                        self.warning(err.to_string());
                    }
                }
                SequenceItem::AlignCodeSegmentAddress(value) => {
                    if let Err(err) = self.planner.align_code(*value) {
                        self.error(err.to_string())?;
                    }
                }
                SequenceItem::AlignDataSegmentAddress(value) => {
                    if let Err(err) = self.planner.align_data(*value) {
                        self.error(err.to_string())?;
                    }
                }
            }
        }

        self.load_needed_libraries()?;
        self.resolve_externals()?;
        self.evaluate_expressions()?;
        self.report_duplicate_symbols()?;
        self.compute_bounds()
    }

    /// Packs up the outcome; output is rendered only for an error-free link.
    #[must_use]
    pub fn into_result(self) -> LinkResult {
        let (start_address, end_address) = self.bounds;
        let output = self.errors.is_empty().then(|| {
            render_output(&self.image, self.config.output_format, start_address, end_address)
        });
        let modules = self
            .placements
            .iter()
            .zip(&self.files)
            .map(|(placement, file)| ModuleSummary {
                name: placement.name.clone(),
                file: file.clone(),
                ranges: placement.ranges.clone(),
                public_symbols: placement
                    .public_symbols
                    .iter()
                    .map(|name| PublicSymbol {
                        name: name.clone(),
                        value: self.symbols.get(name),
                    })
                    .collect(),
            })
            .collect();
        LinkResult {
            start_address,
            end_address,
            output,
            modules,
            common_blocks: self.commons.blocks().to_vec(),
            symbols: self
                .symbols
                .iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            errors: self.errors,
            warnings: self.warnings,
            aborted: self.aborted,
        }
    }

    #[must_use]
    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    fn load_file(&mut self, path: &str) -> Result<(), LinkError> {
        for program in self.read_programs(path)? {
            self.link_program(&program, path)?;
        }
        Ok(())
    }

    fn read_programs(&mut self, path: &str) -> Result<Vec<Vec<LinkRecord>>, LinkError> {
        let bytes = self.host.open_file(path).map_err(|source| LinkError::CannotOpen {
            path: path.to_string(),
            source,
        })?;
        let records = parse_rel(&bytes).map_err(|source| LinkError::Malformed {
            path: path.to_string(),
            source,
        })?;
        Ok(split_programs(records))
    }

    /// Places one program, loads its records into the image, and checks it
    /// against every program placed before it.
    pub(crate) fn link_program(&mut self, records: &[LinkRecord], file: &str) -> Result<(), LinkError> {
        let name = program_name(records, file);
        tracing::info!(program = %name, file, "linking program");
        self.host.module_started(&name);

        let allocation = self.commons.declare_module_commons(records, &name);
        for conflict in &allocation.conflicts {
            self.error(conflict.to_string())?;
        }
        let (code, data) = declared_sizes(records);
        let sizes = SegmentSizes {
            code,
            data,
            commons: allocation.size,
        };
        let layout = self.planner.plan(sizes);
        self.commons.place(&allocation, layout.common_start);
        self.planner.commit(&layout);
        tracing::debug!(
            program = %name,
            code = format_args!("{:04X}h+{:04X}h", layout.code_start, sizes.code),
            data = format_args!("{:04X}h+{:04X}h", layout.data_start, sizes.data),
            common = format_args!("{:04X}h+{:04X}h", layout.common_start, sizes.commons),
            "placed program"
        );

        let mut ranges: Vec<AddressRange> = Vec::new();
        ranges.extend(layout.code_range());
        ranges.extend(layout.data_range());
        for &idx in &allocation.new_blocks {
            if let Some(block) = self.commons.block(idx) {
                ranges.extend(AddressRange::common_block(&block.name, block.address, block.size));
            }
        }

        let placement = ModulePlacement {
            name,
            code_start: layout.code_start,
            data_start: layout.data_start,
            common_start: layout.common_start,
            ranges,
            public_symbols: Vec::new(),
        };
        let placement = self.process_module(placement, records)?;

        for collision in find_collisions(&placement, &self.placements) {
            self.error(collision.to_string())?;
        }
        self.placements.push(placement);
        self.files.push(file.to_string());
        Ok(())
    }

    /// Remembers a requested library if it exports anything; loading is
    /// decided once all modules are in.
    fn request_library(&mut self, name: &str) -> Result<(), LinkError> {
        if !self.requested_libraries.insert(name.to_ascii_uppercase()) {
            return Ok(());
        }
        let path = self.host.library_path(name);
        let programs = self.read_programs(&path)?;

        let mut publics = HashSet::new();
        let mut externals = HashSet::new();
        for record in programs.iter().flatten() {
            match record {
                LinkRecord::DefineEntryPoint { name, .. } => {
                    publics.insert(name.clone());
                }
                LinkRecord::ChainExternal { name, .. }
                | LinkRecord::Extension(ExtensionItem::ReferenceExternal(name)) => {
                    externals.insert(name.clone());
                }
                _ => {}
            }
        }

        if publics.is_empty() {
            self.warning(format!("library '{name}' ({path}) has no public symbols, ignored"));
            return Ok(());
        }
        tracing::debug!(library = name, path = %path, publics = publics.len(), "library candidate");
        self.candidates.push(LibraryCandidate {
            name: name.to_string(),
            path,
            programs,
            publics,
            externals,
        });
        Ok(())
    }

    /// Single pass over the candidates: a library is loaded when it defines
    /// a symbol that is still missing, counting symbols wanted by the
    /// explicit modules and by the other candidates. Requests made by the
    /// libraries loaded here are not searched again.
    fn load_needed_libraries(&mut self) -> Result<(), LinkError> {
        let candidates = std::mem::take(&mut self.candidates);
        if candidates.is_empty() {
            return Ok(());
        }

        let mut needed: HashSet<String> = self
            .externals
            .iter()
            .map(|ext| ext.symbol.clone())
            .chain(self.expressions.iter().flat_map(|expr| {
                expr.items.iter().filter_map(|item| match item {
                    ExtensionItem::ReferenceExternal(name) => Some(name.clone()),
                    _ => None,
                })
            }))
            .collect();
        for candidate in &candidates {
            needed.extend(candidate.externals.iter().cloned());
        }
        needed.retain(|name| !self.symbols.is_known(name));

        for candidate in candidates {
            let wanted = candidate
                .publics
                .iter()
                .any(|name| needed.contains(name) && !self.symbols.is_known(name));
            if !wanted {
                tracing::debug!(library = %candidate.name, "library not needed");
                continue;
            }
            tracing::info!(library = %candidate.name, path = %candidate.path, "loading library");
            for program in &candidate.programs {
                self.link_program(program, &candidate.path)?;
            }
        }

        for leftover in &self.candidates {
            tracing::debug!(library = %leftover.name, "library requested by a library, not searched");
        }
        Ok(())
    }

    fn resolve_externals(&mut self) -> Result<(), LinkError> {
        let externals = std::mem::take(&mut self.externals);
        for reference in &externals {
            let Some(value) = self.symbols.get(&reference.symbol) else {
                if !self.symbols.is_duplicate(&reference.symbol) {
                    self.error(format!(
                        "unresolved external symbol '{}' referenced in program '{}'",
                        reference.symbol, reference.module
                    ))?;
                }
                continue;
            };
            if let Err(err) = resolve_chain(&mut self.image, reference, value, &self.offsets) {
                self.error(format!("internal error: {err}"))?;
            }
        }
        Ok(())
    }

    fn evaluate_expressions(&mut self) -> Result<(), LinkError> {
        let expressions = std::mem::take(&mut self.expressions);
        for expr in &expressions {
            if let Err(err) = expr.apply(&mut self.image, &self.symbols) {
                self.error(format!(
                    "invalid expression in program '{}' at {:04X}h: {err}",
                    expr.module, expr.target
                ))?;
            }
        }
        Ok(())
    }

    fn report_duplicate_symbols(&mut self) -> Result<(), LinkError> {
        let duplicates = self.symbols.duplicates().to_vec();
        for (name, modules) in duplicates {
            self.error(format!(
                "symbol '{name}' is defined in more than one program: {}",
                modules.join(", ")
            ))?;
        }
        Ok(())
    }

    fn compute_bounds(&mut self) -> Result<(), LinkError> {
        if self.pc_wrapped {
            self.bounds = (0x0000, 0xffff);
            return Ok(());
        }
        let ranges = || self.placements.iter().flat_map(|p| p.ranges.iter());
        let start = self
            .config
            .start_address
            .or_else(|| ranges().map(|r| r.start).min())
            .unwrap_or(0);
        let end = self
            .config
            .end_address
            .or_else(|| ranges().map(|r| r.end).max())
            .unwrap_or(start);
        self.bounds = (start, end.max(start));
        if end < start {
            self.error(format!(
                "end address {end:04X}h is lower than start address {start:04X}h"
            ))?;
        }
        Ok(())
    }

    fn error(&mut self, message: String) -> Result<(), LinkError> {
        tracing::error!("{message}");
        self.host.diagnostic(&Diagnostic {
            severity: Severity::Error,
            message: message.clone(),
        });
        self.errors.push(message);
        if self.config.max_errors > 0 && self.errors.len() >= self.config.max_errors {
            return Err(LinkError::MaxErrorsReached(self.config.max_errors));
        }
        Ok(())
    }

    fn warning(&mut self, message: String) {
        tracing::warn!("{message}");
        self.host.diagnostic(&Diagnostic {
            severity: Severity::Warning,
            message: message.clone(),
        });
        self.warnings.push(message);
    }
}

fn program_name(records: &[LinkRecord], file: &str) -> String {
    records
        .iter()
        .find_map(|record| match record {
            LinkRecord::ProgramName(name) => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| {
            Path::new(file)
                .file_stem()
                .map_or_else(|| file.to_string(), |s| s.to_string_lossy().to_string())
        })
}

#[cfg(test)]
mod tests;
