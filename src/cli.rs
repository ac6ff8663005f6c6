use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};

use crate::linker::{link, LinkConfig, LinkHost, LinkResult, SequenceItem};
use crate::writer::{write_output, OutputFormat};

/// Parses a number written as decimal, `0x`-prefixed hex, or `h`-suffixed hex.
fn parse_number(input: &str, max: u32) -> Result<u32, String> {
    let s = input.trim();
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value '{input}': {e}"))?
    } else if let Some(hex) = s.strip_suffix('h').or_else(|| s.strip_suffix('H')) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex value '{input}': {e}"))?
    } else {
        s.parse::<u32>()
            .map_err(|e| format!("invalid decimal value '{input}': {e}"))?
    };
    if value > max {
        return Err(format!("value '{input}' is larger than {max:X}h"));
    }
    Ok(value)
}

fn parse_address(input: &str) -> Result<u16, String> {
    parse_number(input, 0xffff).map(|v| v as u16)
}

fn parse_byte(input: &str) -> Result<u8, String> {
    parse_number(input, 0xff).map(|v| v as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Order {
    CodeBeforeData,
    DataBeforeCode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Bin,
    Hex,
}

/// Module files and segment options are applied in command-line order.
#[derive(Debug, Parser)]
#[command(name = "link80", version, about = "LINK-80 compatible linker for Z80 relocatable files")]
pub struct Args {
    #[arg(value_name = "MODULE")]
    pub modules: Vec<String>,

    /// Code segment address for the next module
    #[arg(long = "code", value_name = "ADDR", value_parser = parse_address)]
    pub code: Vec<u16>,

    /// Data segment address for the next module; switches to combined placement
    #[arg(long = "data", value_name = "ADDR", value_parser = parse_address)]
    pub data: Vec<u16>,

    #[arg(long = "order", value_enum)]
    pub order: Vec<Order>,

    #[arg(long = "align-code", value_name = "N", value_parser = parse_address)]
    pub align_code: Vec<u16>,

    #[arg(long = "align-data", value_name = "N", value_parser = parse_address)]
    pub align_data: Vec<u16>,

    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[arg(short = 'f', long = "format", value_enum, default_value_t = Format::Bin)]
    pub format: Format,

    #[arg(long = "start", value_parser = parse_address)]
    pub start: Option<u16>,

    #[arg(long = "end", value_parser = parse_address)]
    pub end: Option<u16>,

    /// Byte used for memory no module wrote to
    #[arg(long = "fill", value_parser = parse_byte, default_value = "0")]
    pub fill: u8,

    /// Stop after this many errors (0 = never)
    #[arg(long = "max-errors", default_value_t = 0)]
    pub max_errors: usize,

    /// Directory searched for requested libraries
    #[arg(short = 'L', long = "lib-dir")]
    pub lib_dirs: Vec<PathBuf>,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[arg(skip)]
    pub sequence: Vec<SequenceItem>,
}

impl Args {
    #[must_use]
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            sequence: self.sequence.clone(),
            output_format: match self.format {
                Format::Bin => OutputFormat::Binary,
                Format::Hex => OutputFormat::IntelHex,
            },
            start_address: self.start,
            end_address: self.end,
            fill_byte: self.fill,
            max_errors: self.max_errors,
        }
    }

    /// Output file name; defaults to the first module with a `.bin`/`.hex` extension.
    #[must_use]
    pub fn output_path(&self) -> Option<PathBuf> {
        if let Some(output) = &self.output {
            return Some(output.clone());
        }
        let first = self.modules.first()?;
        let ext = match self.format {
            Format::Bin => "bin",
            Format::Hex => "hex",
        };
        Some(Path::new(first).with_extension(ext))
    }
}

/// Parses the command line, keeping the relative order of modules and
/// segment options in `Args::sequence`.
///
/// # Errors
/// Usage errors from clap.
pub fn parse_args<I, T>(argv: I) -> Result<Args, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Args::command().try_get_matches_from(argv)?;
    let mut args = Args::from_arg_matches(&matches)?;
    args.sequence = sequence_from_matches(&matches, &args);
    Ok(args)
}

fn sequence_from_matches(matches: &ArgMatches, args: &Args) -> Vec<SequenceItem> {
    let mut items: Vec<(usize, SequenceItem)> = Vec::new();
    collect(matches, "modules", &args.modules, &mut items, |m| {
        SequenceItem::ReferenceModule(m.clone())
    });
    collect(matches, "code", &args.code, &mut items, |a| {
        SequenceItem::SetCodeSegmentAddress(*a)
    });
    collect(matches, "data", &args.data, &mut items, |a| {
        SequenceItem::SetDataSegmentAddress(*a)
    });
    collect(matches, "order", &args.order, &mut items, |o| match o {
        Order::CodeBeforeData => SequenceItem::SetCodeBeforeDataMode,
        Order::DataBeforeCode => SequenceItem::SetDataBeforeCodeMode,
    });
    collect(matches, "align_code", &args.align_code, &mut items, |v| {
        SequenceItem::AlignCodeSegmentAddress(*v)
    });
    collect(matches, "align_data", &args.align_data, &mut items, |v| {
        SequenceItem::AlignDataSegmentAddress(*v)
    });
    items.sort_by_key(|(index, _)| *index);
    items.into_iter().map(|(_, item)| item).collect()
}

fn collect<T>(
    matches: &ArgMatches,
    id: &str,
    values: &[T],
    out: &mut Vec<(usize, SequenceItem)>,
    make: impl Fn(&T) -> SequenceItem,
) {
    if let Some(indices) = matches.indices_of(id) {
        out.extend(indices.zip(values).map(|(index, value)| (index, make(value))));
    }
}

/// Library file name for a name requested from inside a module.
#[must_use]
pub fn library_file_name(name: &str) -> String {
    if Path::new(name).extension().is_some() {
        name.to_string()
    } else {
        format!("{name}.REL")
    }
}

/// Reads modules from disk and looks libraries up in `-L` directories
/// before the current directory.
#[derive(Debug, Default)]
pub struct FsHost {
    lib_dirs: Vec<PathBuf>,
}

impl FsHost {
    #[must_use]
    pub fn new(lib_dirs: Vec<PathBuf>) -> Self {
        Self { lib_dirs }
    }
}

impl LinkHost for FsHost {
    fn open_file(&mut self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn library_path(&mut self, name: &str) -> String {
        let file = library_file_name(name);
        self.lib_dirs
            .iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
            .map_or(file, |found| found.display().to_string())
    }
}

/// Links the modules named on the command line and writes the output file.
///
/// # Errors
/// No input modules, link errors, or a failed write.
pub fn run(args: &Args) -> anyhow::Result<LinkResult> {
    if args.modules.is_empty() {
        anyhow::bail!("no input modules")
    }

    let config = args.link_config();
    let mut host = FsHost::new(args.lib_dirs.clone());
    let result = link(&config, &mut host);

    for module in &result.modules {
        for range in &module.ranges {
            tracing::info!(
                program = %module.name,
                "{:>8} {:04X}h..{:04X}h",
                crate::range::space_label(range.space),
                range.start,
                range.end
            );
        }
    }
    for block in &result.common_blocks {
        tracing::info!(
            "common /{}/ {:04X}h size {:04X}h (declared by {})",
            block.name,
            block.address,
            block.size,
            block.owner
        );
    }
    for (name, value) in &result.symbols {
        tracing::debug!("{name:<8} {value:04X}h");
    }

    if result.aborted {
        anyhow::bail!("linking aborted after {} error(s)", result.errors.len())
    }
    if !result.errors.is_empty() {
        anyhow::bail!(
            "{} error(s), {} warning(s); no output written",
            result.errors.len(),
            result.warnings.len()
        )
    }

    if let (Some(path), Some(payload)) = (args.output_path(), &result.output) {
        write_output(&path, payload)?;
        tracing::info!(
            "wrote {} ({:04X}h..{:04X}h)",
            path.display(),
            result.start_address,
            result.end_address
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;

    use super::{library_file_name, parse_address, parse_args, Format};
    use crate::linker::SequenceItem;
    use crate::writer::OutputFormat;

    #[test]
    fn numbers_accept_decimal_and_both_hex_forms() {
        assert_eq!(parse_address("256"), Ok(0x100));
        assert_eq!(parse_address("0x100"), Ok(0x100));
        assert_eq!(parse_address("100h"), Ok(0x100));
        assert_eq!(parse_address("0FFFFH"), Ok(0xffff));
        assert!(parse_address("10000h").is_err());
        assert!(parse_address("xyz").is_err());
    }

    #[test]
    fn sequence_keeps_command_line_order() {
        let args = parse_args([
            "link80", "--code", "100h", "A.REL", "--order", "code-before-data", "B.REL",
            "--data", "0x8000", "--align-data", "16", "C.REL",
        ])
        .expect("parse");
        assert_eq!(
            args.sequence,
            vec![
                SequenceItem::SetCodeSegmentAddress(0x100),
                SequenceItem::ReferenceModule("A.REL".to_string()),
                SequenceItem::SetCodeBeforeDataMode,
                SequenceItem::ReferenceModule("B.REL".to_string()),
                SequenceItem::SetDataSegmentAddress(0x8000),
                SequenceItem::AlignDataSegmentAddress(16),
                SequenceItem::ReferenceModule("C.REL".to_string()),
            ]
        );
    }

    #[test]
    fn link_config_from_options() {
        let args = parse_args([
            "link80", "-f", "hex", "--start", "0x100", "--fill", "0FFh", "--max-errors", "5",
            "MAIN.REL",
        ])
        .expect("parse");
        assert_eq!(args.format, Format::Hex);
        let config = args.link_config();
        assert_eq!(config.output_format, OutputFormat::IntelHex);
        assert_eq!(config.start_address, Some(0x100));
        assert_eq!(config.end_address, None);
        assert_eq!(config.fill_byte, 0xff);
        assert_eq!(config.max_errors, 5);
        assert_eq!(args.output_path(), Some(PathBuf::from("MAIN.hex")));
    }

    #[test]
    fn rejects_out_of_range_fill() {
        assert!(parse_args(["link80", "--fill", "256", "A.REL"]).is_err());
    }

    #[test]
    fn library_names_get_rel_extension() {
        assert_eq!(library_file_name("MATHLIB"), "MATHLIB.REL");
        assert_eq!(library_file_name("io.lib"), "io.lib");
    }
}
