use std::collections::HashMap;
use std::io;

use pretty_assertions::assert_eq;

use super::{link, Diagnostic, LinkConfig, LinkHost, LinkSession, SequenceItem, Severity};
use crate::format::rel::{encode_rel, ArithmeticOperator, ExtensionItem, LinkRecord};
use crate::format::AddressSpace;
use crate::range::AddressRange;
use crate::writer::OutputFormat;

#[derive(Default)]
struct MemoryHost {
    files: HashMap<String, Vec<u8>>,
    started: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl MemoryHost {
    fn with_file(mut self, path: &str, programs: Vec<Vec<LinkRecord>>) -> Self {
        let mut records: Vec<LinkRecord> = programs.into_iter().flatten().collect();
        records.push(LinkRecord::EndFile);
        self.files
            .insert(path.to_string(), encode_rel(&records).expect("encode"));
        self
    }
}

impl LinkHost for MemoryHost {
    fn open_file(&mut self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn library_path(&mut self, name: &str) -> String {
        format!("{name}.LIB")
    }

    fn module_started(&mut self, name: &str) {
        self.started.push(name.to_string());
    }

    fn diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.diagnostics.push(diagnostic.clone());
    }
}

fn program(name: &str, code_size: u16, body: Vec<LinkRecord>) -> Vec<LinkRecord> {
    let mut records = vec![
        LinkRecord::ProgramName(name.to_string()),
        LinkRecord::ProgramAreaSize(code_size),
    ];
    records.extend(body);
    records.push(LinkRecord::EndProgram {
        space: AddressSpace::Absolute,
        value: 0,
    });
    records
}

fn public(name: &str, offset: u16) -> LinkRecord {
    LinkRecord::DefineEntryPoint {
        space: AddressSpace::Code,
        value: offset,
        name: name.to_string(),
    }
}

fn chain(name: &str, offset: u16) -> LinkRecord {
    LinkRecord::ChainExternal {
        space: AddressSpace::Code,
        value: offset,
        name: name.to_string(),
    }
}

fn module(path: &str) -> SequenceItem {
    SequenceItem::ReferenceModule(path.to_string())
}

fn config(sequence: Vec<SequenceItem>) -> LinkConfig {
    LinkConfig {
        sequence,
        ..LinkConfig::default()
    }
}

fn ext(item: ExtensionItem) -> LinkRecord {
    LinkRecord::Extension(item)
}

fn op(op: ArithmeticOperator) -> LinkRecord {
    ext(ExtensionItem::ArithmeticOperator(op))
}

#[test]
fn places_modules_in_sequence_and_resolves_externals() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                4,
                vec![LinkRecord::RawBytes(vec![0xcd, 0x00, 0x00, 0xc9]), chain("EXT", 1)],
            )],
        )
        .with_file(
            "SUB.REL",
            vec![program(
                "SUB",
                1,
                vec![public("EXT", 0), LinkRecord::RawBytes(vec![0xc9])],
            )],
        );
    let config = config(vec![
        SequenceItem::SetCodeSegmentAddress(0x100),
        module("MAIN.REL"),
        module("SUB.REL"),
    ]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!((result.start_address, result.end_address), (0x100, 0x104));
    assert_eq!(result.output, Some(vec![0xcd, 0x04, 0x01, 0xc9, 0xc9]));
    assert_eq!(result.symbols.get("EXT"), Some(&0x104));
    assert_eq!(host.started, vec!["MAIN".to_string(), "SUB".to_string()]);
    assert_eq!(
        result.modules[1].ranges,
        vec![AddressRange::new(AddressSpace::Code, 0x104, 0x104)]
    );
}

#[test]
fn chain_links_get_symbol_plus_offset() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                6,
                vec![
                    LinkRecord::RawBytes(vec![0xcd, 0x00, 0x00, 0xc3]),
                    LinkRecord::ExternalPlusOffset(3),
                    LinkRecord::RelocatableAddress {
                        space: AddressSpace::Code,
                        value: 1,
                        is_byte: false,
                    },
                    chain("EXT", 4),
                ],
            )],
        )
        .with_file("SUB.REL", vec![program("SUB", 1, vec![public("EXT", 0)])]);
    let config = config(vec![module("MAIN.REL"), module("SUB.REL")]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    let output = result.output.expect("output");
    assert_eq!(&output[..6], &[0xcd, 0x06, 0x00, 0xc3, 0x09, 0x00]);
}

#[test]
fn common_block_is_shared_between_modules() {
    let mut host = MemoryHost::default()
        .with_file(
            "A.REL",
            vec![program(
                "A",
                2,
                vec![
                    LinkRecord::DefineCommonSize {
                        name: "BUF".to_string(),
                        size: 4,
                    },
                    LinkRecord::RelocatableAddress {
                        space: AddressSpace::Common,
                        value: 1,
                        is_byte: false,
                    },
                ],
            )],
        )
        .with_file(
            "B.REL",
            vec![program(
                "B",
                2,
                vec![
                    LinkRecord::DefineCommonSize {
                        name: "buf".to_string(),
                        size: 4,
                    },
                    LinkRecord::SelectCommonBlock("BUF".to_string()),
                    LinkRecord::RelocatableAddress {
                        space: AddressSpace::Common,
                        value: 2,
                        is_byte: false,
                    },
                ],
            )],
        );
    let config = config(vec![
        SequenceItem::SetCodeSegmentAddress(0x100),
        module("A.REL"),
        module("B.REL"),
    ]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.common_blocks.len(), 1);
    let block = &result.common_blocks[0];
    assert_eq!((block.address, block.size, block.owner.as_str()), (0x100, 4, "A"));

    let output = result.output.expect("output");
    // commons 100h-103h, A code 104h, B code 106h
    assert_eq!(result.start_address, 0x100);
    assert_eq!(&output[4..8], &[0x01, 0x01, 0x02, 0x01]);
}

#[test]
fn larger_common_redeclaration_is_an_error() {
    let common = |size| LinkRecord::DefineCommonSize {
        name: "BUF".to_string(),
        size,
    };
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 0, vec![common(4)])])
        .with_file("B.REL", vec![program("B", 0, vec![common(8)])]);
    let result = link(&config(vec![module("A.REL"), module("B.REL")]), &mut host);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("BUF"));
    assert_eq!(result.output, None);
}

#[test]
fn overlapping_code_is_one_collision() {
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 0x100, Vec::new())])
        .with_file("B.REL", vec![program("B", 0xd1, Vec::new())]);
    let config = config(vec![
        SequenceItem::SetCodeSegmentAddress(0x100),
        module("A.REL"),
        SequenceItem::SetCodeSegmentAddress(0x150),
        module("B.REL"),
    ]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors.len(), 1);
    let message = &result.errors[0];
    assert!(message.contains("'A'"));
    assert!(message.contains("'B'"));
    assert!(message.contains("0150h..01FFh"));
    assert_eq!(result.output, None);
}

#[test]
fn duplicate_public_is_reported_once_with_all_modules() {
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 0, vec![public("FOO", 0)])])
        .with_file("B.REL", vec![program("B", 0, vec![public("FOO", 0)])])
        .with_file("C.REL", vec![program("C", 0, vec![public("FOO", 0)])]);
    let result = link(
        &config(vec![module("A.REL"), module("B.REL"), module("C.REL")]),
        &mut host,
    );
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("FOO"));
    assert!(result.errors[0].contains("A, B, C"));
    assert_eq!(result.symbols.get("FOO"), None);
    assert_eq!(result.modules[0].public_symbols[0].value, None);
}

#[test]
fn expression_uses_module_bases() {
    let mut host = MemoryHost::default().with_file(
        "M.REL",
        vec![program(
            "M",
            2,
            vec![
                LinkRecord::DataAreaSize(4),
                ext(ExtensionItem::AddressReference {
                    space: AddressSpace::Code,
                    value: 0,
                }),
                ext(ExtensionItem::AddressReference {
                    space: AddressSpace::Data,
                    value: 2,
                }),
                op(ArithmeticOperator::Plus),
                op(ArithmeticOperator::StoreAsWord),
                LinkRecord::RawBytes(vec![0x00, 0x00]),
            ],
        )],
    );
    let config = config(vec![
        SequenceItem::SetDataSegmentAddress(0x300),
        SequenceItem::SetCodeSegmentAddress(0x200),
        module("M.REL"),
    ]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!((result.start_address, result.end_address), (0x200, 0x303));
    let output = result.output.expect("output");
    assert_eq!(&output[..2], &[0x02, 0x05]);
}

#[test]
fn expression_can_reference_external_defined_later() {
    let mut host = MemoryHost::default()
        .with_file(
            "M.REL",
            vec![program(
                "M",
                1,
                vec![
                    ext(ExtensionItem::ReferenceExternal("EXT".to_string())),
                    ext(ExtensionItem::AddressReference {
                        space: AddressSpace::Absolute,
                        value: 1,
                    }),
                    op(ArithmeticOperator::Plus),
                    op(ArithmeticOperator::StoreAsByte),
                    LinkRecord::RawBytes(vec![0x00]),
                    LinkRecord::ChainExternal {
                        space: AddressSpace::Absolute,
                        value: 0,
                        name: "EXT".to_string(),
                    },
                ],
            )],
        )
        .with_file("SUB.REL", vec![program("SUB", 2, vec![public("EXT", 1)])]);
    let result = link(&config(vec![module("M.REL"), module("SUB.REL")]), &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    // M at 0, SUB at 1, EXT = 2, stored EXT+1
    assert_eq!(result.output.expect("output")[0], 0x03);
}

#[test]
fn bad_expression_and_unresolved_external_are_errors() {
    let mut host = MemoryHost::default().with_file(
        "M.REL",
        vec![program(
            "M",
            4,
            vec![
                ext(ExtensionItem::AddressReference {
                    space: AddressSpace::Absolute,
                    value: 1,
                }),
                ext(ExtensionItem::AddressReference {
                    space: AddressSpace::Absolute,
                    value: 0,
                }),
                op(ArithmeticOperator::Divide),
                op(ArithmeticOperator::StoreAsWord),
                LinkRecord::RawBytes(vec![0, 0, 0, 0]),
                chain("NOPE", 2),
            ],
        )],
    );
    let result = link(&config(vec![module("M.REL")]), &mut host);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("unresolved external symbol 'NOPE'"));
    assert!(result.errors[1].contains("division by zero"));
    assert!(!result.aborted);
    assert_eq!(result.output, None);
}

#[test]
fn missing_module_is_fatal() {
    let mut host =
        MemoryHost::default().with_file("A.REL", vec![program("A", 1, vec![LinkRecord::RawBytes(vec![0])])]);
    let result = link(&config(vec![module("NONE.REL"), module("A.REL")]), &mut host);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("cannot open NONE.REL"));
    assert!(!result.aborted);
    assert_eq!(result.output, None);
    assert!(host.started.is_empty());
}

#[test]
fn reaching_max_errors_aborts() {
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 0x10, Vec::new())])
        .with_file("B.REL", vec![program("B", 0x10, Vec::new())])
        .with_file("C.REL", vec![program("C", 0x10, Vec::new())])
        .with_file("D.REL", vec![program("D", 0x10, Vec::new())]);
    let mut config = config(vec![
        module("A.REL"),
        SequenceItem::SetCodeSegmentAddress(0),
        module("B.REL"),
        SequenceItem::SetCodeSegmentAddress(0),
        module("C.REL"),
        SequenceItem::SetCodeSegmentAddress(0),
        module("D.REL"),
    ]);
    config.max_errors = 2;

    let result = link(&config, &mut host);
    assert!(result.aborted);
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors[2].contains("maximum error count (2)"));
    assert_eq!(result.output, None);
    assert_eq!(host.started.len(), 3);
}

#[test]
fn wraparound_warns_and_outputs_whole_space() {
    let mut host = MemoryHost::default().with_file(
        "W.REL",
        vec![program("W", 4, vec![LinkRecord::RawBytes(vec![1, 2, 3, 4])])],
    );
    let config = config(vec![SequenceItem::SetCodeSegmentAddress(0xfffe), module("W.REL")]);
    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("wrapped"));
    assert_eq!((result.start_address, result.end_address), (0x0000, 0xffff));
    let output = result.output.expect("output");
    assert_eq!(output.len(), 0x10000);
    assert_eq!(&output[0xfffe..], &[1, 2]);
    assert_eq!(&output[..2], &[3, 4]);
}

#[test]
fn filling_memory_to_the_top_then_writing_wraps() {
    let mut host = MemoryHost::default().with_file(
        "W.REL",
        vec![program(
            "W",
            4,
            vec![
                LinkRecord::RawBytes(vec![1, 2]),
                LinkRecord::RelocatableAddress {
                    space: AddressSpace::Code,
                    value: 2,
                    is_byte: false,
                },
            ],
        )],
    );
    let mut config = config(vec![SequenceItem::SetCodeSegmentAddress(0xfffe), module("W.REL")]);
    config.fill_byte = 0xff;

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.warnings.len(), 1);
    assert_eq!((result.start_address, result.end_address), (0x0000, 0xffff));
    let output = result.output.expect("output");
    assert_eq!(&output[0xfffe..], &[1, 2]);
    // FFFEh + 2 relocated to 0000h, stored at 0000h
    assert_eq!(&output[..3], &[0x00, 0x00, 0xff]);
}

#[test]
fn loads_only_needed_libraries_after_all_modules() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                3,
                vec![
                    LinkRecord::RequestLibrarySearch("MATH".to_string()),
                    LinkRecord::RequestLibrarySearch("IO".to_string()),
                    LinkRecord::RawBytes(vec![0xcd, 0x00, 0x00]),
                    chain("SQR", 1),
                ],
            )],
        )
        .with_file(
            "MATH.LIB",
            vec![
                program("SQR", 1, vec![public("SQR", 0), LinkRecord::RawBytes(vec![0xc9])]),
                program("CUBE", 1, vec![public("CUBE", 0), LinkRecord::RawBytes(vec![0xc9])]),
            ],
        )
        .with_file("IO.LIB", vec![program("PUTS", 1, vec![public("PUTS", 0)])])
        .with_file("OTHER.REL", vec![program("OTHER", 1, vec![LinkRecord::RawBytes(vec![0x76])])]);
    let config = config(vec![module("MAIN.REL"), module("OTHER.REL")]);

    let result = link(&config, &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    let names: Vec<&str> = result.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["MAIN", "OTHER", "SQR", "CUBE"]);
    assert_eq!(result.symbols.get("SQR"), Some(&0x0004));
    assert_eq!(
        result.output,
        Some(vec![0xcd, 0x04, 0x00, 0x76, 0xc9, 0xc9])
    );
}

#[test]
fn externals_of_other_candidates_pull_in_libraries() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                2,
                vec![
                    LinkRecord::RequestLibrarySearch("L1".to_string()),
                    LinkRecord::RequestLibrarySearch("L2".to_string()),
                    LinkRecord::RawBytes(vec![0, 0]),
                    chain("Y", 0),
                ],
            )],
        )
        .with_file(
            "L1.LIB",
            vec![program("L1", 2, vec![public("Y", 0), LinkRecord::RawBytes(vec![0, 0]), chain("X", 0)])],
        )
        .with_file("L2.LIB", vec![program("L2", 1, vec![public("X", 0)])]);
    let result = link(&config(vec![module("MAIN.REL")]), &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.symbols.get("X"), Some(&0x0004));
}

#[test]
fn library_requested_only_by_loaded_library_is_not_searched() {
    // Library loading is a single pass: L2 is only requested by L1, which is
    // itself loaded on demand, so X stays unresolved.
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                2,
                vec![
                    LinkRecord::RequestLibrarySearch("L1".to_string()),
                    LinkRecord::RawBytes(vec![0, 0]),
                    chain("Y", 0),
                ],
            )],
        )
        .with_file(
            "L1.LIB",
            vec![program(
                "L1",
                2,
                vec![
                    LinkRecord::RequestLibrarySearch("L2".to_string()),
                    public("Y", 0),
                    LinkRecord::RawBytes(vec![0, 0]),
                    chain("X", 0),
                ],
            )],
        )
        .with_file("L2.LIB", vec![program("L2", 1, vec![public("X", 0)])]);
    let result = link(&config(vec![module("MAIN.REL")]), &mut host);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("'X'"));
    assert!(result.modules.iter().all(|m| m.name != "L2"));
}

#[test]
fn library_without_publics_is_a_warning() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program("MAIN", 0, vec![LinkRecord::RequestLibrarySearch("EMPTY".to_string())])],
        )
        .with_file("EMPTY.LIB", vec![program("EMPTY", 0, Vec::new())]);
    let result = link(&config(vec![module("MAIN.REL")]), &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("EMPTY"));
}

#[test]
fn sequencing_diagnostics() {
    let mut host = MemoryHost::default();
    let config = config(vec![
        SequenceItem::SetDataSegmentAddress(0x8000),
        SequenceItem::SetCodeBeforeDataMode,
        SequenceItem::AlignCodeSegmentAddress(0),
    ]);
    let result = link(&config, &mut host);
    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("greater than zero"));
    assert_eq!(
        host.diagnostics
            .iter()
            .map(|d| d.severity)
            .collect::<Vec<_>>(),
        vec![Severity::Warning, Severity::Error]
    );
}

#[test]
fn intel_hex_output() {
    let data: Vec<u8> = (0..40u8).collect();
    let mut host = MemoryHost::default().with_file(
        "H.REL",
        vec![program("H", 40, vec![LinkRecord::RawBytes(data)])],
    );
    let mut config = config(vec![SequenceItem::SetCodeSegmentAddress(0x100), module("H.REL")]);
    config.output_format = OutputFormat::IntelHex;
    config.fill_byte = 0xff;

    let result = link(&config, &mut host);
    let text = String::from_utf8(result.output.expect("output")).expect("ascii");
    let records: Vec<&str> = text.split_terminator("\r\n").collect();
    assert_eq!(records.len(), 3);
    assert!(records[0].starts_with(":20010000"));
    assert!(records[1].starts_with(":08012000"));
}

#[test]
fn links_are_independent() {
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 1, vec![public("FOO", 0), LinkRecord::RawBytes(vec![7])])]);
    let config = config(vec![module("A.REL")]);
    let first = link(&config, &mut host);
    let second = link(&config, &mut host);
    assert_eq!(first, second);
    assert_eq!(second.errors, Vec::<String>::new());
}

#[test]
fn absolute_writes_and_byte_relocation() {
    let config = LinkConfig::default();
    let mut host = MemoryHost::default();
    let mut session = LinkSession::new(&config, &mut host);
    let records = program(
        "RST",
        3,
        vec![
            LinkRecord::RelocatableAddress {
                space: AddressSpace::Code,
                value: 2,
                is_byte: true,
            },
            LinkRecord::SetLocationCounter {
                space: AddressSpace::Absolute,
                value: 0x38,
            },
            LinkRecord::RawBytes(vec![0xc3]),
            LinkRecord::RelocatableAddress {
                space: AddressSpace::Code,
                value: 0,
                is_byte: false,
            },
        ],
    );
    session
        .link_program(&records, "RST.REL")
        .expect("link");
    // code at 0000h, jump vector at 0038h
    assert_eq!(session.image().read_byte(0x0000), 0x02);
    assert_eq!(session.image().slice(0x38, 0x3a), &[0xc3, 0x00, 0x00]);

    let result = session.into_result();
    assert_eq!(
        result.modules[0].ranges,
        vec![
            AddressRange::new(AddressSpace::Code, 0x00, 0x02),
            AddressRange::new(AddressSpace::Absolute, 0x38, 0x3a),
        ]
    );
}

#[test]
fn reserved_absolute_space_collides_with_later_code() {
    let org = |value| LinkRecord::SetLocationCounter {
        space: AddressSpace::Absolute,
        value,
    };
    let mut host = MemoryHost::default()
        .with_file("A.REL", vec![program("A", 0, vec![org(0x100), org(0x110)])])
        .with_file("B.REL", vec![program("B", 0x10, Vec::new())]);
    let config = config(vec![
        module("A.REL"),
        SequenceItem::SetCodeSegmentAddress(0x100),
        module("B.REL"),
    ]);

    let result = link(&config, &mut host);
    assert_eq!(
        result.modules[0].ranges,
        vec![AddressRange::new(AddressSpace::Absolute, 0x100, 0x110)]
    );
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("0100h..010Fh"));
    assert_eq!(result.output, None);
}

#[test]
fn minus_offset_is_subtracted_from_the_symbol() {
    let mut host = MemoryHost::default()
        .with_file(
            "MAIN.REL",
            vec![program(
                "MAIN",
                3,
                vec![
                    LinkRecord::RawBytes(vec![0x21]),
                    LinkRecord::ExternalMinusOffset(1),
                    LinkRecord::RawBytes(vec![0x00, 0x00]),
                    chain("EXT", 1),
                ],
            )],
        )
        .with_file("SUB.REL", vec![program("SUB", 1, vec![public("EXT", 0)])]);
    let result = link(&config(vec![module("MAIN.REL"), module("SUB.REL")]), &mut host);
    assert_eq!(result.errors, Vec::<String>::new());
    // EXT = 0003h, stored EXT-1
    assert_eq!(&result.output.expect("output")[..3], &[0x21, 0x02, 0x00]);
}

#[test]
fn selecting_undeclared_common_block_is_an_error() {
    let mut host = MemoryHost::default().with_file(
        "M.REL",
        vec![program(
            "M",
            2,
            vec![
                LinkRecord::SelectCommonBlock("NOPE".to_string()),
                LinkRecord::RawBytes(vec![0, 0]),
            ],
        )],
    );
    let result = link(&config(vec![module("M.REL")]), &mut host);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("'NOPE'"));
    assert!(!result.aborted);
    assert_eq!(result.modules.len(), 1);
    assert_eq!(result.output, None);
}

#[test]
fn configured_end_below_start_is_an_error() {
    let mut host = MemoryHost::default().with_file(
        "M.REL",
        vec![program("M", 1, vec![LinkRecord::RawBytes(vec![0xc9])])],
    );
    let mut config = config(vec![module("M.REL")]);
    config.start_address = Some(0x200);
    config.end_address = Some(0x100);

    let result = link(&config, &mut host);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("0100h is lower than start address 0200h"));
    assert!(!result.aborted);
    assert_eq!(result.output, None);
}
