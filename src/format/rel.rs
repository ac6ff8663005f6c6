use crate::format::{AddressSpace, FormatError};

const MAX_NAME_LEN: usize = 7;

const EXT_ARITHMETIC: u8 = b'A';
const EXT_REFERENCE_EXTERNAL: u8 = b'B';
const EXT_ADDRESS_REFERENCE: u8 = b'C';

/// One decoded record of a relocatable program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRecord {
    RawBytes(Vec<u8>),
    RelocatableAddress {
        space: AddressSpace,
        value: u16,
        is_byte: bool,
    },
    EntrySymbol(String),
    SelectCommonBlock(String),
    ProgramName(String),
    RequestLibrarySearch(String),
    Extension(ExtensionItem),
    DefineCommonSize {
        name: String,
        size: u16,
    },
    ChainExternal {
        space: AddressSpace,
        value: u16,
        name: String,
    },
    DefineEntryPoint {
        space: AddressSpace,
        value: u16,
        name: String,
    },
    ExternalMinusOffset(u16),
    ExternalPlusOffset(u16),
    DataAreaSize(u16),
    SetLocationCounter {
        space: AddressSpace,
        value: u16,
    },
    ProgramAreaSize(u16),
    EndProgram {
        space: AddressSpace,
        value: u16,
    },
    EndFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionItem {
    ArithmeticOperator(ArithmeticOperator),
    ReferenceExternal(String),
    AddressReference { space: AddressSpace, value: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOperator {
    StoreAsByte,
    StoreAsWord,
    High,
    Low,
    Not,
    UnaryMinus,
    Minus,
    Plus,
    Multiply,
    Divide,
    Mod,
    ShiftRight,
    ShiftLeft,
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    And,
    Or,
    Xor,
}

impl ArithmeticOperator {
    const CODES: [(u8, Self); 22] = [
        (1, Self::StoreAsByte),
        (2, Self::StoreAsWord),
        (3, Self::High),
        (4, Self::Low),
        (5, Self::Not),
        (6, Self::UnaryMinus),
        (7, Self::Minus),
        (8, Self::Plus),
        (9, Self::Multiply),
        (10, Self::Divide),
        (11, Self::Mod),
        (12, Self::ShiftRight),
        (13, Self::ShiftLeft),
        (14, Self::Equals),
        (15, Self::NotEquals),
        (16, Self::LessThan),
        (17, Self::LessOrEqual),
        (18, Self::GreaterThan),
        (19, Self::GreaterOrEqual),
        (20, Self::And),
        (21, Self::Or),
        (22, Self::Xor),
    ];

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, op)| *op)
    }

    #[must_use]
    pub fn code(self) -> u8 {
        Self::CODES
            .iter()
            .find(|(_, op)| *op == self)
            .map_or(0, |(c, _)| *c)
    }

    #[must_use]
    pub fn is_store(self) -> bool {
        matches!(self, Self::StoreAsByte | Self::StoreAsWord)
    }

    #[must_use]
    pub fn is_unary(self) -> bool {
        matches!(self, Self::High | Self::Low | Self::Not | Self::UnaryMinus)
    }
}

/// Parses one LINK-80 relocatable bit stream into records.
///
/// Parsing stops at the end-of-file item. Consecutive absolute bytes are
/// merged into a single `RawBytes` record.
///
/// # Errors
/// Returns `FormatError` when the stream is truncated or contains items this
/// linker does not understand.
pub fn parse_rel(input: &[u8]) -> Result<Vec<LinkRecord>, FormatError> {
    let mut reader = BitReader::new(input);
    let mut records = Vec::new();
    // record count right after the last EndProgram
    let mut program_end = None;

    while !reader.is_eof() {
        match read_item(&mut reader, &mut records) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => match program_end {
                // padding after the last program
                Some(len) if err == FormatError::UnexpectedEof => {
                    records.truncate(len);
                    break;
                }
                _ => return Err(err),
            },
        }
        if let Some(LinkRecord::EndProgram { .. }) = records.last() {
            program_end = Some(records.len());
        }
    }

    Ok(records)
}

/// Reads one item; `Ok(false)` once the end-of-file item was read.
fn read_item(reader: &mut BitReader<'_>, records: &mut Vec<LinkRecord>) -> Result<bool, FormatError> {
    if reader.read_bits(1)? == 0 {
        let byte = reader.read_bits(8)?;
        if let Some(LinkRecord::RawBytes(bytes)) = records.last_mut() {
            bytes.push(byte);
        } else {
            records.push(LinkRecord::RawBytes(vec![byte]));
        }
        return Ok(true);
    }

    let kind = reader.read_bits(2)?;
    if kind != 0 {
        let value = reader.read_word()?;
        records.push(LinkRecord::RelocatableAddress {
            space: AddressSpace::from_bits(kind),
            value,
            is_byte: false,
        });
        return Ok(true);
    }

    let control = reader.read_bits(4)?;
    let record = match control {
        0 => LinkRecord::EntrySymbol(reader.read_name()?),
        1 => LinkRecord::SelectCommonBlock(reader.read_name()?),
        2 => LinkRecord::ProgramName(reader.read_name()?),
        3 => LinkRecord::RequestLibrarySearch(reader.read_name()?),
        4 => LinkRecord::Extension(decode_extension(&reader.read_name_bytes()?)?),
        5 => {
            let (_, size) = reader.read_a_field()?;
            let name = reader.read_name()?;
            LinkRecord::DefineCommonSize { name, size }
        }
        6 => {
            let (space, value) = reader.read_a_field()?;
            let name = reader.read_name()?;
            LinkRecord::ChainExternal { space, value, name }
        }
        7 => {
            let (space, value) = reader.read_a_field()?;
            let name = reader.read_name()?;
            LinkRecord::DefineEntryPoint { space, value, name }
        }
        8 => LinkRecord::ExternalMinusOffset(reader.read_a_field()?.1),
        9 => LinkRecord::ExternalPlusOffset(reader.read_a_field()?.1),
        10 => LinkRecord::DataAreaSize(reader.read_a_field()?.1),
        11 => {
            let (space, value) = reader.read_a_field()?;
            LinkRecord::SetLocationCounter { space, value }
        }
        13 => LinkRecord::ProgramAreaSize(reader.read_a_field()?.1),
        14 => {
            let (space, value) = reader.read_a_field()?;
            reader.align_byte();
            LinkRecord::EndProgram { space, value }
        }
        15 => {
            records.push(LinkRecord::EndFile);
            return Ok(false);
        }
        other => return Err(FormatError::UnsupportedItem(other)),
    };
    records.push(record);
    Ok(true)
}

/// Cuts a file's record stream into its programs, one per `EndProgram`.
///
/// The `EndFile` record and anything after it are dropped. Trailing records
/// without a closing `EndProgram` form a final program.
#[must_use]
pub fn split_programs(records: Vec<LinkRecord>) -> Vec<Vec<LinkRecord>> {
    let mut programs = Vec::new();
    let mut current = Vec::new();
    for record in records {
        match record {
            LinkRecord::EndFile => break,
            LinkRecord::EndProgram { .. } => {
                current.push(record);
                programs.push(std::mem::take(&mut current));
            }
            _ => current.push(record),
        }
    }
    if !current.is_empty() {
        programs.push(current);
    }
    programs
}

fn decode_extension(payload: &[u8]) -> Result<ExtensionItem, FormatError> {
    let Some((&kind, rest)) = payload.split_first() else {
        return Err(FormatError::MalformedExtension);
    };
    match kind {
        EXT_ARITHMETIC => {
            let [code] = rest else {
                return Err(FormatError::MalformedExtension);
            };
            ArithmeticOperator::from_code(*code)
                .map(ExtensionItem::ArithmeticOperator)
                .ok_or(FormatError::UnknownOperator(*code))
        }
        EXT_REFERENCE_EXTERNAL => Ok(ExtensionItem::ReferenceExternal(bytes_to_name(rest))),
        EXT_ADDRESS_REFERENCE => {
            let [space, lo, hi] = rest else {
                return Err(FormatError::MalformedExtension);
            };
            if *space > 3 {
                return Err(FormatError::InvalidAddressSpace(*space));
            }
            Ok(ExtensionItem::AddressReference {
                space: AddressSpace::from_bits(*space),
                value: u16::from_le_bytes([*lo, *hi]),
            })
        }
        other => Err(FormatError::UnknownExtension(other)),
    }
}

fn bytes_to_name(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

struct BitReader<'a> {
    input: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, bit_pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.bit_pos >= self.input.len() * 8
    }

    fn read_bits(&mut self, count: u8) -> Result<u8, FormatError> {
        let mut value = 0u8;
        for _ in 0..count {
            let byte = self
                .input
                .get(self.bit_pos / 8)
                .ok_or(FormatError::UnexpectedEof)?;
            let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
            value = (value << 1) | bit;
            self.bit_pos += 1;
        }
        Ok(value)
    }

    fn read_word(&mut self) -> Result<u16, FormatError> {
        let lo = self.read_bits(8)?;
        let hi = self.read_bits(8)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn read_a_field(&mut self) -> Result<(AddressSpace, u16), FormatError> {
        let space = AddressSpace::from_bits(self.read_bits(2)?);
        let value = self.read_word()?;
        Ok((space, value))
    }

    fn read_name_bytes(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.read_bits(3)?;
        (0..len).map(|_| self.read_bits(8)).collect()
    }

    fn read_name(&mut self) -> Result<String, FormatError> {
        self.read_name_bytes().map(|bytes| bytes_to_name(&bytes))
    }

    fn align_byte(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }
}

/// Encodes records into the LINK-80 relocatable bit stream.
#[derive(Debug, Default)]
pub struct RelWriter {
    out: Vec<u8>,
    bit_pos: usize,
}

impl RelWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record to the stream.
    ///
    /// # Errors
    /// Returns `FormatError::Unencodable` for records the bit stream has no
    /// representation for (byte-sized relocatable values, names longer than
    /// seven characters).
    pub fn record(&mut self, record: &LinkRecord) -> Result<(), FormatError> {
        match record {
            LinkRecord::RawBytes(bytes) => {
                for &b in bytes {
                    self.write_bits(0, 1);
                    self.write_bits(b, 8);
                }
            }
            LinkRecord::RelocatableAddress { space, value, is_byte } => {
                if *is_byte || !space.is_relocatable() {
                    return Err(FormatError::Unencodable("relocatable byte or absolute word"));
                }
                self.write_bits(1, 1);
                self.write_bits(space.to_bits(), 2);
                self.write_word(*value);
            }
            LinkRecord::EntrySymbol(name) => self.special_b(0, name.as_bytes())?,
            LinkRecord::SelectCommonBlock(name) => self.special_b(1, name.as_bytes())?,
            LinkRecord::ProgramName(name) => self.special_b(2, name.as_bytes())?,
            LinkRecord::RequestLibrarySearch(name) => self.special_b(3, name.as_bytes())?,
            LinkRecord::Extension(item) => {
                let payload = encode_extension(item);
                self.special_b(4, &payload)?;
            }
            LinkRecord::DefineCommonSize { name, size } => {
                self.special_ab(5, AddressSpace::Absolute, *size, name.as_bytes())?;
            }
            LinkRecord::ChainExternal { space, value, name } => {
                self.special_ab(6, *space, *value, name.as_bytes())?;
            }
            LinkRecord::DefineEntryPoint { space, value, name } => {
                self.special_ab(7, *space, *value, name.as_bytes())?;
            }
            LinkRecord::ExternalMinusOffset(value) => self.special_a(8, AddressSpace::Absolute, *value),
            LinkRecord::ExternalPlusOffset(value) => self.special_a(9, AddressSpace::Absolute, *value),
            LinkRecord::DataAreaSize(size) => self.special_a(10, AddressSpace::Data, *size),
            LinkRecord::SetLocationCounter { space, value } => self.special_a(11, *space, *value),
            LinkRecord::ProgramAreaSize(size) => self.special_a(13, AddressSpace::Code, *size),
            LinkRecord::EndProgram { space, value } => {
                self.special_a(14, *space, *value);
                self.align_byte();
            }
            LinkRecord::EndFile => self.special_header(15),
        }
        Ok(())
    }

    /// Flushes the stream, padding the last byte with zero bits.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn special_header(&mut self, control: u8) {
        self.write_bits(0b100, 3);
        self.write_bits(control, 4);
    }

    fn special_a(&mut self, control: u8, space: AddressSpace, value: u16) {
        self.special_header(control);
        self.write_bits(space.to_bits(), 2);
        self.write_word(value);
    }

    fn special_b(&mut self, control: u8, name: &[u8]) -> Result<(), FormatError> {
        check_name(name)?;
        self.special_header(control);
        self.write_name(name);
        Ok(())
    }

    fn special_ab(
        &mut self,
        control: u8,
        space: AddressSpace,
        value: u16,
        name: &[u8],
    ) -> Result<(), FormatError> {
        check_name(name)?;
        self.special_a(control, space, value);
        self.write_name(name);
        Ok(())
    }

    fn write_name(&mut self, name: &[u8]) {
        // check_name keeps the length within three bits
        self.write_bits(u8::try_from(name.len()).unwrap_or(0), 3);
        for &b in name {
            self.write_bits(b, 8);
        }
    }

    fn write_word(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_bits(lo, 8);
        self.write_bits(hi, 8);
    }

    fn write_bits(&mut self, value: u8, count: u8) {
        for i in (0..count).rev() {
            if self.bit_pos % 8 == 0 {
                self.out.push(0);
            }
            let bit = (value >> i) & 1;
            if let Some(last) = self.out.last_mut() {
                *last |= bit << (7 - self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
    }

    fn align_byte(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }
}

fn check_name(name: &[u8]) -> Result<(), FormatError> {
    if name.len() > MAX_NAME_LEN {
        return Err(FormatError::Unencodable("name longer than seven characters"));
    }
    Ok(())
}

fn encode_extension(item: &ExtensionItem) -> Vec<u8> {
    match item {
        ExtensionItem::ArithmeticOperator(op) => vec![EXT_ARITHMETIC, op.code()],
        ExtensionItem::ReferenceExternal(name) => {
            let mut payload = vec![EXT_REFERENCE_EXTERNAL];
            payload.extend(name.bytes());
            payload
        }
        ExtensionItem::AddressReference { space, value } => {
            let [lo, hi] = value.to_le_bytes();
            vec![EXT_ADDRESS_REFERENCE, space.to_bits(), lo, hi]
        }
    }
}

/// Encodes a whole record list in one go.
///
/// # Errors
/// Propagates the first `RelWriter::record` failure.
pub fn encode_rel(records: &[LinkRecord]) -> Result<Vec<u8>, FormatError> {
    let mut writer = RelWriter::new();
    for record in records {
        writer.record(record)?;
    }
    Ok(writer.finish())
}
