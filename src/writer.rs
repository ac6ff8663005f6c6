use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::image::MemoryImage;

const HEX_RECORD_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Binary,
    IntelHex,
}

/// Serializes `start..=end` of the image in the requested format.
#[must_use]
pub fn render_output(image: &MemoryImage, format: OutputFormat, start: u16, end: u16) -> Vec<u8> {
    match format {
        OutputFormat::Binary => build_binary(image, start, end),
        OutputFormat::IntelHex => build_intel_hex(image, start, end).into_bytes(),
    }
}

#[must_use]
pub fn build_binary(image: &MemoryImage, start: u16, end: u16) -> Vec<u8> {
    image.slice(start, end).to_vec()
}

/// Intel-HEX data records of up to 32 bytes each, followed by the EOF record.
/// Lines end with CRLF.
#[must_use]
pub fn build_intel_hex(image: &MemoryImage, start: u16, end: u16) -> String {
    let mut out = String::new();
    let mut address = start;
    for chunk in image.slice(start, end).chunks(HEX_RECORD_LEN) {
        push_hex_record(&mut out, address, 0x00, chunk);
        // chunks are at most 32 bytes
        address = address.wrapping_add(u16::try_from(chunk.len()).unwrap_or(0));
    }
    push_hex_record(&mut out, 0x0000, 0x01, &[]);
    out
}

fn push_hex_record(out: &mut String, address: u16, record_type: u8, data: &[u8]) {
    let len = u8::try_from(data.len()).unwrap_or(u8::MAX);
    let [hi, lo] = address.to_be_bytes();
    let sum = data
        .iter()
        .fold(len.wrapping_add(hi).wrapping_add(lo).wrapping_add(record_type), |acc, b| {
            acc.wrapping_add(*b)
        });
    let checksum = sum.wrapping_neg();

    let _ = write!(out, ":{len:02X}{address:04X}{record_type:02X}");
    for b in data {
        let _ = write!(out, "{b:02X}");
    }
    let _ = write!(out, "{checksum:02X}\r\n");
}

/// Writes a rendered output image to `output_path`.
///
/// # Errors
/// Returns an error when the file can't be written.
pub fn write_output(output_path: &Path, payload: &[u8]) -> Result<()> {
    std::fs::write(output_path, payload)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    Ok(())
}
