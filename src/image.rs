/// Size of the linked address space.
pub const IMAGE_SIZE: usize = 0x10000;

/// The flat 64K memory image every module is loaded into.
///
/// All accessors wrap at the top of the address space, so a word written at
/// `0xFFFF` puts its high byte at `0x0000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: Vec<u8>,
}

impl MemoryImage {
    #[must_use]
    pub fn new(fill: u8) -> Self {
        Self {
            bytes: vec![fill; IMAGE_SIZE],
        }
    }

    #[must_use]
    pub fn read_byte(&self, address: u16) -> u8 {
        self.bytes[usize::from(address)]
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        self.bytes[usize::from(address)] = value;
    }

    #[must_use]
    pub fn read_word(&self, address: u16) -> u16 {
        u16::from_le_bytes([
            self.read_byte(address),
            self.read_byte(address.wrapping_add(1)),
        ])
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte(address, lo);
        self.write_byte(address.wrapping_add(1), hi);
    }

    /// Copies `data` starting at `address`.
    ///
    /// Returns `true` when the copy ran past `0xFFFF` and continued at `0x0000`.
    pub fn write_bytes(&mut self, address: u16, data: &[u8]) -> bool {
        let start = usize::from(address);
        let head = data.len().min(IMAGE_SIZE - start);
        self.bytes[start..start + head].copy_from_slice(&data[..head]);
        let mut wrapped = false;
        for chunk in data[head..].chunks(IMAGE_SIZE) {
            self.bytes[..chunk.len()].copy_from_slice(chunk);
            wrapped = true;
        }
        wrapped
    }

    /// Inclusive slice `start..=end` of the image.
    #[must_use]
    pub fn slice(&self, start: u16, end: u16) -> &[u8] {
        &self.bytes[usize::from(start)..=usize::from(end)]
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
