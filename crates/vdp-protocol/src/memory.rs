//! Read-only views over emulated VDP memory snapshots.
//!
//! VDP RAM is big-endian and address spaces wrap at their power-of-two
//! size, so reads mask the address instead of bounds-checking.

/// Color RAM addressing mode. Modes 0 and 1 mirror the palette into the
/// upper half of the address space; coefficient tables resident in CRAM
/// read through that mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRamMode {
    Rgb555Bank0,
    Rgb555Bank1,
    Rgb888,
}

#[derive(Clone, Copy)]
pub struct VramView<'a> {
    bytes: &'a [u8],
}

impl<'a> VramView<'a> {
    /// `bytes` must be a power-of-two length (the emulation layer hands the
    /// full 512 KiB VDP2 RAM or 512 KiB VDP1 RAM).
    pub fn new(bytes: &'a [u8]) -> Self {
        assert!(
            bytes.len().is_power_of_two(),
            "vram snapshot length must be a power of two"
        );
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn mask(&self, addr: u32) -> usize {
        (addr as usize) & (self.bytes.len() - 1)
    }

    pub fn read_u8(&self, addr: u32) -> u8 {
        self.bytes[self.mask(addr)]
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        u16::from(self.read_u8(addr)) << 8 | u16::from(self.read_u8(addr.wrapping_add(1)))
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        u32::from(self.read_u16(addr)) << 16 | u32::from(self.read_u16(addr.wrapping_add(2)))
    }
}

#[derive(Clone, Copy)]
pub struct CramView<'a> {
    bytes: &'a [u8],
    pub mode: ColorRamMode,
}

impl<'a> CramView<'a> {
    pub fn new(bytes: &'a [u8], mode: ColorRamMode) -> Self {
        assert!(
            bytes.len().is_power_of_two(),
            "cram snapshot length must be a power of two"
        );
        Self { bytes, mode }
    }

    fn mask(&self, addr: u32) -> usize {
        (addr as usize) & (self.bytes.len() - 1)
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        let base = self.mask(addr);
        u16::from(self.bytes[base]) << 8 | u16::from(self.bytes[self.mask(addr.wrapping_add(1))])
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        u32::from(self.read_u16(addr)) << 16 | u32::from(self.read_u16(addr.wrapping_add(2)))
    }

    /// Coefficient-table reads go through the palette mirror in the RGB555
    /// modes; RGB888 mode addresses the table directly.
    pub fn read_coefficient_word(&self, addr: u32) -> u16 {
        match self.mode {
            ColorRamMode::Rgb888 => self.read_u16(addr),
            _ => self.read_u16(addr | 0x800),
        }
    }

    pub fn read_coefficient_long(&self, addr: u32) -> u32 {
        match self.mode {
            ColorRamMode::Rgb888 => self.read_u32(addr),
            _ => self.read_u32(addr | 0x800),
        }
    }

    /// Look up a palette entry and expand it to packed RGBA8 with `meta`
    /// in the alpha byte.
    pub fn rgba(&self, index: u32, meta: crate::PixelMeta) -> u32 {
        match self.mode {
            ColorRamMode::Rgb888 => crate::rgb888_to_rgba(self.read_u32(index * 4), meta),
            _ => crate::rgb555_to_rgba(self.read_u16(index * 2), meta),
        }
    }

    /// Raw 15-bit palette word; bit 15 is the per-color special bit some
    /// color-calculation modes key on.
    pub fn raw_color_word(&self, index: u32) -> u16 {
        match self.mode {
            ColorRamMode::Rgb888 => self.read_u16(index * 4),
            _ => self.read_u16(index * 2),
        }
    }
}
