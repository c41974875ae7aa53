// This file is part of Regolith.
//
// Regolith is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Regolith is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Regolith.  If not, see <http://www.gnu.org/licenses/>.
use tiling::{Error, Result};

// Bit-packed stream for the quadtree blob. Split flags cost one bit; leaf
// payloads are LEB128 varints carried byte-at-a-time through the same
// stream, so nothing in the blob is byte aligned past the first branch.
pub(crate) struct BitWriter {
    out: Vec<u8>,
    acc: u8,
    used: u8,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            out: Vec::new(),
            acc: 0,
            used: 0,
        }
    }

    pub(crate) fn put_bit(&mut self, bit: bool) {
        if bit {
            self.acc |= 1 << self.used;
        }
        self.used += 1;
        if self.used == 8 {
            self.out.push(self.acc);
            self.acc = 0;
            self.used = 0;
        }
    }

    pub(crate) fn put_byte(&mut self, byte: u8) {
        for i in 0..8 {
            self.put_bit(byte & (1 << i) != 0);
        }
    }

    pub(crate) fn put_varint(&mut self, mut v: u32) {
        loop {
            let mut byte = (v & 0x7F) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            self.put_byte(byte);
            if v == 0 {
                return;
            }
        }
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.used != 0 {
            self.out.push(self.acc);
        }
        self.out
    }
}

pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte: 0,
            bit: 0,
        }
    }

    pub(crate) fn get_bit(&mut self) -> Result<bool> {
        if self.byte >= self.data.len() {
            return Err(Error::format("quadtree blob truncated"));
        }
        let bit = self.data[self.byte] & (1 << self.bit) != 0;
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte += 1;
        }
        Ok(bit)
    }

    pub(crate) fn get_byte(&mut self) -> Result<u8> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.get_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }

    pub(crate) fn get_varint(&mut self) -> Result<u32> {
        let mut v = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.get_byte()?;
            if shift >= 32 {
                return Err(Error::format("quadtree varint overflows u32"));
            }
            v |= ((byte & 0x7F) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_round_trip() -> anyhow::Result<()> {
        let mut w = BitWriter::new();
        w.put_bit(true);
        w.put_varint(300);
        w.put_bit(false);
        w.put_bit(true);
        w.put_varint(0);
        let blob = w.finish();

        let mut r = BitReader::new(&blob);
        assert!(r.get_bit()?);
        assert_eq!(r.get_varint()?, 300);
        assert!(!r.get_bit()?);
        assert!(r.get_bit()?);
        assert_eq!(r.get_varint()?, 0);
        Ok(())
    }

    #[test]
    fn test_truncation_is_a_format_error() {
        let mut r = BitReader::new(&[]);
        assert!(matches!(r.get_bit(), Err(Error::Format(_))));
    }
}
