//! 8-bit Pearson hashing of supernova names.
//!
//! Exported spectra are spread over `16 × 16` directories named after the two hex digits of
//! the Pearson hash of the supernova name, so that no directory grows too large. The
//! permutation table is fixed; changing it would move every exported file.
use std::fmt;

const PERMUTATION: [u8; 256] = [
    77, 130, 147, 35, 240, 54, 126, 114, 153, 101, 146, 155, 237, 148, 231, 80,
    86, 216, 74, 90, 133, 107, 223, 154, 42, 12, 245, 193, 28, 16, 180, 174,
    58, 69, 33, 105, 125, 182, 73, 238, 191, 100, 150, 254, 1, 135, 242, 10,
    251, 30, 5, 88, 81, 221, 36, 31, 131, 185, 8, 98, 97, 190, 247, 112,
    123, 234, 219, 120, 60, 222, 66, 96, 83, 13, 4, 144, 253, 19, 24, 172,
    45, 179, 93, 11, 46, 207, 59, 99, 39, 44, 53, 220, 118, 34, 189, 41,
    55, 109, 25, 40, 57, 229, 250, 102, 27, 183, 164, 178, 82, 212, 129, 197,
    79, 186, 252, 116, 75, 134, 187, 94, 23, 0, 89, 2, 132, 206, 217, 151,
    249, 175, 210, 194, 181, 127, 61, 171, 49, 142, 233, 68, 255, 37, 62, 244,
    92, 152, 196, 21, 202, 248, 124, 7, 84, 227, 218, 176, 17, 199, 110, 103,
    63, 149, 115, 170, 47, 50, 243, 85, 140, 67, 228, 137, 162, 95, 205, 169,
    156, 166, 230, 157, 104, 15, 198, 111, 64, 241, 113, 209, 208, 215, 14, 18,
    201, 239, 177, 70, 136, 72, 143, 87, 78, 203, 224, 3, 192, 225, 141, 119,
    232, 168, 204, 188, 43, 165, 22, 76, 184, 145, 48, 211, 52, 106, 108, 51,
    9, 91, 235, 167, 246, 32, 26, 200, 71, 226, 128, 56, 121, 163, 38, 195,
    29, 161, 138, 213, 117, 139, 20, 122, 65, 236, 173, 6, 159, 158, 160, 214,
];

pub fn pearson_hash(name: &str) -> u8 {
    name.bytes()
        .fold(0u8, |hash, byte| PERMUTATION[(hash ^ byte) as usize])
}

/// The two-level directory bucket of a name: the high and low hex digits of its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket(u8);

impl Bucket {
    pub fn of(name: &str) -> Self {
        Bucket(pearson_hash(name))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn high(&self) -> char {
        hex_digit(self.0 >> 4)
    }

    pub fn low(&self) -> char {
        hex_digit(self.0 & 0x0f)
    }
}

fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}
