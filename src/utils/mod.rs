//! # Utility Functions and Types
//!
//! The crc module provides the MPEG-2 CRC32 used by PSI sections:
//!
//! ```rust
//! use tsinput::utils::Crc32Mpeg2;
//!
//! # fn main() {
//! let crc = Crc32Mpeg2::new();
//! assert_eq!(crc.calculate(b"123456789"), 0x0376e6e7);
//! # }
//! ```

/// CRC calculation implementations
pub mod crc;

pub use crc::Crc32Mpeg2;
