//! Local file system access: tree scanning and content checksums.

pub mod checksum;
pub mod scanner;

pub use scanner::Scanner;
