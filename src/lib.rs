//! Read-only parser for Compound File Binary (OLE2) containers, the storage
//! layer behind legacy `.doc`, `.xls`, `.ppt` and `.msg` files.
//!
//! ```no_run
//! let bytes = std::fs::read("book.xls")?;
//! let file = ole_reader::CfbFile::open(bytes)?;
//! let workbook = file.read_stream(&["Workbook"])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chain;
pub mod common;
pub mod difat;
pub mod directory;
pub mod fat;
pub mod header;
pub mod mini_fat;
pub mod ole;
pub mod options;
pub mod stream;

#[cfg(test)]
mod test_support;

pub use common::{ErrorKind, OleError, OleResult, SectorType};
pub use directory::{Color, DirectoryEntry, ObjectType};
pub use header::{is_cfb, Header};
pub use ole::{open_cfb, CfbFile};
pub use options::{CfbOptions, CfbWarning, WarningCode, WarningSink};
