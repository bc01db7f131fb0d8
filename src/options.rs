use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use crate::common::{OleError, OleResult};

/// Callback receiving recoverable inconsistencies found in lenient mode.
pub type WarningSink = Arc<dyn Fn(&CfbWarning) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCode {
    FatChainInvalid,
    FatChainTooShort,
    FatChainLengthMismatch,
    FatSectorReadFailed,
    MiniFatChainInvalid,
    MiniFatChainTooShort,
    MiniFatChainLengthMismatch,
    MiniStreamTruncated,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::FatChainInvalid => "FAT_CHAIN_INVALID",
            WarningCode::FatChainTooShort => "FAT_CHAIN_TOO_SHORT",
            WarningCode::FatChainLengthMismatch => "FAT_CHAIN_LENGTH_MISMATCH",
            WarningCode::FatSectorReadFailed => "FAT_SECTOR_READ_FAILED",
            WarningCode::MiniFatChainInvalid => "MINIFAT_CHAIN_INVALID",
            WarningCode::MiniFatChainTooShort => "MINIFAT_CHAIN_TOO_SHORT",
            WarningCode::MiniFatChainLengthMismatch => "MINIFAT_CHAIN_LENGTH_MISMATCH",
            WarningCode::MiniStreamTruncated => "MINISTREAM_TRUNCATED",
        }
    }
}

impl Display for WarningCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable inconsistency reported instead of failing in lenient mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfbWarning {
    pub code: WarningCode,
    /// Which structure was being read, e.g. `stream "Workbook"` or `FAT sector 3`.
    pub location: String,
    pub message: String,
    /// Numeric details such as expected and actual chain lengths.
    pub meta: Vec<(&'static str, u64)>,
}

impl CfbWarning {
    pub fn new(code: WarningCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code, location: location.into(), message: message.into(), meta: Vec::new() }
    }

    pub fn with_meta(mut self, key: &'static str, value: u64) -> Self {
        self.meta.push((key, value));
        self
    }
}

impl Display for CfbWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.code, self.location, self.message)
    }
}

/// Options for [`open_cfb`](crate::open_cfb).
///
/// The default is lenient with no warning sink; warnings still go to the `log` facade.
#[derive(Clone, Default)]
pub struct CfbOptions {
    pub strict: bool,
    pub on_warning: Option<WarningSink>,
}

impl CfbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn on_warning<F>(mut self, sink: F) -> Self
    where
        F: Fn(&CfbWarning) + Send + Sync + 'static,
    {
        self.on_warning = Some(Arc::new(sink));
        self
    }
}

impl Debug for CfbOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfbOptions")
            .field("strict", &self.strict)
            .field("on_warning", &self.on_warning.is_some())
            .finish()
    }
}

/// Decides whether an inconsistency fails the read or becomes a warning.
#[derive(Clone, Copy)]
pub(crate) struct Reporter<'a> {
    pub strict: bool,
    sink: Option<&'a WarningSink>,
}

impl<'a> Reporter<'a> {
    pub fn new(strict: bool, sink: Option<&'a WarningSink>) -> Self {
        Self { strict, sink }
    }

    pub fn from_options(options: &'a CfbOptions) -> Self {
        Self::new(options.strict, options.on_warning.as_ref())
    }

    /// Fails with the warning's code in strict mode, otherwise logs and forwards it.
    pub fn inconsistency(&self, warning: CfbWarning) -> OleResult<()> {
        if self.strict {
            return Err(OleError::chain(warning.code, format!("{}: {}", warning.location, warning.message)));
        }
        log::warn!("{}", warning);
        if let Some(sink) = self.sink {
            sink(&warning);
        }
        Ok(())
    }

    /// Structural anomalies without a warning code: returned when strict, logged otherwise.
    pub fn tolerate(&self, err: OleError) -> OleResult<()> {
        if self.strict {
            return Err(err);
        }
        log::warn!("{}", err);
        Ok(())
    }

    pub fn anomaly(&self, message: String) -> OleResult<()> {
        self.tolerate(OleError::InvalidHeader(message))
    }
}
