//! Legacy-format gate.
//!
//! Release-candidate-era index tables relied on a custom engine collator.
//! That format is long unsupported; the registration entry point survives
//! only so opening such a table fails fast with a clear diagnostic
//! instead of misreading its bytes.

use kelpie_error::{KelpieError, Result};
use tracing::error;

use crate::{MAXIMUM_INDEX_VERSION, MINIMUM_INDEX_VERSION};

/// Collator customization hook for legacy index tables. Always fails:
/// the format it served predates the supported version range and needs a
/// repair pass to upgrade.
pub fn register_legacy_collator(uri: &str) -> Result<()> {
    error!(%uri, "found an index from an unsupported release-candidate version");
    Err(KelpieError::UnsupportedIndexFormat {
        found: 0,
        min: MINIMUM_INDEX_VERSION,
        max: MAXIMUM_INDEX_VERSION,
    })
}
