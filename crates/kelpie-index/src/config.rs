//! Engine create-config assembly.
//!
//! The config string has three zones: a prefix the user may override, the
//! caller/descriptor pass-throughs, and a fixed suffix that pins the byte
//! formats and the app-metadata document. Nothing user-supplied may land
//! after the suffix boundary.

use kelpie_error::{KelpieError, Result};
use kelpie_okv::OpContext;
use tracing::debug;

use crate::descriptor::IndexDescriptor;
use crate::{CURRENT_INDEX_VERSION, STORAGE_ENGINE_NAME};

/// Deployment-level knobs folded into every index create config.
#[derive(Clone, Debug)]
pub struct CreateConfigOptions {
    /// Enable engine prefix compression on index tables.
    pub prefix_compression: bool,
    /// Block compressor name for index tables.
    pub block_compressor: String,
    /// Per-namespace customization snippet appended after the fixed
    /// prefix (encryption hooks and the like); empty for none.
    pub namespace_hook: String,
}

impl Default for CreateConfigOptions {
    fn default() -> Self {
        Self {
            prefix_compression: true,
            block_compressor: "none".to_owned(),
            namespace_hook: String::new(),
        }
    }
}

/// Validate the adapter's subdocument of an index descriptor's
/// `storageEngine` options and flatten it into config text.
///
/// Only `configString` is recognized; the first unknown field fails with
/// `InvalidOptions` naming the field, so typos surface instead of being
/// silently dropped.
pub fn parse_index_options(options: &serde_json::Value) -> Result<String> {
    let Some(map) = options.as_object() else {
        return Err(KelpieError::InvalidConfig {
            detail: format!("'{STORAGE_ENGINE_NAME}' options must be a document"),
        });
    };
    let mut out = String::new();
    for (field, value) in map {
        if field == "configString" {
            let Some(text) = value.as_str() else {
                return Err(KelpieError::InvalidConfig {
                    detail: "'configString' must be a string".to_owned(),
                });
            };
            out.push_str(text);
            out.push(',');
        } else {
            return Err(KelpieError::InvalidOptions {
                option: field.clone(),
            });
        }
    }
    Ok(out)
}

/// Compose the full engine create config for an index table.
pub fn generate_create_config(
    desc: &IndexDescriptor,
    options: &CreateConfigOptions,
    extra_config: &str,
) -> Result<String> {
    let mut ss = String::new();

    // User configuration may override the prefix but never the suffix.
    // Page sizes are chosen so maximum-size keys cannot overflow a page.
    ss.push_str("type=file,internal_page_max=16k,leaf_page_max=16k,");
    ss.push_str("checksum=on,");
    if options.prefix_compression {
        ss.push_str("prefix_compression=true,");
    }
    ss.push_str(&format!("block_compressor={},", options.block_compressor));
    ss.push_str(&options.namespace_hook);
    ss.push_str(extra_config);

    if let Some(storage_engine) = &desc.storage_engine {
        let sub = storage_engine
            .get(STORAGE_ENGINE_NAME)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let parsed = parse_index_options(&sub)?;
        if !parsed.is_empty() {
            ss.push(',');
            ss.push_str(&parsed);
        }
    }

    // No user-specified config below this line: the byte formats and the
    // metadata document are required for correct behavior.
    ss.push_str(",key_format=u,value_format=u");
    ss.push_str(&format!(
        ",app_metadata=(formatVersion={},infoObj={}),",
        CURRENT_INDEX_VERSION,
        desc.info_document()
    ));

    debug!(config = %ss, index = %desc.name, "index create string");
    Ok(ss)
}

/// Create the index table on the engine.
pub fn create_index_table(ctx: &OpContext, uri: &str, config: &str) -> Result<()> {
    debug!(%uri, %config, "create index table");
    ctx.session().create_table(uri, config)
}
