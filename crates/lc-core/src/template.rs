//! Command-template resolution.
//!
//! Resource and board records carry command templates with named
//! placeholders (`pdu off {port}`). A template is tokenized into a literal
//! argument vector first, then each token is substituted from the merged
//! board+resource attribute map with `strfmt`. The resulting argv is handed
//! to the process spawner directly — never a shell — so attribute values
//! cannot smuggle in extra arguments or shell metacharacters.
//!
//! Unresolved placeholders are a validation error raised before anything
//! executes.

use std::collections::{BTreeMap, HashMap};

use strfmt::strfmt;

use crate::error::{LcError, LcResult};

/// Resolve a command template into an argument vector.
///
/// Tokenization happens before substitution, so a substituted value is always
/// exactly one argument regardless of its content.
pub fn resolve(template: &str, vars: &BTreeMap<String, String>) -> LcResult<Vec<String>> {
    if template.trim().is_empty() {
        return Err(LcError::Validation("empty command template".into()));
    }

    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut argv = Vec::new();
    for token in template.split_whitespace() {
        let resolved = strfmt(token, &vars).map_err(|e| {
            LcError::Validation(format!(
                "unresolved placeholder in command template '{}': {}",
                template, e
            ))
        })?;
        argv.push(resolved);
    }
    Ok(argv)
}
