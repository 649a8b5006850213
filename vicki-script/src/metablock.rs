//! Metablock parser
//!
//! The metablock is the declarative header of a script:
//!
//! ```text
//! // ==VickiScript==
//! // @name Get Started
//! // @utterance Ask $invocation to get started
//! // ==/VickiScript==
//! ```
//!
//! It has to be the first non-comment content of the file. Parsing is all or
//! nothing: any broken rule rejects the whole script.

use crate::error::MetablockError;
use crate::permission::PermissionSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const START_MARKER: &str = "==VickiScript==";
pub const END_MARKER: &str = "==/VickiScript==";
pub const INVOCATION_PLACEHOLDER: &str = "$invocation";

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-z_\-\.]+$").unwrap());
static FIELD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@([A-Za-z][A-Za-z0-9_]*)(?:\s+(.*))?$").unwrap());

/// Parsed metablock of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metablock {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub permissions: Vec<PermissionSpec>,
    pub utterances: Vec<String>,
    pub update_urls: Vec<String>,
    pub version: u32,
}

impl Metablock {
    /// Utterance examples with `$invocation` replaced.
    pub fn utterances_for(&self, invocation: &str) -> Vec<String> {
        self.utterances
            .iter()
            .map(|u| u.replace(INVOCATION_PLACEHOLDER, invocation))
            .collect()
    }
}

/// Strip the leading `//` of a comment line, if any.
fn line_comment(line: &str) -> Option<&str> {
    line.trim().strip_prefix("//").map(str::trim)
}

pub fn parse_metablock(source: &str) -> Result<Metablock, MetablockError> {
    let mut lines = source.lines().enumerate().map(|(i, l)| (i + 1, l));

    // Leading region: blank lines and comments only, until the start marker.
    let mut in_block_comment = false;
    loop {
        let Some((line_no, line)) = lines.next() else {
            return Err(MetablockError::MissingStartMarker);
        };
        let trimmed = line.trim();

        if in_block_comment {
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = line_comment(trimmed) {
            if comment == START_MARKER {
                break;
            }
            continue;
        }
        if trimmed.starts_with("/*") {
            in_block_comment = !trimmed.contains("*/");
            continue;
        }
        return Err(MetablockError::CodeBeforeMetablock { line: line_no });
    }

    let mut name: Option<String> = None;
    let mut id: Option<String> = None;
    let mut descriptions: Vec<String> = Vec::new();
    let mut icon: Option<String> = None;
    let mut permissions = Vec::new();
    let mut utterances = Vec::new();
    let mut update_urls = Vec::new();
    let mut version: Option<u32> = None;
    let mut closed = false;

    for (line_no, line) in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let comment = line_comment(trimmed).ok_or(MetablockError::MalformedLine { line: line_no })?;
        if comment == END_MARKER {
            closed = true;
            break;
        }
        if comment == START_MARKER {
            return Err(MetablockError::MalformedLine { line: line_no });
        }

        let Some(caps) = FIELD_PATTERN.captures(comment) else {
            // Free-form comment inside the block.
            continue;
        };
        let key = &caps[1];
        let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        match key {
            "name" => {
                if name.is_some() {
                    return Err(MetablockError::DuplicateName { line: line_no });
                }
                if !value.is_empty() {
                    name = Some(value.to_string());
                }
            }
            "id" => {
                if !ID_PATTERN.is_match(value) {
                    return Err(MetablockError::InvalidId(value.to_string()));
                }
                id = Some(value.to_string());
            }
            "description" => {
                if !value.is_empty() {
                    descriptions.push(value.to_string());
                }
            }
            "icon" => {
                let valid = url::Url::parse(value)
                    .map(|u| matches!(u.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !valid {
                    return Err(MetablockError::InvalidIcon(value.to_string()));
                }
                icon = Some(value.to_string());
            }
            "permission" => {
                let spec = value.parse::<PermissionSpec>().map_err(|reason| {
                    MetablockError::InvalidPermission {
                        value: value.to_string(),
                        reason,
                    }
                })?;
                permissions.push(spec);
            }
            "utterance" => {
                if !value.is_empty() {
                    utterances.push(value.to_string());
                }
            }
            "updateUrl" => {
                if !value.is_empty() {
                    update_urls.push(value.to_string());
                }
            }
            "version" => {
                let parsed = value
                    .parse::<u32>()
                    .map_err(|_| MetablockError::InvalidVersion(value.to_string()))?;
                version = Some(parsed);
            }
            other => {
                log::warn!("line {}: ignoring unknown metablock key @{}", line_no, other);
            }
        }
    }

    if !closed {
        return Err(MetablockError::MissingEndMarker);
    }
    let name = name.ok_or(MetablockError::MissingName)?;

    Ok(Metablock {
        id: id.unwrap_or_else(|| name.clone()),
        name,
        description: if descriptions.is_empty() {
            None
        } else {
            Some(descriptions.join(" "))
        },
        icon,
        permissions,
        utterances,
        update_urls,
        version: version.unwrap_or(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::BrowserNamespace;
    use pretty_assertions::assert_eq;

    const GET_STARTED: &str = r#"// ==VickiScript==
// @name Get Started
// @utterance Ask $invocation to get started
// ==/VickiScript==

$vs.listen(/^get started$/, handler);
"#;

    #[test]
    fn test_minimal_metablock() {
        let meta = parse_metablock(GET_STARTED).unwrap();
        assert_eq!(meta.name, "Get Started");
        assert_eq!(meta.id, "Get Started");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.description, None);
        assert_eq!(
            meta.utterances_for("web browser"),
            vec!["Ask web browser to get started".to_string()]
        );
    }

    #[test]
    fn test_full_metablock() {
        let src = r#"/*
 * Shopping helpers
 */
// leading comment
// ==VickiScript==
// @name Amazon Search
// @id amazon.search
// @description Search amazon
// @description for products.
// @icon https://example.com/icon.png
// @permission *://*.amazon.com
// @permission browser.history
// @permission native
// @utterance Ask $invocation to search amazon for socks
// @utterance Ask $invocation to start shopping for pants
// @updateUrl https://example.com/amazon.vicki.js
// @version 3
// ==/VickiScript==
"#;
        let meta = parse_metablock(src).unwrap();
        assert_eq!(meta.id, "amazon.search");
        assert_eq!(meta.description.as_deref(), Some("Search amazon for products."));
        assert_eq!(meta.version, 3);
        assert_eq!(meta.permissions.len(), 3);
        assert_eq!(meta.permissions[1], PermissionSpec::Browser(BrowserNamespace::History));
        assert_eq!(meta.permissions[2], PermissionSpec::Native);
        assert_eq!(meta.utterances.len(), 2);
        assert!(meta.utterances[0].contains("socks"));
        assert_eq!(meta.update_urls.len(), 1);
    }

    #[test]
    fn test_missing_name() {
        let src = "// ==VickiScript==\n// @utterance hi\n// ==/VickiScript==\n";
        assert_eq!(parse_metablock(src), Err(MetablockError::MissingName));
    }

    #[test]
    fn test_duplicate_name() {
        let src = "// ==VickiScript==\n// @name a\n// @name b\n// ==/VickiScript==\n";
        assert_eq!(
            parse_metablock(src),
            Err(MetablockError::DuplicateName { line: 3 })
        );
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(
            parse_metablock("// @name a\n"),
            Err(MetablockError::MissingStartMarker)
        );
        assert_eq!(
            parse_metablock("// ==VickiScript==\n// @name a\n"),
            Err(MetablockError::MissingEndMarker)
        );
        assert_eq!(
            parse_metablock("const x = 1;\n// ==VickiScript==\n// @name a\n// ==/VickiScript==\n"),
            Err(MetablockError::CodeBeforeMetablock { line: 1 })
        );
        assert_eq!(
            parse_metablock("// ==VickiScript==\n@name a\n// ==/VickiScript==\n"),
            Err(MetablockError::MalformedLine { line: 2 })
        );
    }

    #[test]
    fn test_invalid_fields() {
        let bad_id = "// ==VickiScript==\n// @name a\n// @id Bad Id\n// ==/VickiScript==\n";
        assert_eq!(
            parse_metablock(bad_id),
            Err(MetablockError::InvalidId("Bad Id".to_string()))
        );

        let bad_version = "// ==VickiScript==\n// @name a\n// @version two\n// ==/VickiScript==\n";
        assert_eq!(
            parse_metablock(bad_version),
            Err(MetablockError::InvalidVersion("two".to_string()))
        );

        let bad_perm = "// ==VickiScript==\n// @name a\n// @permission browser.cookies\n// ==/VickiScript==\n";
        assert!(matches!(
            parse_metablock(bad_perm),
            Err(MetablockError::InvalidPermission { .. })
        ));

        let bad_icon = "// ==VickiScript==\n// @name a\n// @icon ftp://x/y.png\n// ==/VickiScript==\n";
        assert!(matches!(parse_metablock(bad_icon), Err(MetablockError::InvalidIcon(_))));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let src = "// ==VickiScript==\n// @name a\n// @author me\n// just a note\n// ==/VickiScript==\n";
        assert_eq!(parse_metablock(src).unwrap().name, "a");
    }
}
