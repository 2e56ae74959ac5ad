//! Parser script signature detection and legacy migration.
//!
//! Older projects declare `parse(frame, separator)`. The declaration is
//! rewritten at load time to the single-argument form, and the separator
//! becomes a local bound to the configured value, so the body keeps
//! working unchanged.

use crate::error::DecodeError;
use tracing::warn;

/// Notice delivered once when a legacy parser was rewritten
pub const MIGRATION_NOTICE: &str = "Your project used a legacy frame parser function with a \
     'separator' argument. It has been automatically migrated to the new format.";

/// Declared calling convention of `parse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// `parse(frame)`
    Current {
        /// Parameter names as declared
        params: Vec<String>,
    },
    /// `parse(frame, separator)`
    Legacy {
        /// Frame parameter name
        frame: String,
        /// Separator parameter name
        separator: String,
    },
}

/// Result of migrating a legacy parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Rewritten script source
    pub source: String,
    /// Human-readable notice for the consumer
    pub notice: String,
}

/// Location of the `parse` parameter list in the source
#[derive(Debug, Clone, PartialEq, Eq)]
struct Declaration {
    open: usize,
    close: usize,
    params: Vec<String>,
}

/// Detect the declared signature of `parse`
pub fn detect_signature(source: &str) -> Result<Signature, DecodeError> {
    let decl = find_declaration(source).ok_or(DecodeError::MissingDeclaration)?;
    Ok(classify(decl.params))
}

/// Rewrite a legacy two-argument parser; `Ok(None)` when nothing to do
pub fn migrate_legacy(source: &str, separator: &str) -> Result<Option<Migration>, DecodeError> {
    let decl = find_declaration(source).ok_or(DecodeError::MissingDeclaration)?;
    let (frame, sep_name) = match classify(decl.params.clone()) {
        Signature::Current { .. } => return Ok(None),
        Signature::Legacy { frame, separator } => (frame, separator),
    };

    warn!(
        "The 'parse' function has two arguments ('{}', '{}'), indicating use of the old format",
        frame, sep_name
    );

    let mut rewritten = String::with_capacity(source.len() + 32);
    rewritten.push_str(&source[..decl.open + 1]);
    rewritten.push_str(&frame);
    rewritten.push(')');
    rewritten.push_str(&format!(
        "\n  local {} = {}",
        sep_name,
        lua_quote(separator)
    ));
    rewritten.push_str(&source[decl.close + 1..]);

    Ok(Some(Migration {
        source: rewritten,
        notice: MIGRATION_NOTICE.to_string(),
    }))
}

fn classify(params: Vec<String>) -> Signature {
    match params.as_slice() {
        [frame, separator] if separator != "..." => Signature::Legacy {
            frame: frame.clone(),
            separator: separator.clone(),
        },
        _ => Signature::Current { params },
    }
}

/// Find `function parse(`, `local function parse(` or `parse = function(`
fn find_declaration(source: &str) -> Option<Declaration> {
    let mut offset = 0;

    for line in source.split_inclusive('\n') {
        let code = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };

        if let Some(open) = declaration_paren(code) {
            let open = offset + open;
            let close = open + source[open..].find(')')?;
            let params = source[open + 1..close]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            return Some(Declaration {
                open,
                close,
                params,
            });
        }
        offset += line.len();
    }
    None
}

/// Byte offset of the opening parenthesis of a `parse` declaration
fn declaration_paren(code: &str) -> Option<usize> {
    let mut search = 0;
    while let Some(found) = find_word(code, "parse", search) {
        let before = code[..found].trim_end();
        let after_pos = found + "parse".len();
        let after = &code[after_pos..];

        // function parse(...)
        if before.ends_with("function") && is_word_end(before, "function") {
            let rest = after.trim_start();
            if rest.starts_with('(') {
                return Some(after_pos + (after.len() - rest.len()));
            }
        }

        // parse = function(...)
        let rest = after.trim_start();
        if let Some(rest) = rest.strip_prefix('=') {
            let rest = rest.trim_start();
            if let Some(tail) = rest.strip_prefix("function") {
                let tail_trim = tail.trim_start();
                if tail_trim.starts_with('(') {
                    return Some(code.len() - tail_trim.len());
                }
            }
        }

        search = after_pos;
    }
    None
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Next occurrence of `word` at or after `from` bounded by non-identifier bytes
fn find_word(text: &str, word: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut start = from;
    while let Some(rel) = text.get(start..)?.find(word) {
        let pos = start + rel;
        let end = pos + word.len();
        let left_ok = pos == 0 || !is_ident(bytes[pos - 1]);
        let right_ok = end >= bytes.len() || !is_ident(bytes[end]);
        if left_ok && right_ok {
            return Some(pos);
        }
        start = pos + 1;
    }
    None
}

/// True if `text` ends with `word` as a whole identifier
fn is_word_end(text: &str, word: &str) -> bool {
    let start = text.len() - word.len();
    start == 0 || !is_ident(text.as_bytes()[start - 1])
}

/// Quote a string as a Lua literal
fn lua_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for byte in value.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\{:03}", byte)),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_current() {
        let source = "function parse(frame)\n  return { frame }\nend\n";
        assert_eq!(
            detect_signature(source).unwrap(),
            Signature::Current {
                params: vec!["frame".to_string()]
            }
        );
    }

    #[test]
    fn test_detect_forms() {
        let local = "local function parse ( data , sep )\nend";
        assert_eq!(
            detect_signature(local).unwrap(),
            Signature::Legacy {
                frame: "data".to_string(),
                separator: "sep".to_string()
            }
        );

        let assigned = "parse = function(f)\n return {} end";
        assert!(matches!(
            detect_signature(assigned).unwrap(),
            Signature::Current { .. }
        ));
    }

    #[test]
    fn test_missing_declaration() {
        assert_eq!(
            detect_signature("function parser(frame) end").unwrap_err(),
            DecodeError::MissingDeclaration
        );
        assert_eq!(
            detect_signature("-- function parse(frame)\nreturn 1").unwrap_err(),
            DecodeError::MissingDeclaration
        );
        assert!(migrate_legacy("x = 1", ",").is_err());
    }

    #[test]
    fn test_migrate_rewrites_declaration() {
        let source = "-- legacy\nfunction parse(frame, separator)\n  return split(frame, separator)\nend\n";
        let migration = migrate_legacy(source, ";").unwrap().unwrap();

        assert_eq!(
            migration.source,
            "-- legacy\nfunction parse(frame)\n  local separator = \";\"\n  return split(frame, separator)\nend\n"
        );
        assert_eq!(migration.notice, MIGRATION_NOTICE);
        assert!(matches!(
            detect_signature(&migration.source).unwrap(),
            Signature::Current { .. }
        ));
        assert!(migrate_legacy(&migration.source, ";").unwrap().is_none());
    }

    #[test]
    fn test_lua_quote() {
        assert_eq!(lua_quote(","), "\",\"");
        assert_eq!(lua_quote("\t\"\\"), "\"\\t\\\"\\\\\"");
        assert_eq!(lua_quote("\x01"), "\"\\001\"");
    }
}
