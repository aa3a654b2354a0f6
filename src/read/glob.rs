//! Shell-style pattern matching over archive paths.
//!
//! Patterns use the classic component syntax: `*` matches any run of
//! non-separator bytes, `?` matches a single byte, `[...]` matches a byte
//! class (with leading `^` for negation and `-` ranges), and `\` escapes the
//! next byte. A pattern never matches across `/`; [`crate::read::Archive::glob`]
//! applies one pattern component per directory level.

use crate::errors::{ErrorInner, Result};

/// Does a single pattern component match a single name?
pub(crate) fn component_match(pattern: &[u8], name: &[u8]) -> Result<bool> {
    match_here(pattern, name)
}

fn match_here(mut pattern: &[u8], mut name: &[u8]) -> Result<bool> {
    loop {
        let Some(&p) = pattern.first() else {
            return Ok(name.is_empty());
        };
        match p {
            b'*' => {
                // collapse runs of stars, then try every split point
                let rest = trim_stars(&pattern[1..]);
                if rest.is_empty() {
                    return Ok(true);
                }
                for split in 0..=name.len() {
                    if match_here(rest, &name[split..])? {
                        return Ok(true);
                    }
                }
                return Ok(false);
            }
            b'?' => {
                if name.is_empty() {
                    return Ok(false);
                }
                pattern = &pattern[1..];
                name = &name[1..];
            }
            b'[' => {
                let Some(&candidate) = name.first() else {
                    return Ok(false);
                };
                let (matched, rest) = match_class(&pattern[1..], candidate)?;
                if !matched {
                    return Ok(false);
                }
                pattern = rest;
                name = &name[1..];
            }
            b'\\' => {
                let Some(&literal) = pattern.get(1) else {
                    return Err(ErrorInner::InvalidPath.into());
                };
                if name.first() != Some(&literal) {
                    return Ok(false);
                }
                pattern = &pattern[2..];
                name = &name[1..];
            }
            literal => {
                if name.first() != Some(&literal) {
                    return Ok(false);
                }
                pattern = &pattern[1..];
                name = &name[1..];
            }
        }
    }
}

fn trim_stars(mut pattern: &[u8]) -> &[u8] {
    while pattern.first() == Some(&b'*') {
        pattern = &pattern[1..];
    }
    pattern
}

/// Match one byte against a `[...]` class; returns the rest of the pattern
/// after the closing bracket
fn match_class(mut pattern: &[u8], candidate: u8) -> Result<(bool, &[u8])> {
    let negated = pattern.first() == Some(&b'^');
    if negated {
        pattern = &pattern[1..];
    }

    let mut matched = false;
    let mut first = true;
    loop {
        match pattern.first() {
            None => return Err(ErrorInner::InvalidPath.into()),
            Some(b']') if !first => {
                pattern = &pattern[1..];
                break;
            }
            Some(&lo_raw) => {
                let lo = if lo_raw == b'\\' {
                    let Some(&escaped) = pattern.get(1) else {
                        return Err(ErrorInner::InvalidPath.into());
                    };
                    pattern = &pattern[1..];
                    escaped
                } else {
                    lo_raw
                };
                pattern = &pattern[1..];

                let hi = if pattern.first() == Some(&b'-') && pattern.get(1) != Some(&b']') {
                    let Some(&hi_raw) = pattern.get(1) else {
                        return Err(ErrorInner::InvalidPath.into());
                    };
                    pattern = &pattern[2..];
                    hi_raw
                } else {
                    lo
                };

                if lo <= candidate && candidate <= hi {
                    matched = true;
                }
                first = false;
            }
        }
    }

    Ok((matched != negated, pattern))
}

/// Does this pattern component contain any matching operators?
pub(crate) fn has_meta(pattern: &str) -> bool {
    pattern.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, name: &str) -> bool {
        component_match(pattern.as_bytes(), name.as_bytes()).unwrap()
    }

    #[test]
    fn literals_and_stars() {
        assert!(matches("libz.so", "libz.so"));
        assert!(matches("*.so", "libz.so"));
        assert!(!matches("*.so", "libz.a"));
        assert!(matches("lib*", "lib"));
        assert!(matches("*", "anything"));
        assert!(matches("a*b*c", "axxbyyc"));
        assert!(!matches("a*b*c", "axxbyy"));
    }

    #[test]
    fn question_and_classes() {
        assert!(matches("?.txt", "a.txt"));
        assert!(!matches("?.txt", "ab.txt"));
        assert!(matches("[a-c].txt", "b.txt"));
        assert!(!matches("[a-c].txt", "d.txt"));
        assert!(matches("[^a-c].txt", "d.txt"));
        assert!(matches("[]]x", "]x"));
    }

    #[test]
    fn bad_patterns_error() {
        assert!(component_match(b"[abc", b"a").is_err());
        assert!(component_match(b"x\\", b"x").is_err());
    }
}
