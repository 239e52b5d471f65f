//! Structural checksum of a declaration list.
//!
//! Each declaration is reduced to one canonical line with its members
//! sorted and comments dropped. The lines are sorted, JSON-encoded and
//! hashed, so reordering declarations or editing comments leaves the
//! checksum unchanged while any change to a name, type, arity or
//! optionality changes it.

use super::ast::Declaration;
use sha2::{Digest, Sha256};

/// Canonical one-line form of a declaration, `None` for comments and meta.
pub fn canonical_line(decl: &Declaration) -> Option<String> {
    match decl {
        Declaration::Struct(s) => {
            let mut fields: Vec<_> = s.fields.iter().collect();
            fields.sort_by(|a, b| a.name.cmp(&b.name));

            let mut line = format!("struct\t{}\t{}", s.name, s.extends);
            for f in fields {
                line.push_str(&format!(
                    "\t{}\t{}\t{}\t{}",
                    f.name, f.type_name, f.is_array, f.optional
                ));
            }
            line.push('\n');
            Some(line)
        }
        Declaration::Enum(e) => {
            let mut values: Vec<_> = e.values.iter().map(|v| v.value.as_str()).collect();
            values.sort_unstable();

            let mut line = format!("enum\t{}", e.name);
            for v in values {
                line.push('\t');
                line.push_str(v);
            }
            line.push('\n');
            Some(line)
        }
        Declaration::Interface(i) => {
            let mut functions: Vec<_> = i.functions.iter().collect();
            functions.sort_by(|a, b| a.name.cmp(&b.name));

            let mut line = format!("interface\t{}", i.name);
            for f in functions {
                line.push_str(&format!("[{}", f.name));
                // Parameter order is significant, names are not
                for p in &f.params {
                    line.push_str(&format!("\t{}\t{}\t{}", p.type_name, p.is_array, p.optional));
                }
                if let Some(ret) = &f.returns {
                    line.push_str(&format!(
                        "({}\t{}\t{})",
                        ret.type_name, ret.is_array, ret.optional
                    ));
                }
                line.push(']');
            }
            line.push('\n');
            Some(line)
        }
        Declaration::Comment { .. } | Declaration::Meta(_) => None,
    }
}

/// Hex-encoded SHA-256 over the sorted canonical lines.
pub fn checksum(decls: &[Declaration]) -> String {
    let mut lines: Vec<String> = decls.iter().filter_map(canonical_line).collect();
    lines.sort();

    // A Vec<String> always encodes
    let encoded = serde_json::to_string(&lines).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idl::ast::{EnumDecl, EnumValue};

    fn color(values: &[&str]) -> Declaration {
        Declaration::Enum(EnumDecl {
            name: "Color".into(),
            comment: String::new(),
            values: values
                .iter()
                .map(|v| EnumValue {
                    value: v.to_string(),
                    comment: String::new(),
                })
                .collect(),
        })
    }

    #[test]
    fn test_enum_line_sorts_values() {
        assert_eq!(
            canonical_line(&color(&["red", "blue"])).as_deref(),
            Some("enum\tColor\tblue\tred\n")
        );
    }

    #[test]
    fn test_comments_do_not_contribute() {
        let plain = vec![color(&["red"])];
        let commented = vec![
            Declaration::Comment {
                value: "palette".into(),
            },
            color(&["red"]),
        ];
        assert_eq!(checksum(&plain), checksum(&commented));
    }

    #[test]
    fn test_value_change_changes_checksum() {
        assert_ne!(
            checksum(&[color(&["red"])]),
            checksum(&[color(&["green"])])
        );
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        let sum = checksum(&[]);
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
