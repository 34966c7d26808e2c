//! URL-safe string form of a [`TransformStack`].
//!
//! Each transform is a short key followed by positional fields joined with
//! `-`; transforms are joined with `~`:
//!
//! ```text
//! f-combined-0x1-i~mf-12~cr-cpp-3-41
//! ```

use thiserror::Error;

use crate::transform::{Implementation, Transform, TransformStack};
use crate::uint_array::{UintArrayError, decode_uint_array, encode_uint_array};

const TRANSFORM_SEPARATOR: char = '~';
const FIELD_SEPARATOR: char = '-';
const INVERTED_FLAG: &str = "i";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformParseError {
    #[error("unknown transform key {0:?}")]
    UnknownKey(String),
    #[error("{key}: missing field {field}")]
    MissingField { key: String, field: &'static str },
    #[error("{key}: trailing field {value:?}")]
    TrailingField { key: String, value: String },
    #[error("{key}: invalid number {value:?}")]
    BadNumber { key: String, value: String },
    #[error("{key}: invalid implementation {value:?}")]
    BadImplementation { key: String, value: String },
    #[error("{key}: invalid func path: {source}")]
    BadPath {
        key: String,
        #[source]
        source: UintArrayError,
    },
}

/// Result of decoding a transform stack: the entries that parsed, plus one
/// error per entry that was dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTransforms {
    pub transforms: TransformStack,
    pub errors: Vec<TransformParseError>,
}

pub fn stringify_transform(transform: &Transform) -> String {
    let key = transform.short_key();
    match transform {
        Transform::FocusSubtree {
            func_path,
            implementation,
            inverted,
        } => {
            let mut s = format!("{key}-{implementation}-{}", encode_uint_array(func_path));
            if *inverted {
                s.push(FIELD_SEPARATOR);
                s.push_str(INVERTED_FLAG);
            }
            s
        }
        Transform::MergePathIntoCaller {
            func_path,
            implementation,
        } => format!("{key}-{implementation}-{}", encode_uint_array(func_path)),
        Transform::FocusFunction { func_index }
        | Transform::MergeFunction { func_index }
        | Transform::DropFunction { func_index }
        | Transform::CollapseFunctionSubtree { func_index } => format!("{key}-{func_index}"),
        Transform::CollapseLib {
            lib_index,
            collapsed_func_index,
            implementation,
        } => format!("{key}-{implementation}-{lib_index}-{collapsed_func_index}"),
        Transform::CollapseDirectRecursion {
            func_index,
            implementation,
        } => format!("{key}-{implementation}-{func_index}"),
    }
}

pub fn stringify_transforms(transforms: &[Transform]) -> String {
    transforms
        .iter()
        .map(stringify_transform)
        .collect::<Vec<_>>()
        .join(&TRANSFORM_SEPARATOR.to_string())
}

/// Decode a `~`-joined transform stack. Entries that fail to parse are
/// skipped and reported; the rest of the stack still applies.
pub fn parse_transforms(s: &str) -> ParsedTransforms {
    let mut parsed = ParsedTransforms::default();
    for entry in s.split(TRANSFORM_SEPARATOR).filter(|e| !e.is_empty()) {
        match parse_transform(entry) {
            Ok(t) => parsed.transforms.push(t),
            Err(e) => parsed.errors.push(e),
        }
    }
    parsed
}

pub fn parse_transform(entry: &str) -> Result<Transform, TransformParseError> {
    let mut fields = Fields::new(entry);
    let key = fields.key.clone();
    let transform = match key.as_str() {
        "f" => {
            let implementation = fields.implementation()?;
            let func_path = fields.path()?;
            let inverted = match fields.next_opt() {
                None => false,
                Some(INVERTED_FLAG) => true,
                Some(other) => {
                    return Err(TransformParseError::TrailingField {
                        key: key.clone(),
                        value: other.to_string(),
                    });
                }
            };
            Transform::FocusSubtree {
                func_path,
                implementation,
                inverted,
            }
        }
        "mcn" => {
            let implementation = fields.implementation()?;
            let func_path = fields.path()?;
            Transform::MergePathIntoCaller {
                func_path,
                implementation,
            }
        }
        "ff" => Transform::FocusFunction {
            func_index: fields.number("func")?,
        },
        "mf" => Transform::MergeFunction {
            func_index: fields.number("func")?,
        },
        "df" => Transform::DropFunction {
            func_index: fields.number("func")?,
        },
        "cfs" => Transform::CollapseFunctionSubtree {
            func_index: fields.number("func")?,
        },
        "cr" => {
            let implementation = fields.implementation()?;
            let lib_index = fields.number("lib")?;
            let collapsed_func_index = fields.number("collapsed func")?;
            Transform::CollapseLib {
                lib_index,
                collapsed_func_index,
                implementation,
            }
        }
        "rec" => {
            let implementation = fields.implementation()?;
            let func_index = fields.number("func")?;
            Transform::CollapseDirectRecursion {
                func_index,
                implementation,
            }
        }
        _ => return Err(TransformParseError::UnknownKey(key.clone())),
    };
    fields.finish()?;
    Ok(transform)
}

struct Fields<'a> {
    key: String,
    rest: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(entry: &'a str) -> Self {
        let mut rest = entry.split(FIELD_SEPARATOR);
        let key = rest.next().unwrap_or_default().to_string();
        Self { key, rest }
    }

    fn next_opt(&mut self) -> Option<&'a str> {
        self.rest.next()
    }

    fn field(&mut self, field: &'static str) -> Result<&'a str, TransformParseError> {
        self.rest
            .next()
            .ok_or_else(|| TransformParseError::MissingField {
                key: self.key.clone(),
                field,
            })
    }

    fn number(&mut self, field: &'static str) -> Result<usize, TransformParseError> {
        let value = self.field(field)?;
        value.parse().map_err(|_| TransformParseError::BadNumber {
            key: self.key.clone(),
            value: value.to_string(),
        })
    }

    fn implementation(&mut self) -> Result<Implementation, TransformParseError> {
        let value = self.field("implementation")?;
        Implementation::parse(value).ok_or_else(|| TransformParseError::BadImplementation {
            key: self.key.clone(),
            value: value.to_string(),
        })
    }

    fn path(&mut self) -> Result<Vec<usize>, TransformParseError> {
        let value = self.field("func path")?;
        decode_uint_array(value).map_err(|source| TransformParseError::BadPath {
            key: self.key.clone(),
            source,
        })
    }

    fn finish(mut self) -> Result<(), TransformParseError> {
        match self.rest.next() {
            None => Ok(()),
            Some(value) => Err(TransformParseError::TrailingField {
                key: self.key,
                value: value.to_string(),
            }),
        }
    }
}
