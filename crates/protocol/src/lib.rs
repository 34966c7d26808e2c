//! Value types shared between the hangscope engine and its callers: the
//! transform vocabulary, func paths, and their URL-safe encodings.

pub mod shared_str;
pub mod transform;
pub mod uint_array;
pub mod url;

pub use shared_str::SharedStr;
pub use transform::{FuncPath, Implementation, Transform, TransformStack};
pub use url::{ParsedTransforms, TransformParseError, parse_transforms, stringify_transforms};
