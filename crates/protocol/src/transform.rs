use serde::{Deserialize, Serialize};

/// Ordered func indices identifying a call node independently of stack
/// indices: root-to-leaf for the regular tree, leaf-to-root when inverted.
///
/// A path is only meaningful for the transform stack and implementation
/// filter it was recorded under.
pub type FuncPath = Vec<usize>;

/// An ordered sequence of transforms, applied left to right.
pub type TransformStack = Vec<Transform>;

/// Which frames a transform is allowed to see when matching paths.
///
/// Frames that don't match the implementation are skipped over rather
/// than counted against a path match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Implementation {
    #[default]
    Combined,
    Js,
    Cpp,
}

impl Implementation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Js => "js",
            Self::Cpp => "cpp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "combined" => Some(Self::Combined),
            "js" => Some(Self::Js),
            "cpp" => Some(Self::Cpp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-driven, composable rewrite of a thread's call tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Transform {
    /// Keep only the subtree under `func_path`, re-rooted at its last func.
    FocusSubtree {
        func_path: FuncPath,
        implementation: Implementation,
        inverted: bool,
    },
    /// Re-root the tree at every first occurrence of a function.
    FocusFunction { func_index: usize },
    /// Remove the single call node at `func_path`, giving its time and
    /// children to its caller.
    MergePathIntoCaller {
        func_path: FuncPath,
        implementation: Implementation,
    },
    /// Remove every call node of a function, giving time to the callers.
    MergeFunction { func_index: usize },
    /// Discard every sample that has the function anywhere on its stack.
    DropFunction { func_index: usize },
    /// Collapse each run of frames from one library into a single frame.
    CollapseLib {
        lib_index: usize,
        collapsed_func_index: usize,
        implementation: Implementation,
    },
    /// Collapse directly recursive calls of a function into one frame.
    CollapseDirectRecursion {
        func_index: usize,
        implementation: Implementation,
    },
    /// Fold everything below a function into that function's self time.
    CollapseFunctionSubtree { func_index: usize },
}

impl Transform {
    /// The URL short key of this variant.
    pub fn short_key(&self) -> &'static str {
        match self {
            Self::FocusSubtree { .. } => "f",
            Self::FocusFunction { .. } => "ff",
            Self::MergePathIntoCaller { .. } => "mcn",
            Self::MergeFunction { .. } => "mf",
            Self::DropFunction { .. } => "df",
            Self::CollapseLib { .. } => "cr",
            Self::CollapseDirectRecursion { .. } => "rec",
            Self::CollapseFunctionSubtree { .. } => "cfs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implementation_names() {
        for imp in [
            Implementation::Combined,
            Implementation::Js,
            Implementation::Cpp,
        ] {
            assert_eq!(Implementation::parse(imp.as_str()), Some(imp));
        }
        assert_eq!(Implementation::parse("rust"), None);
    }

    #[test]
    fn serde_uses_kebab_tags() {
        let t = Transform::MergeFunction { func_index: 3 };
        let json = serde_json::to_string(&t).unwrap_or_default();
        assert!(json.contains(r#""type":"merge-function""#), "{json}");
    }
}
