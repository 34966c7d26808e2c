//! Category of a stack, from pattern rules on func names.

use std::cell::OnceCell;
use std::sync::Arc;

use hangscope_protocol::SharedStr;
use regex::Regex;
use serde::Deserialize;

use crate::model::{IndexIntoFuncTable, IndexIntoStackTable, Thread};

pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone)]
pub enum CategoryMatcher {
    Prefix(String),
    Substring(String),
    Regex(Regex),
}

impl CategoryMatcher {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Prefix(p) => name.starts_with(p.as_str()),
            Self::Substring(s) => name.contains(s.as_str()),
            Self::Regex(re) => re.is_match(name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub matcher: CategoryMatcher,
    pub category: SharedStr,
}

/// A rule as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRuleConfig {
    pub kind: MatcherKind,
    pub pattern: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    Prefix,
    Substring,
    Regex,
}

/// Ordered rules; the first rule matching a func name decides its category.
#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl CategoryTable {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(rules: &[CategoryRuleConfig]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                let matcher = match rule.kind {
                    MatcherKind::Prefix => CategoryMatcher::Prefix(rule.pattern.clone()),
                    MatcherKind::Substring => CategoryMatcher::Substring(rule.pattern.clone()),
                    MatcherKind::Regex => CategoryMatcher::Regex(Regex::new(&rule.pattern)?),
                };
                Ok(CategoryRule {
                    matcher,
                    category: rule.category.as_str().into(),
                })
            })
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn category_for_name(&self, name: &str) -> Option<&SharedStr> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(name))
            .map(|rule| &rule.category)
    }

    /// Every category the table can produce, first appearance first,
    /// followed by [`UNCATEGORIZED`].
    pub fn all_categories(&self) -> Vec<SharedStr> {
        let mut out: Vec<SharedStr> = Vec::new();
        for rule in &self.rules {
            if !out.contains(&rule.category) {
                out.push(rule.category.clone());
            }
        }
        out.push(UNCATEGORIZED.into());
        out
    }
}

impl Default for CategoryTable {
    fn default() -> Self {
        let prefix = |p: &str, c: &str| CategoryRule {
            matcher: CategoryMatcher::Prefix(p.to_string()),
            category: c.into(),
        };
        let substring = |s: &str, c: &str| CategoryRule {
            matcher: CategoryMatcher::Substring(s.to_string()),
            category: c.into(),
        };
        let mut rules = vec![
            prefix("js::gc::", "gc"),
            prefix("js::Nursery", "gc"),
            substring("CycleCollect", "cc"),
            prefix("js::", "script"),
            prefix("JS::", "script"),
            prefix("mozilla::dom::", "dom"),
            prefix("mozilla::layers::", "graphics"),
            prefix("mozilla::gfx::", "graphics"),
            prefix("mozilla::PresShell::", "layout"),
            prefix("nsCSSFrameConstructor::", "layout"),
            prefix("mozilla::RestyleManager::", "layout"),
            prefix("mozilla::net::", "network"),
            prefix("mozilla::ipc::", "ipc"),
            prefix("IPC::", "ipc"),
            prefix("mozilla::storage::", "storage"),
        ];
        if let Ok(kernel) = Regex::new(r"^(Nt|Zw)[A-Z]\w+$") {
            rules.push(CategoryRule {
                matcher: CategoryMatcher::Regex(kernel),
                category: "kernel".into(),
            });
        }
        Self { rules }
    }
}

/// Category lookup for the stacks of one thread.
///
/// A stack takes the category of the nearest frame, itself first and then
/// its callers, whose func name matches a rule. Results are memoized per
/// stack and per func.
#[derive(Debug)]
pub struct SampleCategorizer {
    thread: Thread,
    table: Arc<CategoryTable>,
    by_stack: Vec<OnceCell<SharedStr>>,
    by_func: Vec<OnceCell<Option<SharedStr>>>,
    uncategorized: SharedStr,
}

impl SampleCategorizer {
    pub fn new(thread: &Thread, table: Arc<CategoryTable>) -> Self {
        Self {
            thread: thread.clone(),
            table,
            by_stack: (0..thread.stack_table().len()).map(|_| OnceCell::new()).collect(),
            by_func: (0..thread.func_table().len()).map(|_| OnceCell::new()).collect(),
            uncategorized: UNCATEGORIZED.into(),
        }
    }

    pub fn table(&self) -> &CategoryTable {
        &self.table
    }

    pub fn all_categories(&self) -> Vec<SharedStr> {
        self.table.all_categories()
    }

    fn func_category(&self, func: IndexIntoFuncTable) -> Option<SharedStr> {
        let compute = || self.table.category_for_name(&self.thread.func_name(func)).cloned();
        match self.by_func.get(func) {
            Some(cell) => cell.get_or_init(compute).clone(),
            None => compute(),
        }
    }

    pub fn category_of(&self, stack: IndexIntoStackTable) -> SharedStr {
        let stack_table = self.thread.stack_table();
        if stack >= stack_table.len() {
            return self.uncategorized.clone();
        }
        let mut unresolved = Vec::new();
        let mut current = Some(stack);
        let category = loop {
            let Some(s) = current else {
                break self.uncategorized.clone();
            };
            if let Some(known) = self.by_stack[s].get() {
                break known.clone();
            }
            if let Some(category) = self.func_category(stack_table.func[s]) {
                unresolved.push(s);
                break category;
            }
            unresolved.push(s);
            current = stack_table.prefix[s];
        };
        for s in unresolved {
            let _ = self.by_stack[s].set(category.clone());
        }
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::thread_from_samples;

    fn categorizer(thread: &Thread) -> SampleCategorizer {
        SampleCategorizer::new(thread, Arc::new(CategoryTable::default()))
    }

    #[test]
    fn nearest_matching_frame_wins() {
        let thread = thread_from_samples(&[
            ("main;mozilla::dom::Run;js::RunScript;helper", 1.0),
            ("main;mozilla::dom::Run", 1.0),
            ("main", 1.0),
        ]);
        let c = categorizer(&thread);
        // Stacks: main, dom::Run, js::RunScript, helper.
        assert_eq!(&*c.category_of(3), "script");
        assert_eq!(&*c.category_of(2), "script");
        assert_eq!(&*c.category_of(1), "dom");
        assert_eq!(&*c.category_of(0), UNCATEGORIZED);
        assert_eq!(&*c.category_of(42), UNCATEGORIZED);
    }

    #[test]
    fn first_rule_wins() {
        let table = CategoryTable::default();
        assert_eq!(table.category_for_name("js::gc::Collect").map(|c| &**c), Some("gc"));
        assert_eq!(table.category_for_name("NtWaitForSingleObject").map(|c| &**c), Some("kernel"));
        assert_eq!(table.category_for_name("Nothing"), None);
    }

    #[test]
    fn categorizer_is_deterministic() {
        let thread = thread_from_samples(&[("a;js::b;c", 1.0), ("a;mozilla::net::d", 1.0)]);
        let first = categorizer(&thread);
        let second = categorizer(&thread);
        for stack in (0..thread.stack_table().len()).rev() {
            assert_eq!(first.category_of(stack), second.category_of(stack));
            assert_eq!(first.category_of(stack), first.category_of(stack));
        }
    }

    #[test]
    fn table_from_config() {
        let rules: Vec<CategoryRuleConfig> = serde_json::from_str(
            r#"[
                {"kind": "regex", "pattern": "^Foo(Bar)?$", "category": "foo"},
                {"kind": "substring", "pattern": "Baz", "category": "baz"}
            ]"#,
        )
        .unwrap();
        let table = CategoryTable::from_config(&rules).unwrap();
        assert_eq!(table.category_for_name("FooBar").map(|c| &**c), Some("foo"));
        assert_eq!(table.category_for_name("xBazx").map(|c| &**c), Some("baz"));
        let names: Vec<String> = table.all_categories().iter().map(ToString::to_string).collect();
        assert_eq!(names, ["foo", "baz", UNCATEGORIZED]);

        let bad = vec![CategoryRuleConfig {
            kind: MatcherKind::Regex,
            pattern: "(".into(),
            category: "x".into(),
        }];
        assert!(CategoryTable::from_config(&bad).is_err());
    }
}
