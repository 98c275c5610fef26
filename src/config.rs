use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::diagnostics::Result;

/// Immutable language configuration passed explicitly into the lexer, parser,
/// type checker, and interpreter. Loaded from a declarative TOML table; every
/// field has a default so an empty file (or no file) yields the stock
/// language.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LanguageConfig {
    pub keywords: KeywordTable,
    pub root_types: RootTypes,
    pub builtin_modules: Vec<String>,
    /// When true (the default), a nonzero type error count blocks execution.
    pub type_block_policy: bool,
    /// Directory holding one `<module>.ca` overlay script per configured
    /// builtin module. When unset, modules expose their native functions only.
    pub module_root: Option<PathBuf>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            keywords: KeywordTable::default(),
            root_types: RootTypes::default(),
            builtin_modules: vec![
                "collections".into(),
                "fs".into(),
                "http".into(),
                "json".into(),
                "math".into(),
                "vector".into(),
            ],
            type_block_policy: true,
            module_root: None,
        }
    }
}

impl LanguageConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }
}

/// Maps each keyword role to its concrete spelling. The defaults are the
/// stock surface syntax; a configuration file can rename any of them without
/// touching the grammar.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeywordTable {
    pub var: String,
    /// Spelling of the function-declaration keyword.
    pub function: String,
    #[serde(rename = "async")]
    pub async_: String,
    pub class: String,
    pub extends: String,
    pub new: String,
    pub this: String,
    #[serde(rename = "if")]
    pub if_: String,
    #[serde(rename = "else")]
    pub else_: String,
    #[serde(rename = "while")]
    pub while_: String,
    #[serde(rename = "for")]
    pub for_: String,
    #[serde(rename = "in")]
    pub in_: String,
    #[serde(rename = "try")]
    pub try_: String,
    pub catch: String,
    pub finally: String,
    pub throw: String,
    #[serde(rename = "return")]
    pub return_: String,
    #[serde(rename = "break")]
    pub break_: String,
    #[serde(rename = "continue")]
    pub continue_: String,
    pub import: String,
    #[serde(rename = "await")]
    pub await_: String,
    /// Spelling of the lambda-expression keyword.
    pub lambda: String,
    #[serde(rename = "true")]
    pub true_: String,
    #[serde(rename = "false")]
    pub false_: String,
    pub null: String,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            var: "var".into(),
            function: "intent".into(),
            async_: "async".into(),
            class: "class".into(),
            extends: "extends".into(),
            new: "new".into(),
            this: "this".into(),
            if_: "if".into(),
            else_: "else".into(),
            while_: "while".into(),
            for_: "for".into(),
            in_: "in".into(),
            try_: "try".into(),
            catch: "catch".into(),
            finally: "finally".into(),
            throw: "throw".into(),
            return_: "return".into(),
            break_: "break".into(),
            continue_: "continue".into(),
            import: "import".into(),
            await_: "await".into(),
            lambda: "fn".into(),
            true_: "true".into(),
            false_: "false".into(),
            null: "null".into(),
        }
    }
}

/// Spellings of the root/primitive type names used in annotations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootTypes {
    pub int: String,
    pub float: String,
    pub bool: String,
    pub string: String,
    pub null: String,
    pub any: String,
    pub list: String,
    pub map: String,
    pub set: String,
    pub task: String,
}

impl Default for RootTypes {
    fn default() -> Self {
        Self {
            int: "int".into(),
            float: "float".into(),
            bool: "bool".into(),
            string: "string".into(),
            null: "null".into(),
            any: "any".into(),
            list: "List".into(),
            map: "Map".into(),
            set: "Set".into(),
            task: "Task".into(),
        }
    }
}
