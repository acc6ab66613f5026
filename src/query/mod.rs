//! # Query Facade
//!
//! The textual surface over the engine. Three commands, space-separated
//! tokens, `'…'` brackets a sub-list whose inner tokens are again
//! space-separated:
//!
//! ```text
//! CREATE <name> '<key types>' '<data types>'
//! INSERT <name> '<key fields>' '<data fields>'
//! GET <name> '<key fields>'
//! ```
//!
//! Verbs are case-insensitive; tree names are case-sensitive and become
//! file names under the engine's base directory. Type literals are
//! `SHORT INT INT64 DOUBLE BOOL STRING<N>`; field literals parse per
//! field type (`0`/`1` for BOOL).
//!
//! This module is the only writer of textual literals into tuples. Both
//! scratch tuples of an INSERT come out of a per-statement bump arena.

use std::path::{Path, PathBuf};

use bumpalo::Bump;
use eyre::{bail, ensure, Result, WrapErr};

use crate::config::DEFAULT_PAGE_BYTES;
use crate::records::{Schema, TupleMut};
use crate::Tree;

/// Cursor-style tokenizer for the command grammar.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_spaces(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos] == b' ' {
            self.pos += 1;
        }
    }

    /// Next token: either a run of non-space bytes or the interior of a
    /// `'…'` pair (which may contain spaces).
    pub fn next_token(&mut self) -> Option<&'a str> {
        self.skip_spaces();
        let bytes = self.input.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        if bytes[self.pos] == b'\'' {
            self.pos += 1;
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos] != b'\'' {
                self.pos += 1;
            }
            let token = &self.input[start..self.pos];
            if self.pos < bytes.len() {
                self.pos += 1; // closing quote
            }
            Some(token)
        } else {
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos] != b' ' {
                self.pos += 1;
            }
            Some(&self.input[start..self.pos])
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutput {
    Created,
    Inserted,
    /// GET result: the rendered data tuple, or `None` when absent.
    Value(Option<String>),
}

impl std::fmt::Display for QueryOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOutput::Created | QueryOutput::Inserted => write!(f, "OK"),
            QueryOutput::Value(Some(text)) => write!(f, "{}", text),
            QueryOutput::Value(None) => write!(f, "(not found)"),
        }
    }
}

/// Executes queries against trees stored under one base directory.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    base_dir: PathBuf,
    page_bytes: usize,
}

impl QueryEngine {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            page_bytes: DEFAULT_PAGE_BYTES,
        }
    }

    /// Overrides the page size used by CREATE.
    pub fn with_page_bytes(mut self, page_bytes: usize) -> Self {
        self.page_bytes = page_bytes;
        self
    }

    pub fn execute(&self, query: &str) -> Result<QueryOutput> {
        let mut tokens = Tokenizer::new(query);
        let Some(verb) = tokens.next_token() else {
            bail!("empty query");
        };

        match verb.to_ascii_uppercase().as_str() {
            "CREATE" => self.create(&mut tokens),
            "INSERT" => self.insert(&mut tokens),
            "GET" => self.get(&mut tokens),
            other => bail!("unknown command '{}'", other),
        }
    }

    fn create(&self, tokens: &mut Tokenizer<'_>) -> Result<QueryOutput> {
        let name = required(tokens, "tree name")?;
        let key_types = required(tokens, "key type list")?;
        let data_types = required(tokens, "data type list")?;

        let key_schema = Schema::parse(key_types).wrap_err("bad key type list")?;
        let data_schema = Schema::parse(data_types).wrap_err("bad data type list")?;

        Tree::create(self.tree_path(name)?, key_schema, data_schema, self.page_bytes)
            .wrap_err_with(|| format!("CREATE {} failed", name))?;
        Ok(QueryOutput::Created)
    }

    fn insert(&self, tokens: &mut Tokenizer<'_>) -> Result<QueryOutput> {
        let name = required(tokens, "tree name")?;
        let key_fields = required(tokens, "key field list")?;
        let data_fields = required(tokens, "data field list")?;

        let mut tree = Tree::open(self.tree_path(name)?)?;

        let arena = Bump::new();
        let key_buf = arena.alloc_slice_fill_copy(tree.key_schema().width(), 0u8);
        let data_buf = arena.alloc_slice_fill_copy(tree.data_schema().width(), 0u8);

        fill_tuple(tree.key_schema(), key_buf, key_fields).wrap_err("bad key field list")?;
        fill_tuple(tree.data_schema(), data_buf, data_fields).wrap_err("bad data field list")?;

        tree.insert(key_buf, data_buf)?;
        tree.close()?;
        Ok(QueryOutput::Inserted)
    }

    fn get(&self, tokens: &mut Tokenizer<'_>) -> Result<QueryOutput> {
        let name = required(tokens, "tree name")?;
        let key_fields = required(tokens, "key field list")?;

        let tree = Tree::open(self.tree_path(name)?)?;

        let arena = Bump::new();
        let key_buf = arena.alloc_slice_fill_copy(tree.key_schema().width(), 0u8);
        fill_tuple(tree.key_schema(), key_buf, key_fields).wrap_err("bad key field list")?;

        let cursor = tree.find(key_buf)?;
        let output = cursor
            .data()
            .map(|data| tree.data_schema().format_tuple(data));
        Ok(QueryOutput::Value(output))
    }

    fn tree_path(&self, name: &str) -> Result<PathBuf> {
        ensure!(
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "invalid tree name '{}'",
            name
        );
        Ok(self.base_dir.join(name))
    }
}

fn required<'a>(tokens: &mut Tokenizer<'a>, what: &str) -> Result<&'a str> {
    match tokens.next_token() {
        Some(token) if !token.is_empty() => Ok(token),
        _ => bail!("missing {}", what),
    }
}

/// Parses one space-separated literal per schema field, in order.
fn fill_tuple(schema: &Schema, buf: &mut [u8], fields_text: &str) -> Result<()> {
    let mut tuple = TupleMut::new(schema, buf)?;
    let mut tokens = Tokenizer::new(fields_text);
    let mut idx = 0;

    while let Some(literal) = tokens.next_token() {
        ensure!(
            idx < schema.field_count(),
            "too many field literals: schema has {} fields",
            schema.field_count()
        );
        tuple.set_field(idx, literal)?;
        idx += 1;
    }
    ensure!(
        idx == schema.field_count(),
        "expected {} field literals, got {}",
        schema.field_count(),
        idx
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn collect(input: &str) -> Vec<&str> {
        let mut tokens = Tokenizer::new(input);
        let mut out = Vec::new();
        while let Some(token) = tokens.next_token() {
            out.push(token);
        }
        out
    }

    #[test]
    fn tokenizer_splits_on_spaces() {
        assert_eq!(collect("GET users '1 2'"), ["GET", "users", "1 2"]);
        assert_eq!(collect("  a   b  "), ["a", "b"]);
        assert_eq!(collect(""), Vec::<&str>::new());
    }

    #[test]
    fn tokenizer_quoted_lists_keep_spaces() {
        assert_eq!(
            collect("CREATE t 'INT STRING<8>' 'INT'"),
            ["CREATE", "t", "INT STRING<8>", "INT"]
        );
        // unterminated quote runs to end of input
        assert_eq!(collect("GET t 'abc"), ["GET", "t", "abc"]);
        assert_eq!(collect("''"), [""]);
    }

    #[test]
    fn create_insert_get_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());

        assert_eq!(
            engine
                .execute("CREATE users 'INT' 'STRING<16> BOOL'")
                .unwrap(),
            QueryOutput::Created
        );
        assert_eq!(
            engine.execute("INSERT users '7' 'alice 1'").unwrap(),
            QueryOutput::Inserted
        );
        assert_eq!(
            engine.execute("GET users '7'").unwrap(),
            QueryOutput::Value(Some("alice 1".into()))
        );
        assert_eq!(
            engine.execute("GET users '8'").unwrap(),
            QueryOutput::Value(None)
        );
    }

    #[test]
    fn verbs_are_case_insensitive() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());

        engine.execute("create t 'INT' 'INT'").unwrap();
        engine.execute("insert t '1' '10'").unwrap();
        assert_eq!(
            engine.execute("get t '1'").unwrap(),
            QueryOutput::Value(Some("10".into()))
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());

        let err = engine.execute("DELETE t '1'").unwrap_err();
        assert!(err.to_string().contains("unknown command"));
        assert!(engine.execute("").is_err());
    }

    #[test]
    fn field_count_must_match_schema() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());
        engine.execute("CREATE t 'INT INT' 'INT'").unwrap();

        let err = engine.execute("INSERT t '1' '10'").unwrap_err();
        assert!(format!("{:#}", err).contains("expected 2 field literals"));

        let err = engine.execute("INSERT t '1 2 3' '10'").unwrap_err();
        assert!(format!("{:#}", err).contains("too many field literals"));
    }

    #[test]
    fn insert_into_missing_tree_fails() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());

        let err = engine.execute("INSERT ghost '1' '2'").unwrap_err();
        assert!(err.to_string().contains("not open"));
    }

    #[test]
    fn tree_names_are_validated() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path());

        assert!(engine
            .execute("CREATE ../escape 'INT' 'INT'")
            .is_err());
    }

    #[test]
    fn inserted_rows_survive_separate_statements() {
        let dir = tempdir().unwrap();
        let engine = QueryEngine::new(dir.path()).with_page_bytes(64);
        engine.execute("CREATE t 'INT' 'INT'").unwrap();

        // enough inserts to force splits with 4-slot pages
        for v in 0..32 {
            engine
                .execute(&format!("INSERT t '{}' '{}'", v, v * 2))
                .unwrap();
        }
        for v in 0..32 {
            assert_eq!(
                engine.execute(&format!("GET t '{}'", v)).unwrap(),
                QueryOutput::Value(Some(format!("{}", v * 2))),
                "value of key {}",
                v
            );
        }
    }
}
