// src/unit/mod.rs
//! Loading code units.
//!
//! A unit is one transform-language source file. Every load reads, parses
//! and executes the file into a fresh namespace, then hands back a single
//! top-level value. Nothing is cached between loads.

pub mod ast;
pub mod builtins;
pub mod frame;
pub mod interp;
pub mod parse;
pub mod value;

use std::{
    cell::RefCell,
    collections::hash_map::DefaultHasher,
    fmt, fs,
    hash::{Hash, Hasher},
    io,
    path::{Path, PathBuf},
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use interp::{Output, RuntimeError};
pub use parse::SyntaxError;
pub use value::{Args, Globals, Series, Value};

use interp::{global, Interpreter};

/// Process-wide count of loads, part of every [`UnitId`].
static LOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("code unit not found: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("failed to load code unit {}", .path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        cause: LoadCause,
    },
    #[error("code unit {} has no top-level name '{symbol}'", .path.display())]
    SymbolMissing { path: PathBuf, symbol: String },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            LoadError::NotFound { path }
            | LoadError::LoadFailure { path, .. }
            | LoadError::SymbolMissing { path, .. } => path,
        }
    }
}

/// What went wrong while turning a file into a namespace.
#[derive(Debug, Error)]
pub enum LoadCause {
    #[error("not a regular file")]
    NotAFile,
    #[error("cannot read source")]
    Read(#[source] io::Error),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Identity of a single load: `unit_<stem>_<path-hash>_<seq>`.
///
/// Two files with the same name in different directories get different
/// hashes; loading the same file twice gets different sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId(String);

impl UnitId {
    fn for_path(path: &Path) -> Self {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let seq = LOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        UnitId(format!("unit_{}_{:016x}_{}", stem, hasher.finish(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a unit lives: a directory plus a file name inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLocation {
    pub directory: PathBuf,
    pub file_name: String,
}

impl UnitLocation {
    pub fn new(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            file_name: file_name.into(),
        }
    }

    /// Split a file path into its directory and file name.
    pub fn from_path(path: &Path) -> Self {
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            directory,
            file_name,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl fmt::Display for UnitLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

/// A value taken out of a freshly executed unit.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub id: UnitId,
    pub path: PathBuf,
    pub value: Value,
}

/// Loads units with a fixed `print` destination.
#[derive(Debug, Clone, Default)]
pub struct UnitLoader {
    output: Output,
}

impl UnitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader whose units print into a shared buffer instead of stdout.
    pub fn capturing() -> Self {
        Self {
            output: Output::Captured(Rc::new(RefCell::new(Vec::new()))),
        }
    }

    /// Lines printed so far by units of a capturing loader.
    pub fn captured(&self) -> Vec<String> {
        match &self.output {
            Output::Captured(lines) => lines.borrow().clone(),
            Output::Stdout => Vec::new(),
        }
    }

    /// An interpreter that prints where this loader's units print.
    pub fn interpreter(&self) -> Interpreter {
        Interpreter::new(self.output.clone())
    }

    /// Load `directory/file_name` and return its top-level `symbol`.
    #[instrument(level = "debug", skip(self, directory))]
    pub fn load(
        &self,
        directory: &Path,
        file_name: &str,
        symbol: &str,
    ) -> Result<Loaded, LoadError> {
        let path = directory.join(file_name);
        if !path.exists() {
            return Err(LoadError::NotFound { path });
        }
        let failure = |cause: LoadCause| LoadError::LoadFailure {
            path: path.clone(),
            cause,
        };
        if !path.is_file() {
            return Err(failure(LoadCause::NotAFile));
        }
        let source = fs::read_to_string(&path).map_err(|e| failure(LoadCause::Read(e)))?;
        let body = parse::parse_module(&source).map_err(|e| failure(e.into()))?;

        let id = UnitId::for_path(&path);
        debug!(unit = %id, path = %path.display(), statements = body.len(), "executing unit");
        let globals = Globals::default();
        self.interpreter()
            .run_module(&body, &globals)
            .map_err(|e| failure(e.into()))?;

        let value = global(&globals, symbol).ok_or_else(|| LoadError::SymbolMissing {
            path: path.clone(),
            symbol: symbol.to_string(),
        })?;
        info!(unit = %id, symbol, kind = %value.type_name(), "loaded");
        Ok(Loaded { id, path, value })
    }

    pub fn load_from(&self, location: &UnitLocation, symbol: &str) -> Result<Loaded, LoadError> {
        self.load(&location.directory, &location.file_name, symbol)
    }
}

/// Load with the default loader (units print to stdout).
pub fn load(directory: &Path, file_name: &str, symbol: &str) -> Result<Value, LoadError> {
    UnitLoader::new()
        .load(directory, file_name, symbol)
        .map(|loaded| loaded.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::error::Error;
    use tempfile::TempDir;

    fn unit(dir: &TempDir, name: &str, source: &str) -> anyhow::Result<()> {
        fs::write(dir.path().join(name), source)?;
        Ok(())
    }

    #[test]
    fn returns_the_named_value() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        unit(&dir, "consts.py", "LIMIT = 10 * 3\nNAMES = ['a', 'b']\n")?;
        assert!(matches!(load(dir.path(), "consts.py", "LIMIT")?, Value::Int(30)));
        assert_eq!(load(dir.path(), "consts.py", "NAMES")?.repr(), "['a', 'b']");
        Ok(())
    }

    #[test]
    fn missing_file_is_not_found() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let err = load(dir.path(), "absent.py", "transform").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
        assert_eq!(err.path(), dir.path().join("absent.py"));
        Ok(())
    }

    #[test]
    fn directory_is_a_load_failure() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("pkg.py"))?;
        let err = load(dir.path(), "pkg.py", "transform").unwrap_err();
        assert!(matches!(
            err,
            LoadError::LoadFailure {
                cause: LoadCause::NotAFile,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn bad_source_is_a_load_failure() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        unit(&dir, "broken.py", "def transform(:\n    pass\n")?;
        unit(&dir, "raises.py", "x = undefined_name + 1\n")?;
        unit(&dir, "imports.py", "import os\n")?;
        unit(&dir, "classes.py", "class T:\n    pass\n")?;
        for name in ["broken.py", "raises.py", "imports.py", "classes.py"] {
            let err = load(dir.path(), name, "x").unwrap_err();
            assert!(
                matches!(err, LoadError::LoadFailure { .. }),
                "{} gave {:?}",
                name,
                err
            );
        }
        let err = load(dir.path(), "raises.py", "x").unwrap_err();
        let cause = err.source().map(ToString::to_string).unwrap_or_default();
        assert_eq!(cause, "NameError: name 'undefined_name' is not defined");
        Ok(())
    }

    #[test]
    fn unknown_symbol_is_missing() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        unit(&dir, "t.py", "def transfrom(*dfs, **kwargs):\n    return dfs[0]\n")?;
        let err = load(dir.path(), "t.py", "transform").unwrap_err();
        assert!(matches!(
            &err,
            LoadError::SymbolMissing { symbol, .. } if symbol == "transform"
        ));
        Ok(())
    }

    #[test]
    fn every_load_executes_afresh() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        unit(
            &dir,
            "side.py",
            indoc! {r#"
                print("loading")
                counter = 1
            "#},
        )?;
        let loader = UnitLoader::capturing();
        let first = loader.load(dir.path(), "side.py", "counter")?;
        let second = loader.load(dir.path(), "side.py", "counter")?;
        assert_eq!(loader.captured(), vec!["loading", "loading"]);
        assert_ne!(first.id, second.id);
        Ok(())
    }

    #[test]
    fn same_file_name_in_two_directories_stays_separate() -> anyhow::Result<()> {
        let a = TempDir::new()?;
        let b = TempDir::new()?;
        unit(&a, "transform.py", "WHO = 'a'\n")?;
        unit(&b, "transform.py", "WHO = 'b'\n")?;
        let loader = UnitLoader::new();
        let from_a = loader.load(a.path(), "transform.py", "WHO")?;
        let from_b = loader.load(b.path(), "transform.py", "WHO")?;
        assert_eq!(from_a.value.repr(), "'a'");
        assert_eq!(from_b.value.repr(), "'b'");
        let hash = |id: &UnitId| id.as_str().rsplitn(2, '_').nth(1).map(str::to_string);
        assert_ne!(hash(&from_a.id), hash(&from_b.id));
        assert!(from_a.id.as_str().starts_with("unit_transform_"));
        Ok(())
    }

    #[test]
    fn functions_keep_their_namespace() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        unit(
            &dir,
            "scale.py",
            indoc! {r#"
                FACTOR = 3

                def scale(x):
                    return x * FACTOR
            "#},
        )?;
        let f = load(dir.path(), "scale.py", "scale")?;
        let mut interp = UnitLoader::new().interpreter();
        let out = interp.call(&f, Args::new(vec![Value::Int(4)]))?;
        assert!(matches!(out, Value::Int(12)));
        Ok(())
    }
}
