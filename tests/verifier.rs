use anyhow::Result;
use arrow::{
    array::{ArrayRef, Int64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use data_loader::{
    signature::{self, Parameter, ParameterKind, Signature},
    transformer::{self, VerifyError, TransformerVerifier},
    unit::{self, LoadError, UnitLoader, UnitLocation, Value},
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{error::Error, fs, path::Path, sync::Arc};
use tempfile::TempDir;

fn write_unit(dir: &Path, name: &str, source: &str) -> Result<UnitLocation> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(name), source)?;
    Ok(UnitLocation::new(dir, name))
}

fn numbers() -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)]));
    Ok(RecordBatch::try_new(
        schema,
        vec![Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef],
    )?)
}

#[test]
fn matching_transformer_is_returned_and_callable() -> Result<()> {
    let dir = TempDir::new()?;
    let template = write_unit(
        &dir.path().join("templates"),
        "template.py",
        "def transform(*dfs, **kwargs): ...\n",
    )?;
    let candidate = write_unit(
        &dir.path().join("transformers"),
        "double.py",
        indoc! {r#"
            def transform(*dfs, **kwargs):
                df = dfs[0].copy()
                df["n"] = df["n"] * kwargs.get("factor", 2)
                return df
        "#},
    )?;

    let verified = transformer::verify(&candidate, &template)?;
    assert_eq!(
        verified.signature(),
        &Signature {
            parameters: vec![
                Parameter::new("dfs", ParameterKind::VarPositional),
                Parameter::new("kwargs", ParameterKind::VarKeyword),
            ],
            return_annotation: None,
        }
    );
    let out = verified.call(vec![numbers()?], vec![("factor".into(), Value::Int(10))])?;
    let n = out
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.values().to_vec());
    assert_eq!(n, Some(vec![10, 20, 30]));
    Ok(())
}

#[test]
fn extra_defaulted_parameter_is_a_mismatch() -> Result<()> {
    let dir = TempDir::new()?;
    let template = write_unit(dir.path(), "template.py", "def transform(x): ...\n")?;
    let candidate = write_unit(dir.path(), "candidate.py", "def transform(x, y=1): ...\n")?;

    let err = transformer::verify(&candidate, &template).err().expect("mismatch expected");
    match &err {
        VerifyError::SignatureMismatch { expected, got } => {
            assert_eq!(expected.to_string(), "(x)");
            assert_eq!(got.to_string(), "(x, y=1)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "function signature mismatch\nexpected: (x)\ngot:      (x, y=1)"
    );
    Ok(())
}

#[test]
fn missing_template_reports_template_load() -> Result<()> {
    let dir = TempDir::new()?;
    let candidate = write_unit(dir.path(), "candidate.py", "def transform(*dfs, **kwargs): ...\n")?;
    let template = UnitLocation::new(dir.path(), "no_such_template.py");

    let err = transformer::verify(&candidate, &template).err().expect("template load error");
    assert!(matches!(err, VerifyError::TemplateLoad(_)));
    assert_eq!(err.to_string(), "unable to load the signature template");
    let source = err.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(source.starts_with("code unit not found"), "{}", source);
    Ok(())
}

#[test]
fn same_file_name_in_two_directories_stays_distinct() -> Result<()> {
    let dir = TempDir::new()?;
    let first = write_unit(
        &dir.path().join("a"),
        "transform.py",
        "def transform(*dfs, **kwargs):\n    return 'first'\n",
    )?;
    let second = write_unit(
        &dir.path().join("b"),
        "transform.py",
        "def transform(*dfs, **kwargs):\n    return 'second'\n",
    )?;

    let loader = UnitLoader::new();
    let a = loader.load_from(&first, "transform")?;
    let b = loader.load_from(&second, "transform")?;
    assert_ne!(a.id, b.id);

    let mut interp = loader.interpreter();
    let ran_a = interp.call(&a.value, unit::Args::default())?;
    let ran_b = interp.call(&b.value, unit::Args::default())?;
    assert_eq!((ran_a.repr(), ran_b.repr()), ("'first'".to_string(), "'second'".to_string()));
    Ok(())
}

#[test]
fn loading_twice_runs_the_unit_twice() -> Result<()> {
    let dir = TempDir::new()?;
    let location = write_unit(
        dir.path(),
        "noisy.py",
        "print('loaded')\ndef transform(*dfs, **kwargs): ...\n",
    )?;
    let loader = UnitLoader::capturing();
    let first = loader.load_from(&location, "transform")?;
    let second = loader.load_from(&location, "transform")?;
    assert_ne!(first.id, second.id);
    assert_eq!(loader.captured(), vec!["loaded", "loaded"]);
    Ok(())
}

#[test]
fn missing_path_and_missing_symbol() -> Result<()> {
    let dir = TempDir::new()?;
    let err = unit::load(dir.path(), "absent.py", "transform").err().expect("not found");
    assert!(matches!(err, LoadError::NotFound { .. }));

    fs::write(dir.path().join("empty.py"), "value = 1\n")?;
    let err = unit::load(dir.path(), "empty.py", "transform").err().expect("symbol missing");
    match err {
        LoadError::SymbolMissing { symbol, .. } => assert_eq!(symbol, "transform"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(unit::load(dir.path(), "empty.py", "value")?.repr(), "1");
    Ok(())
}

#[test]
fn verification_is_repeatable_and_never_runs_the_candidate() -> Result<()> {
    let dir = TempDir::new()?;
    let template = write_unit(
        dir.path(),
        "template.py",
        indoc! {r#"
            import pandas as pd

            def transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame:
                ...
        "#},
    )?;
    let candidate = write_unit(
        dir.path(),
        "candidate.py",
        indoc! {r#"
            from pandas import DataFrame

            def transform(*dfs: DataFrame, **kwargs) -> DataFrame:
                print("transform body ran")
                return dfs[0]
        "#},
    )?;

    let verifier = TransformerVerifier::new(UnitLoader::capturing());
    let first = verifier.verify(&candidate, &template)?;
    let second = verifier.verify(&candidate, &template)?;
    assert_eq!(first.signature(), second.signature());
    assert_eq!(first.signature(), &signature::template_signature());
    assert!(verifier.loader().captured().is_empty());
    Ok(())
}

#[test]
fn annotations_and_return_types_take_part_in_equality() -> Result<()> {
    let dir = TempDir::new()?;
    let template = write_unit(
        dir.path(),
        "template.py",
        "import pandas as pd\n\ndef transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame: ...\n",
    )?;
    let untyped = write_unit(dir.path(), "untyped.py", "def transform(*dfs, **kwargs): ...\n")?;
    assert!(matches!(
        transformer::verify(&untyped, &template),
        Err(VerifyError::SignatureMismatch { .. })
    ));

    let renamed = write_unit(
        dir.path(),
        "renamed.py",
        "def transform(*frames, **options): ...\n",
    )?;
    let plain = write_unit(dir.path(), "plain.py", "def transform(*dfs, **kwargs): ...\n")?;
    assert!(matches!(
        transformer::verify(&renamed, &plain),
        Err(VerifyError::SignatureMismatch { .. })
    ));
    Ok(())
}

#[test]
fn postponed_annotations_are_strings() -> Result<()> {
    let dir = TempDir::new()?;
    let template = write_unit(
        dir.path(),
        "template.py",
        "import pandas as pd\n\ndef transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame: ...\n",
    )?;
    let source = indoc! {r#"
        from __future__ import annotations
        import pandas as pd

        def transform(*dfs: pd.DataFrame, **kwargs) -> pd.DataFrame:
            return dfs[0]
    "#};
    let postponed = write_unit(dir.path(), "postponed.py", source)?;

    match transformer::verify(&postponed, &template) {
        Err(VerifyError::SignatureMismatch { got, .. }) => assert_eq!(
            got.to_string(),
            "(*dfs: 'pd.DataFrame', **kwargs) -> 'pd.DataFrame'"
        ),
        other => panic!("unexpected result: {other:?}"),
    }

    let postponed_template = write_unit(dir.path(), "postponed_template.py", source)?;
    assert!(transformer::verify(&postponed, &postponed_template).is_ok());
    Ok(())
}
