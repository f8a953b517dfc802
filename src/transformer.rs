// src/transformer.rs
//! Gatekeeping for user transformation functions.
//!
//! A transformer is only ever handed out as a [`VerifiedTransformer`], and
//! one is only built after the candidate's signature matched the template's.

use arrow::record_batch::RecordBatch;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    signature::{self, Signature, SignatureError},
    unit::{Args, LoadError, RuntimeError, UnitLoader, UnitLocation, Value},
};

/// Entry point every transformer and template unit exports.
pub const TRANSFORM_SYMBOL: &str = "transform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Start,
    TemplateLoaded,
    CandidateLoaded,
    SignaturesExtracted,
    Verified,
    Rejected,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerificationStage::Start => "start",
            VerificationStage::TemplateLoaded => "template_loaded",
            VerificationStage::CandidateLoaded => "candidate_loaded",
            VerificationStage::SignaturesExtracted => "signatures_extracted",
            VerificationStage::Verified => "verified",
            VerificationStage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why the template could not be used.
#[derive(Debug, Error)]
pub enum TemplateProblem {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    NotCallable(#[from] SignatureError),
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("unable to load the signature template")]
    TemplateLoad(#[source] TemplateProblem),
    #[error("unable to load the transformer function")]
    TransformerLoad(#[source] LoadError),
    #[error("function signature mismatch\nexpected: {expected}\ngot:      {got}")]
    SignatureMismatch { expected: Signature, got: Signature },
    #[error("the transformer is not callable")]
    NotCallable(#[source] SignatureError),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform returned '{0}', expected a DataFrame")]
    NotATable(String),
    #[error("transform raised an error")]
    Runtime(#[from] RuntimeError),
}

/// A transformer whose signature matched the template.
#[derive(Debug, Clone)]
pub struct VerifiedTransformer {
    function: Value,
    signature: Signature,
    location: UnitLocation,
    loader: UnitLoader,
}

impl VerifiedTransformer {
    /// The verified callable, exactly as loaded.
    pub fn function(&self) -> &Value {
        &self.function
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn location(&self) -> &UnitLocation {
        &self.location
    }

    /// Run the transformer with `tables` as positional arguments and
    /// `options` as keyword arguments.
    #[instrument(skip_all, fields(transformer = %self.location, inputs = tables.len()))]
    pub fn call(
        &self,
        tables: Vec<RecordBatch>,
        options: Vec<(String, Value)>,
    ) -> Result<RecordBatch, TransformError> {
        let args = Args {
            positional: tables.into_iter().map(Value::Table).collect(),
            keywords: options,
        };
        let mut interp = self.loader.interpreter();
        match interp.call(&self.function, args)? {
            Value::Table(table) => {
                debug!(
                    rows = table.num_rows(),
                    columns = table.num_columns(),
                    "transform finished"
                );
                Ok(table)
            }
            other => Err(TransformError::NotATable(other.type_name())),
        }
    }
}

/// Checks candidate transformers against a template.
#[derive(Debug, Clone, Default)]
pub struct TransformerVerifier {
    loader: UnitLoader,
}

impl TransformerVerifier {
    pub fn new(loader: UnitLoader) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &UnitLoader {
        &self.loader
    }

    /// Load both units fresh, compare their `transform` signatures and hand
    /// back the candidate when they are equal. The candidate is never run.
    #[instrument(skip_all, fields(transformer = %transformer, template = %template))]
    pub fn verify(
        &self,
        transformer: &UnitLocation,
        template: &UnitLocation,
    ) -> Result<VerifiedTransformer, VerifyError> {
        let mut stage = VerificationStage::Start;
        debug!(%stage);

        let template_fn = self
            .loader
            .load_from(template, TRANSFORM_SYMBOL)
            .map_err(|e| VerifyError::TemplateLoad(e.into()))?;
        stage = VerificationStage::TemplateLoaded;
        debug!(%stage, unit = %template_fn.id);

        let candidate = self
            .loader
            .load_from(transformer, TRANSFORM_SYMBOL)
            .map_err(VerifyError::TransformerLoad)?;
        stage = VerificationStage::CandidateLoaded;
        debug!(%stage, unit = %candidate.id);

        let expected = signature::extract(&template_fn.value)
            .map_err(|e| VerifyError::TemplateLoad(e.into()))?;
        let got = signature::extract(&candidate.value).map_err(VerifyError::NotCallable)?;
        stage = VerificationStage::SignaturesExtracted;
        debug!(%stage, %expected, %got);

        if !signature::compatible(&got, &expected) {
            stage = VerificationStage::Rejected;
            warn!(%stage, %expected, %got, "transformer signature does not match the template");
            return Err(VerifyError::SignatureMismatch { expected, got });
        }
        stage = VerificationStage::Verified;
        info!(%stage, signature = %got, "transformer verified");
        Ok(VerifiedTransformer {
            function: candidate.value,
            signature: got,
            location: transformer.clone(),
            loader: self.loader.clone(),
        })
    }
}

/// Verify with the default loader.
pub fn verify(
    transformer: &UnitLocation,
    template: &UnitLocation,
) -> Result<VerifiedTransformer, VerifyError> {
    TransformerVerifier::default().verify(transformer, template)
}
