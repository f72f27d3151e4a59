//! The full analysis run, from the raw file to the last model.
//!
//! [`prepare`] builds the analysis table once: loading, imputation, types,
//! weights, composite indices and their normalized versions. [`run`] then
//! fits every model variant on that table. Only the weights are recomputed
//! along the way, on every subset.

use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{DataError, SurveyTable, load_survey};
use crate::groups::{
    add_lr_group, add_mot_exp, high_motivation_vs_represented, mot_exp_subset, with_rep_type,
};
use crate::impute::{ImputationReport, ImputeError, impute_knn};
use crate::index::{CompositeIndex, INDEX_BLOCKS, IndexError, add_composite_indices};
use crate::normalize::{Normalization, NormalizeError, add_normalized_columns};
use crate::outliers::{OutlierDecision, OutlierError, apply_outlier_policy};
use crate::plot::{PlotError, residual_boxplot};
use crate::report;
use crate::schema;
use crate::stats::design::ModelSpec;
use crate::stats::diagnostics::{BreuschPagan, Gvif, OutlierRow, breusch_pagan, gvif, outlier_test};
use crate::stats::robust::{ClusterRobust, cluster_robust_hc2};
use crate::stats::wls::{FitError, WlsFit, fit_model};
use crate::types::{TypeError, normalize_types};
use crate::weights::{CountryWeight, weight_table, with_country_weights};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Impute(#[from] ImputeError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Outlier(#[from] OutlierError),
    #[error(transparent)]
    Plot(#[from] PlotError),
}

/// Index columns and the normalized columns derived from them.
pub const NORMALIZED_PAIRS: [(&str, &str); 3] = [
    (schema::MLG_INDEX, schema::MLG_NORM),
    (schema::EU_INDEX, schema::EU_NORM),
    (schema::SNE_INDEX, schema::SNE_NORM),
];

const DESCRIPTIVE_NUMERIC: [&str; 8] = [
    schema::AGE,
    schema::REP_DURATION,
    schema::MLG_INDEX,
    schema::EU_INDEX,
    schema::SNE_INDEX,
    schema::MLG_NORM,
    schema::EU_NORM,
    schema::SNE_NORM,
];

const DESCRIPTIVE_CATEGORICAL: [&str; 8] = [
    schema::COUNTRY,
    schema::SNE_TYPE,
    schema::REP_BINARY,
    schema::REP_CHANNEL,
    schema::GENDER,
    schema::EDUCATION,
    schema::LR_GROUP,
    schema::MOT_EXP,
];

/// The analysis table and what it took to build it.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub table: SurveyTable,
    pub loaded_rows: usize,
    pub imputation: ImputationReport,
    pub weights: Vec<CountryWeight>,
    pub indices: Vec<CompositeIndex>,
    pub normalizations: Vec<(String, Normalization)>,
}

/// A fitted model with its country-clustered inference.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub fit: WlsFit,
    pub robust: ClusterRobust,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub breusch_pagan: BreuschPagan,
    pub outliers: Vec<OutlierRow>,
    pub gvif: Vec<Gvif>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub prepared: Prepared,
    pub base: ModelResult,
    pub base_diagnostics: Diagnostics,
    pub outliers: OutlierDecision,
    /// Rows left after outlier removal.
    pub trimmed_rows: usize,
    pub robust: ModelResult,
    pub robust_diagnostics: Diagnostics,
    pub rep_type_none: ModelResult,
    pub rep_type_cor: ModelResult,
    pub no_representation: ModelResult,
    pub mot_exp: ModelResult,
    pub experience: ModelResult,
    pub plot_path: PathBuf,
}

/// `mlg_norm` on representation, competences, effectiveness, identities,
/// ideology, demographics and country, weighted by `weight`.
pub fn base_spec() -> ModelSpec {
    ModelSpec::new(
        "model",
        schema::MLG_NORM,
        &[
            schema::COUNTRY,
            schema::REP_BINARY,
            schema::EU_NORM,
            schema::SNE_NORM,
            schema::EFF_EU,
            schema::EFF_NATIONAL,
            schema::EFF_SNE,
            schema::EU_FUNDS,
            schema::IDENT_LOCAL,
            schema::IDENT_REGIONAL,
            schema::IDENT_NATIONAL,
            schema::IDENT_EUROPEAN,
            schema::LR_GROUP,
            schema::AGE,
            schema::GENDER,
            schema::EDUCATION,
        ],
    )
    .weighted_by(schema::WEIGHT)
}

/// Loads, imputes and derives every column the models use.
pub fn prepare(config: &AnalysisConfig) -> Result<Prepared, PipelineError> {
    let loaded = load_survey(&config.data_path, &config.countries)?;
    let loaded_rows = loaded.n_rows();
    log::info!(
        "Loaded {} respondents from {}",
        loaded_rows,
        config.data_path.display()
    );

    let (imputed, imputation) = impute_knn(&loaded, config.neighbours, config.seed)?;
    let typed = normalize_types(imputed, &config.countries)?;
    let grouped = add_lr_group(typed)?;
    let weighted = with_country_weights(&grouped)?;
    let weights = weight_table(&weighted)?;

    let (indexed, indices) = add_composite_indices(weighted, &INDEX_BLOCKS)?;
    let (normalized, normalizations) = add_normalized_columns(indexed, &NORMALIZED_PAIRS)?;
    let table = add_mot_exp(with_rep_type(normalized, "NONE")?)?;

    log::info!("Analysis table has {} rows", table.n_rows());
    Ok(Prepared {
        table,
        loaded_rows,
        imputation,
        weights,
        indices,
        normalizations,
    })
}

/// Fits `spec` and clusters its standard errors by country.
pub fn fit_clustered(table: &SurveyTable, spec: &ModelSpec) -> Result<ModelResult, PipelineError> {
    let fit = fit_model(table, spec)?;
    let countries = table.labels(schema::COUNTRY)?;
    let clusters: Vec<String> = fit
        .design
        .rows
        .iter()
        .map(|&r| countries[r].clone().unwrap_or_default())
        .collect();
    let robust = cluster_robust_hc2(&fit, &clusters)?;
    log::info!(
        "Fitted '{}' on {} rows, R² = {:.4}",
        fit.name,
        fit.n_obs(),
        fit.r_squared
    );
    Ok(ModelResult { fit, robust })
}

pub fn diagnose(fit: &WlsFit) -> Result<Diagnostics, FitError> {
    Ok(Diagnostics {
        breusch_pagan: breusch_pagan(fit)?,
        outliers: outlier_test(fit)?,
        gvif: gvif(fit)?,
    })
}

/// Residuals of `fit` grouped by the `mot_exp` level of their row, in level
/// order.
fn residuals_by_mot_exp(
    table: &SurveyTable,
    fit: &WlsFit,
) -> Result<Vec<(String, Vec<f64>)>, DataError> {
    let factor = table.factor(schema::MOT_EXP)?;
    let mut groups: Vec<(String, Vec<f64>)> = factor
        .levels()
        .iter()
        .map(|level| (level.clone(), Vec::new()))
        .collect();
    for (i, &row) in fit.design.rows.iter().enumerate() {
        if let Some(code) = factor.codes()[row] {
            groups[code].1.push(fit.residuals[i]);
        }
    }
    Ok(groups)
}

fn print_model(result: &ModelResult) {
    println!("{}", report::render_model(&result.fit, &result.robust));
}

fn print_diagnostics(
    table: &SurveyTable,
    fit: &WlsFit,
    diagnostics: &Diagnostics,
) -> Result<(), DataError> {
    let ids = table.labels(schema::ID)?;
    println!(
        "{}",
        report::render_diagnostics(
            &fit.name,
            &diagnostics.breusch_pagan,
            &diagnostics.outliers,
            &ids,
            &diagnostics.gvif,
        )
    );
    Ok(())
}

/// Runs every analysis step and prints the report to stdout.
pub fn run(config: &AnalysisConfig) -> Result<PipelineOutcome, PipelineError> {
    config.validate()?;
    let prepared = prepare(config)?;
    let table = &prepared.table;

    println!("{}", report::render_imputation(&prepared.imputation));
    println!("{}", report::render_weights(&prepared.weights));
    println!(
        "{}",
        report::render_descriptives(
            table,
            &DESCRIPTIVE_NUMERIC,
            &DESCRIPTIVE_CATEGORICAL,
            schema::WEIGHT
        )?
    );
    println!("{}", report::render_indices(&prepared.indices));
    println!("{}", report::render_normalizations(&prepared.normalizations));

    let spec = base_spec();
    let base = fit_clustered(table, &spec)?;
    let base_diagnostics = diagnose(&base.fit)?;
    print_model(&base);
    print_diagnostics(table, &base.fit, &base_diagnostics)?;

    let (trimmed, outliers) = apply_outlier_policy(
        table,
        &spec,
        &config.focal_coefficient,
        &config.outlier_policy,
    )?;
    println!("{}", report::render_outlier_decision(&outliers));

    let robust = fit_clustered(&trimmed, &spec.renamed("model_rob"))?;
    let robust_diagnostics = diagnose(&robust.fit)?;
    print_model(&robust);
    print_diagnostics(&trimmed, &robust.fit, &robust_diagnostics)?;

    let rep_type_spec = spec.replacing_term(schema::REP_BINARY, schema::REP_TYPE);
    let rep_type_none = fit_clustered(
        &with_rep_type(trimmed.clone(), "NONE")?,
        &rep_type_spec.renamed("model_rep_type"),
    )?;
    print_model(&rep_type_none);
    let rep_type_cor = fit_clustered(
        &with_rep_type(trimmed.clone(), "COR")?,
        &rep_type_spec.renamed("model_rep_type_cor"),
    )?;
    print_model(&rep_type_cor);

    let no_representation = fit_clustered(
        &trimmed,
        &spec.without_term(schema::REP_BINARY).renamed("model_no_rep"),
    )?;
    print_model(&no_representation);

    let mot_exp_table = with_country_weights(&mot_exp_subset(&trimmed)?)?;
    let mot_exp = fit_clustered(
        &mot_exp_table,
        &spec
            .replacing_term(schema::REP_BINARY, schema::MOT_EXP)
            .renamed("model_mot_exp"),
    )?;
    print_model(&mot_exp);

    let groups = residuals_by_mot_exp(&trimmed, &no_representation.fit)?;
    residual_boxplot(
        &config.plot_path,
        "Residuals of the model without representation, by motivation and experience",
        &groups,
        (config.plot_width, config.plot_height),
    )?;

    let experience_table = with_country_weights(&high_motivation_vs_represented(&trimmed)?)?;
    let experience = fit_clustered(
        &experience_table,
        &spec
            .replacing_term(schema::REP_BINARY, schema::HIGH_MOT_VS_EXP)
            .renamed("model_experience"),
    )?;
    print_model(&experience);

    let trimmed_rows = trimmed.n_rows();
    Ok(PipelineOutcome {
        prepared,
        base,
        base_diagnostics,
        outliers,
        trimmed_rows,
        robust,
        robust_diagnostics,
        rep_type_none,
        rep_type_cor,
        no_representation,
        mot_exp,
        experience,
        plot_path: config.plot_path.clone(),
    })
}
