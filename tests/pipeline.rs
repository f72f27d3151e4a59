use mlg_survey::config::AnalysisConfig;
use mlg_survey::outliers::{OutlierPolicy, passes_drop_rule};
use mlg_survey::pipeline::{PipelineError, base_spec, prepare, run};
use mlg_survey::schema;
use mlg_survey::stats::robust::cluster_robust_hc2;
use mlg_survey::test_fixtures::SyntheticSurveyBuilder;
use std::path::Path;
use tempfile::tempdir;

const PER_STRATUM: usize = 14;

fn config_in(dir: &Path) -> AnalysisConfig {
    let data_path = dir.join("survey.csv");
    SyntheticSurveyBuilder::new(PER_STRATUM)
        .with_foreign_rows(6)
        .with_missing_rate(0.05)
        .seed(7)
        .write_csv(&data_path)
        .unwrap();
    AnalysisConfig {
        data_path,
        plot_path: dir.join("output").join("residuals.png"),
        plot_width: 800,
        plot_height: 600,
        ..AnalysisConfig::default()
    }
}

#[test]
fn full_run_produces_every_model_and_the_plot() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let outcome = run(&config).unwrap();
    let prepared = &outcome.prepared;
    let table = &prepared.table;

    // Foreign rows are gone; only the orphan row is lost to imputation.
    assert_eq!(prepared.loaded_rows, 11 * 3 * PER_STRATUM + 1);
    assert_eq!(prepared.imputation.dropped_ids.len(), 1);
    assert_eq!(table.n_rows(), prepared.loaded_rows - 1);
    let countries = table.complete_labels(schema::COUNTRY).unwrap();
    assert!(
        countries
            .iter()
            .all(|c| schema::DEFAULT_COUNTRIES.contains(&c.as_str()))
    );

    for column in schema::imputable_columns() {
        assert_eq!(
            table.column(column).unwrap().missing_count(),
            0,
            "{column} still has missing values"
        );
    }

    let weights = table.complete_numeric(schema::WEIGHT).unwrap();
    let mean = weights.iter().sum::<f64>() / weights.len() as f64;
    assert!((mean - 1.0).abs() < 1e-10);

    for value in table.complete_numeric(schema::MLG_INDEX).unwrap() {
        assert!((1.0 - 1e-9..=5.0 + 1e-9).contains(&value));
    }

    for (source, target) in [
        (schema::MLG_INDEX, schema::MLG_NORM),
        (schema::EU_INDEX, schema::EU_NORM),
        (schema::SNE_INDEX, schema::SNE_NORM),
    ] {
        let x = table.complete_numeric(source).unwrap();
        let y = table.complete_numeric(target).unwrap();
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
        for pair in order.windows(2) {
            assert!(y[pair[0]] <= y[pair[1]] + 1e-12, "{target} is not monotonic");
        }
    }

    // The printed decisions follow the rule exactly.
    let decision = &outcome.outliers;
    assert_eq!(decision.policy, OutlierPolicy::Rule);
    assert!(!decision.candidates.is_empty());
    for candidate in &decision.candidates {
        assert_eq!(
            candidate.passes_rule,
            passes_drop_rule(
                decision.base_breusch_pagan.p_value,
                candidate.refit_bp_p_value,
                decision.base_focal,
                candidate.refit_focal,
            )
        );
        assert_eq!(candidate.dropped, candidate.passes_rule);
    }
    assert_eq!(outcome.trimmed_rows, table.n_rows() - decision.dropped_ids.len());
    assert_eq!(outcome.robust.fit.n_obs(), outcome.trimmed_rows);

    assert!(outcome.base.fit.coefficient("rep_binary1").is_some());
    assert!(outcome.rep_type_none.fit.coefficient("rep_typeCOR").is_some());
    assert!(outcome.rep_type_cor.fit.coefficient("rep_typeNONE").is_some());
    assert!(outcome.no_representation.fit.coefficient("rep_binary1").is_none());
    assert!(outcome.mot_exp.fit.coefficient("mot_exp.L").is_some());
    assert!(outcome.experience.fit.coefficient("experienceRepresented").is_some());
    assert!(outcome.experience.fit.n_obs() < outcome.mot_exp.fit.n_obs());

    let plot = std::fs::metadata(&outcome.plot_path).unwrap();
    assert!(plot.len() > 0);
}

#[test]
fn cluster_robust_errors_depend_on_the_clustering() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let outcome = run(&config).unwrap();
    let fit = &outcome.base.fit;

    let sne_types = outcome
        .prepared
        .table
        .labels(schema::SNE_TYPE)
        .unwrap();
    let clusters: Vec<String> = fit
        .design
        .rows
        .iter()
        .map(|&r| sne_types[r].clone().unwrap())
        .collect();
    let by_sne = cluster_robust_hc2(fit, &clusters).unwrap();

    assert_eq!(outcome.base.robust.n_clusters, 11);
    assert_eq!(by_sne.n_clusters, 3);
    let j = fit.coefficient_index("age").unwrap();
    assert!((outcome.base.robust.std_errors[j] - by_sne.std_errors[j]).abs() > 1e-8);
}

#[test]
fn preparation_is_deterministic() {
    let dir = tempdir().unwrap();
    let config = config_in(dir.path());
    let first = prepare(&config).unwrap();
    let second = prepare(&config).unwrap();
    assert_eq!(first.table, second.table);
    assert_eq!(first.imputation, second.imputation);

    let spec = base_spec();
    let a = mlg_survey::stats::wls::fit_model(&first.table, &spec).unwrap();
    let b = mlg_survey::stats::wls::fit_model(&second.table, &spec).unwrap();
    assert_eq!(a.coefficients, b.coefficients);
}

#[test]
fn listed_policy_drops_exactly_the_listed_rows() {
    let dir = tempdir().unwrap();
    let config = AnalysisConfig {
        outlier_policy: OutlierPolicy::Listed {
            ids: vec!["R00001".to_string(), "R00002".to_string()],
        },
        ..config_in(dir.path())
    };
    let outcome = run(&config).unwrap();
    assert_eq!(
        outcome.outliers.dropped_ids,
        vec!["R00001".to_string(), "R00002".to_string()]
    );
    assert_eq!(outcome.trimmed_rows, outcome.prepared.table.n_rows() - 2);
}

#[test]
fn missing_data_file_is_a_data_error() {
    let dir = tempdir().unwrap();
    let config = AnalysisConfig {
        data_path: dir.path().join("absent.csv"),
        ..AnalysisConfig::default()
    };
    assert!(matches!(run(&config), Err(PipelineError::Data(_))));
}
