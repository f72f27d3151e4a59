//! Derived groupings used by the model variants.
//!
//! - `lr_group`: `left_right` collapsed to `Left` (1–3) < `Centre` (4–6) <
//!   `Right` (7–9).
//! - `rep_type`: `rep_channel` with a chosen reference level.
//! - `mot_exp`: motivation of non-represented respondents and
//!   representation experience on one ordered scale, `Motivation<4` <
//!   `Motivation=4` < `Motivation=5` < `Represented`.
//! - `experience`: the two-level contrast `Motivation=5` vs. `Represented`.

use crate::data::{Column, SurveyTable};
use crate::schema;
use crate::types::{TypeError, to_factor};

fn levels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

fn lr_group_of(left_right: &str) -> Option<&'static str> {
    match left_right {
        "1" | "2" | "3" => Some("Left"),
        "4" | "5" | "6" => Some("Centre"),
        "7" | "8" | "9" => Some("Right"),
        _ => None,
    }
}

/// Adds the ordered left–centre–right grouping of `left_right`.
pub fn add_lr_group(table: SurveyTable) -> Result<SurveyTable, TypeError> {
    let labels: Vec<Option<String>> = table
        .labels(schema::LEFT_RIGHT)?
        .iter()
        .map(|l| l.as_deref().and_then(lr_group_of).map(str::to_string))
        .collect();
    let factor = to_factor(
        schema::LR_GROUP,
        &labels,
        levels(schema::LR_GROUP_LEVELS),
        true,
    )?;
    Ok(table.with_column(schema::LR_GROUP, Column::Factor(factor))?)
}

/// Sets `rep_type` to `rep_channel` releveled so that `reference` comes first.
pub fn with_rep_type(table: SurveyTable, reference: &str) -> Result<SurveyTable, TypeError> {
    let factor = table
        .factor(schema::REP_CHANNEL)?
        .relevel(reference)
        .ok_or_else(|| TypeError::UnknownLevel {
            column: schema::REP_CHANNEL.to_string(),
            value: reference.to_string(),
        })?;
    Ok(table.with_column(schema::REP_TYPE, Column::Factor(factor))?)
}

fn mot_exp_of(represented: Option<&str>, motivation: Option<&str>) -> Option<&'static str> {
    match (represented, motivation) {
        (Some("1"), _) => Some("Represented"),
        (Some("0"), Some("1" | "2" | "3")) => Some("Motivation<4"),
        (Some("0"), Some("4")) => Some("Motivation=4"),
        (Some("0"), Some("5")) => Some("Motivation=5"),
        _ => None,
    }
}

/// Adds `mot_exp`. Respondents who are neither represented nor report a
/// motivation get a missing value.
pub fn add_mot_exp(table: SurveyTable) -> Result<SurveyTable, TypeError> {
    let represented = table.labels(schema::REP_BINARY)?;
    let motivation = table.labels(schema::REP_MOTIVATION)?;
    let labels: Vec<Option<String>> = represented
        .iter()
        .zip(&motivation)
        .map(|(r, m)| mot_exp_of(r.as_deref(), m.as_deref()).map(str::to_string))
        .collect();
    let factor = to_factor(schema::MOT_EXP, &labels, levels(schema::MOT_EXP_LEVELS), true)?;
    Ok(table.with_column(schema::MOT_EXP, Column::Factor(factor))?)
}

/// Rows with a `mot_exp` group. Weights must be recomputed by the caller.
pub fn mot_exp_subset(table: &SurveyTable) -> Result<SurveyTable, TypeError> {
    let column = table.column(schema::MOT_EXP)?;
    let keep: Vec<bool> = (0..table.n_rows()).map(|r| !column.is_missing(r)).collect();
    Ok(table.filter_rows(&keep))
}

/// Rows in `Motivation=5` or `Represented`, with the unordered two-level
/// factor `experience` (reference `Motivation=5`). Weights must be recomputed
/// by the caller.
pub fn high_motivation_vs_represented(table: &SurveyTable) -> Result<SurveyTable, TypeError> {
    let groups = table.labels(schema::MOT_EXP)?;
    let wanted = ["Motivation=5", "Represented"];
    let keep: Vec<bool> = groups
        .iter()
        .map(|g| g.as_deref().is_some_and(|g| wanted.contains(&g)))
        .collect();
    let subset = table.filter_rows(&keep);
    let labels = subset.labels(schema::MOT_EXP)?;
    let factor = to_factor(schema::HIGH_MOT_VS_EXP, &labels, levels(&wanted), false)?;
    Ok(subset.with_column(schema::HIGH_MOT_VS_EXP, Column::Factor(factor))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Factor;

    fn factor(labels: &[Option<&str>], levels: &[&str], ordered: bool) -> Column {
        let levels = levels.iter().map(|l| l.to_string()).collect();
        Column::Factor(Factor::from_labels(labels, levels, ordered).unwrap())
    }

    fn representation_table() -> SurveyTable {
        SurveyTable::from_columns(vec![
            (
                schema::REP_BINARY.to_string(),
                factor(
                    &[Some("1"), Some("0"), Some("0"), Some("0"), Some("0"), Some("1"), None],
                    schema::BINARY_LEVELS,
                    false,
                ),
            ),
            (
                schema::REP_MOTIVATION.to_string(),
                factor(
                    &[None, Some("2"), Some("4"), Some("5"), None, None, Some("5")],
                    schema::MOTIVATION_LEVELS,
                    true,
                ),
            ),
            (
                schema::REP_CHANNEL.to_string(),
                factor(
                    &[
                        Some("COR"),
                        Some("NONE"),
                        Some("NONE"),
                        Some("NONE"),
                        Some("NONE"),
                        Some("CLRAE"),
                        None,
                    ],
                    schema::REP_CHANNEL_LEVELS,
                    false,
                ),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn lr_group_collapses_the_scale() {
        let table = SurveyTable::from_columns(vec![(
            schema::LEFT_RIGHT.to_string(),
            factor(
                &[Some("1"), Some("3"), Some("4"), Some("6"), Some("7"), Some("9"), None],
                schema::LEFT_RIGHT_LEVELS,
                true,
            ),
        )])
        .unwrap();
        let table = add_lr_group(table).unwrap();
        let group = table.factor(schema::LR_GROUP).unwrap();
        assert!(group.is_ordered());
        assert_eq!(group.levels(), ["Left", "Centre", "Right"]);
        assert_eq!(
            group.labels(),
            vec![
                Some("Left".to_string()),
                Some("Left".to_string()),
                Some("Centre".to_string()),
                Some("Centre".to_string()),
                Some("Right".to_string()),
                Some("Right".to_string()),
                None
            ]
        );
    }

    #[test]
    fn mot_exp_combines_motivation_and_experience() {
        let table = add_mot_exp(representation_table()).unwrap();
        let mot_exp = table.factor(schema::MOT_EXP).unwrap();
        assert!(mot_exp.is_ordered());
        let labels: Vec<Option<&str>> = (0..7).map(|r| mot_exp.label(r)).collect();
        assert_eq!(
            labels,
            vec![
                Some("Represented"),
                Some("Motivation<4"),
                Some("Motivation=4"),
                Some("Motivation=5"),
                None,
                Some("Represented"),
                None
            ]
        );

        let subset = mot_exp_subset(&table).unwrap();
        assert_eq!(subset.n_rows(), 5);
        assert_eq!(
            subset.factor(schema::MOT_EXP).unwrap().levels(),
            schema::MOT_EXP_LEVELS
        );
    }

    #[test]
    fn two_group_subset_keeps_high_motivation_and_represented() {
        let table = add_mot_exp(representation_table()).unwrap();
        let subset = high_motivation_vs_represented(&table).unwrap();
        assert_eq!(subset.n_rows(), 3);
        let experience = subset.factor(schema::HIGH_MOT_VS_EXP).unwrap();
        assert!(!experience.is_ordered());
        assert_eq!(experience.levels(), ["Motivation=5", "Represented"]);
        assert_eq!(experience.label(1), Some("Motivation=5"));
    }

    #[test]
    fn rep_type_reference_level_is_configurable() {
        let none_ref = with_rep_type(representation_table(), "NONE").unwrap();
        assert_eq!(none_ref.factor(schema::REP_TYPE).unwrap().levels()[0], "NONE");

        let cor_ref = with_rep_type(none_ref, "COR").unwrap();
        let rep_type = cor_ref.factor(schema::REP_TYPE).unwrap();
        assert_eq!(rep_type.levels()[0], "COR");
        assert_eq!(rep_type.labels(), cor_ref.labels(schema::REP_CHANNEL).unwrap());

        assert!(matches!(
            with_rep_type(cor_ref, "EP"),
            Err(TypeError::UnknownLevel { .. })
        ));
    }
}
