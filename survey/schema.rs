//! The fixed survey schema.
//!
//! Column names are not configurable. Every column carries the kind it is
//! read as, the semantic type it is coerced to after imputation, and whether
//! the imputer is allowed to fill it.

pub const ID: &str = "id";
pub const LANGUAGE: &str = "language";
pub const COUNTRY: &str = "country";
pub const SNE_TYPE: &str = "sne_type";
pub const EFF_EU: &str = "eff_eu";
pub const EFF_NATIONAL: &str = "eff_national";
pub const EFF_SNE: &str = "eff_sne";
pub const EU_FUNDS: &str = "eu_funds_important";
pub const REP_CHANNEL: &str = "rep_channel";
pub const REP_BINARY: &str = "rep_binary";
pub const REP_DURATION: &str = "rep_duration";
pub const REP_MOTIVATION: &str = "rep_motivation";
pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const EDUCATION: &str = "education";
pub const LEFT_RIGHT: &str = "left_right";
pub const IDENT_LOCAL: &str = "ident_local";
pub const IDENT_REGIONAL: &str = "ident_regional";
pub const IDENT_NATIONAL: &str = "ident_national";
pub const IDENT_EUROPEAN: &str = "ident_european";

// Derived columns.
pub const WEIGHT: &str = "weight";
pub const MLG_INDEX: &str = "mlg_index";
pub const EU_INDEX: &str = "eu_index";
pub const SNE_INDEX: &str = "sne_index";
pub const MLG_NORM: &str = "mlg_norm";
pub const EU_NORM: &str = "eu_norm";
pub const SNE_NORM: &str = "sne_norm";
pub const LR_GROUP: &str = "lr_group";
pub const REP_TYPE: &str = "rep_type";
pub const MOT_EXP: &str = "mot_exp";
pub const HIGH_MOT_VS_EXP: &str = "experience";

pub const MLG_ITEMS: [&str; 7] = [
    "mlg_1", "mlg_2", "mlg_3", "mlg_4", "mlg_5", "mlg_6", "mlg_7",
];
pub const EU_ITEMS: [&str; 5] = ["eu_comp_1", "eu_comp_2", "eu_comp_3", "eu_comp_4", "eu_comp_5"];
pub const SNE_ITEMS: [&str; 7] = [
    "sne_comp_1",
    "sne_comp_2",
    "sne_comp_3",
    "sne_comp_4",
    "sne_comp_5",
    "sne_comp_6",
    "sne_comp_7",
];

pub const DEFAULT_COUNTRIES: [&str; 11] = [
    "Austria",
    "Belgium",
    "Czech Republic",
    "Denmark",
    "France",
    "Germany",
    "Italy",
    "Netherlands",
    "Poland",
    "Spain",
    "Sweden",
];

pub const SNE_LEVELS: &[&str] = &["Local", "RegionAdmin", "RegionLeg"];
pub const BINARY_LEVELS: &[&str] = &["0", "1"];
pub const REP_CHANNEL_LEVELS: &[&str] = &["NONE", "COR", "CLRAE", "OTHER"];
pub const MOTIVATION_LEVELS: &[&str] = &["1", "2", "3", "4", "5"];
pub const EDUCATION_LEVELS: &[&str] = &["1", "2", "3"];
pub const LEFT_RIGHT_LEVELS: &[&str] = &["1", "2", "3", "4", "5", "6", "7", "8", "9"];
pub const IDENTITY_LEVELS: &[&str] = &["1", "2", "3", "4", "5"];
pub const LR_GROUP_LEVELS: &[&str] = &["Left", "Centre", "Right"];
pub const MOT_EXP_LEVELS: &[&str] = &[
    "Motivation<4",
    "Motivation=4",
    "Motivation=5",
    "Represented",
];

/// How a column is read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Numeric,
    Text,
}

/// Where a factor's level set comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Levels {
    /// A fixed level sequence.
    Declared(&'static [&'static str]),
    /// The sorted set of labels present in the data.
    Observed,
    /// The configured country allow-list, in configured order.
    AllowList,
}

/// The type a column is coerced to by the type normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    Text,
    Numeric,
    Factor(Levels),
    Ordered(&'static [&'static str]),
}

impl Semantic {
    pub fn is_categorical(self) -> bool {
        matches!(self, Semantic::Factor(_) | Semantic::Ordered(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub raw: RawKind,
    pub semantic: Semantic,
    pub imputable: bool,
}

const fn spec(
    name: &'static str,
    raw: RawKind,
    semantic: Semantic,
    imputable: bool,
) -> ColumnSpec {
    ColumnSpec {
        name,
        raw,
        semantic,
        imputable,
    }
}

const fn likert(name: &'static str) -> ColumnSpec {
    spec(name, RawKind::Numeric, Semantic::Numeric, true)
}

const fn identity(name: &'static str) -> ColumnSpec {
    spec(name, RawKind::Numeric, Semantic::Ordered(IDENTITY_LEVELS), true)
}

/// The full input schema, in file order.
pub const COLUMNS: [ColumnSpec; 39] = [
    spec(ID, RawKind::Text, Semantic::Text, false),
    spec(LANGUAGE, RawKind::Text, Semantic::Text, false),
    spec(COUNTRY, RawKind::Text, Semantic::Factor(Levels::AllowList), false),
    spec(SNE_TYPE, RawKind::Text, Semantic::Factor(Levels::Declared(SNE_LEVELS)), false),
    likert("mlg_1"),
    likert("mlg_2"),
    likert("mlg_3"),
    likert("mlg_4"),
    likert("mlg_5"),
    likert("mlg_6"),
    likert("mlg_7"),
    likert("eu_comp_1"),
    likert("eu_comp_2"),
    likert("eu_comp_3"),
    likert("eu_comp_4"),
    likert("eu_comp_5"),
    likert("sne_comp_1"),
    likert("sne_comp_2"),
    likert("sne_comp_3"),
    likert("sne_comp_4"),
    likert("sne_comp_5"),
    likert("sne_comp_6"),
    likert("sne_comp_7"),
    spec(EFF_EU, RawKind::Text, Semantic::Factor(Levels::Observed), true),
    spec(EFF_NATIONAL, RawKind::Text, Semantic::Factor(Levels::Observed), true),
    spec(EFF_SNE, RawKind::Text, Semantic::Factor(Levels::Observed), true),
    spec(EU_FUNDS, RawKind::Numeric, Semantic::Factor(Levels::Declared(BINARY_LEVELS)), true),
    spec(
        REP_CHANNEL,
        RawKind::Text,
        Semantic::Factor(Levels::Declared(REP_CHANNEL_LEVELS)),
        false,
    ),
    spec(REP_BINARY, RawKind::Numeric, Semantic::Factor(Levels::Declared(BINARY_LEVELS)), false),
    spec(REP_DURATION, RawKind::Numeric, Semantic::Numeric, false),
    spec(REP_MOTIVATION, RawKind::Numeric, Semantic::Ordered(MOTIVATION_LEVELS), false),
    spec(AGE, RawKind::Numeric, Semantic::Numeric, true),
    spec(GENDER, RawKind::Text, Semantic::Factor(Levels::Observed), true),
    spec(EDUCATION, RawKind::Numeric, Semantic::Ordered(EDUCATION_LEVELS), true),
    spec(LEFT_RIGHT, RawKind::Numeric, Semantic::Ordered(LEFT_RIGHT_LEVELS), true),
    identity(IDENT_LOCAL),
    identity(IDENT_REGIONAL),
    identity(IDENT_NATIONAL),
    identity(IDENT_EUROPEAN),
];

/// Looks up a schema column by name.
pub fn column_spec(name: &str) -> Option<&'static ColumnSpec> {
    COLUMNS.iter().find(|c| c.name == name)
}

/// Columns the imputer fills, in schema order.
pub fn imputable_columns() -> Vec<&'static str> {
    COLUMNS
        .iter()
        .filter(|c| c.imputable)
        .map(|c| c.name)
        .collect()
}

/// Columns that must be complete for a row to stay in the analysis.
pub const REQUIRED_AFTER_IMPUTATION: [&str; 2] = [AGE, LEFT_RIGHT];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn schema_names_are_unique() {
        let names: HashSet<_> = COLUMNS.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), COLUMNS.len());
    }

    #[test]
    fn grouping_and_representation_columns_are_never_imputed() {
        let imputable = imputable_columns();
        for excluded in [
            ID,
            LANGUAGE,
            COUNTRY,
            SNE_TYPE,
            REP_CHANNEL,
            REP_BINARY,
            REP_DURATION,
            REP_MOTIVATION,
        ] {
            assert!(!imputable.contains(&excluded), "{excluded} must not be imputed");
        }
        assert!(imputable.contains(&AGE));
        assert!(imputable.contains(&LEFT_RIGHT));
    }

    #[test]
    fn item_blocks_are_part_of_the_schema() {
        for item in MLG_ITEMS.iter().chain(EU_ITEMS.iter()).chain(SNE_ITEMS.iter()) {
            let spec = column_spec(item).expect("item column in schema");
            assert_eq!(spec.semantic, Semantic::Numeric);
        }
    }
}
