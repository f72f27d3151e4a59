//! Test fixtures: a seeded synthetic survey in the input file format.
//!
//! The builder writes every schema column, so the same data can go through
//! the CSV loader or straight into a [`SurveyTable`].

use crate::data::{Column, SurveyTable};
use crate::schema::{self, COLUMNS, RawKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::Path;

const FOREIGN_COUNTRIES: [&str; 2] = ["Norway", "Switzerland"];
const EFFECTIVENESS: [&str; 3] = ["high", "low", "medium"];
const CHANNELS: [&str; 3] = ["COR", "CLRAE", "OTHER"];

/// Builder for synthetic survey files with configurable missingness.
pub struct SyntheticSurveyBuilder {
    per_stratum: usize,
    foreign_rows: usize,
    missing_rate: f64,
    orphan_row: bool,
    seed: u64,
}

impl SyntheticSurveyBuilder {
    /// `per_stratum` respondents for every (country, entity type) pair.
    pub fn new(per_stratum: usize) -> Self {
        Self {
            per_stratum,
            foreign_rows: 0,
            missing_rate: 0.0,
            orphan_row: true,
            seed: 42,
        }
    }

    /// Adds respondents from countries outside the allow-list.
    pub fn with_foreign_rows(mut self, n: usize) -> Self {
        self.foreign_rows = n;
        self
    }

    /// Blanks imputable cells with probability `rate`.
    pub fn with_missing_rate(mut self, rate: f64) -> Self {
        self.missing_rate = rate.clamp(0.0, 0.9);
        self
    }

    /// Omits the single respondent whose age cannot be imputed.
    pub fn without_orphan_row(mut self) -> Self {
        self.orphan_row = false;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    pub fn header() -> String {
        COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(",")
    }

    pub fn to_csv(rows: &[Vec<String>]) -> String {
        let mut out = Self::header();
        for row in rows {
            out.push('\n');
            out.push_str(&row.join(","));
        }
        out
    }

    pub fn build_csv(&self) -> String {
        Self::to_csv(&self.build_rows())
    }

    pub fn write_csv(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.build_csv())
    }

    /// The rows as an untyped table, as the loader would produce them.
    pub fn build_table(&self) -> SurveyTable {
        let rows = self.build_rows();
        let columns = COLUMNS
            .iter()
            .enumerate()
            .map(|(j, spec)| {
                let cells = rows.iter().map(|row| {
                    let cell = row[j].as_str();
                    if cell.is_empty() || cell == "NA" {
                        None
                    } else {
                        Some(cell)
                    }
                });
                let column = match spec.raw {
                    RawKind::Numeric => {
                        Column::Numeric(cells.map(|c| c.and_then(|c| c.parse().ok())).collect())
                    }
                    RawKind::Text => Column::Text(cells.map(|c| c.map(str::to_string)).collect()),
                };
                (spec.name.to_string(), column)
            })
            .collect();
        // Every column has the same number of rows by construction.
        SurveyTable::from_columns(columns).unwrap_or_else(|e| panic!("fixture table: {e}"))
    }

    pub fn build_rows(&self) -> Vec<Vec<String>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows = Vec::new();
        let mut counter = 0usize;

        for (c, country) in schema::DEFAULT_COUNTRIES.iter().enumerate() {
            let country_effect = (c as f64 - 5.0) * 0.08;
            for sne in schema::SNE_LEVELS {
                for _ in 0..self.per_stratum {
                    counter += 1;
                    let row =
                        self.respondent(&mut rng, counter, country, Some(sne), country_effect);
                    rows.push(self.with_missing(&mut rng, row));
                }
            }
        }
        for i in 0..self.foreign_rows {
            counter += 1;
            let country = FOREIGN_COUNTRIES[i % FOREIGN_COUNTRIES.len()];
            let row = self.respondent(&mut rng, counter, country, Some("Local"), 0.0);
            rows.push(row);
        }
        if self.orphan_row {
            counter += 1;
            let mut row = self.respondent(&mut rng, counter, "Austria", None, 0.0);
            row[column_index(schema::AGE)] = "NA".to_string();
            rows.push(row);
        }
        rows
    }

    fn respondent(
        &self,
        rng: &mut StdRng,
        counter: usize,
        country: &str,
        sne: Option<&str>,
        country_effect: f64,
    ) -> Vec<String> {
        let represented = rng.gen_bool(0.35);
        let latent_eu = noise(rng);
        let latent_sne = noise(rng);
        let funds = rng.gen_bool(0.6);
        let latent_mlg = 0.45 * f64::from(u8::from(represented))
            + 0.4 * latent_eu
            + 0.3 * latent_sne
            + 0.2 * f64::from(u8::from(funds))
            + country_effect
            + 0.5 * noise(rng);

        let mut row = vec![String::new(); COLUMNS.len()];
        let mut set = |name: &str, value: String| row[column_index(name)] = value;

        set(schema::ID, format!("R{counter:05}"));
        set(schema::LANGUAGE, language_of(country).to_string());
        set(schema::COUNTRY, country.to_string());
        set(schema::SNE_TYPE, sne.unwrap_or("").to_string());
        for item in schema::MLG_ITEMS {
            set(item, likert(latent_mlg + 0.6 * noise(rng)));
        }
        for item in schema::EU_ITEMS {
            set(item, likert(latent_eu + 0.6 * noise(rng)));
        }
        for item in schema::SNE_ITEMS {
            set(item, likert(latent_sne + 0.6 * noise(rng)));
        }
        for name in [schema::EFF_EU, schema::EFF_NATIONAL, schema::EFF_SNE] {
            set(name, EFFECTIVENESS[rng.gen_range(0..EFFECTIVENESS.len())].to_string());
        }
        set(schema::EU_FUNDS, u8::from(funds).to_string());
        if represented {
            set(schema::REP_CHANNEL, CHANNELS[rng.gen_range(0..CHANNELS.len())].to_string());
            set(schema::REP_BINARY, "1".to_string());
            set(schema::REP_DURATION, rng.gen_range(1..=12).to_string());
            set(schema::REP_MOTIVATION, "NA".to_string());
        } else {
            set(schema::REP_CHANNEL, "NONE".to_string());
            set(schema::REP_BINARY, "0".to_string());
            set(schema::REP_DURATION, "NA".to_string());
            let motivation = if rng.gen_bool(0.05) {
                "NA".to_string()
            } else {
                rng.gen_range(1..=5).to_string()
            };
            set(schema::REP_MOTIVATION, motivation);
        }
        set(schema::AGE, rng.gen_range(25..=75).to_string());
        set(schema::GENDER, if rng.gen_bool(0.4) { "F" } else { "M" }.to_string());
        set(schema::EDUCATION, rng.gen_range(1..=3).to_string());
        set(schema::LEFT_RIGHT, rng.gen_range(1..=9).to_string());
        for name in [
            schema::IDENT_LOCAL,
            schema::IDENT_REGIONAL,
            schema::IDENT_NATIONAL,
            schema::IDENT_EUROPEAN,
        ] {
            set(name, rng.gen_range(1..=5).to_string());
        }
        row
    }

    fn with_missing(&self, rng: &mut StdRng, mut row: Vec<String>) -> Vec<String> {
        if self.missing_rate <= 0.0 {
            return row;
        }
        for (j, spec) in COLUMNS.iter().enumerate() {
            if spec.imputable && rng.gen_bool(self.missing_rate) {
                row[j] = "NA".to_string();
            }
        }
        row
    }
}

fn column_index(name: &str) -> usize {
    COLUMNS
        .iter()
        .position(|c| c.name == name)
        .unwrap_or_else(|| panic!("{name} is not a schema column"))
}

fn language_of(country: &str) -> &'static str {
    match country {
        "Austria" | "Germany" => "de",
        "France" | "Belgium" => "fr",
        "Italy" => "it",
        "Spain" => "es",
        "Poland" => "pl",
        "Netherlands" => "nl",
        "Czech Republic" => "cs",
        "Denmark" => "da",
        "Sweden" => "sv",
        _ => "en",
    }
}

/// Roughly standard normal noise from the sum of three uniforms.
fn noise(rng: &mut StdRng) -> f64 {
    (0..3).map(|_| rng.gen_range(-1.0..1.0)).sum::<f64>()
}

fn likert(latent: f64) -> String {
    ((3.0 + latent).round().clamp(1.0, 5.0) as i64).to_string()
}
