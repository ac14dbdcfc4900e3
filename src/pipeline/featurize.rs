//! Featurize stage
//!
//! Turns a merged raw transaction table into a training-ready table:
//! temporal and age features, low-cardinality groupings for merchant, job and
//! state, PII removal, a `label` column and one-hot encoded categoricals.

use crate::dataset::Table;
use crate::error::{validation_error, PipelineResult};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;
use tracing::info;

pub const LABEL_COLUMN: &str = "label";

const TRANSACTION_TIME: &str = "trans_date_trans_time";
const DATE_OF_BIRTH: &str = "dob";
const FRAUD_FLAG: &str = "is_fraud";
const MERCHANT_PREFIX: &str = "fraud_";
const OTHER: &str = "Other";

/// Raw and PII columns removed before training
const DROP_COLUMNS: &[&str] = &[
    "Unnamed: 0",
    "trans_date_trans_time",
    "dob",
    "first",
    "last",
    "street",
    "city",
    "state",
    "zip",
    "trans_num",
    "unix_time",
    "cc_num",
    "city_pop",
    "is_fraud",
    "merchant",
    "job",
];

/// Categoricals one-hot encoded, in output order
const CATEGORICAL_COLUMNS: &[&str] = &["merchant_grouped", "category", "gender", "job_grouped", "region"];

/// Job-title keyword to family; first match wins
const JOB_KEYWORDS: &[(&str, &str)] = &[
    ("engineer", "Engineer"),
    ("developer", "Engineer"),
    ("architect", "Engineer"),
    ("scientist", "Scientist"),
    ("research", "Scientist"),
    ("analyst", "Analyst"),
    ("data", "Analyst"),
    ("teacher", "Teacher"),
    ("professor", "Teacher"),
    ("lecturer", "Teacher"),
    ("nurse", "Healthcare"),
    ("doctor", "Healthcare"),
    ("physician", "Healthcare"),
    ("psycholog", "Healthcare"),
    ("therapist", "Healthcare"),
    ("surgeon", "Healthcare"),
    ("manager", "Manager"),
    ("director", "Manager"),
    ("officer", "Officer"),
    ("administrator", "Admin"),
    ("consultant", "Consultant"),
    ("lawyer", "Legal"),
    ("solicitor", "Legal"),
    ("attorney", "Legal"),
    ("accountant", "Finance"),
    ("trader", "Finance"),
    ("banker", "Finance"),
    ("finance", "Finance"),
    ("artist", "Creative"),
    ("designer", "Creative"),
    ("editor", "Creative"),
    ("writer", "Creative"),
    ("sales", "Sales"),
    ("marketing", "Sales"),
];

/// US state code to Census region
static REGION_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let regions: &[(&str, &[&str])] = &[
        ("Northeast", &["CT", "ME", "MA", "NH", "RI", "VT", "NJ", "NY", "PA"]),
        (
            "Midwest",
            &["IL", "IN", "MI", "OH", "WI", "IA", "KS", "MN", "MO", "NE", "ND", "SD"],
        ),
        (
            "South",
            &[
                "DE", "FL", "GA", "MD", "NC", "SC", "VA", "DC", "WV", "AL", "KY", "MS", "TN", "AR",
                "LA", "OK", "TX",
            ],
        ),
        (
            "West",
            &["AZ", "CO", "ID", "MT", "NV", "NM", "UT", "WY", "AK", "CA", "HI", "OR", "WA"],
        ),
    ];
    regions
        .iter()
        .flat_map(|(region, states)| states.iter().map(move |s| (*s, *region)))
        .collect()
});

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").expect("static regex"));

/// Summary of a featurize run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturizeReport {
    pub rows: usize,
    pub columns: usize,
}

/// Feature engineering collaborator
pub trait Featurizer {
    /// Read the merged table at `input` and write the featurized table to `output`
    fn featurize(&self, input: &Path, output: &Path) -> PipelineResult<FeaturizeReport>;
}

/// Feature engineering for card transaction tables
#[derive(Debug, Clone)]
pub struct TransactionFeaturizer {
    top_merchants: usize,
}

impl TransactionFeaturizer {
    pub fn new(top_merchants: usize) -> Self {
        Self { top_merchants }
    }

    /// Pure transformation behind `featurize`
    pub fn transform(&self, mut table: Table) -> PipelineResult<Table> {
        add_temporal_features(&mut table)?;

        let regions = table.column("state").map(|states| {
            states
                .iter()
                .map(|s| REGION_MAP.get(s.trim()).copied().unwrap_or(OTHER).to_string())
                .collect::<Vec<_>>()
        });
        if let Some(regions) = regions {
            table.set_column("region", regions)?;
        }

        let merchants = table
            .column("merchant")
            .map(|merchants| group_merchants(&merchants, self.top_merchants));
        if let Some(grouped) = merchants {
            table.set_column("merchant_grouped", grouped)?;
        }

        let jobs = table
            .column("job")
            .map(|jobs| jobs.iter().map(|j| collapse_job(j).to_string()).collect::<Vec<_>>());
        if let Some(grouped) = jobs {
            table.set_column("job_grouped", grouped)?;
        }

        let labels = table
            .column(FRAUD_FLAG)
            .map(|flags| flags.iter().map(|f| f.to_string()).collect::<Vec<_>>());
        match labels {
            Some(labels) => table.set_column(LABEL_COLUMN, labels)?,
            None if table.has_column(LABEL_COLUMN) => {}
            None => {
                return Err(validation_error(format!(
                    "merged table has neither {} nor {} column",
                    FRAUD_FLAG, LABEL_COLUMN
                )))
            }
        }

        table.drop_columns(DROP_COLUMNS);
        let mut table = one_hot_encode(table, CATEGORICAL_COLUMNS)?;
        table.rename_columns(sanitize_column_name);
        Ok(table)
    }
}

impl Featurizer for TransactionFeaturizer {
    fn featurize(&self, input: &Path, output: &Path) -> PipelineResult<FeaturizeReport> {
        let started = Instant::now();
        let table = self.transform(Table::read_csv(input)?)?;
        table.write_csv(output)?;

        let report = FeaturizeReport {
            rows: table.len(),
            columns: table.width(),
        };
        info!(
            rows = report.rows,
            columns = report.columns,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Featurization complete, saved to {}",
            output.display()
        );
        Ok(report)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn add_temporal_features(table: &mut Table) -> PipelineResult<()> {
    let Some(raw_times) = table.column(TRANSACTION_TIME) else {
        return Ok(());
    };
    let times = raw_times
        .iter()
        .enumerate()
        .map(|(row, raw)| {
            parse_timestamp(raw).ok_or_else(|| {
                validation_error(format!("row {}: unparseable {} {:?}", row + 1, TRANSACTION_TIME, raw))
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let ages = match table.column(DATE_OF_BIRTH) {
        Some(dobs) => Some(
            dobs.iter()
                .zip(&times)
                .enumerate()
                .map(|(row, (raw, at))| {
                    parse_timestamp(raw)
                        .map(|dob| (*at - dob).num_days().div_euclid(365).to_string())
                        .ok_or_else(|| {
                            validation_error(format!("row {}: unparseable {} {:?}", row + 1, DATE_OF_BIRTH, raw))
                        })
                })
                .collect::<PipelineResult<Vec<_>>>()?,
        ),
        None => None,
    };

    table.set_column("tx_hour", times.iter().map(|t| t.hour().to_string()).collect())?;
    table.set_column(
        "tx_dayofweek",
        times
            .iter()
            .map(|t| t.weekday().num_days_from_monday().to_string())
            .collect(),
    )?;
    table.set_column("tx_month", times.iter().map(|t| t.month().to_string()).collect())?;
    if let Some(ages) = ages {
        table.set_column("age", ages)?;
    }
    Ok(())
}

/// Map a verbose job title to a broad family
pub fn collapse_job(title: &str) -> &'static str {
    let lower = title.to_lowercase();
    JOB_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, family)| *family)
        .unwrap_or(OTHER)
}

/// Keep the `top_n` most frequent merchants (prefix stripped), fold the rest into `Other`
pub fn group_merchants(merchants: &[&str], top_n: usize) -> Vec<String> {
    let cleaned: Vec<&str> = merchants
        .iter()
        .map(|m| m.strip_prefix(MERCHANT_PREFIX).unwrap_or(m))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &cleaned {
        *counts.entry(name).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let top: BTreeSet<&str> = ranked.into_iter().take(top_n).map(|(name, _)| name).collect();

    cleaned
        .iter()
        .map(|name| {
            if top.contains(name) {
                name.to_string()
            } else {
                OTHER.to_string()
            }
        })
        .collect()
}

/// Replace every non-word character with `_`
pub fn sanitize_column_name(name: &str) -> String {
    NON_WORD.replace_all(name, "_").into_owned()
}

/// One-hot encode `columns` (those present), dropping the first sorted category.
/// Encoded columns move to the end of the table, in `columns` order.
fn one_hot_encode(table: Table, columns: &[&str]) -> PipelineResult<Table> {
    let present: Vec<&str> = columns.iter().copied().filter(|c| table.has_column(c)).collect();
    if present.is_empty() {
        return Ok(table);
    }

    let mut encoded: Vec<(String, Vec<String>)> = Vec::new();
    for column in &present {
        let values = table.column(column).unwrap_or_default();
        let categories: BTreeSet<&str> = values.iter().copied().collect();
        for category in categories.into_iter().skip(1) {
            let indicator = values
                .iter()
                .map(|v| if *v == category { "1" } else { "0" }.to_string())
                .collect();
            encoded.push((format!("{}_{}", column, category), indicator));
        }
    }

    let mut out = table;
    out.drop_columns(&present);
    for (name, values) in encoded {
        out.set_column(&name, values)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::table::table_of;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn raw_transactions() -> Table {
        table_of(
            &[
                "Unnamed: 0",
                "trans_date_trans_time",
                "cc_num",
                "merchant",
                "category",
                "amt",
                "gender",
                "state",
                "job",
                "dob",
                "trans_num",
                "is_fraud",
            ],
            &[
                &["0", "2019-01-01 00:00:18", "1", "fraud_Rippin", "misc_net", "4.97", "F", "NC", "Psychologist, counselling", "1988-03-09", "a", "0"],
                &["1", "2019-01-05 13:30:00", "2", "fraud_Heller", "grocery_pos", "107.23", "M", "WA", "Special educational needs teacher", "1978-06-21", "b", "1"],
                &["2", "2019-02-10 23:59:59", "3", "fraud_Rippin", "grocery_pos", "220.11", "F", "ZZ", "Nature conservation officer", "1962-01-19", "c", "0"],
            ],
        )
    }

    #[test]
    fn test_collapse_job_first_match_wins() {
        assert_eq!(collapse_job("Software Engineer"), "Engineer");
        assert_eq!(collapse_job("Data scientist"), "Scientist");
        assert_eq!(collapse_job("Psychologist, counselling"), "Healthcare");
        assert_eq!(collapse_job("Barista"), "Other");
    }

    #[test]
    fn test_group_merchants_keeps_top_n() {
        let grouped = group_merchants(&["fraud_A", "fraud_B", "fraud_A", "C", "fraud_B", "fraud_A"], 2);
        assert_eq!(grouped, vec!["A", "B", "A", "Other", "B", "A"]);
    }

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("job_grouped_Health care"), "job_grouped_Health_care");
        assert_eq!(sanitize_column_name("merchant_grouped_Kirlin, and Sons"), "merchant_grouped_Kirlin__and_Sons");
    }

    #[test]
    fn test_transform_builds_training_table() {
        let table = TransactionFeaturizer::new(1).transform(raw_transactions()).unwrap();

        assert_eq!(
            table.columns(),
            &[
                "amt",
                "tx_hour",
                "tx_dayofweek",
                "tx_month",
                "age",
                "label",
                "merchant_grouped_Rippin",
                "category_misc_net",
                "gender_M",
                "job_grouped_Officer",
                "job_grouped_Teacher",
                "region_South",
                "region_West",
            ]
        );
        assert_eq!(
            table.rows()[0],
            vec!["4.97", "0", "1", "1", "30", "0", "1", "1", "0", "0", "0", "1", "0"]
        );
        assert_eq!(
            table.rows()[1],
            vec!["107.23", "13", "5", "1", "40", "1", "0", "0", "1", "0", "1", "0", "1"]
        );
    }

    #[test]
    fn test_transform_requires_label_source() {
        let table = table_of(&["amt"], &[&["1.0"]]);
        assert!(TransactionFeaturizer::new(5).transform(table).is_err());
    }

    #[test]
    fn test_bad_timestamp_is_reported() {
        let table = table_of(&["trans_date_trans_time", "is_fraud"], &[&["yesterday", "0"]]);
        let err = TransactionFeaturizer::new(5).transform(table).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_featurize_is_idempotent_on_disk() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("merged.csv");
        let output = dir.path().join("processed/train.csv");
        raw_transactions().write_csv(&input).unwrap();
        let featurizer = TransactionFeaturizer::new(5);

        let first = featurizer.featurize(&input, &output).unwrap();
        let first_bytes = std::fs::read(&output).unwrap();
        let second = featurizer.featurize(&input, &output).unwrap();

        assert_eq!(first, second);
        assert_eq!(first_bytes, std::fs::read(&output).unwrap());
        assert_eq!(first.rows, 3);
    }
}
