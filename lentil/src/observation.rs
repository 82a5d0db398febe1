//! Observation records and the derived, analysis-ready table.

use crate::error::{LentilError, Result};
use crate::io::DelimitedTable;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Whether a unit could disperse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentType {
    SingleVial,
    TwoVial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispersalStatus {
    NotApplicable,
    Dispersed,
    NotDispersed,
}

/// How the development-time observation constrains the event time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CensoringKind {
    Interval,
}

/// One experimental unit as read from the input table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub species: Box<str>,
    pub line: Box<str>,
    pub replicate: u32,
    pub experiment_type: ExperimentType,
    pub temporal_block: Option<Box<str>>,
    pub start_timestamp: Option<Box<str>>,
    pub emergence_date: Option<Box<str>>,
    pub emergence_hour: Option<f64>,
    pub elapsed_hours: Option<f64>,
    /// days
    pub lowbound: Option<f64>,
    /// days; `None` means right-censored
    pub upbound: Option<f64>,
    pub dispersal_status: DispersalStatus,
    pub egg_count: Option<u64>,
}

/// A raw record with the derived fields attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub raw: RawObservation,
    pub censoring_kind: Option<CensoringKind>,
    pub dispersal_numeric: Option<u8>,
    pub valid_development: bool,
    pub valid_fecundity: bool,
    pub valid_dispersal: bool,
    /// index into `ObservationTable::species_levels`
    pub species_idx: usize,
    /// index into `ObservationTable::line_levels`
    pub line_idx: usize,
}

impl Observation {
    pub fn is_valid_for_any(&self) -> bool {
        self.valid_development || self.valid_fecundity || self.valid_dispersal
    }
}

/// Immutable analysis table with level sets fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationTable {
    rows: Vec<Observation>,
    species_levels: Vec<Box<str>>,
    line_levels: Vec<Box<str>>,
    /// species index of every line level
    line_species: Vec<usize>,
}

pub const REQUIRED_COLUMNS: [&str; 13] = [
    "species",
    "line",
    "replicate",
    "experiment_type",
    "temporal_block",
    "start_timestamp",
    "emergence_date",
    "emergence_hour",
    "elapsed_hours",
    "lowbound",
    "upbound",
    "dispersal_status",
    "egg_count",
];

/// Dispersed → 1, not dispersed → 0, not applicable → undefined
pub fn recode_dispersal(status: DispersalStatus) -> Option<u8> {
    match status {
        DispersalStatus::Dispersed => Some(1),
        DispersalStatus::NotDispersed => Some(0),
        DispersalStatus::NotApplicable => None,
    }
}

fn is_missing(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("nan")
}

fn opt_str(s: &str) -> Option<Box<str>> {
    (!is_missing(s)).then(|| s.into())
}

fn parse_experiment_type(s: &str) -> Option<ExperimentType> {
    match s.to_ascii_lowercase().as_str() {
        "single" | "single_vial" | "single-vial" | "1" => Some(ExperimentType::SingleVial),
        "two" | "two_vial" | "two-vial" | "2" => Some(ExperimentType::TwoVial),
        _ => None,
    }
}

fn parse_dispersal(s: &str) -> Option<DispersalStatus> {
    if is_missing(s) {
        return Some(DispersalStatus::NotApplicable);
    }
    match s.to_ascii_lowercase().as_str() {
        "not_applicable" | "not-applicable" => Some(DispersalStatus::NotApplicable),
        "dispersed" | "1" => Some(DispersalStatus::Dispersed),
        "not_dispersed" | "not-dispersed" | "0" => Some(DispersalStatus::NotDispersed),
        _ => None,
    }
}

/// Derive censoring, dispersal coding and validity masks for one record.
///
/// Development and fecundity require a single-vial unit with the
/// measured field present; dispersal requires a resolvable outcome,
/// which only two-vial units have.
pub fn prepare_observation(
    raw: RawObservation,
    species_idx: usize,
    line_idx: usize,
    line_no: usize,
) -> Result<Observation> {
    let single = raw.experiment_type == ExperimentType::SingleVial;
    let dispersal_numeric = recode_dispersal(raw.dispersal_status);

    if single && dispersal_numeric.is_some() {
        return Err(LentilError::malformed(
            line_no,
            "dispersal_status",
            "single-vial units cannot disperse",
        ));
    }

    let valid_development = single && raw.emergence_date.is_some();
    let valid_fecundity = single && raw.egg_count.is_some();
    let valid_dispersal = dispersal_numeric.is_some();

    if valid_development {
        let lo = raw.lowbound.ok_or_else(|| {
            LentilError::malformed(line_no, "lowbound", "missing for an emerged unit")
        })?;
        if lo < 0.0 {
            return Err(LentilError::malformed(line_no, "lowbound", "negative"));
        }
        if let Some(hi) = raw.upbound {
            if hi < lo {
                return Err(LentilError::malformed(line_no, "upbound", "below lowbound"));
            }
        }
    }

    Ok(Observation {
        censoring_kind: valid_development.then_some(CensoringKind::Interval),
        dispersal_numeric,
        valid_development,
        valid_fecundity,
        valid_dispersal,
        species_idx,
        line_idx,
        raw,
    })
}

fn sorted_levels<'a>(names: impl Iterator<Item = &'a str>) -> Vec<Box<str>> {
    let mut levels: Vec<Box<str>> = names.map(Box::from).collect();
    levels.sort();
    levels.dedup();
    levels
}

struct RowReader<'a> {
    fields: &'a [Box<str>],
    header: &'a [Box<str>],
    line_no: usize,
}

impl<'a> RowReader<'a> {
    fn field(&self, c: usize) -> Result<&'a str> {
        self.fields
            .get(c)
            .map(|x| x.as_ref())
            .ok_or_else(|| LentilError::malformed(self.line_no, &self.header[c], "too few fields"))
    }

    fn required(&self, c: usize) -> Result<&'a str> {
        let s = self.field(c)?;
        if is_missing(s) {
            Err(LentilError::malformed(self.line_no, &self.header[c], "missing value"))
        } else {
            Ok(s)
        }
    }

    fn float(&self, c: usize) -> Result<Option<f64>> {
        let s = self.field(c)?;
        if is_missing(s) {
            return Ok(None);
        }
        s.parse::<f64>().map(Some).map_err(|_| {
            LentilError::malformed(self.line_no, &self.header[c], format!("not a number: {}", s))
        })
    }
}

impl ObservationTable {
    /// Fix the species and line level sets (sorted) and derive every
    /// record's analysis fields.
    pub fn prepare(raw_rows: Vec<(usize, RawObservation)>) -> Result<Self> {
        let species_levels = sorted_levels(raw_rows.iter().map(|(_, r)| r.species.as_ref()));
        let line_levels = sorted_levels(raw_rows.iter().map(|(_, r)| r.line.as_ref()));

        let mut line_species: Vec<Option<usize>> = vec![None; line_levels.len()];
        let mut rows = Vec::with_capacity(raw_rows.len());

        for (line_no, raw) in raw_rows {
            let s = species_levels
                .binary_search(&raw.species)
                .map_err(|_| LentilError::Specification("species level lookup".into()))?;
            let l = line_levels
                .binary_search(&raw.line)
                .map_err(|_| LentilError::Specification("line level lookup".into()))?;

            match line_species[l] {
                None => line_species[l] = Some(s),
                Some(prev) if prev != s => {
                    return Err(LentilError::malformed(
                        line_no,
                        "line",
                        format!(
                            "line {} appears under species {} and {}",
                            raw.line, species_levels[prev], raw.species
                        ),
                    ));
                }
                _ => {}
            }

            rows.push(prepare_observation(raw, s, l, line_no)?);
        }

        let line_species = line_species.into_iter().map(|s| s.unwrap_or(0)).collect();

        let table = Self {
            rows,
            species_levels,
            line_levels,
            line_species,
        };

        let n_unused = table.rows.iter().filter(|r| !r.is_valid_for_any()).count();
        if n_unused > 0 {
            warn!("{} records are valid for no response and are ignored", n_unused);
        }
        info!(
            "{} records: {} development, {} fecundity, {} dispersal; {} species, {} lines",
            table.rows.len(),
            table.count(|r| r.valid_development),
            table.count(|r| r.valid_fecundity),
            table.count(|r| r.valid_dispersal),
            table.species_levels.len(),
            table.line_levels.len()
        );

        Ok(table)
    }

    /// Parse and prepare a delimited table.
    ///
    /// Fails with a schema error if any required column is absent or a
    /// value cannot be parsed.
    pub fn from_delimited(table: &DelimitedTable) -> Result<Self> {
        let mut cols = [0usize; REQUIRED_COLUMNS.len()];
        for (c, name) in cols.iter_mut().zip(REQUIRED_COLUMNS.iter()) {
            *c = table
                .column(name)
                .ok_or_else(|| LentilError::MissingColumn(name.to_string()))?;
        }
        let [species, line, replicate, experiment_type, temporal_block, start_timestamp, emergence_date, emergence_hour, elapsed_hours, lowbound, upbound, dispersal_status, egg_count] =
            cols;

        let mut raw_rows = Vec::with_capacity(table.rows.len());

        for (line_no, fields) in &table.rows {
            let row = RowReader {
                fields,
                header: &table.header,
                line_no: *line_no,
            };
            let line_no = *line_no;

            let exp_str = row.required(experiment_type)?;
            let experiment_type = parse_experiment_type(exp_str).ok_or_else(|| {
                LentilError::malformed(
                    line_no,
                    "experiment_type",
                    format!("unknown experiment type: {}", exp_str),
                )
            })?;

            let disp_str = row.field(dispersal_status)?;
            let dispersal_status = parse_dispersal(disp_str).ok_or_else(|| {
                LentilError::malformed(
                    line_no,
                    "dispersal_status",
                    format!("unknown dispersal status: {}", disp_str),
                )
            })?;

            let replicate = row.required(replicate)?.parse::<u32>().map_err(|_| {
                LentilError::malformed(line_no, "replicate", "not a non-negative integer")
            })?;

            let egg_count = match row.float(egg_count)? {
                None => None,
                Some(x) if x >= 0.0 && x.fract() == 0.0 => Some(x as u64),
                Some(x) => {
                    return Err(LentilError::malformed(
                        line_no,
                        "egg_count",
                        format!("not a count: {}", x),
                    ))
                }
            };

            let upbound = row.float(upbound)?.filter(|x| x.is_finite());

            raw_rows.push((
                line_no,
                RawObservation {
                    species: row.required(species)?.into(),
                    line: row.required(line)?.into(),
                    replicate,
                    experiment_type,
                    temporal_block: opt_str(row.field(temporal_block)?),
                    start_timestamp: opt_str(row.field(start_timestamp)?),
                    emergence_date: opt_str(row.field(emergence_date)?),
                    emergence_hour: row.float(emergence_hour)?,
                    elapsed_hours: row.float(elapsed_hours)?,
                    lowbound: row.float(lowbound)?,
                    upbound,
                    dispersal_status,
                    egg_count,
                },
            ));
        }

        Self::prepare(raw_rows)
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn species_levels(&self) -> &[Box<str>] {
        &self.species_levels
    }

    pub fn line_levels(&self) -> &[Box<str>] {
        &self.line_levels
    }

    /// Species index of each line level
    pub fn line_species(&self) -> &[usize] {
        &self.line_species
    }

    pub fn count(&self, pred: impl Fn(&Observation) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(r)).count()
    }

    /// Median `lowbound` over development-valid rows
    pub fn median_lowbound(&self) -> Option<f64> {
        median(
            self.rows
                .iter()
                .filter(|r| r.valid_development)
                .filter_map(|r| r.raw.lowbound)
                .collect(),
        )
    }

    /// Median egg count over fecundity-valid rows
    pub fn median_egg_count(&self) -> Option<f64> {
        median(
            self.rows
                .iter()
                .filter(|r| r.valid_fecundity)
                .filter_map(|r| r.raw.egg_count.map(|x| x as f64))
                .collect(),
        )
    }
}

fn median(mut xs: Vec<f64>) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    xs.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = xs.len();
    Some(if n % 2 == 1 {
        xs[n / 2]
    } else {
        0.5 * (xs[n / 2 - 1] + xs[n / 2])
    })
}
