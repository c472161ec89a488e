use crate::config::ParameterSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("Unknown distribution: {0}")]
    InvalidDistribution(String),
    #[error("Invalid range: {0}")]
    InvalidRange(String),
    #[error("Grid expanded to zero cells")]
    EmptyGrid,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum Distribution {
    Linear,
    Log,
}

impl FromStr for Distribution {
    type Err = GridError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "linear" => Ok(Self::Linear),
            "log" => Ok(Self::Log),
            other => Err(GridError::InvalidDistribution(other.to_owned())),
        }
    }
}

impl TryFrom<String> for Distribution {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(formatter, "linear"),
            Self::Log => write!(formatter, "log"),
        }
    }
}

/// Expand a range descriptor into exactly `num` values in non-decreasing order.
///
/// `linear` spaces values evenly between `min` and `max`, `log` spaces them
/// evenly in log10 space. Both endpoints are produced exactly.
pub fn expand(
    distribution: Distribution,
    min: f64,
    max: f64,
    num: usize,
) -> Result<Vec<f64>, GridError> {
    if num < 1 {
        return Err(GridError::InvalidRange("num must be at least 1".to_owned()));
    }

    if min > max {
        return Err(GridError::InvalidRange(format!(
            "min ({min}) must not exceed max ({max})"
        )));
    }

    if distribution == Distribution::Log && min <= 0.0 {
        return Err(GridError::InvalidRange(format!(
            "log distributions require min > 0, got {min}"
        )));
    }

    if num == 1 {
        return Ok(vec![min]);
    }

    let values = match distribution {
        Distribution::Linear => {
            let step = (max - min) / (num - 1) as f64;

            (0..num)
                .map(|index| {
                    if index == num - 1 {
                        max
                    } else {
                        min + step * index as f64
                    }
                })
                .collect_vec()
        }
        Distribution::Log => {
            let low = min.log10();
            let step = (max.log10() - low) / (num - 1) as f64;

            (0..num)
                .map(|index| match index {
                    0 => min,
                    last if last == num - 1 => max,
                    index => 10f64.powf(low + step * index as f64),
                })
                .collect_vec()
        }
    };

    Ok(values)
}

#[derive(Debug, Clone, PartialEq)]
/// The fully expanded parameter grid before it is persisted.
/// Cell values are kept in parameter declaration order, one `Vec<f64>` per cell.
pub struct Grid {
    pub names: Vec<String>,
    pub cells: Vec<Vec<f64>>,
}

/// Expand every parameter range and enumerate the Cartesian product.
///
/// The first declared parameter varies slowest. Cell order here fixes the
/// identifier order in the store and therefore the claim order.
pub fn generate(parameters: &ParameterSet) -> Result<Grid, GridError> {
    if parameters.is_empty() {
        return Err(GridError::EmptyGrid);
    }

    let mut names = Vec::with_capacity(parameters.len());
    let mut expanded = Vec::with_capacity(parameters.len());

    for (name, range) in parameters.iter() {
        let values =
            expand(range.distribution, range.min, range.max, range.num).map_err(|error| {
                match error {
                    GridError::InvalidRange(reason) => {
                        GridError::InvalidRange(format!("{name}: {reason}"))
                    }
                    other => other,
                }
            })?;

        names.push(name.clone());
        expanded.push(values);
    }

    let cells = expanded
        .iter()
        .map(|values| values.iter().copied())
        .multi_cartesian_product()
        .collect_vec();

    if cells.is_empty() {
        return Err(GridError::EmptyGrid);
    }

    debug!(cells = cells.len(), "Generated grid");

    Ok(Grid { names, cells })
}

#[cfg(test)]
mod grid_test {
    use super::{expand, generate, Distribution, GridError};
    use crate::config::ParameterSet;

    fn parameters(raw: &str) -> ParameterSet {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    pub fn linear_expansion_is_evenly_spaced() {
        let values = expand(Distribution::Linear, 0.0, 10.0, 5).unwrap();

        assert_eq!(values, vec![0.0, 2.5, 5.0, 7.5, 10.0]);
    }

    #[test]
    pub fn log_expansion_is_linear_in_log10_space() {
        let values = expand(Distribution::Log, 1.0, 100.0, 3).unwrap();

        assert_eq!(values, vec![1.0, 10.0, 100.0]);
    }

    #[test]
    pub fn single_value_ranges_collapse_to_min() {
        assert_eq!(expand(Distribution::Linear, 3.0, 9.0, 1).unwrap(), vec![3.0]);
        assert_eq!(expand(Distribution::Log, 2.0, 8.0, 1).unwrap(), vec![2.0]);
    }

    #[test]
    pub fn expansion_is_non_decreasing() {
        let values = expand(Distribution::Log, 0.001, 10.0, 17).unwrap();

        assert!(values.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(values.len(), 17);
        assert_eq!(*values.first().unwrap(), 0.001);
        assert_eq!(*values.last().unwrap(), 10.0);
    }

    #[test]
    pub fn zero_count_is_an_invalid_range() {
        assert!(matches!(
            expand(Distribution::Linear, 0.0, 1.0, 0),
            Err(GridError::InvalidRange(_))
        ));
    }

    #[test]
    pub fn log_range_requires_positive_min() {
        assert!(matches!(
            expand(Distribution::Log, 0.0, 1.0, 2),
            Err(GridError::InvalidRange(_))
        ));
        assert!(matches!(
            expand(Distribution::Log, -1.0, 1.0, 2),
            Err(GridError::InvalidRange(_))
        ));
    }

    #[test]
    pub fn inverted_range_is_rejected() {
        assert!(matches!(
            expand(Distribution::Linear, 5.0, 1.0, 3),
            Err(GridError::InvalidRange(_))
        ));
    }

    #[test]
    pub fn unknown_distribution_tag_fails() {
        assert_eq!(
            "geometric".parse::<Distribution>(),
            Err(GridError::InvalidDistribution("geometric".to_owned()))
        );
    }

    #[test]
    pub fn grid_size_is_the_product_of_counts() {
        let parameters = parameters(
            "
a: {distribution: linear, min: 0, max: 1, num: 3}
b: {distribution: linear, min: 0, max: 1, num: 4}
c: {distribution: log, min: 1, max: 100, num: 5}
",
        );

        let grid = generate(&parameters).unwrap();

        assert_eq!(grid.cells.len(), 3 * 4 * 5);
        assert_eq!(grid.names, vec!["a", "b", "c"]);
    }

    #[test]
    pub fn first_parameter_varies_slowest() {
        let parameters = parameters(
            "
lr: {distribution: linear, min: 0.01, max: 0.1, num: 2}
batch: {distribution: linear, min: 16, max: 32, num: 2}
",
        );

        let grid = generate(&parameters).unwrap();

        assert_eq!(
            grid.cells,
            vec![
                vec![0.01, 16.0],
                vec![0.01, 32.0],
                vec![0.1, 16.0],
                vec![0.1, 32.0],
            ]
        );
    }

    #[test]
    pub fn empty_parameter_set_yields_empty_grid() {
        let parameters: ParameterSet = serde_yaml::from_str("{}").unwrap();

        assert_eq!(generate(&parameters), Err(GridError::EmptyGrid));
    }

    #[test]
    pub fn bad_range_reports_the_parameter_name() {
        let parameters = parameters("lr: {distribution: linear, min: 1, max: 0, num: 2}");

        match generate(&parameters) {
            Err(GridError::InvalidRange(reason)) => assert!(reason.starts_with("lr:")),
            other => panic!("expected an invalid range, got {other:?}"),
        }
    }
}
