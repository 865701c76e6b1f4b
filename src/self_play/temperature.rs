use std::str::FromStr;

use itertools::Itertools;

use crate::error::ConfigError;

/// Move sampling temperature as a function of the move number.
#[derive(Clone, Debug, PartialEq)]
pub struct TemperaturePolicy {
    temperatures: Vec<(usize, f32)>,
    last_temperature: f32,
}

impl TemperaturePolicy {
    pub fn constant(temperature: f32) -> Self {
        assert!(temperature >= 0.0);
        Self {
            temperatures: Vec::new(),
            last_temperature: temperature,
        }
    }

    pub fn scheduled(temperatures: Vec<(usize, f32)>, last_temperature: f32) -> Self {
        assert!(temperatures.iter().all(|(_n, t)| *t >= 0.0));
        assert!(last_temperature >= 0.0);
        assert!(temperatures.windows(2).all(|w| w[0].0 < w[1].0)); // strictly increasing

        Self {
            temperatures,
            last_temperature,
        }
    }

    pub fn get_temperature(&self, move_num: usize) -> f32 {
        self.temperatures
            .iter()
            .find(|(threshold, _t)| move_num < *threshold)
            .map(|(_n, t)| *t)
            .unwrap_or(self.last_temperature)
    }
}

impl Default for TemperaturePolicy {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl FromStr for TemperaturePolicy {
    type Err = ConfigError;

    /// Parse a policy from an odd number of comma separated numbers.
    ///
    /// The string is split into `(moves_num, temperature)` pairs followed by a final temperature.
    /// Each pair assigns its temperature to the moves before `moves_num`, pairs must be ordered by
    /// `moves_num`.
    ///
    /// "1.0" is a constant temperature of 1.
    /// "30,1.0,0.0" is a temperature of 1.0 for the first 30 moves and zero after that.
    /// "15,2.0,30,0.5,0.1" is 2.0 for the first 15 moves, 0.5 up to move 30 and 0.1 after that.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::Validation(format!("temperature policy '{s}': {reason}"));

        let parts = s.split(',').map(str::trim).collect_vec();
        if parts.len() % 2 != 1 {
            return Err(invalid("expected an odd number of values"));
        }

        let parse_temperature = |t: &str| match t.parse::<f32>() {
            Ok(t) if t >= 0.0 && t.is_finite() => Ok(t),
            _ => Err(invalid("temperatures must be non negative numbers")),
        };

        let mut temperatures: Vec<(usize, f32)> = Vec::new();
        for (threshold, temperature) in parts[..parts.len() - 1].iter().tuples() {
            let threshold = threshold
                .parse::<usize>()
                .map_err(|_| invalid("move thresholds must be non negative integers"))?;
            if let Some((last_threshold, _t)) = temperatures.last() {
                if *last_threshold >= threshold {
                    return Err(invalid("move thresholds must be strictly increasing"));
                }
            }
            temperatures.push((threshold, parse_temperature(*temperature)?));
        }
        let last_temperature = parse_temperature(parts[parts.len() - 1])?;

        Ok(Self::scheduled(temperatures, last_temperature))
    }
}
