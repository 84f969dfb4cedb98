use crate::{State, TariffModel};
use std::{fmt::Display, iter::zip};

/// Sampled states and the inputs held between consecutive samples.
///
/// `inputs[k]` is applied on `[times[k], times[k + 1])`, so a trajectory holds one input less
/// than it holds states.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    /// Sampling instants.
    pub times: Vec<f64>,
    /// States at the sampling instants.
    pub states: Vec<State>,
    /// Inputs held between the sampling instants.
    pub inputs: Vec<f64>,
}

impl Trajectory {
    /// Starts a trajectory at time t0 in state x0.
    pub fn new(t0: f64, x0: State) -> Self {
        Self {
            times: vec![t0],
            states: vec![x0],
            inputs: vec![],
        }
    }

    /// Appends the input held until time t and the state reached at t.
    pub fn push(&mut self, input: f64, t: f64, state: State) {
        self.inputs.push(input);
        self.times.push(t);
        self.states.push(state);
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if no state is stored.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Last state.
    pub fn final_state(&self) -> Option<&State> {
        self.states.last()
    }

    /// Last sampling instant.
    pub fn final_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    /// Highest contaminant concentration along the trajectory.
    pub fn peak_contaminant(&self) -> f64 {
        self.states
            .iter()
            .map(|s| s.contaminant)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Tariff weighted control effort, the integral of the normalized price times the input.
    pub fn energy_cost(&self, tariff: &TariffModel) -> f64 {
        zip(self.times.windows(2), &self.inputs)
            .map(|(t, u)| tariff.normalized_price(t[0]) * u * (t[1] - t[0]))
            .sum()
    }
}

impl Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows: String = self
            .states
            .iter()
            .enumerate()
            .map(|(k, s)| {
                let input = self
                    .inputs
                    .get(k)
                    .map(|u| format!("{u:.4}"))
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "{:>7.3}\t{:>8.3}\t{:>8.3}\t{:>8.3}\t{input}",
                    self.times[k], s.volume, s.product, s.contaminant
                )
            })
            .collect::<Vec<String>>()
            .join("\n");
        let header = "Time\tVolume\t\tProduct\t\tContam.\t\tInput".to_string();
        write!(f, "{:-^1$}\n{header}\n{rows}", " Trajectory ".to_string(), 60)
    }
}
