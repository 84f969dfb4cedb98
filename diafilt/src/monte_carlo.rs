use crate::{
    ClosedLoopSimulator, Error, Interval, ParameterSet, Result, RunOutcome, RunStatus, Scenario,
    ScenarioGenerator, ScenarioVariant, StageBounds, State, TariffModel,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use std::{fmt::Display, sync::Arc};

/// Distribution of the parameters of one [ScenarioVariant], each uniform on an interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariantDistribution {
    /// See [ScenarioVariant::Nominal].
    Nominal,
    /// See [ScenarioVariant::Tear].
    Tear {
        /// Time of the tear.
        at: Interval,
        /// Remaining fraction of the membrane area.
        area_factor: Interval,
    },
    /// See [ScenarioVariant::KmMismatch].
    KmMismatch {
        /// Scale of the mass transfer coefficient.
        factor: Interval,
    },
    /// See [ScenarioVariant::ProteinLeakage].
    ProteinLeakage {
        /// Product sieving coefficient.
        sieving: Interval,
        /// Product mass transfer coefficient.
        mass_transfer: Interval,
    },
}

fn uniform<R: Rng>(rng: &mut R, interval: &Interval) -> f64 {
    interval.lower + (interval.upper - interval.lower) * rng.random::<f64>()
}

fn check_range(parameter: &'static str, interval: &Interval, admissible: &Interval) -> Result<()> {
    let well_formed = interval.is_bounded() && interval.lower <= interval.upper;
    if !well_formed || !interval.is_subset_of(admissible) {
        return Err(Error::Sampling {
            parameter,
            reason: format!(
                "range [{}, {}] must be finite, non empty and within [{}, {}]",
                interval.lower, interval.upper, admissible.lower, admissible.upper
            ),
        });
    }
    Ok(())
}

fn positive() -> Interval {
    Interval {
        lower: f64::MIN_POSITIVE,
        upper: f64::INFINITY,
    }
}

impl VariantDistribution {
    fn validate(&self) -> Result<()> {
        match self {
            VariantDistribution::Nominal => Ok(()),
            VariantDistribution::Tear { at, area_factor } => {
                check_range(
                    "tear time",
                    at,
                    &Interval {
                        lower: 0.,
                        upper: f64::INFINITY,
                    },
                )?;
                check_range(
                    "tear area factor",
                    area_factor,
                    &Interval {
                        lower: f64::MIN_POSITIVE,
                        upper: 1.,
                    },
                )
            }
            VariantDistribution::KmMismatch { factor } => {
                check_range("mass transfer factor", factor, &positive())
            }
            VariantDistribution::ProteinLeakage {
                sieving,
                mass_transfer,
            } => {
                check_range("product sieving", sieving, &positive())?;
                check_range("product mass transfer", mass_transfer, &positive())
            }
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> ScenarioVariant {
        match self {
            VariantDistribution::Nominal => ScenarioVariant::Nominal,
            VariantDistribution::Tear { at, area_factor } => ScenarioVariant::Tear {
                at: uniform(rng, at),
                area_factor: uniform(rng, area_factor),
            },
            VariantDistribution::KmMismatch { factor } => ScenarioVariant::KmMismatch {
                factor: uniform(rng, factor),
            },
            VariantDistribution::ProteinLeakage {
                sieving,
                mass_transfer,
            } => ScenarioVariant::ProteinLeakage {
                sieving: uniform(rng, sieving),
                mass_transfer: uniform(rng, mass_transfer),
            },
        }
    }
}

/// Weighted mixture of variant distributions with optional uniform scaling of permeability
/// and membrane area.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioDistribution {
    /// Variant distributions with their relative weights.
    pub variants: Vec<(f64, VariantDistribution)>,
    /// Range of the permeability scale.
    pub permeability_scale: Option<Interval>,
    /// Range of the membrane area scale.
    pub area_scale: Option<Interval>,
}

impl ScenarioDistribution {
    /// Empty mixture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mass transfer of the contaminant scaled within [0.25, 1], permeability and area
    /// within [0.8, 1.2].
    pub fn random_plant() -> Self {
        Self::new()
            .with_variant(
                1.,
                VariantDistribution::KmMismatch {
                    factor: Interval {
                        lower: 0.25,
                        upper: 1.,
                    },
                },
            )
            .with_permeability_scale(Interval {
                lower: 0.8,
                upper: 1.2,
            })
            .with_area_scale(Interval {
                lower: 0.8,
                upper: 1.2,
            })
    }

    /// Single fixed variant.
    pub fn fixed(variant: VariantDistribution) -> Self {
        Self::new().with_variant(1., variant)
    }

    /// Adds a variant with a relative weight.
    pub fn with_variant(mut self, weight: f64, variant: VariantDistribution) -> Self {
        self.variants.push((weight, variant));
        self
    }

    /// Set the range of the permeability scale.
    pub fn with_permeability_scale(mut self, range: Interval) -> Self {
        self.permeability_scale = Some(range);
        self
    }

    /// Set the range of the membrane area scale.
    pub fn with_area_scale(mut self, range: Interval) -> Self {
        self.area_scale = Some(range);
        self
    }

    /// Returns an error if the mixture is empty, a weight is negative or a range is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(Error::Sampling {
                parameter: "variants",
                reason: "at least one variant required".to_string(),
            });
        }
        let mut total = 0.;
        for (weight, variant) in &self.variants {
            if !(weight.is_finite() && *weight >= 0.) {
                return Err(Error::Sampling {
                    parameter: "weight",
                    reason: format!("weights must be finite and >= 0 but got {weight}"),
                });
            }
            total += weight;
            variant.validate()?;
        }
        if total <= 0. {
            return Err(Error::Sampling {
                parameter: "weight",
                reason: "weights sum to zero".to_string(),
            });
        }
        if let Some(range) = &self.permeability_scale {
            check_range("permeability scale", range, &positive())?;
        }
        if let Some(range) = &self.area_scale {
            check_range("area scale", range, &positive())?;
        }
        Ok(())
    }

    /// Draws one scenario, first the variant then its parameters and the scales.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Scenario {
        let total: f64 = self.variants.iter().map(|(w, _)| w).sum();
        let mut pick = rng.random::<f64>() * total;
        let mut chosen = self.variants.last().map(|(_, v)| *v);
        for (weight, variant) in &self.variants {
            if pick < *weight {
                chosen = Some(*variant);
                break;
            }
            pick -= weight;
        }
        let variant = chosen.map_or(ScenarioVariant::Nominal, |v| v.sample(rng));
        let permeability_scale = self.permeability_scale.map_or(1., |r| uniform(rng, &r));
        let area_scale = self.area_scale.map_or(1., |r| uniform(rng, &r));
        Scenario::new(variant).perturb(permeability_scale, area_scale)
    }
}

/// Metrics of one closed loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Simulated plant.
    pub scenario: Scenario,
    /// Last plant state.
    pub final_state: State,
    /// Terminal state of the run.
    pub status: RunStatus,
    /// Target reached without violating the path bounds.
    pub passed: bool,
    /// A path bound was exceeded at some sampling instant, whether or not the target was
    /// reached.
    pub bound_violated: bool,
    /// Largest relative violation of the path bounds and of the target set by the final
    /// state.
    pub violation: f64,
    /// Batch duration if the target was reached.
    pub completion_time: Option<f64>,
    /// Tariff weighted control effort.
    pub energy_cost: f64,
    /// Highest contaminant concentration.
    pub peak_contaminant: f64,
    /// Steps whose solve failed.
    pub faulted_steps: usize,
}

impl RunResult {
    /// Evaluates the outcome of a run against the bounds and targets of the parameters.
    pub fn new(
        scenario: Scenario,
        outcome: &RunOutcome,
        params: &ParameterSet,
        tariff: &TariffModel,
    ) -> Self {
        let trajectory = &outcome.trajectory;
        let path = StageBounds::path(params);
        let path_violation = trajectory
            .states
            .iter()
            .map(|s| path.excess(s).amax())
            .fold(0., f64::max);
        let final_state = trajectory
            .final_state()
            .copied()
            .unwrap_or_else(|| State::initial(params));
        let target_violation = StageBounds::target(params).excess(&final_state).amax();
        let done = outcome.status == RunStatus::Done;
        Self {
            scenario,
            final_state,
            status: outcome.status,
            passed: done && path_violation == 0.,
            bound_violated: path_violation > 0.,
            violation: path_violation.max(target_violation),
            completion_time: if done { trajectory.final_time() } else { None },
            energy_cost: trajectory.energy_cost(tariff),
            peak_contaminant: trajectory.peak_contaminant(),
            faulted_steps: outcome.faulted_steps,
        }
    }
}

/// Upper edges of the violation bins, one more bin collects everything beyond the last edge.
const VIOLATION_EDGES: [f64; 5] = [1e-6, 1e-3, 1e-2, 1e-1, 1.];

/// Counts of the violation magnitudes in logarithmic bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViolationHistogram {
    counts: [usize; VIOLATION_EDGES.len() + 1],
}

impl ViolationHistogram {
    /// Adds one violation.
    pub fn add(&mut self, violation: f64) {
        let bin = VIOLATION_EDGES.partition_point(|edge| *edge <= violation);
        self.counts[bin] += 1;
    }

    /// Counts per bin.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Upper edges of the bins.
    pub fn edges() -> &'static [f64] {
        &VIOLATION_EDGES
    }

    /// Binwise sum.
    pub fn merge(mut self, other: &ViolationHistogram) -> Self {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
        self
    }
}

/// Aggregate of run results, merged associatively and commutatively.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RobustnessSummary {
    /// Number of runs.
    pub runs: usize,
    /// Runs that passed.
    pub passed: usize,
    /// Runs that exceeded a path bound.
    pub bound_violations: usize,
    /// Runs per status in the order done, timed out, aborted and model fault.
    pub status_counts: [usize; 4],
    /// Faulted steps over all runs.
    pub faulted_steps: usize,
    /// Sorted batch durations of the runs that reached the target.
    pub completion_times: Vec<f64>,
    /// Violation magnitudes.
    pub histogram: ViolationHistogram,
}

impl RobustnessSummary {
    /// Summary of a single run.
    pub fn from_run(result: &RunResult) -> Self {
        let mut summary = Self {
            runs: 1,
            passed: usize::from(result.passed),
            bound_violations: usize::from(result.bound_violated),
            faulted_steps: result.faulted_steps,
            completion_times: result.completion_time.into_iter().collect(),
            ..Default::default()
        };
        summary.status_counts[status_index(result.status)] = 1;
        summary.histogram.add(result.violation);
        summary
    }

    /// Combines two summaries.
    pub fn merge(self, other: RobustnessSummary) -> RobustnessSummary {
        let mut status_counts = self.status_counts;
        for (a, b) in status_counts.iter_mut().zip(other.status_counts) {
            *a += b;
        }
        let mut completion_times = Vec::with_capacity(
            self.completion_times.len() + other.completion_times.len(),
        );
        let (mut i, mut j) = (0, 0);
        let (a, b) = (&self.completion_times, &other.completion_times);
        while i < a.len() && j < b.len() {
            if a[i].total_cmp(&b[j]).is_le() {
                completion_times.push(a[i]);
                i += 1;
            } else {
                completion_times.push(b[j]);
                j += 1;
            }
        }
        completion_times.extend_from_slice(&a[i..]);
        completion_times.extend_from_slice(&b[j..]);
        RobustnessSummary {
            runs: self.runs + other.runs,
            passed: self.passed + other.passed,
            bound_violations: self.bound_violations + other.bound_violations,
            status_counts,
            faulted_steps: self.faulted_steps + other.faulted_steps,
            completion_times,
            histogram: self.histogram.merge(&other.histogram),
        }
    }

    /// Fraction of passed runs, zero without runs.
    pub fn pass_rate(&self) -> f64 {
        if self.runs == 0 {
            0.
        } else {
            self.passed as f64 / self.runs as f64
        }
    }

    /// Fraction of runs that exceeded a path bound, zero without runs.
    pub fn violation_fraction(&self) -> f64 {
        if self.runs == 0 {
            0.
        } else {
            self.bound_violations as f64 / self.runs as f64
        }
    }

    /// Runs that ended with the given status.
    pub fn count(&self, status: RunStatus) -> usize {
        self.status_counts[status_index(status)]
    }

    /// Mean batch duration of the runs that reached the target.
    pub fn mean_completion_time(&self) -> Option<f64> {
        (!self.completion_times.is_empty()).then(|| {
            self.completion_times.iter().sum::<f64>() / self.completion_times.len() as f64
        })
    }
}

fn status_index(status: RunStatus) -> usize {
    match status {
        RunStatus::Done => 0,
        RunStatus::TimedOut => 1,
        RunStatus::Aborted => 2,
        RunStatus::ModelFault => 3,
    }
}

impl Display for RobustnessSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = 40;
        writeln!(f, "{:-^1$}", " Robustness ", width)?;
        writeln!(f, "runs: {}", self.runs)?;
        writeln!(f, "pass rate: {:.3}", self.pass_rate())?;
        writeln!(
            f,
            "bound violations: {} ({:.3})",
            self.bound_violations,
            self.violation_fraction()
        )?;
        for status in [
            RunStatus::Done,
            RunStatus::TimedOut,
            RunStatus::Aborted,
            RunStatus::ModelFault,
        ] {
            writeln!(f, "{status}: {}", self.count(status))?;
        }
        writeln!(f, "faulted steps: {}", self.faulted_steps)?;
        match self.mean_completion_time() {
            Some(mean) => writeln!(f, "mean completion time: {mean:.3} h")?,
            None => writeln!(f, "mean completion time: -")?,
        }
        let mut lower = 0.;
        for (count, upper) in self
            .histogram
            .counts()
            .iter()
            .zip(VIOLATION_EDGES.iter().copied().chain([f64::INFINITY]))
        {
            writeln!(f, "violation [{lower:.0e}, {upper:.0e}): {count}")?;
            lower = upper;
        }
        write!(f, "{:-^1$}", "", width)
    }
}

/// Per run results in draw order and their aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloReport {
    /// Results of all runs.
    pub runs: Vec<RunResult>,
    /// Aggregate of all runs.
    pub summary: RobustnessSummary,
}

/// Runs a closed loop against seeded random plants.
#[derive(Debug, Clone)]
pub struct MonteCarloEvaluator {
    distribution: ScenarioDistribution,
    samples: usize,
    seed: u64,
    tariff: Arc<TariffModel>,
}

impl MonteCarloEvaluator {
    /// Initialize with the number of samples and the seed of the draws.
    pub fn new(distribution: ScenarioDistribution, samples: usize, seed: u64) -> Self {
        Self {
            distribution,
            samples,
            seed,
            tariff: Arc::new(TariffModel::default()),
        }
    }

    /// Set the tariff of the energy cost.
    pub fn with_tariff(mut self, tariff: Arc<TariffModel>) -> Self {
        self.tariff = tariff;
        self
    }

    /// Draws the scenarios sequentially from the seeded generator.
    pub fn draw(&self) -> Result<Vec<Scenario>> {
        self.distribution.validate()?;
        if self.samples == 0 {
            return Err(Error::Sampling {
                parameter: "samples",
                reason: "at least one sample required".to_string(),
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok((0..self.samples)
            .map(|_| self.distribution.sample(&mut rng))
            .collect())
    }

    /// Runs the simulator against every drawn plant in parallel.
    pub fn evaluate(&self, simulator: &ClosedLoopSimulator) -> Result<MonteCarloReport> {
        let scenarios = self.draw()?;
        let params = simulator.params();
        let generator = ScenarioGenerator::new(params.clone());
        log::info!(
            "evaluating {} on {} plants with seed {}",
            simulator.controller().name(),
            self.samples,
            self.seed
        );
        let runs = scenarios
            .par_iter()
            .map(|scenario| {
                let plant = generator.plant(scenario)?;
                let outcome = simulator.run(&plant)?;
                Ok(RunResult::new(*scenario, &outcome, params, &self.tariff))
            })
            .collect::<Result<Vec<RunResult>>>()?;
        let summary = runs
            .par_iter()
            .map(RobustnessSummary::from_run)
            .reduce(RobustnessSummary::default, RobustnessSummary::merge);
        log::info!(
            "{} passed {} of {} runs",
            simulator.controller().name(),
            summary.passed,
            summary.runs
        );
        Ok(MonteCarloReport { runs, summary })
    }
}
