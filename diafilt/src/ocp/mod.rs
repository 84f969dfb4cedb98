mod constraints;
mod dynamics;
mod objective;

pub use constraints::{ConstraintSet, StageBounds};

use crate::{
    Error, Interval, NLPBound, NLPSolution, NLPSolve, NonlinearProgram, ParameterSet,
    ProcessModel, Result, STATE_DIM, SmoothSum, State, TariffModel, Trajectory, Tube,
    rk4_step,
};
use dynamics::DynamicsConstraint;
use nalgebra::{DVector, Vector3};
use objective::{
    EnergyRate, InputPenalty, OcpObjective, STAGE_DIM, StepDuration, Tracking, VolumeEndpoint,
};
use std::{fmt::Display, sync::Arc};

/// Minimal batch duration with a free step size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOptimal {
    /// Admissible step sizes.
    pub step_bounds: Interval,
    /// Weight of the regularization of the input towards pure diafiltration.
    pub input_regularization: f64,
}

impl TimeOptimal {
    /// Step sizes between a tenth and three times the sampling period.
    pub fn new(params: &ParameterSet) -> Self {
        Self {
            step_bounds: Interval {
                lower: params.sampling_period / 10.,
                upper: 3. * params.sampling_period,
            },
            input_regularization: 1e-4,
        }
    }

    /// Set the admissible step sizes.
    pub fn with_step_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.step_bounds = Interval { lower, upper };
        self
    }

    fn validate(&self) -> Result<()> {
        self.step_bounds
            .validate_interior("step bounds", "TimeOptimal")?;
        if !(self.step_bounds.lower > 0. && self.step_bounds.upper.is_finite()) {
            return Err(config(format!(
                "step bounds must be finite and positive but are [{}, {}]",
                self.step_bounds.lower, self.step_bounds.upper
            )));
        }
        non_negative("input regularization", self.input_regularization)
    }
}

/// Quadratic tracking of references placed inside the target set.
///
/// Deviations are normalized by the distance of the reference to the initial concentration.
/// The target set is not enforced as constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecTracking {
    /// Weight of the product deviation.
    pub product_weight: f64,
    /// Weight of the contaminant deviation.
    pub contaminant_weight: f64,
    /// Weight of the last stage relative to the others.
    pub terminal_weight: f64,
    /// Weight of the final volume.
    pub volume_weight: f64,
    /// Relative distance of the product reference above the target.
    pub product_margin: f64,
    /// Relative distance of the contaminant reference below the target.
    pub contaminant_margin: f64,
    /// Weight of the regularization of the input towards pure diafiltration.
    pub input_regularization: f64,
}

impl Default for SpecTracking {
    fn default() -> Self {
        Self {
            product_weight: 1.,
            contaminant_weight: 1.,
            terminal_weight: 10.,
            volume_weight: 0.,
            product_margin: 0.05,
            contaminant_margin: 0.1,
            input_regularization: 1e-3,
        }
    }
}

impl SpecTracking {
    /// Initialize with default weights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the weights of the product and contaminant deviations.
    pub fn with_weights(mut self, product: f64, contaminant: f64) -> Self {
        self.product_weight = product;
        self.contaminant_weight = contaminant;
        self
    }

    /// Set the weight of the last stage.
    pub fn with_terminal_weight(mut self, terminal_weight: f64) -> Self {
        self.terminal_weight = terminal_weight;
        self
    }

    /// Set the weight of the final volume.
    pub fn with_volume_weight(mut self, volume_weight: f64) -> Self {
        self.volume_weight = volume_weight;
        self
    }

    /// Set the relative margins of the references inside the target set.
    pub fn with_margins(mut self, product: f64, contaminant: f64) -> Self {
        self.product_margin = product;
        self.contaminant_margin = contaminant;
        self
    }

    fn validate(&self) -> Result<()> {
        non_negative("product weight", self.product_weight)?;
        non_negative("contaminant weight", self.contaminant_weight)?;
        non_negative("terminal weight", self.terminal_weight)?;
        non_negative("volume weight", self.volume_weight)?;
        non_negative("input regularization", self.input_regularization)?;
        for (name, margin) in [
            ("product margin", self.product_margin),
            ("contaminant margin", self.contaminant_margin),
        ] {
            if !(0. ..1.).contains(&margin) {
                return Err(config(format!("{name} must lie in [0, 1) but is {margin}")));
            }
        }
        Ok(())
    }
}

/// Tariff weighted diafiltration effort with the target set as hard terminal constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Economic {
    /// Electricity price over the day.
    pub tariff: Arc<TariffModel>,
    /// Weight of the quadratic input penalty.
    pub input_regularization: f64,
}

impl Economic {
    /// Initialize with the given tariff.
    pub fn new(tariff: Arc<TariffModel>) -> Self {
        Self {
            tariff,
            input_regularization: 1e-3,
        }
    }
}

/// Nominal problem with constraints tightened by the margins of an ancillary feedback tube.
///
/// Built by [crate::RobustTubeAugmenter::augment].
#[derive(Debug, Clone, PartialEq)]
pub struct RobustTube {
    /// Problem whose objective is kept.
    pub nominal: OcpSpec,
    /// Ancillary feedback and its margins.
    pub tube: Tube,
    /// Tightened constraints.
    pub constraints: ConstraintSet,
}

/// Optimal control problem formulations.
#[derive(Debug, Clone, PartialEq)]
pub enum OcpSpec {
    /// See [TimeOptimal].
    TimeOptimal(TimeOptimal),
    /// See [SpecTracking].
    SpecTracking(SpecTracking),
    /// See [Economic].
    Economic(Economic),
    /// See [RobustTube].
    RobustTube(Box<RobustTube>),
}

impl OcpSpec {
    /// Short name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            OcpSpec::TimeOptimal(_) => "time optimal",
            OcpSpec::SpecTracking(_) => "spec tracking",
            OcpSpec::Economic(_) => "economic",
            OcpSpec::RobustTube(_) => "robust tube",
        }
    }

    /// Problem providing the objective, self unless robust.
    pub fn nominal(&self) -> &OcpSpec {
        match self {
            OcpSpec::RobustTube(robust) => &robust.nominal,
            spec => spec,
        }
    }

    /// Ancillary feedback of a robust problem.
    pub fn tube(&self) -> Option<&Tube> {
        match self {
            OcpSpec::RobustTube(robust) => Some(&robust.tube),
            _ => None,
        }
    }

    /// Returns true if the last stage is constrained to the target set.
    pub fn hard_terminal(&self) -> bool {
        matches!(
            self.nominal(),
            OcpSpec::TimeOptimal(_) | OcpSpec::Economic(_)
        )
    }

    fn validate(&self) -> Result<()> {
        match self {
            OcpSpec::TimeOptimal(spec) => spec.validate(),
            OcpSpec::SpecTracking(spec) => spec.validate(),
            OcpSpec::Economic(spec) => non_negative("input regularization", spec.input_regularization),
            OcpSpec::RobustTube(robust) => {
                if matches!(robust.nominal, OcpSpec::RobustTube(_)) {
                    return Err(config("robust tube problems cannot be nested".to_string()));
                }
                robust.nominal.validate()?;
                robust.constraints.validate()
            }
        }
    }
}

impl Display for OcpSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Position of the scaled variables in the decision vector
///
/// ```text
/// [x_0, ..., x_{N-1}, u_0, ..., u_{N-2}, (h)]
/// ```
///
/// with N stages and the step size h only if it is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcpLayout {
    /// Number of state stages N.
    pub stages: usize,
    /// Step size is a decision variable.
    pub free_step: bool,
}

impl OcpLayout {
    /// Index of state component i of stage k.
    pub fn state(&self, k: usize, i: usize) -> usize {
        STATE_DIM * k + i
    }

    /// Index of the input of stage k < N - 1.
    pub fn input(&self, k: usize) -> usize {
        STATE_DIM * self.stages + k
    }

    /// Index of the free step size.
    pub fn step(&self) -> Option<usize> {
        self.free_step
            .then_some(STATE_DIM * self.stages + self.stages - 1)
    }

    /// Number of decision variables.
    pub fn len(&self) -> usize {
        (STATE_DIM + 1) * self.stages - 1 + usize::from(self.free_step)
    }

    /// Returns true if the layout holds no variables.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of the arguments of a stage cost, [volume, product, contaminant, input, step].
    pub(crate) fn stage_indices(&self, k: usize) -> [Option<usize>; STAGE_DIM] {
        [
            Some(self.state(k, 0)),
            Some(self.state(k, 1)),
            Some(self.state(k, 2)),
            (k + 1 < self.stages).then(|| self.input(k)),
            self.step(),
        ]
    }
}

/// Open loop solution of an optimal control problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Predicted states and planned inputs.
    pub trajectory: Trajectory,
    /// Step size between the stages.
    pub step: f64,
    /// Objective value.
    pub objective: f64,
    /// Solver iterations.
    pub iterations: usize,
}

impl Plan {
    /// Input of the first stage.
    pub fn first_input(&self) -> Option<f64> {
        self.trajectory.inputs.first().copied()
    }

    /// Predicted duration from the first to the last stage.
    pub fn duration(&self) -> f64 {
        self.step * self.trajectory.inputs.len() as f64
    }
}

/// Assembles the nonlinear program of an [OcpSpec] for a measured state.
///
/// States are scaled by the initial volume, the target product and the initial contaminant
/// concentration. Every state and input constraint is a simple variable bound, the dynamics
/// enter as equality constraints of the RK4 defects.
#[derive(Debug, Clone)]
pub struct OcpBuilder {
    params: Arc<ParameterSet>,
    model: ProcessModel,
}

impl OcpBuilder {
    /// Builds problems on the nominal model of the parameters.
    pub fn new(params: Arc<ParameterSet>) -> Result<Self> {
        let model = ProcessModel::new(params.clone())?;
        Ok(Self { params, model })
    }

    /// Builds problems on the given prediction model.
    pub fn from_model(model: ProcessModel) -> Self {
        Self {
            params: model.params().clone(),
            model,
        }
    }

    /// Parameters of the prediction model.
    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    /// Prediction model of the problems.
    pub fn model(&self) -> &ProcessModel {
        &self.model
    }

    /// Reference magnitudes of the states.
    pub fn scale(&self) -> Vector3<f64> {
        Vector3::new(
            self.params.initial_volume,
            self.params.target_product,
            self.params.initial_contaminant,
        )
    }

    /// Constraints of the problem, tightened for robust problems.
    pub fn constraints(&self, spec: &OcpSpec) -> ConstraintSet {
        match spec {
            OcpSpec::RobustTube(robust) => robust.constraints.clone(),
            _ => ConstraintSet::nominal(&self.params),
        }
    }

    /// Assembles the problem over the given number of stages starting in the measured state
    /// at time t0.
    pub fn build(&self, spec: &OcpSpec, measured: &State, t0: f64, stages: usize) -> Result<Ocp> {
        if stages < 2 {
            return Err(config(format!("at least 2 stages required but got {stages}")));
        }
        spec.validate()?;
        let constraints = self.constraints(spec);
        constraints.validate()?;
        if !(measured.volume > 0. && measured.product > 0.) {
            return Err(Error::ModelDomain {
                volume: measured.volume,
                product: measured.product,
            });
        }
        let (free_step, step) = match spec.nominal() {
            OcpSpec::TimeOptimal(to) => (
                true,
                to.step_bounds.clamp(self.params.sampling_period),
            ),
            _ => (false, self.params.sampling_period),
        };
        let layout = OcpLayout { stages, free_step };
        let scale = self.scale();
        let (lower, upper) = self.bounds(spec, layout, &constraints, &scale);
        let objective = OcpObjective::new(
            layout,
            &scale,
            step,
            self.stage_costs(spec.nominal(), &constraints, layout, t0, step)?,
        );
        let dynamics = DynamicsConstraint::new(
            layout,
            scale,
            self.model.clone(),
            measured.to_vector(),
            t0,
            step,
        );
        Ok(Ocp {
            layout,
            scale,
            model: self.model.clone(),
            measured: *measured,
            t0,
            step,
            input: constraints.input,
            target: constraints.target.product.lower,
            lower,
            upper,
            objective: Arc::new(objective),
            dynamics: Arc::new(dynamics),
        })
    }

    /// Builds and solves the problem once from the initial guess.
    pub fn solve(
        &self,
        spec: &OcpSpec,
        measured: &State,
        t0: f64,
        stages: usize,
        solver: &dyn NLPSolve,
    ) -> Result<Plan> {
        self.build(spec, measured, t0, stages)?.solve(solver, None)
    }

    fn bounds(
        &self,
        spec: &OcpSpec,
        layout: OcpLayout,
        constraints: &ConstraintSet,
        scale: &Vector3<f64>,
    ) -> (DVector<f64>, DVector<f64>) {
        let n = layout.len();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);
        let terminal = if spec.hard_terminal() {
            constraints.terminal()
        } else {
            constraints.path
        };
        // stage 0 is fixed by the measurement
        for k in 1..layout.stages {
            let bounds = if k + 1 == layout.stages {
                terminal
            } else {
                constraints.path
            };
            for (i, interval) in bounds.components().iter().enumerate() {
                let scaled = interval.scale(1. / scale[i]);
                lower[layout.state(k, i)] = scaled.lower;
                upper[layout.state(k, i)] = scaled.upper;
            }
        }
        for k in 0..layout.stages - 1 {
            lower[layout.input(k)] = constraints.input.lower;
            upper[layout.input(k)] = constraints.input.upper;
        }
        if let (Some(i), OcpSpec::TimeOptimal(to)) = (layout.step(), spec.nominal()) {
            lower[i] = to.step_bounds.lower;
            upper[i] = to.step_bounds.upper;
        }
        (lower, upper)
    }

    fn stage_costs(
        &self,
        spec: &OcpSpec,
        constraints: &ConstraintSet,
        layout: OcpLayout,
        t0: f64,
        step: f64,
    ) -> Result<Vec<SmoothSum<STAGE_DIM>>> {
        let n = layout.stages;
        let mut costs = vec![SmoothSum::new(); n];
        match spec {
            OcpSpec::TimeOptimal(to) => {
                for cost in costs.iter_mut().take(n - 1) {
                    cost.push(Arc::new(StepDuration));
                    cost.push(Arc::new(InputPenalty {
                        weight: to.input_regularization,
                        center: 1.,
                    }));
                }
            }
            OcpSpec::SpecTracking(tracking) => {
                let product_reference =
                    constraints.target.product.lower * (1. + tracking.product_margin);
                let contaminant_reference =
                    constraints.target.contaminant.upper * (1. - tracking.contaminant_margin);
                let product_range = product_reference - self.params.initial_product;
                let contaminant_range = self.params.initial_contaminant - contaminant_reference;
                if !(product_range > 0. && contaminant_range > 0.) {
                    return Err(config(format!(
                        "references ({product_reference}, {contaminant_reference}) must lie \
                         beyond the initial concentrations"
                    )));
                }
                for (k, cost) in costs.iter_mut().enumerate() {
                    if k + 1 < n {
                        cost.push(Arc::new(InputPenalty {
                            weight: tracking.input_regularization,
                            center: 1.,
                        }));
                    }
                    if k == 0 {
                        continue;
                    }
                    cost.push(Arc::new(Tracking {
                        weight: if k + 1 == n {
                            tracking.terminal_weight
                        } else {
                            1.
                        },
                        product_weight: tracking.product_weight,
                        product_reference,
                        product_range,
                        contaminant_weight: tracking.contaminant_weight,
                        contaminant_reference,
                        contaminant_range,
                    }));
                }
                if tracking.volume_weight > 0. {
                    costs[n - 1].push(Arc::new(VolumeEndpoint {
                        weight: tracking.volume_weight,
                        scale: self.params.initial_volume,
                    }));
                }
            }
            OcpSpec::Economic(economic) => {
                for (k, cost) in costs.iter_mut().take(n - 1).enumerate() {
                    cost.push(Arc::new(EnergyRate {
                        rate: economic.tariff.normalized_price(t0 + k as f64 * step),
                    }));
                    cost.push(Arc::new(InputPenalty {
                        weight: economic.input_regularization,
                        center: 0.,
                    }));
                }
            }
            OcpSpec::RobustTube(_) => {
                return Err(config("robust tube problems cannot be nested".to_string()));
            }
        }
        Ok(costs)
    }
}

/// Assembled optimal control problem for one measured state.
#[derive(Clone)]
pub struct Ocp {
    layout: OcpLayout,
    scale: Vector3<f64>,
    model: ProcessModel,
    measured: State,
    t0: f64,
    step: f64,
    input: Interval,
    target: f64,
    lower: DVector<f64>,
    upper: DVector<f64>,
    objective: Arc<OcpObjective>,
    dynamics: Arc<DynamicsConstraint>,
}

impl Ocp {
    /// Position of the variables in the decision vector.
    pub fn layout(&self) -> OcpLayout {
        self.layout
    }

    /// Measured state fixing the first stage.
    pub fn measured(&self) -> &State {
        &self.measured
    }

    /// Scaled lower and upper variable bounds.
    pub fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.lower, &self.upper)
    }

    /// Nonlinear program started from the scaled decision vector x0.
    pub fn program(&self, x0: DVector<f64>) -> NonlinearProgram {
        NonlinearProgram {
            bound: NLPBound::new(self.lower.clone(), self.upper.clone()),
            objective: self.objective.clone(),
            equality: Some(self.dynamics.clone()),
            inequality: None,
            x0,
        }
    }

    /// Dynamically consistent guess, concentrating with the lowest input until the product
    /// target is reached and diafiltering with the highest input afterwards.
    pub fn initial_guess(&self) -> DVector<f64> {
        let mut states = vec![self.measured.to_vector()];
        let mut inputs = vec![];
        for k in 0..self.layout.stages - 1 {
            let x = states[k];
            let u = if x[1] < self.target {
                self.input.lower
            } else {
                self.input.upper
            };
            let t = self.t0 + k as f64 * self.step;
            match rk4_step(&self.model, t, &x, u, self.step) {
                Ok(next) => {
                    states.push(next);
                    inputs.push(u);
                }
                Err(err) => {
                    log::debug!("initial guess rollout stopped at stage {k}: {err}");
                    break;
                }
            }
        }
        // hold the last reachable state under pure diafiltration
        let last = states[states.len() - 1];
        states.resize(self.layout.stages, last);
        inputs.resize(self.layout.stages - 1, self.input.upper);
        self.encode(&states, &inputs, self.step)
    }

    /// Warm start from the previous plan shifted by one stage, the first stage replaced by the
    /// measurement.
    pub fn shifted_guess(&self, previous: &Plan) -> DVector<f64> {
        let previous_states = &previous.trajectory.states;
        let previous_inputs = &previous.trajectory.inputs;
        if previous_states.len() < 2 || previous_inputs.is_empty() {
            return self.initial_guess();
        }
        let mut states = vec![self.measured.to_vector()];
        let mut inputs = vec![];
        for k in 1..self.layout.stages {
            let i = (k + 1).min(previous_states.len() - 1);
            states.push(previous_states[i].to_vector());
        }
        for k in 0..self.layout.stages - 1 {
            let i = (k + 1).min(previous_inputs.len() - 1);
            inputs.push(self.input.clamp(previous_inputs[i]));
        }
        self.encode(&states, &inputs, previous.step)
    }

    fn encode(&self, states: &[Vector3<f64>], inputs: &[f64], step: f64) -> DVector<f64> {
        let mut x = DVector::zeros(self.layout.len());
        for (k, state) in states.iter().enumerate() {
            for i in 0..STATE_DIM {
                x[self.layout.state(k, i)] = state[i] / self.scale[i];
            }
        }
        for (k, u) in inputs.iter().enumerate() {
            x[self.layout.input(k)] = *u;
        }
        if let Some(i) = self.layout.step() {
            x[i] = step;
        }
        x
    }

    /// Physical plan of a solution.
    pub fn decode(&self, solution: &NLPSolution) -> Plan {
        let x = &solution.x;
        let step = self.layout.step().map_or(self.step, |i| x[i]);
        let state = |k: usize| {
            State::new(
                x[self.layout.state(k, 0)] * self.scale[0],
                x[self.layout.state(k, 1)] * self.scale[1],
                x[self.layout.state(k, 2)] * self.scale[2],
            )
        };
        let mut trajectory = Trajectory::new(self.t0, state(0));
        for k in 1..self.layout.stages {
            trajectory.push(
                x[self.layout.input(k - 1)],
                self.t0 + k as f64 * step,
                state(k),
            );
        }
        Plan {
            trajectory,
            step,
            objective: solution.objective,
            iterations: solution.iterations,
        }
    }

    /// Solves the problem warm started from the previous plan if given.
    pub fn solve(&self, solver: &dyn NLPSolve, previous: Option<&Plan>) -> Result<Plan> {
        let x0 = match previous {
            Some(plan) => self.shifted_guess(plan),
            None => self.initial_guess(),
        };
        let solution = solver.solve(&self.program(x0))?;
        Ok(self.decode(&solution))
    }
}

fn config(reason: String) -> Error {
    Error::Configuration {
        component: "OcpBuilder",
        reason,
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0. {
        Ok(())
    } else {
        Err(config(format!("{name} must be finite and >= 0 but is {value}")))
    }
}
