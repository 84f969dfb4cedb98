use crate::{
    Discretizer, Error, NLPSolve, NLPSolver, OcpBuilder, OcpSpec, ParameterSet, Plan, Result,
    SolverFailure, State, Trajectory, rk4_step,
};
use std::{fmt::Display, sync::Arc};

/// Policy choosing the input of each sampling period.
#[derive(Debug, Clone, PartialEq)]
pub enum Controller {
    /// Receding horizon control with the given problem.
    Mpc(OcpSpec),
    /// Constant input.
    OpenLoop(f64),
    /// Concentration with the lower input bound until the product reaches `switch_product`,
    /// diafiltration with `high_input` afterwards.
    Threshold {
        /// Product concentration of the switch.
        switch_product: f64,
        /// Input after the switch.
        high_input: f64,
    },
}

impl Controller {
    /// Rule based policy switching to an input of 0.86 at a product concentration of 55.
    pub fn threshold() -> Self {
        Controller::Threshold {
            switch_product: 55.,
            high_input: 0.86,
        }
    }

    /// Short name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            Controller::Mpc(spec) => spec.name(),
            Controller::OpenLoop(_) => "open loop",
            Controller::Threshold { .. } => "threshold",
        }
    }
}

/// Reaction on a failed solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Applies the previous input, or the fallback input if none was applied yet.
    ReuseLastInput,
    /// Ends the run.
    Abort,
}

/// Number of stages of the problem solved at each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    /// Fixed number of stages.
    Receding(usize),
    /// Stages up to a fixed final step of the batch.
    Shrinking {
        /// Step at which the horizon ends.
        deadline_steps: usize,
    },
}

impl Horizon {
    /// Stages of the problem at the given step, never less than two.
    pub fn stages(&self, step: usize) -> usize {
        match *self {
            Horizon::Receding(stages) => stages,
            Horizon::Shrinking { deadline_steps } => deadline_steps.saturating_sub(step).max(1) + 1,
        }
    }
}

/// Step load of contaminant added to the plant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadDisturbance {
    /// Step after which the load is added.
    pub at_step: usize,
    /// Added contaminant mass relative to the initial contaminant mass.
    pub fraction: f64,
}

impl LoadDisturbance {
    /// Adds 20 % of the initial contaminant mass after two hours.
    pub fn new(params: &ParameterSet) -> Self {
        Self {
            at_step: (2. / params.sampling_period).round() as usize,
            fraction: 0.2,
        }
    }

    fn apply(&self, params: &ParameterSet, state: &mut State) {
        let load = self.fraction * params.initial_contaminant * params.initial_volume;
        state.contaminant += load / state.volume;
    }
}

/// Configuration of a closed loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedLoopConfig {
    /// Maximal number of sampling periods.
    pub max_steps: usize,
    /// Reaction on failed solves.
    pub fault_policy: FaultPolicy,
    /// Input applied on a failed first solve.
    pub fallback_input: f64,
    /// Relative tolerance of the terminal target check.
    pub target_tolerance: f64,
    /// Horizon of the optimal control problems.
    pub horizon: Horizon,
    /// Optional contaminant load of the plant.
    pub disturbance: Option<LoadDisturbance>,
}

impl ClosedLoopConfig {
    /// Receding horizon and step budget of the parameters, reusing the last input on faults.
    pub fn new(params: &ParameterSet) -> Self {
        Self {
            max_steps: params.max_steps,
            fault_policy: FaultPolicy::ReuseLastInput,
            fallback_input: params.input_bounds.upper,
            target_tolerance: 1e-3,
            horizon: Horizon::Receding(params.horizon),
            disturbance: None,
        }
    }

    /// Set the reaction on failed solves.
    pub fn with_fault_policy(mut self, fault_policy: FaultPolicy) -> Self {
        self.fault_policy = fault_policy;
        self
    }

    /// Set the fallback input.
    pub fn with_fallback_input(mut self, fallback_input: f64) -> Self {
        self.fallback_input = fallback_input;
        self
    }

    /// Set the horizon.
    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizon = horizon;
        self
    }

    /// Set the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the contaminant load.
    pub fn with_disturbance(mut self, disturbance: LoadDisturbance) -> Self {
        self.disturbance = Some(disturbance);
        self
    }

    fn validate(&self, params: &ParameterSet) -> Result<()> {
        let reason = if self.max_steps == 0 {
            Some("max_steps must be > 0".to_string())
        } else if !params.input_bounds.contains(self.fallback_input) {
            Some(format!(
                "fallback input {} violates the input bounds",
                self.fallback_input
            ))
        } else if !(self.target_tolerance.is_finite() && self.target_tolerance >= 0.) {
            Some(format!(
                "target tolerance must be >= 0 but is {}",
                self.target_tolerance
            ))
        } else if matches!(self.horizon, Horizon::Receding(stages) if stages < 2) {
            Some("receding horizon must contain at least 2 stages".to_string())
        } else if matches!(self.horizon, Horizon::Shrinking { deadline_steps: 0 }) {
            Some("deadline of a shrinking horizon must be > 0".to_string())
        } else if self
            .disturbance
            .is_some_and(|d| !(d.fraction.is_finite() && d.fraction >= 0.))
        {
            Some("load fraction must be finite and >= 0".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::Configuration {
                component: "ClosedLoopConfig",
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Terminal state of a closed loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Target set reached.
    Done,
    /// Step budget exhausted.
    TimedOut,
    /// Ended by a failed solve.
    Aborted,
    /// Plant left its valid domain.
    ModelFault,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Done => "done",
            RunStatus::TimedOut => "timed out",
            RunStatus::Aborted => "aborted",
            RunStatus::ModelFault => "model fault",
        };
        write!(f, "{name}")
    }
}

/// Result of a closed loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Terminal state of the run.
    pub status: RunStatus,
    /// Plant states and applied inputs.
    pub trajectory: Trajectory,
    /// Steps whose solve failed.
    pub faulted_steps: usize,
    /// Solver iterations summed over all solves.
    pub solver_iterations: usize,
}

/// Tube center and warm start carried between the steps of a receding horizon controller.
#[derive(Default)]
struct MpcMemory {
    previous: Option<Plan>,
    center: Option<State>,
}

impl MpcMemory {
    fn reset(&mut self) {
        self.previous = None;
        self.center = None;
    }
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Simulates a controller against a plant over one batch.
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Solve
///     Solve --> Apply: plan or fault handled
///     Solve --> Aborted: fault with abort policy
///     Apply --> Check
///     Apply --> ModelFault: plant domain error
///     Check --> Done: target reached
///     Check --> TimedOut: step budget exhausted
///     Check --> Solve
/// ```
///
/// The controller predicts with the nominal model of the parameters, while the plant passed
/// to [ClosedLoopSimulator::run] may differ from it. Robust problems apply the ancillary
/// feedback of their tube around the nominal state of the previous plan.
#[derive(Clone)]
pub struct ClosedLoopSimulator {
    params: Arc<ParameterSet>,
    controller: Controller,
    config: ClosedLoopConfig,
    builder: OcpBuilder,
    solver: Arc<dyn NLPSolve + Send + Sync>,
}

impl ClosedLoopSimulator {
    /// Initialize with the default configuration and solver.
    pub fn new(params: Arc<ParameterSet>, controller: Controller) -> Result<Self> {
        params.validate()?;
        let config = ClosedLoopConfig::new(&params);
        let simulator = Self {
            builder: OcpBuilder::new(params.clone())?,
            params,
            controller,
            config,
            solver: Arc::new(NLPSolver::default()),
        };
        simulator.validate()?;
        Ok(simulator)
    }

    /// Set the run configuration.
    pub fn with_config(mut self, config: ClosedLoopConfig) -> Result<Self> {
        self.config = config;
        self.validate()?;
        Ok(self)
    }

    /// Set the backend solving the optimal control problems.
    pub fn with_solver(mut self, solver: Arc<dyn NLPSolve + Send + Sync>) -> Self {
        self.solver = solver;
        self
    }

    /// Parameters of the controller.
    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    /// Controller of the runs.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run configuration.
    pub fn config(&self) -> &ClosedLoopConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        self.config.validate(&self.params)?;
        let bounds = self.params.input_bounds;
        match &self.controller {
            Controller::Mpc(spec) => {
                let stages = self.config.horizon.stages(0);
                self.builder
                    .build(spec, &State::initial(&self.params), 0., stages)
                    .map(|_| ())
            }
            Controller::OpenLoop(u) if !bounds.contains(*u) => Err(Error::Configuration {
                component: "Controller",
                reason: format!("open loop input {u} violates the input bounds"),
            }),
            Controller::Threshold {
                switch_product,
                high_input,
            } if !(*switch_product > 0. && bounds.contains(*high_input)) => {
                Err(Error::Configuration {
                    component: "Controller",
                    reason: format!(
                        "threshold policy needs a positive switch and an admissible input but \
                         has {switch_product} and {high_input}"
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Simulates one batch of the plant from the initial state of the parameters.
    pub fn run(&self, plant: &Discretizer) -> Result<RunOutcome> {
        let h = plant.step_size();
        let mut x = State::initial(&self.params);
        let mut trajectory = Trajectory::new(0., x);
        let mut memory = MpcMemory::default();
        let mut last_input: Option<f64> = None;
        let mut faulted_steps = 0;
        let mut solver_iterations = 0;
        let mut step = 0;
        log::info!(
            "starting {} batch with plant structure {:?}",
            self.controller.name(),
            plant.model().structure()
        );
        let status = loop {
            if x.meets_target(&self.params, self.config.target_tolerance) {
                break RunStatus::Done;
            }
            if step >= self.config.max_steps {
                break RunStatus::TimedOut;
            }
            let t = step as f64 * h;
            let input = match &self.controller {
                Controller::OpenLoop(u) => *u,
                Controller::Threshold {
                    switch_product,
                    high_input,
                } => {
                    if x.product < *switch_product {
                        self.params.input_bounds.lower
                    } else {
                        *high_input
                    }
                }
                Controller::Mpc(spec) => match self.mpc_input(spec, step, t, &x, &mut memory) {
                    Ok((u, iterations)) => {
                        solver_iterations += iterations;
                        u
                    }
                    Err(Error::Solver(failure)) => {
                        faulted_steps += 1;
                        memory.reset();
                        log::warn!("solve at step {step} failed: {failure}");
                        match self.config.fault_policy {
                            FaultPolicy::Abort => break RunStatus::Aborted,
                            FaultPolicy::ReuseLastInput => {
                                last_input.unwrap_or(self.config.fallback_input)
                            }
                        }
                    }
                    Err(Error::ModelDomain { volume, product }) => {
                        log::warn!(
                            "measured state at step {step} left the model domain with volume \
                             {volume} and product {product}"
                        );
                        break RunStatus::ModelFault;
                    }
                    Err(e) => return Err(e),
                },
            };
            let input = self.params.input_bounds.clamp(input);
            let mut next = match plant.advance(t, &x, input) {
                Ok(next) => next,
                Err(Error::ModelDomain { volume, product }) => {
                    log::warn!(
                        "plant left its domain at step {step} with volume {volume} and product \
                         {product}"
                    );
                    break RunStatus::ModelFault;
                }
                Err(e) => return Err(e),
            };
            if let Some(disturbance) = self.config.disturbance {
                if disturbance.at_step == step {
                    disturbance.apply(&self.params, &mut next);
                }
            }
            step += 1;
            trajectory.push(input, step as f64 * h, next);
            last_input = Some(input);
            x = next;
        };
        log::info!(
            "{} batch {status} after {step} steps with {faulted_steps} faulted steps",
            self.controller.name()
        );
        Ok(RunOutcome {
            status,
            trajectory,
            faulted_steps,
            solver_iterations,
        })
    }

    /// First input of the plan and the solver iterations spent on it.
    fn mpc_input(
        &self,
        spec: &OcpSpec,
        step: usize,
        t: f64,
        x: &State,
        memory: &mut MpcMemory,
    ) -> Result<(f64, usize)> {
        let stages = self.config.horizon.stages(step);
        let center = match (spec.tube(), memory.center) {
            (Some(tube), Some(z)) if tube.contains(x, &z) => z,
            _ => *x,
        };
        let ocp = self.builder.build(spec, &center, t, stages)?;
        let plan = ocp.solve(self.solver.as_ref(), memory.previous.as_ref())?;
        let nominal_input = plan
            .first_input()
            .ok_or(SolverFailure::NumericalError {
                reason: "plan without input",
            })?;
        let input = match spec.tube() {
            Some(tube) => nominal_input + tube.feedback(x, &center),
            None => nominal_input,
        };
        log::debug!(
            "step {step}: planned input {nominal_input} applied {input} with {} iterations",
            plan.iterations
        );
        let iterations = plan.iterations;
        // the plan may step with a free size, the plant always moves one sampling period
        memory.center = match spec.tube() {
            Some(_) => rk4_step(
                self.builder.model(),
                t,
                &center.to_vector(),
                nominal_input,
                self.params.sampling_period,
            )
            .ok()
            .map(State::from),
            None => None,
        };
        memory.previous = Some(plan);
        Ok((input, iterations))
    }
}
