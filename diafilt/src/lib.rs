#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
mod closed_loop;
mod discretize;
mod error;
mod interior_point_method;
mod linearize;
mod model;
mod monte_carlo;
mod ocp;
mod params;
mod scenario;
mod smooth;
mod tariff;
mod trajectory;
mod tube;
mod utils;

pub use closed_loop::{
    ClosedLoopConfig, ClosedLoopSimulator, Controller, FaultPolicy, Horizon, LoadDisturbance,
    RunOutcome, RunStatus,
};
pub use diafilt_derive::Smooth;
pub use discretize::{Discretizer, rk4_step};
pub use error::{Error, Result};
pub use interior_point_method::{
    NLPBound, NLPConstraintTarget, NLPFunctionTarget, NLPSolution, NLPSolve, NLPSolver,
    NLPSolverOptions, NonlinearProgram, SolverFailure,
};
pub use linearize::{Linearization, LqrWeights, linearize};
pub use model::{ProcessModel, STATE_DIM, State, Structure};
pub use monte_carlo::{
    MonteCarloEvaluator, MonteCarloReport, RobustnessSummary, RunResult, ScenarioDistribution,
    VariantDistribution, ViolationHistogram,
};
pub use ocp::{
    ConstraintSet, Economic, Ocp, OcpBuilder, OcpLayout, OcpSpec, Plan, RobustTube, SpecTracking,
    StageBounds, TimeOptimal,
};
pub use params::ParameterSet;
pub use scenario::{Scenario, ScenarioGenerator, ScenarioVariant};
pub use smooth::{Smooth, SmoothFunction, SmoothSum};
pub use tariff::TariffModel;
pub use trajectory::Trajectory;
pub use tube::{RobustTubeAugmenter, Tube, TubeConfig, steady_state_bound};
pub use utils::{IntoSVector, Interval};
