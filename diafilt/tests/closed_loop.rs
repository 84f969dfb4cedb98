use diafilt::{
    ClosedLoopConfig, ClosedLoopSimulator, Controller, Discretizer, Economic, Horizon, OcpSpec,
    ParameterSet, Result, RobustTubeAugmenter, RunOutcome, RunStatus, SpecTracking, State,
    TariffModel, TimeOptimal,
};
use std::sync::Arc;

const EQ_EPS: f64 = 1e-12;
const EQ_MAX_REL: f64 = 1e-12;

fn params() -> Arc<ParameterSet> {
    Arc::new(ParameterSet::default())
}

fn run(params: &Arc<ParameterSet>, controller: Controller) -> Result<RunOutcome> {
    let plant = Discretizer::nominal(params.clone())?;
    ClosedLoopSimulator::new(params.clone(), controller)?.run(&plant)
}

fn assert_reaches_target(params: &ParameterSet, outcome: &RunOutcome) {
    assert_eq!(outcome.status, RunStatus::Done);
    assert!(outcome.trajectory.inputs.len() <= params.max_steps);
    let last = outcome.trajectory.final_state().copied();
    assert!(last.is_some_and(|x| x.meets_target(params, 1e-3)));
    assert!(
        outcome
            .trajectory
            .inputs
            .iter()
            .all(|u| params.input_bounds.contains(*u))
    );
}

#[test]
fn test_spec_tracking_reaches_target() -> Result<()> {
    let params = params();
    let outcome = run(&params, Controller::Mpc(OcpSpec::SpecTracking(SpecTracking::new())))?;
    assert_reaches_target(&params, &outcome);
    Ok(())
}

#[test]
fn test_time_optimal_reaches_target() -> Result<()> {
    let params = params();
    let spec = OcpSpec::TimeOptimal(TimeOptimal::new(&params));
    let outcome = run(&params, Controller::Mpc(spec))?;
    assert_reaches_target(&params, &outcome);
    Ok(())
}

#[test]
fn test_time_optimal_beats_constant_input() -> Result<()> {
    let params = params();
    let spec = OcpSpec::TimeOptimal(TimeOptimal::new(&params));
    let optimal = run(&params, Controller::Mpc(spec))?;
    assert_eq!(optimal.status, RunStatus::Done);
    let optimal_time = optimal.trajectory.final_time().unwrap_or(f64::INFINITY);

    // constant inputs get a generous budget to reach the target at all
    let plant = Discretizer::nominal(params.clone())?;
    let config = ClosedLoopConfig::new(&params).with_max_steps(20 * params.max_steps);
    let mut baseline = f64::INFINITY;
    for i in 0..20 {
        let u = 0.05 * i as f64;
        let outcome = ClosedLoopSimulator::new(params.clone(), Controller::OpenLoop(u))?
            .with_config(config.clone())?
            .run(&plant)?;
        if outcome.status == RunStatus::Done {
            baseline = baseline.min(outcome.trajectory.final_time().unwrap_or(f64::INFINITY));
        }
    }
    assert!(optimal_time <= baseline);
    Ok(())
}

#[test]
fn test_first_transition_matches_open_loop() -> Result<()> {
    let params = params();
    let plant = Discretizer::nominal(params.clone())?;
    let simulator = ClosedLoopSimulator::new(
        params.clone(),
        Controller::Mpc(OcpSpec::SpecTracking(SpecTracking::new())),
    )?
    .with_config(ClosedLoopConfig::new(&params).with_max_steps(1))?;
    let outcome = simulator.run(&plant)?;
    assert_eq!(outcome.status, RunStatus::TimedOut);
    let u0 = outcome.trajectory.inputs[0];
    let open_loop = plant.simulate(0., State::initial(&params), &[u0])?;
    assert!(
        outcome.trajectory.states[1]
            .to_vector()
            .relative_eq(&open_loop.states[1].to_vector(), EQ_EPS, EQ_MAX_REL)
    );
    Ok(())
}

#[test]
fn test_economic_shrinking_horizon_reaches_target() -> Result<()> {
    let params = params();
    let plant = Discretizer::nominal(params.clone())?;
    let spec = OcpSpec::Economic(Economic::new(Arc::new(TariffModel::default())));
    let config = ClosedLoopConfig::new(&params).with_horizon(Horizon::Shrinking {
        deadline_steps: params.max_steps,
    });
    let outcome = ClosedLoopSimulator::new(params.clone(), Controller::Mpc(spec))?
        .with_config(config)?
        .run(&plant)?;
    assert_reaches_target(&params, &outcome);
    Ok(())
}

#[test]
fn test_robust_tube_reaches_target() -> Result<()> {
    let params = params();
    let augmenter = RobustTubeAugmenter::nominal(params.clone())?;
    let spec = augmenter.augment(OcpSpec::SpecTracking(SpecTracking::new()))?;
    let outcome = run(&params, Controller::Mpc(spec))?;
    assert_reaches_target(&params, &outcome);
    Ok(())
}

#[test]
fn test_threshold_baseline() -> Result<()> {
    let params = params();
    let outcome = run(&params, Controller::threshold())?;
    assert!(matches!(
        outcome.status,
        RunStatus::Done | RunStatus::TimedOut
    ));
    assert_eq!(outcome.faulted_steps, 0);
    assert_eq!(outcome.solver_iterations, 0);
    Ok(())
}
