use diafilt::{
    ClosedLoopConfig, ClosedLoopSimulator, Controller, Discretizer, Economic, Horizon,
    LoadDisturbance, OcpSpec, ParameterSet, Result, SpecTracking, TariffModel,
};
use std::sync::Arc;

// tariff aware batch with a fixed deadline against spec tracking, with and without a
// contaminant load after two hours
fn main() -> Result<()> {
    let params = Arc::new(ParameterSet::default());
    let tariff = Arc::new(TariffModel::default());
    let plant = Discretizer::nominal(params.clone())?;
    let shrinking = ClosedLoopConfig::new(&params).with_horizon(Horizon::Shrinking {
        deadline_steps: params.max_steps,
    });

    let runs = [
        (
            "economic",
            OcpSpec::Economic(Economic::new(tariff.clone())),
            shrinking.clone(),
        ),
        (
            "economic with load",
            OcpSpec::Economic(Economic::new(tariff.clone())),
            shrinking.with_disturbance(LoadDisturbance::new(&params)),
        ),
        (
            "spec tracking",
            OcpSpec::SpecTracking(SpecTracking::new()),
            ClosedLoopConfig::new(&params),
        ),
    ];
    for (name, spec, config) in runs {
        let outcome = ClosedLoopSimulator::new(params.clone(), Controller::Mpc(spec))?
            .with_config(config)?
            .run(&plant)?;
        println!(
            "{name}: {} after {:.2} h with energy cost {:.3}",
            outcome.status,
            outcome.trajectory.final_time().unwrap_or(0.),
            outcome.trajectory.energy_cost(&tariff)
        );
    }

    Ok(())
}
