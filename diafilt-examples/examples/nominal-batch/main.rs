use diafilt::{
    ClosedLoopSimulator, Controller, Discretizer, OcpSpec, ParameterSet, Result, SpecTracking,
    TimeOptimal,
};
use std::sync::Arc;

// compare the controllers on a plant without mismatch
fn main() -> Result<()> {
    let params = Arc::new(ParameterSet::default());
    println!("{params}");
    let plant = Discretizer::nominal(params.clone())?;

    let controllers = [
        Controller::threshold(),
        Controller::Mpc(OcpSpec::SpecTracking(SpecTracking::new())),
        Controller::Mpc(OcpSpec::TimeOptimal(TimeOptimal::new(&params))),
    ];
    for controller in controllers {
        let name = controller.name();
        let outcome = ClosedLoopSimulator::new(params.clone(), controller)?.run(&plant)?;
        println!("{}", outcome.trajectory);
        println!(
            "{name}: {} after {:.2} h, peak contaminant {:.1}, {} faulted steps",
            outcome.status,
            outcome.trajectory.final_time().unwrap_or(0.),
            outcome.trajectory.peak_contaminant(),
            outcome.faulted_steps
        );
    }
    Ok(())
}
