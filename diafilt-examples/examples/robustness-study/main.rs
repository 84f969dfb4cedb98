use diafilt::{
    ClosedLoopSimulator, Controller, Discretizer, Interval, MonteCarloEvaluator, OcpSpec, ParameterSet,
    Result, RobustTubeAugmenter, ScenarioDistribution, SpecTracking, TubeConfig,
    VariantDistribution,
};
use nalgebra::Vector3;
use std::sync::Arc;

// spec tracking against its tube tightened version on plants whose contaminant mass
// transfer is about four times slower than predicted
fn main() -> Result<()> {
    let params = Arc::new(ParameterSet::default());
    let spread = Interval {
        lower: 0.9,
        upper: 1.1,
    };
    let distribution = ScenarioDistribution::fixed(VariantDistribution::KmMismatch {
        factor: Interval {
            lower: 0.2,
            upper: 0.3,
        },
    })
    .with_permeability_scale(spread)
    .with_area_scale(spread);
    let evaluator = MonteCarloEvaluator::new(distribution, 200, 2024);

    let config = TubeConfig::new(&params).with_disturbance(Vector3::new(0., 0., 2.));
    let plant_model = Discretizer::nominal(params.clone())?;
    let augmenter = RobustTubeAugmenter::new(&plant_model, config)?;
    println!("tube margins: {:?}", augmenter.tube().state_margin.as_slice());

    let nominal = OcpSpec::SpecTracking(SpecTracking::new());
    let robust = augmenter.augment(nominal.clone())?;
    for spec in [nominal, robust] {
        let name = spec.name();
        let simulator = ClosedLoopSimulator::new(params.clone(), Controller::Mpc(spec))?;
        let report = evaluator.evaluate(&simulator)?;
        println!("{name}\n{}", report.summary);
    }

    // the random plant sampler over mass transfer, permeability and area
    let evaluator = MonteCarloEvaluator::new(ScenarioDistribution::random_plant(), 200, 7);
    let simulator = ClosedLoopSimulator::new(params.clone(), Controller::threshold())?;
    println!("threshold\n{}", evaluator.evaluate(&simulator)?.summary);

    Ok(())
}
