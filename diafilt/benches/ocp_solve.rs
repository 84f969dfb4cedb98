use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use diafilt::{
    NLPSolver, NLPSolverOptions, OcpBuilder, OcpSpec, ParameterSet, Result, SpecTracking, State,
    TimeOptimal,
};
use std::{sync::Arc, time::Duration};

// one open loop solve from the initial state
fn solve(spec: &OcpSpec, stages: usize) -> Result<()> {
    let params = Arc::new(ParameterSet::default());
    let builder = OcpBuilder::new(params.clone())?;
    let solver = NLPSolver::new(NLPSolverOptions::new().without_timeout());
    builder.solve(spec, &State::initial(&params), 0., stages, &solver)?;
    Ok(())
}

fn benchmark_ocp_solve(c: &mut Criterion) {
    let params = ParameterSet::default();
    let specs = [
        OcpSpec::SpecTracking(SpecTracking::new()),
        OcpSpec::TimeOptimal(TimeOptimal::new(&params)),
    ];
    for spec in specs {
        let mut group = c.benchmark_group(format!("OCP solve {spec}"));
        group.sample_size(10).warm_up_time(Duration::from_secs(1));
        for stages in (10..31).step_by(10) {
            group.bench_with_input(BenchmarkId::new("Stages", stages), &stages, |b, &n| {
                b.iter(|| solve(&spec, n));
            });
        }
        group.finish();
    }
}

criterion_group!(benches, benchmark_ocp_solve);
criterion_main!(benches);
