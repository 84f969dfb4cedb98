use crate::{ParameterSet, ProcessModel, Result, State, Trajectory};
use nalgebra::SVector;
use num_dual::DualNum;
use std::sync::Arc;

fn axpy<D: DualNum<f64>>(x: &SVector<D, 3>, a: &D, k: &SVector<D, 3>) -> SVector<D, 3> {
    SVector::from_fn(|i, _| x[i].clone() + k[i].clone() * a.clone())
}

#[cfg_attr(doc, katexit::katexit)]
/// Classical fourth order Runge-Kutta step of the [ProcessModel] with the input held constant.
///
/// $$ x_{k+1} = x_k + \frac{h}{6} (k_1 + 2 k_2 + 2 k_3 + k_4) $$
///
/// The step size h is generic as well, so a free step can be a decision variable.
pub fn rk4_step<D: DualNum<f64>>(
    model: &ProcessModel,
    t: f64,
    x: &SVector<D, 3>,
    u: D,
    h: D,
) -> Result<SVector<D, 3>> {
    let half = h.clone() * 0.5;
    let t_half = t + half.re();
    let k1 = model.rhs(t, x, u.clone())?;
    let k2 = model.rhs(t_half, &axpy(x, &half, &k1), u.clone())?;
    let k3 = model.rhs(t_half, &axpy(x, &half, &k2), u.clone())?;
    let k4 = model.rhs(t + h.re(), &axpy(x, &h, &k3), u)?;
    let sixth = h / 6.;
    Ok(SVector::from_fn(|i, _| {
        x[i].clone()
            + (k1[i].clone() + k2[i].clone() * 2. + k3[i].clone() * 2. + k4[i].clone())
                * sixth.clone()
    }))
}

/// Propagates a [ProcessModel] over a fixed step, both for simulation and as the dynamic
/// constraint of the optimal control problems.
#[derive(Debug, Clone)]
pub struct Discretizer {
    model: ProcessModel,
    step: f64,
}

impl Discretizer {
    /// Creates a discretizer with fixed step size.
    pub fn new(model: ProcessModel, step: f64) -> Result<Self> {
        if !(step.is_finite() && step > 0.) {
            return Err(crate::Error::Configuration {
                component: "Discretizer",
                reason: format!("step size must be finite and > 0 but is {step}"),
            });
        }
        Ok(Self { model, step })
    }

    /// Discretizes the nominal model with the sampling period of its parameters.
    pub fn nominal(params: Arc<ParameterSet>) -> Result<Self> {
        let step = params.sampling_period;
        Self::new(ProcessModel::new(params)?, step)
    }

    /// Underlying continuous time model.
    pub fn model(&self) -> &ProcessModel {
        &self.model
    }

    /// Fixed step size.
    pub fn step_size(&self) -> f64 {
        self.step
    }

    /// Advances x by one fixed step from time t.
    pub fn step<D: DualNum<f64>>(&self, t: f64, x: &SVector<D, 3>, u: D) -> Result<SVector<D, 3>> {
        rk4_step(&self.model, t, x, u, D::from(self.step))
    }

    /// Advances a state by one fixed step from time t.
    pub fn advance(&self, t: f64, state: &State, u: f64) -> Result<State> {
        Ok(self.step(t, &state.to_vector(), u)?.into())
    }

    /// Simulates the input sequence starting in x0 at t0.
    pub fn simulate(&self, t0: f64, x0: State, inputs: &[f64]) -> Result<Trajectory> {
        let mut trajectory = Trajectory::new(t0, x0);
        let mut t = t0;
        let mut x = x0;
        for (k, &u) in inputs.iter().enumerate() {
            x = self.advance(t, &x, u)?;
            t = t0 + (k + 1) as f64 * self.step;
            trajectory.push(u, t, x);
        }
        Ok(trajectory)
    }

    /// Simulates a constant input over the given number of steps.
    pub fn simulate_constant(&self, t0: f64, x0: State, u: f64, steps: usize) -> Result<Trajectory> {
        self.simulate(t0, x0, &vec![u; steps])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn nominal_model() -> Result<ProcessModel> {
        ProcessModel::new(Arc::new(ParameterSet::default()))
    }

    fn integrate(model: &ProcessModel, steps: usize, duration: f64) -> Result<SVector<f64, 3>> {
        let discretizer = Discretizer::new(model.clone(), duration / steps as f64)?;
        let x0 = State::new(100., 10., 150.);
        let trajectory = discretizer.simulate_constant(0., x0, 0.5, steps)?;
        Ok(trajectory.states[steps].to_vector())
    }

    #[test]
    fn test_rk4_fourth_order_convergence() -> Result<()> {
        let model = nominal_model()?;
        let reference = integrate(&model, 1024, 1.)?;
        let mut errors = vec![];
        for steps in [8, 16, 32] {
            errors.push((integrate(&model, steps, 1.)? - reference).norm());
        }
        // observed order over two step halvings
        for pair in errors.windows(2) {
            let order = (pair[0] / pair[1]).log2();
            assert!(order > 3.7 && order < 4.5, "observed order {order}");
        }
        Ok(())
    }

    #[test]
    fn test_rk4_deterministic() -> Result<()> {
        let discretizer = Discretizer::nominal(Arc::new(ParameterSet::default()))?;
        let x0 = State::new(100., 10., 150.);
        let a = discretizer.simulate_constant(0., x0, 0.7, 10)?;
        let b = discretizer.simulate_constant(0., x0, 0.7, 10)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_rk4_step_matches_dual_step() -> Result<()> {
        let model = nominal_model()?;
        let x = SVector::<f64, 3>::new(90., 20., 100.);
        let real = rk4_step(&model, 0., &x, 0.4, 0.2)?;
        let dual = rk4_step(
            &model,
            0.,
            &x.map(num_dual::Dual64::from),
            num_dual::Dual64::from(0.4),
            num_dual::Dual64::from(0.2).derivative(),
        )?;
        for i in 0..3 {
            assert_eq!(dual[i].re, real[i]);
        }
        Ok(())
    }

    #[test]
    fn test_volume_depletion_is_domain_error() -> Result<()> {
        let discretizer = Discretizer::new(nominal_model()?, 1.)?;
        let result = discretizer.simulate_constant(0., State::new(2., 10., 150.), 0., 3);
        assert!(matches!(result, Err(Error::ModelDomain { .. })));
        Ok(())
    }

    #[test]
    fn test_invalid_step() -> Result<()> {
        assert!(Discretizer::new(nominal_model()?, 0.).is_err());
        assert!(Discretizer::new(nominal_model()?, f64::NAN).is_err());
        Ok(())
    }
}
