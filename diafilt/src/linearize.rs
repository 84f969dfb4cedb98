use crate::{Discretizer, Error, ParameterSet, Result, State};
use nalgebra::{Matrix3, RowVector3, SVector, Vector3};

const RICCATI_PREC: f64 = 1e-12;
const RICCATI_MAX_ITER: usize = 100_000;

/// Jacobians of the discrete step map around an operating point.
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    /// Derivative of the next state with respect to the state.
    pub a: Matrix3<f64>,
    /// Derivative of the next state with respect to the input.
    pub b: Vector3<f64>,
    /// Operating state.
    pub state: State,
    /// Operating input.
    pub input: f64,
}

/// Weights of the quadratic state and input costs of the LQR design.
#[derive(Debug, Clone, PartialEq)]
pub struct LqrWeights {
    /// Diagonal of the state weight Q.
    pub state: Vector3<f64>,
    /// Input weight R.
    pub input: f64,
}

impl LqrWeights {
    /// Weights each state by the inverse square of its initial value and the input by one.
    pub fn from_params(params: &ParameterSet) -> Self {
        Self {
            state: Vector3::new(
                params.initial_volume.powi(-2),
                params.initial_product.powi(-2),
                params.initial_contaminant.powi(-2),
            ),
            input: 1.,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.state.iter().any(|q| !(q.is_finite() && *q >= 0.))
            || !(self.input.is_finite() && self.input > 0.)
        {
            return Err(Error::Configuration {
                component: "LqrWeights",
                reason: format!(
                    "state weights must be >= 0 and the input weight > 0 but are {:?} and {}",
                    self.state.as_slice(),
                    self.input
                ),
            });
        }
        Ok(())
    }
}

/// Linearizes the discrete step map of the discretizer at (state, input) and time t by
/// automatic differentiation.
pub fn linearize(
    discretizer: &Discretizer,
    t: f64,
    state: &State,
    input: f64,
) -> Result<Linearization> {
    let z = SVector::<f64, 4>::new(state.volume, state.product, state.contaminant, input);
    let mut failure = None;
    let (_, jac) = num_dual::jacobian(
        |v| {
            let x = SVector::from_fn(|i, _| v[i].clone());
            match discretizer.step(t, &x, v[3].clone()) {
                Ok(next) => next,
                Err(e) => {
                    failure = Some(e);
                    SVector::zeros()
                }
            }
        },
        z,
    );
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(Linearization {
        a: jac.fixed_columns::<3>(0).into_owned(),
        b: jac.column(3).into_owned(),
        state: *state,
        input,
    })
}

impl Linearization {
    /// Closed-loop matrix A + B K of the feedback u = K x.
    pub fn closed_loop(&self, gain: &RowVector3<f64>) -> Matrix3<f64> {
        self.a + self.b * gain
    }

    #[cfg_attr(doc, katexit::katexit)]
    /// Infinite-horizon discrete LQR gain K of the feedback $u = K x$, found by iterating the
    /// Riccati recursion
    ///
    /// $$ P \leftarrow Q + A^T P A - A^T P B (R + B^T P B)^{-1} B^T P A $$
    ///
    /// to its fixed point with $K = -(R + B^T P B)^{-1} B^T P A$.
    pub fn lqr_gain(&self, weights: &LqrWeights) -> Result<RowVector3<f64>> {
        weights.validate()?;
        let q = Matrix3::from_diagonal(&weights.state);
        let mut p = q;
        for _ in 0..RICCATI_MAX_ITER {
            let gain = self.gain_of(&p, weights.input);
            let a_cl = self.closed_loop(&gain);
            let p_next = q + a_cl.transpose() * p * a_cl + gain.transpose() * gain * weights.input;
            if !p_next.iter().all(|v| v.is_finite()) {
                break;
            }
            let change = (p_next - p).amax();
            p = p_next;
            if change <= RICCATI_PREC * p.amax() {
                return Ok(self.gain_of(&p, weights.input));
            }
        }
        Err(Error::Configuration {
            component: "Linearization",
            reason: "riccati recursion of the lqr design does not converge".to_string(),
        })
    }

    fn gain_of(&self, p: &Matrix3<f64>, r: f64) -> RowVector3<f64> {
        let bt_p = self.b.transpose() * p;
        let s = (bt_p * self.b)[(0, 0)] + r;
        -(bt_p * self.a) / s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const EQ_MAX_REL: f64 = 1e-5;

    fn nominal() -> Result<(Discretizer, State)> {
        let params = Arc::new(ParameterSet::default());
        let state = State::initial(&params);
        Ok((Discretizer::nominal(params)?, state))
    }

    #[test]
    fn test_jacobians_match_finite_differences() -> Result<()> {
        let (discretizer, state) = nominal()?;
        let lin = linearize(&discretizer, 0., &state, 0.5)?;
        let x = state.to_vector();
        for j in 0..4 {
            let d = 1e-5 * if j < 3 { x[j] } else { 1. };
            let (mut xp, mut xm) = (x, x);
            let (mut up, mut um) = (0.5, 0.5);
            if j < 3 {
                xp[j] += d;
                xm[j] -= d;
            } else {
                up += d;
                um -= d;
            }
            let fd = (discretizer.step(0., &xp, up)? - discretizer.step(0., &xm, um)?) / (2. * d);
            let col = if j < 3 { lin.a.column(j).into_owned() } else { lin.b };
            assert!(col.relative_eq(&fd, 1e-6, EQ_MAX_REL), "column {j}");
        }
        Ok(())
    }

    #[test]
    fn test_lqr_gain_stabilizes() -> Result<()> {
        let (discretizer, state) = nominal()?;
        let params = ParameterSet::default();
        let lin = linearize(&discretizer, 0., &state, 0.5)?;
        let weights = LqrWeights::from_params(&params);
        let gain = lin.lqr_gain(&weights)?;
        let a_cl = lin.closed_loop(&gain);
        let mut power = Matrix3::identity();
        for _ in 0..2_000 {
            power = a_cl * power;
        }
        assert!(power.amax() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_lqr_invalid_weights() -> Result<()> {
        let (discretizer, state) = nominal()?;
        let lin = linearize(&discretizer, 0., &state, 0.5)?;
        let weights = LqrWeights {
            state: Vector3::new(1., 1., 1.),
            input: 0.,
        };
        assert!(lin.lqr_gain(&weights).is_err());
        Ok(())
    }
}
