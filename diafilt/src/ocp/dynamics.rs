use super::OcpLayout;
use crate::{NLPConstraintTarget, ProcessModel, Result, STATE_DIM, rk4_step};
use faer::Mat;
use nalgebra::{SVector, Vector3};

/// Initial condition and RK4 defects of all stages in scaled units,
///
/// ```text
/// c_0     = x_0 - x_init / s
/// c_{k+1} = x_{k+1} - RK4(s x_k, u_k, h) / s
/// ```
pub(crate) struct DynamicsConstraint {
    layout: OcpLayout,
    scale: Vector3<f64>,
    model: ProcessModel,
    initial: Vector3<f64>,
    t0: f64,
    fixed_step: f64,
}

impl DynamicsConstraint {
    pub(crate) fn new(
        layout: OcpLayout,
        scale: Vector3<f64>,
        model: ProcessModel,
        initial: Vector3<f64>,
        t0: f64,
        fixed_step: f64,
    ) -> Self {
        Self {
            layout,
            scale,
            model,
            initial,
            t0,
            fixed_step,
        }
    }

    fn step(&self, x: &Mat<f64>) -> f64 {
        self.layout.step().map_or(self.fixed_step, |i| x[(i, 0)])
    }

    /// Physical state of stage k.
    fn state(&self, x: &Mat<f64>, k: usize) -> SVector<f64, 3> {
        SVector::from_fn(|i, _| x[(self.layout.state(k, i), 0)] * self.scale[i])
    }
}

impl NLPConstraintTarget for DynamicsConstraint {
    fn dim(&self) -> usize {
        STATE_DIM * self.layout.stages
    }

    fn val(&self, x: &Mat<f64>) -> Result<Mat<f64>> {
        let mut c = Mat::<f64>::zeros(self.dim(), 1);
        for i in 0..STATE_DIM {
            c[(i, 0)] = x[(self.layout.state(0, i), 0)] - self.initial[i] / self.scale[i];
        }
        let h = self.step(x);
        for k in 0..self.layout.stages - 1 {
            let u = x[(self.layout.input(k), 0)];
            let t = self.t0 + k as f64 * h;
            let next = rk4_step(&self.model, t, &self.state(x, k), u, h)?;
            for i in 0..STATE_DIM {
                c[(STATE_DIM * (k + 1) + i, 0)] =
                    x[(self.layout.state(k + 1, i), 0)] - next[i] / self.scale[i];
            }
        }
        Ok(c)
    }

    fn val_jac(&self, x: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>)> {
        let mut c = Mat::<f64>::zeros(self.dim(), 1);
        let mut jac = Mat::<f64>::zeros(self.dim(), x.nrows());
        for i in 0..STATE_DIM {
            let col = self.layout.state(0, i);
            c[(i, 0)] = x[(col, 0)] - self.initial[i] / self.scale[i];
            jac[(i, col)] = 1.;
        }
        let h = self.step(x);
        for k in 0..self.layout.stages - 1 {
            let state = self.state(x, k);
            let u = x[(self.layout.input(k), 0)];
            let t = self.t0 + k as f64 * h;
            let z = SVector::<f64, 5>::new(state[0], state[1], state[2], u, h);
            let mut failure = None;
            let (next, next_jac) = num_dual::jacobian(
                |v| {
                    let xk = SVector::from_fn(|i, _| v[i].clone());
                    match rk4_step(&self.model, t, &xk, v[3].clone(), v[4].clone()) {
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
            for i in 0..STATE_DIM {
                let row = STATE_DIM * (k + 1) + i;
                let col = self.layout.state(k + 1, i);
                c[(row, 0)] = x[(col, 0)] - next[i] / self.scale[i];
                jac[(row, col)] = 1.;
                for j in 0..STATE_DIM {
                    jac[(row, self.layout.state(k, j))] =
                        -next_jac[(i, j)] * self.scale[j] / self.scale[i];
                }
                jac[(row, self.layout.input(k))] = -next_jac[(i, 3)] / self.scale[i];
                if let Some(s) = self.layout.step() {
                    jac[(row, s)] = -next_jac[(i, 4)] / self.scale[i];
                }
            }
        }
        Ok((c, jac))
    }
}
