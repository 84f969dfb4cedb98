use crate::{
    Result,
    utils::{to_faer, to_nalgebra},
};
use faer::{Mat, linalg::solvers::Solve, unzip, zip};
use log::debug;
use nalgebra::DVector;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Interface for functions of which values are minimized by proving value, gradient and hessian
/// methods.
pub trait NLPFunctionTarget {
    /// Returns the value of its function at x.
    fn val(&self, x: &Mat<f64>) -> f64;
    /// Returns the value and gradient of its function at x.
    fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>);
    /// Returns the value, gradient and hessian of its function at x.
    fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>);
}

/// Interface for vector valued constraint functions c(x) providing values and jacobian.
///
/// Evaluation may fail outside the domain of the underlying model, which the solver treats as
/// a rejected trial point.
pub trait NLPConstraintTarget {
    /// Number of constraint rows.
    fn dim(&self) -> usize;
    /// Returns the constraint values at x as column.
    fn val(&self, x: &Mat<f64>) -> Result<Mat<f64>>;
    /// Returns the constraint values and the jacobian of shape dim x len(x) at x.
    fn val_jac(&self, x: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>)>;
}

/// Ensures the consistency of of [NLPFunctionTarget] value, gradient and hessian methods.
#[macro_export]
macro_rules! assert_nlp_target_consistency {
    ($feature:ident, $x:expr) => {
        let val = $feature.val($x);
        let val_grad = $feature.val_grad($x);
        let val_grad_hes = $feature.val_grad_hes($x);
        assert_eq!(val, val_grad.0);
        assert_eq!(val, val_grad_hes.0);
        assert_eq!(val_grad.1, val_grad_hes.1);
    };
}

/// Failure status of a solve.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum SolverFailure {
    /// The iterates settled without satisfying the constraints.
    #[error("locally infeasible with constraint violation {violation:.3e}")]
    Infeasible {
        /// Max norm of the remaining constraint residual.
        violation: f64,
    },
    /// The iteration limit was reached.
    #[error("no convergence within {iterations} newton iterations")]
    NonConvergent {
        /// Performed newton iterations.
        iterations: usize,
    },
    /// The newton system or the problem functions produced non-finite values.
    #[error("numerical error: {reason}")]
    NumericalError {
        /// Cause of the error.
        reason: &'static str,
    },
    /// The solve exceeded its time limit.
    #[error("timeout after {elapsed:?}")]
    Timeout {
        /// Time spent until the solve was stopped.
        elapsed: Duration,
    },
}

/// Configuration of [NLPSolver].
#[derive(Debug, Clone, PartialEq)]
pub struct NLPSolverOptions {
    barrier_prec: f64,
    newton_prec: f64,
    feasibility_tol: f64,
    barrier_max_iter: u64,
    newton_max_iter: u64,
    max_iter: u64,
    backline_max_iter: u64,
    barrier_mu: f64,
    barrier_t0: f64,
    backline_b: f64,
    boundary_fraction: f64,
    regularization: f64,
    timeout: Option<Duration>,
}

impl Default for NLPSolverOptions {
    fn default() -> Self {
        Self {
            barrier_prec: 1e-5,
            newton_prec: 1e-8,
            feasibility_tol: 1e-6,
            barrier_max_iter: 100,
            newton_max_iter: 50,
            max_iter: 5_000,
            backline_max_iter: 40,
            barrier_mu: 5.,
            barrier_t0: 1.,
            backline_b: 0.5,
            boundary_fraction: 0.995,
            regularization: 1e-8,
            timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl NLPSolverOptions {
    /// Creates a new nlp solver Configuration with its default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wall clock limit of a single solve.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the wall clock limit.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Sets the limit of newton iterations over all barrier stages.
    pub fn with_max_iter(mut self, max_iter: u64) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets the duality gap estimate n/t at which the barrier method stops.
    pub fn with_barrier_prec(mut self, barrier_prec: f64) -> Self {
        self.barrier_prec = barrier_prec;
        self
    }

    /// Sets the max norm of the constraint residual accepted as feasible.
    pub fn with_feasibility_tol(mut self, feasibility_tol: f64) -> Self {
        self.feasibility_tol = feasibility_tol;
        self
    }

    /// Wall clock limit of a single solve.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Box constraint of the decision variables, infinite entries denote unbounded sides.
#[derive(Debug, Clone)]
pub struct NLPBound {
    /// Lower bounds.
    pub lower: Mat<f64>,
    /// Upper bounds.
    pub upper: Mat<f64>,
}

impl NLPBound {
    /// Creates box constraints from lower and upper vectors.
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Self {
        let lower = to_faer(&lower);
        let upper = to_faer(&upper);
        Self { lower, upper }
    }

    /// Unbounded box of dimension n.
    pub fn unbounded(n: usize) -> Self {
        Self::new(
            DVector::from_element(n, f64::NEG_INFINITY),
            DVector::from_element(n, f64::INFINITY),
        )
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Nonlinear program
///
/// $$ \min_x f(x) \quad \text{s.t.} \quad c(x) = 0, \; g(x) \ge 0, \; l \le x \le u $$
///
/// together with an initial guess.
#[derive(Clone)]
pub struct NonlinearProgram {
    /// Box constraint of x.
    pub bound: NLPBound,
    /// Objective f.
    pub objective: Arc<dyn NLPFunctionTarget + Send + Sync>,
    /// Equality constraint c.
    pub equality: Option<Arc<dyn NLPConstraintTarget + Send + Sync>>,
    /// Inequality constraint g.
    pub inequality: Option<Arc<dyn NLPConstraintTarget + Send + Sync>>,
    /// Initial guess.
    pub x0: DVector<f64>,
}

/// Locally optimal point of a [NonlinearProgram].
#[derive(Debug, Clone, PartialEq)]
pub struct NLPSolution {
    /// Minimizer.
    pub x: DVector<f64>,
    /// Objective value at x.
    pub objective: f64,
    /// Performed newton iterations.
    pub iterations: usize,
    /// Max norm of the constraint residual at x.
    pub constraint_violation: f64,
}

/// Solver of nonlinear programs.
pub trait NLPSolve {
    /// Returns a locally optimal point or the reason of failure.
    fn solve(&self, program: &NonlinearProgram) -> std::result::Result<NLPSolution, SolverFailure>;
}

/// Decision variables extended by one slack per inequality row, g(x) - s = 0 with s >= 0.
struct SlackProblem<'a> {
    program: &'a NonlinearProgram,
    n: usize,
    n_slack: usize,
    m_eq: usize,
    lower: Mat<f64>,
    upper: Mat<f64>,
}

impl<'a> SlackProblem<'a> {
    fn new(program: &'a NonlinearProgram) -> std::result::Result<Self, SolverFailure> {
        let n = program.x0.len();
        if program.bound.lower.nrows() != n || program.bound.upper.nrows() != n {
            return Err(SolverFailure::NumericalError {
                reason: "bound and initial guess differ in size",
            });
        }
        let n_slack = program.inequality.as_ref().map_or(0, |g| g.dim());
        let m_eq = program.equality.as_ref().map_or(0, |c| c.dim());
        let size = n + n_slack;
        let mut lower = Mat::<f64>::from_fn(size, 1, |_, _| 0.);
        let mut upper = Mat::<f64>::from_fn(size, 1, |_, _| f64::INFINITY);
        for i in 0..n {
            let (l, u) = (program.bound.lower[(i, 0)], program.bound.upper[(i, 0)]);
            if l.is_nan() || u.is_nan() || l >= u {
                return Err(SolverFailure::NumericalError {
                    reason: "bound without interior",
                });
            }
            lower[(i, 0)] = l;
            upper[(i, 0)] = u;
        }
        Ok(Self {
            program,
            n,
            n_slack,
            m_eq,
            lower,
            upper,
        })
    }

    fn size(&self) -> usize {
        self.n + self.n_slack
    }

    fn rows(&self) -> usize {
        self.m_eq + self.n_slack
    }

    fn primal(&self, z: &Mat<f64>) -> Mat<f64> {
        z.submatrix(0, 0, self.n, 1).to_owned()
    }

    fn interior_start(&self) -> Mat<f64> {
        let mut z = Mat::<f64>::zeros(self.size(), 1);
        for i in 0..self.n {
            z[(i, 0)] = Self::interior(self.program.x0[i], self.lower[(i, 0)], self.upper[(i, 0)]);
        }
        if let Some(inequality) = &self.program.inequality {
            let g = inequality.val(&self.primal(&z)).ok();
            for j in 0..self.n_slack {
                let value = g.as_ref().map_or(1., |g| g[(j, 0)]);
                z[(self.n + j, 0)] = if value.is_finite() {
                    value.max(1e-2)
                } else {
                    1.
                };
            }
        }
        z
    }

    fn interior(v: f64, l: f64, u: f64) -> f64 {
        match (l.is_finite(), u.is_finite()) {
            (true, true) => {
                let margin = 0.01 * (u - l);
                v.max(l + margin).min(u - margin)
            }
            (true, false) => v.max(l + 1e-2),
            (false, true) => v.min(u - 1e-2),
            (false, false) => v,
        }
    }

    fn objective_val(&self, z: &Mat<f64>) -> f64 {
        self.program.objective.val(&self.primal(z))
    }

    fn objective_val_grad_hes(&self, z: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>) {
        let (val, grad, hes) = self.program.objective.val_grad_hes(&self.primal(z));
        if self.n_slack == 0 {
            return (val, grad, hes);
        }
        let size = self.size();
        let mut grad_z = Mat::<f64>::zeros(size, 1);
        let mut hes_z = Mat::<f64>::zeros(size, size);
        grad_z.as_mut().submatrix_mut(0, 0, self.n, 1).copy_from(&grad);
        hes_z
            .as_mut()
            .submatrix_mut(0, 0, self.n, self.n)
            .copy_from(&hes);
        (val, grad_z, hes_z)
    }

    fn constraints(&self, z: &Mat<f64>) -> Result<Mat<f64>> {
        let x = self.primal(z);
        let mut c = Mat::<f64>::zeros(self.rows(), 1);
        if let Some(equality) = &self.program.equality {
            c.as_mut()
                .submatrix_mut(0, 0, self.m_eq, 1)
                .copy_from(equality.val(&x)?);
        }
        if let Some(inequality) = &self.program.inequality {
            let g = inequality.val(&x)?;
            for j in 0..self.n_slack {
                c[(self.m_eq + j, 0)] = g[(j, 0)] - z[(self.n + j, 0)];
            }
        }
        Ok(c)
    }

    fn constraints_jac(&self, z: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>)> {
        let x = self.primal(z);
        let mut c = Mat::<f64>::zeros(self.rows(), 1);
        let mut jac = Mat::<f64>::zeros(self.rows(), self.size());
        if let Some(equality) = &self.program.equality {
            let (val, val_jac) = equality.val_jac(&x)?;
            c.as_mut().submatrix_mut(0, 0, self.m_eq, 1).copy_from(&val);
            jac.as_mut()
                .submatrix_mut(0, 0, self.m_eq, self.n)
                .copy_from(&val_jac);
        }
        if let Some(inequality) = &self.program.inequality {
            let (val, val_jac) = inequality.val_jac(&x)?;
            for j in 0..self.n_slack {
                c[(self.m_eq + j, 0)] = val[(j, 0)] - z[(self.n + j, 0)];
                jac[(self.m_eq + j, self.n + j)] = -1.;
            }
            jac.as_mut()
                .submatrix_mut(self.m_eq, 0, self.n_slack, self.n)
                .copy_from(&val_jac);
        }
        Ok((c, jac))
    }

    fn is_interior(&self, z: &Mat<f64>) -> bool {
        (0..self.size())
            .all(|i| z[(i, 0)] > self.lower[(i, 0)] && z[(i, 0)] < self.upper[(i, 0)])
    }

    fn log_barrier(&self, z: &Mat<f64>) -> f64 {
        let mut val = 0.;
        for i in 0..self.size() {
            let (v, l, u) = (z[(i, 0)], self.lower[(i, 0)], self.upper[(i, 0)]);
            if l.is_finite() {
                val -= (v - l).ln();
            }
            if u.is_finite() {
                val -= (u - v).ln();
            }
        }
        val
    }

    fn log_barrier_grad_hes(&self, z: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
        let mut grad = Mat::<f64>::zeros(z.nrows(), 1);
        zip!(&mut grad, z, &self.lower, &self.upper)
            .for_each(|unzip!(g, v, l, u)| *g = 1.0 / (*u - *v) + 1.0 / (*l - *v));
        let mut hes_diag = Mat::<f64>::zeros(z.nrows(), 1);
        zip!(&mut hes_diag, z, &self.lower, &self.upper)
            .for_each(|unzip!(h, v, l, u)| *h = 1.0 / (*u - *v).powi(2) + 1.0 / (*l - *v).powi(2));
        (grad, hes_diag)
    }

    /// Merit t f + barrier + nu |c|_1 and the max norm of c, if z is an evaluable interior point.
    fn merit(&self, z: &Mat<f64>, t: f64, nu: f64) -> Option<(f64, f64)> {
        if !self.is_interior(z) {
            return None;
        }
        let c = self.constraints(z).ok()?;
        let merit = t * self.objective_val(z) + self.log_barrier(z) + nu * l1_norm(&c);
        merit.is_finite().then(|| (merit, max_norm(&c)))
    }
}

fn l1_norm(x: &Mat<f64>) -> f64 {
    x.col(0).iter().map(|v| v.abs()).sum()
}

fn max_norm(x: &Mat<f64>) -> f64 {
    x.col(0).iter().fold(0., |acc, v| acc.max(v.abs()))
}

fn is_finite(x: &Mat<f64>) -> bool {
    x.col_iter().all(|c| c.iter().all(|v| v.is_finite()))
}

/// Primal log-barrier method with newton steps on the KKT system of the equality constraints
/// and an exact penalty merit line search.
///
/// The barrier parameter t grows geometrically until the duality gap estimate n / t falls
/// below the barrier precision. Each newton step solves
///
/// ```text
/// [ H   Jᵀ ] [ dz ]   [ -g ]
/// [ J   0  ] [ y  ] = [ -c ]
/// ```
///
/// with the barrier augmented objective hessian H, where the curvature of the constraints is
/// omitted (Gauss-Newton).
#[derive(Debug, Clone, Default)]
pub struct NLPSolver {
    options: NLPSolverOptions,
}

impl NLPSolver {
    /// Initialize the NLP solver.
    pub fn new(options: NLPSolverOptions) -> Self {
        Self { options }
    }

    /// Options of the solver.
    pub fn options(&self) -> &NLPSolverOptions {
        &self.options
    }

    fn barrier_method(
        &self,
        problem: &SlackProblem,
    ) -> std::result::Result<NLPSolution, SolverFailure> {
        let start = Instant::now();
        let mut z = problem.interior_start();
        let size = problem.size() as f64;
        let mut t = self.options.barrier_t0;
        let mut nu = 1.;
        let mut iterations = 0;
        let mut i = 0;
        while size / t >= self.options.barrier_prec {
            i += 1;
            if i > self.options.barrier_max_iter {
                return Err(SolverFailure::NonConvergent { iterations });
            }
            self.newton_method(problem, &mut z, t, &mut nu, &mut iterations, start)?;
            debug!(
                "barrier t={t:.3e} iterations={iterations} objective={:.6e}",
                problem.objective_val(&z)
            );
            t *= self.options.barrier_mu;
        }
        let c = problem
            .constraints(&z)
            .map_err(|_| SolverFailure::NumericalError {
                reason: "constraints not evaluable at the final iterate",
            })?;
        let violation = max_norm(&c);
        if !violation.is_finite() {
            return Err(SolverFailure::NumericalError {
                reason: "non-finite constraint residual",
            });
        }
        if violation > self.options.feasibility_tol {
            return Err(SolverFailure::Infeasible { violation });
        }
        let x = problem.primal(&z);
        Ok(NLPSolution {
            objective: problem.program.objective.val(&x),
            x: to_nalgebra(&x),
            iterations,
            constraint_violation: violation,
        })
    }

    fn newton_method(
        &self,
        problem: &SlackProblem,
        z: &mut Mat<f64>,
        t: f64,
        nu: &mut f64,
        iterations: &mut usize,
        start: Instant,
    ) -> std::result::Result<(), SolverFailure> {
        let size = problem.size();
        let rows = problem.rows();
        for _ in 0..self.options.newton_max_iter {
            if *iterations as u64 >= self.options.max_iter {
                return Err(SolverFailure::NonConvergent {
                    iterations: *iterations,
                });
            }
            if let Some(timeout) = self.options.timeout {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Err(SolverFailure::Timeout { elapsed });
                }
            }
            *iterations += 1;

            let (func_val, mut func_grad, mut func_hes) = problem.objective_val_grad_hes(z);
            func_grad *= t;
            func_hes *= t;
            let (bound_grad, bound_hes) = problem.log_barrier_grad_hes(z);
            func_grad += bound_grad;
            let (c, jac) =
                problem
                    .constraints_jac(z)
                    .map_err(|_| SolverFailure::NumericalError {
                        reason: "constraints not evaluable at the iterate",
                    })?;

            let mut a = Mat::<f64>::zeros(size + rows, size + rows);
            a.as_mut()
                .submatrix_mut(0, 0, size, size)
                .copy_from(&func_hes);
            for i in 0..size {
                a[(i, i)] += bound_hes[(i, 0)] + self.options.regularization;
            }
            let mut b = Mat::<f64>::zeros(size + rows, 1);
            for i in 0..size {
                b[(i, 0)] = -func_grad[(i, 0)];
            }
            if rows > 0 {
                a.as_mut()
                    .submatrix_mut(size, 0, rows, size)
                    .copy_from(&jac);
                a.as_mut()
                    .submatrix_mut(0, size, size, rows)
                    .copy_from(jac.transpose());
                for i in 0..rows {
                    b[(size + i, 0)] = -c[(i, 0)];
                }
            }
            let dz_total = a.partial_piv_lu().solve(&b);
            if !is_finite(&dz_total) {
                return Err(SolverFailure::NumericalError {
                    reason: "singular newton system",
                });
            }
            let dz = dz_total.submatrix(0, 0, size, 1).to_owned();
            let multiplier = (size..size + rows).fold(0.0_f64, |acc, i| acc.max(dz_total[(i, 0)].abs()));
            *nu = nu.max(1.1 * multiplier);

            let merit = t * func_val + problem.log_barrier(z) + *nu * l1_norm(&c);
            let Some((step, violation)) = self.backline_search(problem, z, &dz, t, *nu, merit)
            else {
                break;
            };
            if step < self.options.newton_prec && violation < 1e-9 {
                break;
            }
        }
        Ok(())
    }

    /// Moves x along dx with fraction to boundary and halving until the merit decreases.
    /// Returns the step length and the constraint violation of the accepted point.
    #[inline(always)]
    fn backline_search(
        &self,
        problem: &SlackProblem,
        x: &mut Mat<f64>,
        dx: &Mat<f64>,
        t: f64,
        nu: f64,
        old_merit: f64,
    ) -> Option<(f64, f64)> {
        let mut a: f64 = 1.;
        for i in 0..problem.size() {
            let (v, l, u, d) = (
                x[(i, 0)],
                problem.lower[(i, 0)],
                problem.upper[(i, 0)],
                dx[(i, 0)],
            );
            if d < 0. && l.is_finite() {
                a = a.min(-self.options.boundary_fraction * (v - l) / d);
            }
            if d > 0. && u.is_finite() {
                a = a.min(self.options.boundary_fraction * (u - v) / d);
            }
        }
        for _ in 0..self.options.backline_max_iter {
            let x_tmp = &*x + a * dx;
            if let Some((merit, violation)) = problem.merit(&x_tmp, t, nu) {
                if merit < old_merit {
                    *x = x_tmp;
                    return Some((a * dx.norm_l2(), violation));
                }
            }
            a *= self.options.backline_b;
        }
        None
    }
}

impl NLPSolve for NLPSolver {
    fn solve(&self, program: &NonlinearProgram) -> std::result::Result<NLPSolution, SolverFailure> {
        let problem = SlackProblem::new(program)?;
        self.barrier_method(&problem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Smooth, SmoothFunction, utils::IntoSVector};
    use faer::mat;
    use nalgebra::SVector;
    use num_dual::DualNum;

    struct NLPTargetTest {}

    impl NLPFunctionTarget for NLPTargetTest {
        fn val(&self, x: &Mat<f64>) -> f64 {
            x[(0, 0)].powi(2)
        }

        fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>) {
            (self.val(x), 2. * x)
        }
        fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>) {
            let vg = self.val_grad(x);
            (vg.0, vg.1, mat![[2.]])
        }
    }

    #[derive(Smooth)]
    #[dimension = 2]
    struct Distance {
        center: SVector<f64, 2>,
    }

    impl SmoothFunction<2> for Distance {
        fn f<D: DualNum<f64>>(&self, x: &SVector<D, 2>) -> D {
            (x[0].clone() - self.center[0]).powi(2) + (x[1].clone() - self.center[1]).powi(2)
        }
    }

    struct DistanceTarget {
        distance: Distance,
    }

    impl DistanceTarget {
        fn new(x: f64, y: f64) -> Self {
            Self {
                distance: Distance {
                    center: SVector::<f64, 2>::new(x, y),
                },
            }
        }
    }

    impl NLPFunctionTarget for DistanceTarget {
        fn val(&self, x: &Mat<f64>) -> f64 {
            self.distance.val(&x.segment_svector(0))
        }
        fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>) {
            let (val, grad) = self.distance.val_grad(&x.segment_svector(0));
            (val, Mat::from_fn(2, 1, |i, _| grad[i]))
        }
        fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>) {
            let (val, grad, hes) = self.distance.val_grad_hes(&x.segment_svector(0));
            (
                val,
                Mat::from_fn(2, 1, |i, _| grad[i]),
                Mat::from_fn(2, 2, |i, j| hes[(i, j)]),
            )
        }
    }

    /// x0² + x1² - 2 = 0
    struct Circle {}

    impl NLPConstraintTarget for Circle {
        fn dim(&self) -> usize {
            1
        }
        fn val(&self, x: &Mat<f64>) -> Result<Mat<f64>> {
            Ok(mat![[x[(0, 0)].powi(2) + x[(1, 0)].powi(2) - 2.]])
        }
        fn val_jac(&self, x: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>)> {
            Ok((self.val(x)?, mat![[2. * x[(0, 0)], 2. * x[(1, 0)]]]))
        }
    }

    /// a x + b
    struct Affine {
        a: Mat<f64>,
        b: Mat<f64>,
    }

    impl NLPConstraintTarget for Affine {
        fn dim(&self) -> usize {
            self.a.nrows()
        }
        fn val(&self, x: &Mat<f64>) -> Result<Mat<f64>> {
            Ok(&self.a * x + &self.b)
        }
        fn val_jac(&self, x: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>)> {
            Ok((self.val(x)?, self.a.clone()))
        }
    }

    fn program(
        bound: NLPBound,
        objective: Arc<dyn NLPFunctionTarget + Send + Sync>,
        x0: Vec<f64>,
    ) -> NonlinearProgram {
        NonlinearProgram {
            bound,
            objective,
            equality: None,
            inequality: None,
            x0: DVector::from_vec(x0),
        }
    }

    #[test]
    fn test_nlp_solver() -> Result<()> {
        for i in 0..10 {
            let lower = (i as f64) / 20.;
            let bound = NLPBound::new(
                DVector::from_element(1, lower),
                DVector::from_element(1, 1.),
            );
            let program = program(bound, Arc::new(NLPTargetTest {}), vec![0.9]);
            let options = NLPSolverOptions::new().with_barrier_prec(1e-10);
            let solution = NLPSolver::new(options).solve(&program)?;
            assert!(
                solution
                    .x
                    .relative_eq(&DVector::from_vec(vec![lower]), 1e-4, 1e-4)
            );
        }
        Ok(())
    }

    #[test]
    fn test_nlp_solver_start_outside() -> Result<()> {
        let bound = NLPBound::new(DVector::from_element(1, 0.5), DVector::from_element(1, 1.));
        let program = program(bound, Arc::new(NLPTargetTest {}), vec![2.9]);
        let solution = NLPSolver::default().solve(&program)?;
        assert!((solution.x[0] - 0.5).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_nlp_solver_linear_equality() -> Result<()> {
        let objective = Arc::new(DistanceTarget::new(1., 2.));
        let mut program = program(NLPBound::unbounded(2), objective, vec![0., 0.]);
        program.equality = Some(Arc::new(Affine {
            a: mat![[1., 1.]],
            b: mat![[-1.]],
        }));
        let solution = NLPSolver::default().solve(&program)?;
        assert!(
            solution
                .x
                .relative_eq(&DVector::from_vec(vec![0., 1.]), 1e-6, 1e-6)
        );
        assert!(solution.constraint_violation < 1e-6);
        Ok(())
    }

    #[test]
    fn test_nlp_solver_nonlinear_equality() -> Result<()> {
        let objective = Arc::new(DistanceTarget::new(2., 2.));
        let bound = NLPBound::new(DVector::from_element(2, 0.), DVector::from_element(2, 3.));
        let mut program = program(bound, objective, vec![0.5, 1.5]);
        program.equality = Some(Arc::new(Circle {}));
        let solution = NLPSolver::default().solve(&program)?;
        assert!(
            solution
                .x
                .relative_eq(&DVector::from_vec(vec![1., 1.]), 1e-4, 1e-4)
        );
        assert!((solution.objective - 2.).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_nlp_solver_inequality() -> Result<()> {
        // min (x0 - 3)² + (x1 - 0)² s.t. 1 - x0 >= 0
        let objective = Arc::new(DistanceTarget::new(3., 0.));
        let mut program = program(NLPBound::unbounded(2), objective, vec![0., 0.]);
        program.inequality = Some(Arc::new(Affine {
            a: mat![[-1., 0.]],
            b: mat![[1.]],
        }));
        let solution = NLPSolver::default().solve(&program)?;
        assert!((solution.x[0] - 1.).abs() < 1e-4);
        assert!(solution.x[0] <= 1. + 1e-6);
        assert!(solution.x[1].abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_nlp_solver_infeasible() -> Result<()> {
        let bound = NLPBound::new(DVector::from_element(1, 0.), DVector::from_element(1, 1.));
        let mut program = program(bound, Arc::new(NLPTargetTest {}), vec![0.5]);
        program.equality = Some(Arc::new(Affine {
            a: mat![[1.]],
            b: mat![[-5.]],
        }));
        let result = NLPSolver::default().solve(&program);
        assert!(matches!(result, Err(SolverFailure::Infeasible { .. })));
        Ok(())
    }

    #[test]
    fn test_nlp_solver_limits() -> Result<()> {
        let bound = NLPBound::new(DVector::from_element(1, 0.), DVector::from_element(1, 1.));
        let program = program(bound, Arc::new(NLPTargetTest {}), vec![0.5]);

        let solver = NLPSolver::new(NLPSolverOptions::new().with_max_iter(1));
        assert_eq!(
            solver.solve(&program),
            Err(SolverFailure::NonConvergent { iterations: 1 })
        );

        let solver = NLPSolver::new(NLPSolverOptions::new().with_timeout(Duration::ZERO));
        assert!(matches!(
            solver.solve(&program),
            Err(SolverFailure::Timeout { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_nlp_solver_degenerate_bound() {
        let bound = NLPBound::new(DVector::from_element(1, 1.), DVector::from_element(1, 1.));
        let program = program(bound, Arc::new(NLPTargetTest {}), vec![1.]);
        assert!(matches!(
            NLPSolver::default().solve(&program),
            Err(SolverFailure::NumericalError { .. })
        ));
    }

    #[test]
    fn test_target_consistency() {
        let distance = DistanceTarget::new(1., -1.);
        let x = mat![[0.3], [0.7]];
        let x = &x;
        crate::assert_nlp_target_consistency!(distance, x);
    }
}
