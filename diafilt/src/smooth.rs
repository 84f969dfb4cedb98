use nalgebra::{SMatrix, SVector};
use num_dual::DualNum;
use std::sync::Arc;

/// Required value function for [Smooth] derive.
pub trait SmoothFunction<const N: usize> {
    /// Defines the value function of a smooth scalar term.
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, N>) -> D;
}

/// Defines the value, gradient and hessian functions of a smooth scalar term.
pub trait Smooth<const D: usize> {
    /// Value function.
    fn val(&self, x: &SVector<f64, D>) -> f64;
    /// Value and gradient function.
    fn val_grad(&self, x: &SVector<f64, D>) -> (f64, SVector<f64, D>);
    /// Value, gradient and hessian function.
    fn val_grad_hes(&self, x: &SVector<f64, D>) -> (f64, SVector<f64, D>, SMatrix<f64, D, D>);
}

/// Sum of smooth terms evaluated at the same point.
#[derive(Default, Clone)]
pub struct SmoothSum<const D: usize> {
    /// Summands.
    pub terms: Vec<Arc<dyn Smooth<D> + Send + Sync>>,
}

impl<const D: usize> SmoothSum<D> {
    /// Create empty sum.
    pub fn new() -> SmoothSum<D> {
        Self::default()
    }

    /// Add term to the sum.
    pub fn push(&mut self, term: Arc<dyn Smooth<D> + Send + Sync>) {
        self.terms.push(term)
    }

    /// Returns true if the sum has no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl<const D: usize> Smooth<D> for SmoothSum<D> {
    fn val(&self, x: &SVector<f64, D>) -> f64 {
        self.terms.iter().map(|t| t.val(x)).sum()
    }

    fn val_grad(&self, x: &SVector<f64, D>) -> (f64, SVector<f64, D>) {
        self.terms
            .iter()
            .fold((0., SVector::zeros()), |(val, grad), t| {
                let (v, g) = t.val_grad(x);
                (val + v, grad + g)
            })
    }

    fn val_grad_hes(&self, x: &SVector<f64, D>) -> (f64, SVector<f64, D>, SMatrix<f64, D, D>) {
        self.terms.iter().fold(
            (0., SVector::zeros(), SMatrix::zeros()),
            |(val, grad, hes), t| {
                let (v, g, h) = t.val_grad_hes(x);
                (val + v, grad + g, hes + h)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use diafilt_derive::Smooth;
    use nalgebra::{Matrix2, Vector2};
    use rand::Rng;

    const EQ_EPS: f64 = 1e-8;
    const EQ_MAX_REL: f64 = 1e-8;

    #[derive(Smooth)]
    #[dimension = 2]
    struct Monomial {
        i: i32,
        j: i32,
    }

    impl SmoothFunction<2> for Monomial {
        fn f<D: DualNum<f64>>(&self, x: &SVector<D, 2>) -> D {
            x[0].powi(self.i) * x[1].powi(self.j)
        }
    }

    fn monom_hessian(i: i32, j: i32, x: &Vector2<f64>) -> Matrix2<f64> {
        let hi = i as f64;
        let hj = j as f64;
        Matrix2::new(
            hi * (hi - 1.) * x[0].powi(i - 2) * x[1].powi(j),
            hi * hj * x[0].powi(i - 1) * x[1].powi(j - 1),
            hi * hj * x[0].powi(i - 1) * x[1].powi(j - 1),
            hj * (hj - 1.) * x[0].powi(i) * x[1].powi(j - 2),
        )
    }

    #[test]
    fn smooth_derive() -> Result<()> {
        let mut rng = rand::rng();
        for j in 0..6 {
            for i in 0..12 {
                let p = Monomial { i, j };
                let x = Vector2::new(
                    0.5 + 1.5 * rng.random::<f64>(),
                    0.5 + 2.5 * rng.random::<f64>(),
                );
                let hessian = p.val_grad_hes(&x).2;
                let hessian_rslt = monom_hessian(i, j, &x);
                assert!(hessian.relative_eq(&hessian_rslt, EQ_EPS, EQ_MAX_REL));
            }
        }
        Ok(())
    }

    #[test]
    fn smooth_sum() -> Result<()> {
        let mut sum = SmoothSum::new();
        assert!(sum.is_empty());
        sum.push(Arc::new(Monomial { i: 2, j: 0 }));
        sum.push(Arc::new(Monomial { i: 0, j: 2 }));
        let x = Vector2::new(3., 4.);
        let (val, grad, hes) = sum.val_grad_hes(&x);
        assert_eq!(val, 25.);
        assert_eq!(sum.val(&x), 25.);
        assert!(grad.relative_eq(&Vector2::new(6., 8.), EQ_EPS, EQ_MAX_REL));
        assert!(hes.relative_eq(&(2. * Matrix2::identity()), EQ_EPS, EQ_MAX_REL));
        assert_eq!(sum.val_grad(&x).1, grad);
        Ok(())
    }
}
