use super::OcpLayout;
use crate::{NLPFunctionTarget, Smooth, SmoothFunction, SmoothSum};
use faer::Mat;
use nalgebra::{SVector, Vector3};
use num_dual::DualNum;

/// Arguments of a stage cost, [volume, product, contaminant, input, step].
pub(crate) const STAGE_DIM: usize = 5;

/// Length of the step, summing to the batch duration.
#[derive(Smooth)]
#[dimension = 5]
pub(crate) struct StepDuration;

impl SmoothFunction<STAGE_DIM> for StepDuration {
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, STAGE_DIM>) -> D {
        x[4].clone()
    }
}

/// Quadratic regularization of the input around a center.
#[derive(Smooth)]
#[dimension = 5]
pub(crate) struct InputPenalty {
    pub weight: f64,
    pub center: f64,
}

impl SmoothFunction<STAGE_DIM> for InputPenalty {
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, STAGE_DIM>) -> D {
        (x[3].clone() - self.center).powi(2) * self.weight
    }
}

/// Tariff weighted diafiltration effort of one step.
#[derive(Smooth)]
#[dimension = 5]
pub(crate) struct EnergyRate {
    pub rate: f64,
}

impl SmoothFunction<STAGE_DIM> for EnergyRate {
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, STAGE_DIM>) -> D {
        x[3].clone() * x[4].clone() * self.rate
    }
}

/// Normalized squared deviation of the concentrations from their references.
#[derive(Smooth)]
#[dimension = 5]
pub(crate) struct Tracking {
    pub weight: f64,
    pub product_weight: f64,
    pub product_reference: f64,
    pub product_range: f64,
    pub contaminant_weight: f64,
    pub contaminant_reference: f64,
    pub contaminant_range: f64,
}

impl SmoothFunction<STAGE_DIM> for Tracking {
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, STAGE_DIM>) -> D {
        let product = (x[1].clone() - self.product_reference) / self.product_range;
        let contaminant = (x[2].clone() - self.contaminant_reference) / self.contaminant_range;
        (product.powi(2) * self.product_weight + contaminant.powi(2) * self.contaminant_weight)
            * self.weight
    }
}

/// Linear reward of a small final volume.
#[derive(Smooth)]
#[dimension = 5]
pub(crate) struct VolumeEndpoint {
    pub weight: f64,
    pub scale: f64,
}

impl SmoothFunction<STAGE_DIM> for VolumeEndpoint {
    fn f<D: DualNum<f64>>(&self, x: &SVector<D, STAGE_DIM>) -> D {
        x[0].clone() * (self.weight / self.scale)
    }
}

/// Sum of stage costs over the horizon as function of the scaled decision vector.
pub(crate) struct OcpObjective {
    layout: OcpLayout,
    factors: [f64; STAGE_DIM],
    fixed_step: f64,
    stages: Vec<SmoothSum<STAGE_DIM>>,
}

impl OcpObjective {
    pub(crate) fn new(
        layout: OcpLayout,
        scale: &Vector3<f64>,
        fixed_step: f64,
        stages: Vec<SmoothSum<STAGE_DIM>>,
    ) -> Self {
        Self {
            layout,
            factors: [scale[0], scale[1], scale[2], 1., 1.],
            fixed_step,
            stages,
        }
    }

    fn stage_point(
        &self,
        x: &Mat<f64>,
        k: usize,
    ) -> ([Option<usize>; STAGE_DIM], SVector<f64, STAGE_DIM>) {
        let idx = self.layout.stage_indices(k);
        let fallback = [0., 0., 0., 0., self.fixed_step];
        let point = SVector::from_fn(|i, _| {
            idx[i].map_or(fallback[i], |j| x[(j, 0)] * self.factors[i])
        });
        (idx, point)
    }

    fn active_stages(&self) -> impl Iterator<Item = (usize, &SmoothSum<STAGE_DIM>)> {
        self.stages.iter().enumerate().filter(|(_, s)| !s.is_empty())
    }
}

impl NLPFunctionTarget for OcpObjective {
    fn val(&self, x: &Mat<f64>) -> f64 {
        self.active_stages()
            .map(|(k, cost)| cost.val(&self.stage_point(x, k).1))
            .sum()
    }

    fn val_grad(&self, x: &Mat<f64>) -> (f64, Mat<f64>) {
        let mut val = 0.;
        let mut grad = Mat::<f64>::zeros(x.nrows(), 1);
        for (k, cost) in self.active_stages() {
            let (idx, point) = self.stage_point(x, k);
            let (v, g) = cost.val_grad(&point);
            val += v;
            for a in 0..STAGE_DIM {
                if let Some(i) = idx[a] {
                    grad[(i, 0)] += g[a] * self.factors[a];
                }
            }
        }
        (val, grad)
    }

    fn val_grad_hes(&self, x: &Mat<f64>) -> (f64, Mat<f64>, Mat<f64>) {
        let mut val = 0.;
        let mut grad = Mat::<f64>::zeros(x.nrows(), 1);
        let mut hes = Mat::<f64>::zeros(x.nrows(), x.nrows());
        for (k, cost) in self.active_stages() {
            let (idx, point) = self.stage_point(x, k);
            let (v, g, h) = cost.val_grad_hes(&point);
            val += v;
            for a in 0..STAGE_DIM {
                let Some(i) = idx[a] else { continue };
                grad[(i, 0)] += g[a] * self.factors[a];
                for b in 0..STAGE_DIM {
                    if let Some(j) = idx[b] {
                        hes[(i, j)] += h[(a, b)] * self.factors[a] * self.factors[b];
                    }
                }
            }
        }
        (val, grad, hes)
    }
}
