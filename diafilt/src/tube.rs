use crate::{
    ConstraintSet, Discretizer, Error, LqrWeights, OcpSpec, ParameterSet, Result, RobustTube,
    State, linearize,
};
use nalgebra::{Matrix3, RowVector3, Vector3};
use std::sync::Arc;

/// Disturbance bound and feedback design of a tube.
#[derive(Debug, Clone, PartialEq)]
pub struct TubeConfig {
    /// Componentwise bound of the additive state disturbance per step.
    pub disturbance: Vector3<f64>,
    /// Weights of the LQR design of the ancillary feedback.
    pub weights: LqrWeights,
    /// Input of the operating point of the linearization.
    pub operating_input: f64,
    /// Relative size of the last series term at which the margin is accepted.
    pub tolerance: f64,
    /// Maximal number of series terms.
    pub max_terms: usize,
}

impl TubeConfig {
    /// Contaminant disturbance of 0.1 mol/m³ per step with the default LQR weights.
    pub fn new(params: &ParameterSet) -> Self {
        Self {
            disturbance: Vector3::new(0., 0., 0.1),
            weights: LqrWeights::from_params(params),
            operating_input: 0.5,
            tolerance: 1e-10,
            max_terms: 100_000,
        }
    }

    /// Set the disturbance bound.
    pub fn with_disturbance(mut self, disturbance: Vector3<f64>) -> Self {
        self.disturbance = disturbance;
        self
    }

    /// Set the LQR weights.
    pub fn with_weights(mut self, weights: LqrWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the input of the linearization point.
    pub fn with_operating_input(mut self, operating_input: f64) -> Self {
        self.operating_input = operating_input;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.disturbance.iter().any(|w| !(w.is_finite() && *w >= 0.)) {
            return Err(Error::Configuration {
                component: "TubeConfig",
                reason: format!(
                    "disturbance bound must be finite and >= 0 but is {:?}",
                    self.disturbance.as_slice()
                ),
            });
        }
        if !(self.tolerance > 0. && self.max_terms > 0) {
            return Err(Error::Configuration {
                component: "TubeConfig",
                reason: "series tolerance and term limit must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Ancillary feedback u = v + K (x - z) around the nominal state z and the margins of the
/// deviation it keeps bounded.
#[derive(Debug, Clone, PartialEq)]
pub struct Tube {
    /// Feedback gain K.
    pub gain: RowVector3<f64>,
    /// Bound of the deviation x - z.
    pub state_margin: Vector3<f64>,
    /// Bound of the feedback K (x - z).
    pub input_margin: f64,
    /// Closed loop matrix A + B K.
    pub closed_loop: Matrix3<f64>,
}

impl Tube {
    /// Tube without feedback and without margins.
    pub fn zero() -> Self {
        Self {
            gain: RowVector3::zeros(),
            state_margin: Vector3::zeros(),
            input_margin: 0.,
            closed_loop: Matrix3::identity(),
        }
    }

    /// Returns true if the deviation of x from z lies within the margins.
    pub fn contains(&self, x: &State, z: &State) -> bool {
        let deviation = x.to_vector() - z.to_vector();
        deviation
            .iter()
            .zip(self.state_margin.iter())
            .all(|(d, m)| d.abs() <= *m)
    }

    /// Feedback correction K (x - z).
    pub fn feedback(&self, x: &State, z: &State) -> f64 {
        (self.gain * (x.to_vector() - z.to_vector()))[(0, 0)]
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Bound of the reachable deviations of a stable linear error system driven by a bounded
/// disturbance,
///
/// $$ \delta = \sum_{j \ge 0} |A_{cl}^j| \, w, $$
///
/// summed until the last term falls below the relative tolerance.
pub fn steady_state_bound(
    closed_loop: &Matrix3<f64>,
    disturbance: &Vector3<f64>,
    tolerance: f64,
    max_terms: usize,
) -> Result<Vector3<f64>> {
    let mut power = Matrix3::identity();
    let mut bound = Vector3::zeros();
    for _ in 0..max_terms {
        let term = power.abs() * disturbance;
        bound += term;
        if !bound.iter().all(|v| v.is_finite()) {
            break;
        }
        if term.amax() <= tolerance * bound.amax() || term.amax() == 0. {
            return Ok(bound);
        }
        power = closed_loop * power;
    }
    Err(Error::Configuration {
        component: "RobustTubeAugmenter",
        reason: "reachable set series of the closed loop does not converge".to_string(),
    })
}

/// Tightens the constraints of a nominal problem by the margins of an LQR tube.
///
/// The tube is designed on the linearization of the prediction model at the initial state.
/// The tightened problem only guarantees constraint satisfaction of the plant if the
/// controller applies the ancillary feedback of [Tube::feedback] around the planned nominal
/// state, and only for disturbances within the configured bound.
#[derive(Debug, Clone)]
pub struct RobustTubeAugmenter {
    params: Arc<ParameterSet>,
    config: TubeConfig,
    tube: Tube,
}

impl RobustTubeAugmenter {
    /// Designs the tube on the prediction model of the discretizer.
    pub fn new(discretizer: &Discretizer, config: TubeConfig) -> Result<Self> {
        config.validate()?;
        let params = discretizer.model().params().clone();
        let linearization = linearize(
            discretizer,
            0.,
            &State::initial(&params),
            config.operating_input,
        )?;
        let gain = linearization.lqr_gain(&config.weights)?;
        let closed_loop = linearization.closed_loop(&gain);
        let state_margin = steady_state_bound(
            &closed_loop,
            &config.disturbance,
            config.tolerance,
            config.max_terms,
        )?;
        let input_margin = gain.abs().dot(&state_margin.transpose());
        log::debug!(
            "tube margins {:?} and input margin {input_margin}",
            state_margin.as_slice()
        );
        Ok(Self {
            params,
            config,
            tube: Tube {
                gain,
                state_margin,
                input_margin,
                closed_loop,
            },
        })
    }

    /// Designs the tube on the nominal model of the parameters.
    pub fn nominal(params: Arc<ParameterSet>) -> Result<Self> {
        let config = TubeConfig::new(&params);
        Self::new(&Discretizer::nominal(params)?, config)
    }

    /// Designed tube.
    pub fn tube(&self) -> &Tube {
        &self.tube
    }

    /// Configuration of the design.
    pub fn config(&self) -> &TubeConfig {
        &self.config
    }

    /// Moves every finite state bound inwards by the state margin and shrinks the input
    /// interval by the input margin.
    pub fn tighten(constraints: &ConstraintSet, tube: &Tube) -> Result<ConstraintSet> {
        let tightened = ConstraintSet {
            path: constraints.path.shrink(&tube.state_margin),
            target: constraints.target.shrink(&tube.state_margin),
            input: constraints.input.shrink(tube.input_margin),
        };
        tightened.validate()?;
        Ok(tightened)
    }

    /// Robust version of the nominal problem.
    pub fn augment(&self, nominal: OcpSpec) -> Result<OcpSpec> {
        if let OcpSpec::RobustTube(_) = nominal {
            return Err(Error::Configuration {
                component: "RobustTubeAugmenter",
                reason: "problem is already robust".to_string(),
            });
        }
        let constraints = Self::tighten(&ConstraintSet::nominal(&self.params), &self.tube)?;
        Ok(OcpSpec::RobustTube(Box::new(RobustTube {
            nominal,
            tube: self.tube.clone(),
            constraints,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpecTracking;

    fn params() -> Arc<ParameterSet> {
        Arc::new(ParameterSet::default())
    }

    fn augmenter(disturbance: Vector3<f64>) -> Result<RobustTubeAugmenter> {
        let params = params();
        let config = TubeConfig::new(&params).with_disturbance(disturbance);
        RobustTubeAugmenter::new(&Discretizer::nominal(params)?, config)
    }

    #[test]
    fn test_tightened_is_subset() -> Result<()> {
        let augmenter = augmenter(Vector3::new(0., 0., 0.1))?;
        let tube = augmenter.tube();
        assert!(tube.state_margin.iter().all(|m| *m >= 0.));
        assert!(tube.state_margin[2] >= 0.1);
        let nominal = ConstraintSet::nominal(&params());
        let tightened = RobustTubeAugmenter::tighten(&nominal, tube)?;
        assert!(tightened.is_subset_of(&nominal));
        assert!(tightened.target.contaminant.upper < nominal.target.contaminant.upper);
        assert_eq!(tightened.path.contaminant.lower, f64::NEG_INFINITY);

        let spec = augmenter.augment(OcpSpec::SpecTracking(SpecTracking::new()))?;
        assert_eq!(spec.tube(), Some(tube));
        assert!(matches!(spec.nominal(), OcpSpec::SpecTracking(_)));
        Ok(())
    }

    #[test]
    fn test_zero_disturbance_keeps_constraints() -> Result<()> {
        let augmenter = augmenter(Vector3::zeros())?;
        assert_eq!(augmenter.tube().state_margin, Vector3::zeros());
        assert_eq!(augmenter.tube().input_margin, 0.);
        let nominal = ConstraintSet::nominal(&params());
        assert_eq!(
            RobustTubeAugmenter::tighten(&nominal, augmenter.tube())?,
            nominal
        );
        Ok(())
    }

    #[test]
    fn test_empty_tightening_fails() -> Result<()> {
        let mut tube = Tube::zero();
        tube.state_margin = Vector3::new(100., 0., 0.);
        let nominal = ConstraintSet::nominal(&params());
        assert!(matches!(
            RobustTubeAugmenter::tighten(&nominal, &tube),
            Err(Error::EmptyInterval { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_point_input_tightening_fails() {
        let mut tube = Tube::zero();
        tube.input_margin = 0.5;
        let nominal = ConstraintSet::nominal(&params());
        assert!(matches!(
            RobustTubeAugmenter::tighten(&nominal, &tube),
            Err(Error::Configuration {
                component: "ConstraintSet",
                ..
            })
        ));
    }

    #[test]
    fn test_series() -> Result<()> {
        let half = Matrix3::identity() * 0.5;
        let bound = steady_state_bound(&half, &Vector3::new(1., 0., 2.), 1e-14, 1000)?;
        assert!((bound - Vector3::new(2., 0., 4.)).amax() < 1e-12);
        let unstable = Matrix3::identity() * 2.;
        assert!(matches!(
            steady_state_bound(&unstable, &Vector3::new(1., 1., 1.), 1e-14, 1000),
            Err(Error::Configuration { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_nested_augmentation_fails() -> Result<()> {
        let augmenter = augmenter(Vector3::new(0., 0., 0.1))?;
        let robust = augmenter.augment(OcpSpec::SpecTracking(SpecTracking::new()))?;
        assert!(matches!(
            augmenter.augment(robust),
            Err(Error::Configuration { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_feedback() {
        let mut tube = Tube::zero();
        tube.gain = RowVector3::new(1., 0., -0.5);
        tube.state_margin = Vector3::new(1., 1., 1.);
        let z = State::new(50., 20., 40.);
        let x = State::new(50.5, 20., 41.);
        assert!(tube.contains(&x, &z));
        assert!((tube.feedback(&x, &z) - 0.).abs() < 1e-14);
        assert!(!tube.contains(&State::new(52., 20., 40.), &z));
    }
}
