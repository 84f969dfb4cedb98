use crate::{Error, Interval, Result};
use std::fmt::Display;

/// Physical constants, setpoints and sizing of a diafiltration batch.
///
/// Volumes are given in L, concentrations in mol/m³, times in h, the membrane area in m² and
/// transport coefficients in L/(m² h). A parameter set is constructed through [Default] and the
/// `with_*` setters, checked by [ParameterSet::validate] and afterwards shared read-only behind
/// an [std::sync::Arc].
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    /// Initial retentate volume.
    pub initial_volume: f64,
    /// Initial product (protein) concentration.
    pub initial_product: f64,
    /// Initial contaminant (lactose) concentration.
    pub initial_contaminant: f64,
    /// Membrane permeability k.
    pub permeability: f64,
    /// Effective membrane area A.
    pub membrane_area: f64,
    /// Gel layer concentration limiting the permeate flux.
    pub gel_concentration: f64,
    /// Contaminant mass-transfer coefficient k_M,L.
    pub mass_transfer: f64,
    /// Contaminant sieving coefficient α.
    pub sieving: f64,
    /// Terminal product concentration target, reached from below.
    pub target_product: f64,
    /// Terminal contaminant concentration target, reached from above.
    pub target_contaminant: f64,
    /// Path upper bound of the contaminant concentration.
    pub max_contaminant: f64,
    /// Process-safe retentate volume bounds.
    pub volume_bounds: Interval,
    /// Path bounds of the product concentration.
    pub product_bounds: Interval,
    /// Bounds of the diafiltration-to-permeate flow ratio.
    pub input_bounds: Interval,
    /// Sampling period of the controller and step of the discretization.
    pub sampling_period: f64,
    /// Number of state stages N of a receding horizon.
    pub horizon: usize,
    /// Maximal number of sampling instants of a batch.
    pub max_steps: usize,
}

impl Default for ParameterSet {
    fn default() -> Self {
        let gel_concentration = 319.;
        Self {
            initial_volume: 100.,
            initial_product: 10.,
            initial_contaminant: 150.,
            permeability: 17.244,
            membrane_area: 1.,
            gel_concentration,
            mass_transfer: 57.6,
            sieving: 1.3,
            target_product: 100.,
            target_contaminant: 15.,
            max_contaminant: 570.,
            volume_bounds: Interval {
                lower: 1.,
                upper: 110.,
            },
            product_bounds: Interval {
                lower: 5.,
                upper: 0.9 * gel_concentration,
            },
            input_bounds: Interval {
                lower: 0.,
                upper: 1.,
            },
            sampling_period: 1. / 6.,
            horizon: 20,
            max_steps: 36,
        }
    }
}

impl ParameterSet {
    /// Creates the nominal parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial state.
    pub fn with_initial_state(mut self, volume: f64, product: f64, contaminant: f64) -> Self {
        self.initial_volume = volume;
        self.initial_product = product;
        self.initial_contaminant = contaminant;
        self
    }

    /// Sets the membrane permeability.
    pub fn with_permeability(mut self, permeability: f64) -> Self {
        self.permeability = permeability;
        self
    }

    /// Sets the effective membrane area.
    pub fn with_membrane_area(mut self, membrane_area: f64) -> Self {
        self.membrane_area = membrane_area;
        self
    }

    /// Sets the contaminant mass-transfer coefficient.
    pub fn with_mass_transfer(mut self, mass_transfer: f64) -> Self {
        self.mass_transfer = mass_transfer;
        self
    }

    /// Sets the terminal product and contaminant concentration targets.
    pub fn with_targets(mut self, product: f64, contaminant: f64) -> Self {
        self.target_product = product;
        self.target_contaminant = contaminant;
        self
    }

    /// Sets the bounds of the control input.
    pub fn with_input_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.input_bounds = Interval { lower, upper };
        self
    }

    /// Sets the sampling period.
    pub fn with_sampling_period(mut self, sampling_period: f64) -> Self {
        self.sampling_period = sampling_period;
        self
    }

    /// Sets the number of state stages of the receding horizon.
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    /// Sets the maximal number of sampling instants of a batch.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Initial state as [volume, product, contaminant].
    pub fn initial_state(&self) -> [f64; 3] {
        [
            self.initial_volume,
            self.initial_product,
            self.initial_contaminant,
        ]
    }

    /// Path bounds of the contaminant concentration.
    pub fn contaminant_bounds(&self) -> Interval {
        Interval::at_most(self.max_contaminant)
    }

    /// Batch duration budget.
    pub fn time_budget(&self) -> f64 {
        self.max_steps as f64 * self.sampling_period
    }

    fn configuration_error(reason: String) -> Error {
        Error::Configuration {
            component: "ParameterSet",
            reason,
        }
    }

    /// Checks positivity of the physical constants and the consistency of bounds and targets.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("initial_volume", self.initial_volume),
            ("initial_product", self.initial_product),
            ("initial_contaminant", self.initial_contaminant),
            ("permeability", self.permeability),
            ("membrane_area", self.membrane_area),
            ("gel_concentration", self.gel_concentration),
            ("mass_transfer", self.mass_transfer),
            ("sieving", self.sieving),
            ("target_product", self.target_product),
            ("target_contaminant", self.target_contaminant),
            ("max_contaminant", self.max_contaminant),
            ("sampling_period", self.sampling_period),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.) {
                return Err(Self::configuration_error(format!(
                    "{name} must be finite and > 0 but is {value}"
                )));
            }
        }
        self.volume_bounds.validate("volume_bounds")?;
        self.product_bounds.validate("product_bounds")?;
        self.input_bounds
            .validate_interior("input_bounds", "ParameterSet")?;
        if !self.input_bounds.is_bounded() {
            return Err(Self::configuration_error(
                "input bounds must be finite".to_string(),
            ));
        }
        if self.volume_bounds.lower <= 0. {
            return Err(Self::configuration_error(format!(
                "lower volume bound must be > 0 but is {}",
                self.volume_bounds.lower
            )));
        }
        if self.product_bounds.lower <= 0. || self.product_bounds.upper >= self.gel_concentration
        {
            return Err(Self::configuration_error(format!(
                "product bounds [{}, {}] must lie within (0, {})",
                self.product_bounds.lower, self.product_bounds.upper, self.gel_concentration
            )));
        }
        if !self.volume_bounds.contains(self.initial_volume)
            || !self.product_bounds.contains(self.initial_product)
            || self.initial_contaminant > self.max_contaminant
        {
            return Err(Self::configuration_error(
                "initial state violates the path bounds".to_string(),
            ));
        }
        if !self.product_bounds.contains(self.target_product) {
            return Err(Self::configuration_error(format!(
                "target product {} lies outside the product bounds",
                self.target_product
            )));
        }
        if self.target_contaminant > self.max_contaminant {
            return Err(Self::configuration_error(format!(
                "target contaminant {} exceeds the maximal contaminant {}",
                self.target_contaminant, self.max_contaminant
            )));
        }
        if self.horizon < 2 {
            return Err(Self::configuration_error(format!(
                "horizon must contain at least 2 stages but has {}",
                self.horizon
            )));
        }
        if self.max_steps == 0 {
            return Err(Self::configuration_error(
                "max_steps must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Display for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = [
            ("Initial state", format!("{:?}", self.initial_state())),
            ("Permeability", format!("{:.4}", self.permeability)),
            ("Membrane area", format!("{:.4}", self.membrane_area)),
            ("Mass transfer", format!("{:.4}", self.mass_transfer)),
            (
                "Targets",
                format!("{} / {}", self.target_product, self.target_contaminant),
            ),
            ("Sampling period", format!("{:.4}", self.sampling_period)),
            ("Horizon", format!("{}", self.horizon)),
            ("Max. steps", format!("{}", self.max_steps)),
        ]
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<String>>()
        .join("\n");
        write!(
            f,
            "{0:-^1$}\n{rows}\n{2:-^1$}",
            " Parameters ".to_string(),
            36,
            String::new()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() -> Result<()> {
        ParameterSet::default().validate()
    }

    #[test]
    fn test_non_positive_constant() {
        let params = ParameterSet::new().with_mass_transfer(0.);
        assert!(matches!(
            params.validate(),
            Err(Error::Configuration {
                component: "ParameterSet",
                ..
            })
        ));
        let params = ParameterSet::new().with_permeability(f64::NAN);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_inverted_input_bounds() {
        let params = ParameterSet::new().with_input_bounds(1., 0.);
        assert_eq!(
            params.validate(),
            Err(Error::EmptyInterval {
                name: "input_bounds",
                lower: 1.,
                upper: 0.
            })
        );
    }

    #[test]
    fn test_point_input_bounds() {
        let params = ParameterSet::new().with_input_bounds(0.5, 0.5);
        assert!(matches!(
            params.validate(),
            Err(Error::Configuration {
                component: "ParameterSet",
                ..
            })
        ));
    }

    #[test]
    fn test_inconsistent_targets_and_horizon() {
        assert!(ParameterSet::new().with_targets(300., 15.).validate().is_err());
        assert!(ParameterSet::new().with_targets(100., 600.).validate().is_err());
        assert!(ParameterSet::new().with_horizon(1).validate().is_err());
        assert!(
            ParameterSet::new()
                .with_initial_state(0.5, 10., 150.)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_time_budget() {
        let params = ParameterSet::default();
        assert!((params.time_budget() - 6.).abs() < 1e-12);
    }
}
