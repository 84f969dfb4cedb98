use crate::{Discretizer, Error, ParameterSet, ProcessModel, Result, Structure};
use std::{fmt::Display, sync::Arc};

/// Deviation of the plant from the prediction model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScenarioVariant {
    /// Plant equals the prediction model.
    Nominal,
    /// Membrane area drops to `area_factor` of its value at time `at`.
    Tear {
        /// Time of the tear.
        at: f64,
        /// Remaining fraction of the membrane area.
        area_factor: f64,
    },
    /// Contaminant mass transfer coefficient scaled by `factor`.
    KmMismatch {
        /// Scale of the mass transfer coefficient.
        factor: f64,
    },
    /// Product passes the membrane.
    ProteinLeakage {
        /// Product sieving coefficient.
        sieving: f64,
        /// Product mass transfer coefficient.
        mass_transfer: f64,
    },
}

impl ScenarioVariant {
    /// Tear halving the membrane area after two hours.
    pub fn tear() -> Self {
        ScenarioVariant::Tear {
            at: 2.,
            area_factor: 0.5,
        }
    }

    /// Leakage through a fouled membrane.
    pub fn protein_leakage() -> Self {
        match Structure::protein_leakage() {
            Structure::ProteinLeakage {
                sieving,
                mass_transfer,
            } => ScenarioVariant::ProteinLeakage {
                sieving,
                mass_transfer,
            },
            _ => ScenarioVariant::Nominal,
        }
    }

    /// Short name for reports.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioVariant::Nominal => "nominal",
            ScenarioVariant::Tear { .. } => "tear",
            ScenarioVariant::KmMismatch { .. } => "km mismatch",
            ScenarioVariant::ProteinLeakage { .. } => "protein leakage",
        }
    }

    /// Plant model of the variant on the given parameters.
    pub fn apply(&self, params: &ParameterSet) -> Result<ProcessModel> {
        match *self {
            ScenarioVariant::Nominal => ProcessModel::new(Arc::new(params.clone())),
            ScenarioVariant::Tear { at, area_factor } => {
                ProcessModel::new(Arc::new(params.clone()))?
                    .with_structure(Structure::Tear { at, area_factor })
            }
            ScenarioVariant::KmMismatch { factor } => {
                if !(factor.is_finite() && factor > 0.) {
                    return Err(Error::Configuration {
                        component: "ScenarioVariant",
                        reason: format!("mass transfer factor must be > 0 but is {factor}"),
                    });
                }
                let params = params.clone().with_mass_transfer(params.mass_transfer * factor);
                ProcessModel::new(Arc::new(params))
            }
            ScenarioVariant::ProteinLeakage {
                sieving,
                mass_transfer,
            } => ProcessModel::new(Arc::new(params.clone()))?.with_structure(
                Structure::ProteinLeakage {
                    sieving,
                    mass_transfer,
                },
            ),
        }
    }
}

/// Plant of one run, a structural or mass transfer variant with scaled permeability and
/// membrane area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scenario {
    /// Deviation of the plant structure.
    pub variant: ScenarioVariant,
    /// Scale of the permeability.
    pub permeability_scale: f64,
    /// Scale of the membrane area.
    pub area_scale: f64,
}

impl Scenario {
    /// Variant with nominal permeability and area.
    pub fn new(variant: ScenarioVariant) -> Self {
        Self {
            variant,
            permeability_scale: 1.,
            area_scale: 1.,
        }
    }

    /// Scales permeability and membrane area.
    pub fn perturb(mut self, permeability_scale: f64, area_scale: f64) -> Self {
        self.permeability_scale = permeability_scale;
        self.area_scale = area_scale;
        self
    }
}

impl Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (k x {:.3}, A x {:.3})",
            self.variant.name(),
            self.permeability_scale,
            self.area_scale
        )
    }
}

/// Builds the plants the closed loop runs against.
#[derive(Debug, Clone)]
pub struct ScenarioGenerator {
    params: Arc<ParameterSet>,
}

impl ScenarioGenerator {
    /// Plants derived from the given nominal parameters.
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self { params }
    }

    /// Discretized plant of the scenario, stepping with the sampling period.
    pub fn plant(&self, scenario: &Scenario) -> Result<Discretizer> {
        for (name, scale) in [
            ("permeability scale", scenario.permeability_scale),
            ("area scale", scenario.area_scale),
        ] {
            if !(scale.is_finite() && scale > 0.) {
                return Err(Error::Configuration {
                    component: "Scenario",
                    reason: format!("{name} must be > 0 but is {scale}"),
                });
            }
        }
        let params = (*self.params)
            .clone()
            .with_permeability(self.params.permeability * scenario.permeability_scale)
            .with_membrane_area(self.params.membrane_area * scenario.area_scale);
        let model = scenario.variant.apply(&params)?;
        Discretizer::new(model, self.params.sampling_period)
    }
}
