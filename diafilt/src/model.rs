use crate::{Error, ParameterSet, Result};
use nalgebra::{SVector, Vector3};
use num_dual::DualNum;
use std::sync::Arc;

/// Number of state components.
pub const STATE_DIM: usize = 3;

/// Retentate state of the batch at one time instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State {
    /// Retentate volume.
    pub volume: f64,
    /// Product concentration.
    pub product: f64,
    /// Contaminant concentration.
    pub contaminant: f64,
}

impl State {
    /// Creates a state.
    pub fn new(volume: f64, product: f64, contaminant: f64) -> Self {
        Self {
            volume,
            product,
            contaminant,
        }
    }

    /// Initial state of a batch.
    pub fn initial(params: &ParameterSet) -> Self {
        Self::new(
            params.initial_volume,
            params.initial_product,
            params.initial_contaminant,
        )
    }

    /// State as column vector [volume, product, contaminant].
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.volume, self.product, self.contaminant)
    }

    /// Amount of retained product.
    pub fn product_mass(&self) -> f64 {
        self.volume * self.product
    }

    /// Amount of retained contaminant.
    pub fn contaminant_mass(&self) -> f64 {
        self.volume * self.contaminant
    }

    /// Returns true if the terminal target set is reached within relative tolerance.
    pub fn meets_target(&self, params: &ParameterSet, rel_tol: f64) -> bool {
        self.product >= params.target_product * (1. - rel_tol)
            && self.contaminant <= params.target_contaminant * (1. + rel_tol)
    }
}

impl From<Vector3<f64>> for State {
    fn from(x: Vector3<f64>) -> Self {
        Self::new(x[0], x[1], x[2])
    }
}

/// Functional form of the membrane transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Structure {
    /// Product is fully retained, the membrane area is constant.
    Nominal,
    /// The filter cake tears at time `at` and the effective membrane area drops to
    /// `area_factor` times its nominal value.
    Tear {
        /// Time of the tear.
        at: f64,
        /// Remaining fraction of the membrane area.
        area_factor: f64,
    },
    /// Product passes the membrane with its own sieving and mass-transfer coefficients.
    ProteinLeakage {
        /// Product sieving coefficient.
        sieving: f64,
        /// Product mass-transfer coefficient.
        mass_transfer: f64,
    },
}

impl Structure {
    /// Protein leakage through a fouled membrane.
    pub fn protein_leakage() -> Self {
        Self::ProteinLeakage {
            sieving: 1.3,
            mass_transfer: 3.6,
        }
    }

    fn validate(&self) -> Result<()> {
        let reason = match *self {
            Structure::Nominal => None,
            Structure::Tear { at, area_factor } => {
                if !(at.is_finite() && at >= 0.) {
                    Some(format!("tear time must be finite and >= 0 but is {at}"))
                } else if !(area_factor > 0. && area_factor <= 1.) {
                    Some(format!(
                        "area factor of a tear must lie in (0, 1] but is {area_factor}"
                    ))
                } else {
                    None
                }
            }
            Structure::ProteinLeakage {
                sieving,
                mass_transfer,
            } => {
                if !(sieving.is_finite() && sieving > 0.) {
                    Some(format!("product sieving must be > 0 but is {sieving}"))
                } else if !(mass_transfer.is_finite() && mass_transfer > 0.) {
                    Some(format!(
                        "product mass transfer must be > 0 but is {mass_transfer}"
                    ))
                } else {
                    None
                }
            }
        };
        match reason {
            Some(reason) => Err(Error::Configuration {
                component: "ProcessModel",
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[cfg_attr(doc, katexit::katexit)]
/// Right-hand side of the batch diafiltration ODE.
///
/// With the permeate flux $p = k A \ln(c_g / c_P)$ and the input $u$ being the ratio of
/// diafiltration to permeate flow, the retentate evolves as
///
/// $$ \dot V = (u - 1) p, \quad \dot c_P = \frac{c_P (1 - u) p - c_{P,p} p}{V}, \quad
/// \dot c_L = \frac{c_L (1 - u) p - c_{L,p} p}{V} $$
///
/// where the permeate concentrations follow the film model
///
/// $$ c_{i,p} = \frac{\alpha_i c_i}{1 + (\alpha_i - 1) \exp(p / (k_{M,i} A))}. $$
///
/// The nominal structure retains the product completely, $c_{P,p} = 0$.
///
/// One definition generic over [DualNum] serves simulation with `f64` as well as
/// differentiation inside the optimal control problems.
#[derive(Debug, Clone)]
pub struct ProcessModel {
    params: Arc<ParameterSet>,
    structure: Structure,
}

impl ProcessModel {
    /// Creates the nominal model and validates its parameters.
    pub fn new(params: Arc<ParameterSet>) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            structure: Structure::Nominal,
        })
    }

    /// Replaces the functional form of the membrane transport.
    pub fn with_structure(mut self, structure: Structure) -> Result<Self> {
        structure.validate()?;
        self.structure = structure;
        Ok(self)
    }

    /// Parameters of the model.
    pub fn params(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    /// Functional form of the model.
    pub fn structure(&self) -> Structure {
        self.structure
    }

    /// Effective membrane area at time t.
    pub fn effective_area(&self, t: f64) -> f64 {
        match self.structure {
            Structure::Tear { at, area_factor } if t >= at => {
                self.params.membrane_area * area_factor
            }
            _ => self.params.membrane_area,
        }
    }

    /// Permeate flux at time t for a retentate product concentration.
    pub fn permeate_flux<D: DualNum<f64>>(&self, t: f64, product: D) -> D {
        (D::from(self.params.gel_concentration) / product).ln()
            * (self.params.permeability * self.effective_area(t))
    }

    fn permeate_concentration<D: DualNum<f64>>(
        sieving: f64,
        mass_transfer: f64,
        area: f64,
        retentate: D,
        flux: D,
    ) -> D {
        retentate * sieving / ((flux / (mass_transfer * area)).exp() * (sieving - 1.) + 1.)
    }

    /// Evaluates the time derivative of the state x = [volume, product, contaminant] under
    /// input u at time t.
    ///
    /// Fails with [Error::ModelDomain] for a non-positive volume or product concentration.
    pub fn rhs<D: DualNum<f64>>(&self, t: f64, x: &SVector<D, 3>, u: D) -> Result<SVector<D, 3>> {
        let volume = x[0].clone();
        let product = x[1].clone();
        let contaminant = x[2].clone();
        if !(volume.re() > 0. && product.re() > 0.) {
            return Err(Error::ModelDomain {
                volume: volume.re(),
                product: product.re(),
            });
        }
        let area = self.effective_area(t);
        let flux = self.permeate_flux(t, product.clone());
        let retained = D::from(1.) - u.clone();

        let d_volume = (u - 1.) * flux.clone();

        let mut product_flow = product.clone() * retained.clone() * flux.clone();
        if let Structure::ProteinLeakage {
            sieving,
            mass_transfer,
        } = self.structure
        {
            let leak = Self::permeate_concentration(
                sieving,
                mass_transfer,
                area,
                product,
                flux.clone(),
            );
            product_flow = product_flow - leak * flux.clone();
        }

        let contaminant_permeate = Self::permeate_concentration(
            self.params.sieving,
            self.params.mass_transfer,
            area,
            contaminant.clone(),
            flux.clone(),
        );
        let contaminant_flow = (contaminant * retained - contaminant_permeate) * flux;

        Ok(SVector::<D, 3>::new(
            d_volume,
            product_flow / volume.clone(),
            contaminant_flow / volume,
        ))
    }
}
