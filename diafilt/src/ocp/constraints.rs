use crate::{Interval, ParameterSet, Result, State};
use nalgebra::Vector3;

/// Bounds of the state components at one stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBounds {
    /// Volume bounds.
    pub volume: Interval,
    /// Product concentration bounds.
    pub product: Interval,
    /// Contaminant concentration bounds.
    pub contaminant: Interval,
}

impl StageBounds {
    /// Process-safe bounds along the whole batch.
    pub fn path(params: &ParameterSet) -> Self {
        Self {
            volume: params.volume_bounds,
            product: params.product_bounds,
            contaminant: params.contaminant_bounds(),
        }
    }

    /// Terminal target set, product at least and contaminant at most their targets.
    pub fn target(params: &ParameterSet) -> Self {
        Self {
            volume: params.volume_bounds,
            product: Interval {
                lower: params.target_product,
                upper: params.product_bounds.upper,
            },
            contaminant: Interval::at_most(params.target_contaminant),
        }
    }

    /// Bounds ordered as [volume, product, contaminant].
    pub fn components(&self) -> [Interval; 3] {
        [self.volume, self.product, self.contaminant]
    }

    fn from_components(c: [Interval; 3]) -> Self {
        Self {
            volume: c[0],
            product: c[1],
            contaminant: c[2],
        }
    }

    /// Componentwise intersection.
    pub fn intersect(&self, other: &StageBounds) -> StageBounds {
        let (a, b) = (self.components(), other.components());
        Self::from_components([0, 1, 2].map(|i| a[i].intersect(&b[i])))
    }

    /// Moves every finite bound inwards by the componentwise margin.
    pub fn shrink(&self, margin: &Vector3<f64>) -> StageBounds {
        let c = self.components();
        Self::from_components([0, 1, 2].map(|i| c[i].shrink(margin[i])))
    }

    /// Returns true if every component lies within the one of other.
    pub fn is_subset_of(&self, other: &StageBounds) -> bool {
        let (a, b) = (self.components(), other.components());
        (0..3).all(|i| a[i].is_subset_of(&b[i]))
    }

    /// Returns true if the state satisfies all bounds.
    pub fn contains(&self, state: &State) -> bool {
        self.excess(state).iter().all(|e| *e == 0.)
    }

    /// Componentwise distance of the state to the bounds relative to the bound magnitude.
    pub fn excess(&self, state: &State) -> Vector3<f64> {
        let x = state.to_vector();
        let c = self.components();
        Vector3::from_fn(|i, _| {
            let excess = c[i].excess(x[i]);
            if excess == 0. {
                return 0.;
            }
            let reference = if x[i] > c[i].upper { c[i].upper } else { c[i].lower };
            excess / reference.abs().max(1.)
        })
    }

    /// Returns an error naming the first empty or single point component.
    pub fn validate(&self, names: [&'static str; 3]) -> Result<()> {
        for (interval, name) in self.components().iter().zip(names) {
            interval.validate_interior(name, "ConstraintSet")?;
        }
        Ok(())
    }
}

/// Path, terminal target and input constraints of an optimal control problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet {
    /// State bounds at every stage.
    pub path: StageBounds,
    /// Terminal target set.
    pub target: StageBounds,
    /// Input bounds.
    pub input: Interval,
}

impl ConstraintSet {
    /// Untightened constraints of the parameter set.
    pub fn nominal(params: &ParameterSet) -> Self {
        Self {
            path: StageBounds::path(params),
            target: StageBounds::target(params),
            input: params.input_bounds,
        }
    }

    /// Bounds of the final stage when the target set is enforced as hard constraint.
    pub fn terminal(&self) -> StageBounds {
        self.path.intersect(&self.target)
    }

    /// Returns an error if any bound interval is empty or a single point.
    pub fn validate(&self) -> Result<()> {
        self.path
            .validate(["path volume", "path product", "path contaminant"])?;
        self.target
            .validate(["target volume", "target product", "target contaminant"])?;
        self.terminal().validate([
            "terminal volume",
            "terminal product",
            "terminal contaminant",
        ])?;
        self.input.validate_interior("input", "ConstraintSet")
    }

    /// Returns true if every bound is at least as strict as the one of other.
    pub fn is_subset_of(&self, other: &ConstraintSet) -> bool {
        self.path.is_subset_of(&other.path)
            && self.target.is_subset_of(&other.target)
            && self.input.is_subset_of(&other.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_nominal_constraints() -> Result<()> {
        let params = ParameterSet::default();
        let constraints = ConstraintSet::nominal(&params);
        constraints.validate()?;
        let terminal = constraints.terminal();
        assert_eq!(terminal.product.lower, 100.);
        assert_eq!(terminal.contaminant.upper, 15.);
        assert!(terminal.is_subset_of(&constraints.path));
        Ok(())
    }

    #[test]
    fn test_excess() {
        let params = ParameterSet::default();
        let target = StageBounds::target(&params);
        assert!(target.contains(&State::new(50., 110., 10.)));
        let excess = target.excess(&State::new(50., 90., 30.));
        assert!((excess[1] - 0.1).abs() < 1e-12);
        assert!((excess[2] - 1.).abs() < 1e-12);
        assert_eq!(excess[0], 0.);
    }

    #[test]
    fn test_empty_terminal_set() {
        let mut params = ParameterSet::default();
        params.product_bounds.upper = 90.;
        let constraints = ConstraintSet::nominal(&params);
        assert!(matches!(
            constraints.validate(),
            Err(Error::EmptyInterval {
                name: "target product",
                ..
            })
        ));
    }
}
