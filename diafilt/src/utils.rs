use crate::{Error, Result};
use faer::Mat;
use faer_ext::{IntoFaer, IntoNalgebra};
use nalgebra::{DVector, SVector};

/// Closed interval of reals, where infinite limits denote an unbounded side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Lower limit.
    pub lower: f64,
    /// Upper limit.
    pub upper: f64,
}

impl Interval {
    /// Creates an interval and checks that it is non empty.
    pub fn new(name: &'static str, lower: f64, upper: f64) -> Result<Self> {
        let interval = Self { lower, upper };
        interval.validate(name)?;
        Ok(interval)
    }

    /// Interval without limits.
    pub fn unbounded() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Interval bounded from above only.
    pub fn at_most(upper: f64) -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper,
        }
    }

    /// Returns an error if a limit is NaN or the interval is empty.
    pub fn validate(&self, name: &'static str) -> Result<()> {
        if self.lower.is_nan() || self.upper.is_nan() || self.lower > self.upper {
            return Err(Error::EmptyInterval {
                name,
                lower: self.lower,
                upper: self.upper,
            });
        }
        Ok(())
    }

    /// Returns an error if the interval is empty or a single point, the latter reported as a
    /// configuration error of the component.
    pub fn validate_interior(&self, name: &'static str, component: &'static str) -> Result<()> {
        self.validate(name)?;
        if self.lower >= self.upper {
            return Err(Error::Configuration {
                component,
                reason: format!(
                    "{name} [{}, {}] must have an interior",
                    self.lower, self.upper
                ),
            });
        }
        Ok(())
    }

    /// Returns true if value lies within the limits.
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Returns true if both limits are finite.
    pub fn is_bounded(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }

    /// Returns true if self lies within other.
    pub fn is_subset_of(&self, other: &Interval) -> bool {
        self.lower >= other.lower && self.upper <= other.upper
    }

    /// Moves finite limits inwards by margin, infinite limits stay unbounded.
    pub fn shrink(&self, margin: f64) -> Interval {
        let lower = if self.lower.is_finite() {
            self.lower + margin
        } else {
            self.lower
        };
        let upper = if self.upper.is_finite() {
            self.upper - margin
        } else {
            self.upper
        };
        Interval { lower, upper }
    }

    /// Largest interval contained in self and other, possibly empty.
    pub fn intersect(&self, other: &Interval) -> Interval {
        Interval {
            lower: self.lower.max(other.lower),
            upper: self.upper.min(other.upper),
        }
    }

    /// Projects value onto the interval.
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    /// Distance of value to the interval, zero inside.
    pub fn excess(&self, value: f64) -> f64 {
        (self.lower - value).max(value - self.upper).max(0.)
    }

    /// Scales both limits by factor > 0.
    pub fn scale(&self, factor: f64) -> Interval {
        Interval {
            lower: self.lower * factor,
            upper: self.upper * factor,
        }
    }
}

/// Convert type to svector with D entries
pub trait IntoSVector<const D: usize> {
    /// Returns svector of the D entries starting at row offset.
    fn segment_svector(self, offset: usize) -> SVector<f64, D>;
}

impl<const D: usize> IntoSVector<D> for &Mat<f64> {
    fn segment_svector(self, offset: usize) -> SVector<f64, D> {
        SVector::from_fn(|i, _| self[(offset + i, 0)])
    }
}

/// Converts a nalgebra column vector into a faer column matrix.
pub(crate) fn to_faer(v: &DVector<f64>) -> Mat<f64> {
    v.view_range(.., ..).into_faer().to_owned()
}

/// Converts a faer column matrix into a nalgebra column vector.
pub(crate) fn to_nalgebra(x: &Mat<f64>) -> DVector<f64> {
    x.as_ref().into_nalgebra().column(0).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_segment_svector() -> Result<()> {
        let mat = mat![[1.], [2.], [3.], [4.]];
        let v: SVector<f64, 2> = mat.segment_svector(1);
        assert_eq!(v, SVector::<f64, 2>::new(2., 3.));
        Ok(())
    }

    #[test]
    #[should_panic]
    fn test_segment_svector_panic() {
        let mat = mat![[1.], [1.], [1.]];
        let _v: SVector<f64, 4> = mat.segment_svector(0);
    }

    #[test]
    fn test_interval_empty() {
        assert_eq!(
            Interval::new("u", 1., 0.),
            Err(Error::EmptyInterval {
                name: "u",
                lower: 1.,
                upper: 0.
            })
        );
        assert!(Interval::new("u", f64::NAN, 0.).is_err());
    }

    #[test]
    fn test_interval_interior() -> Result<()> {
        Interval::new("u", 0., 1.)?.validate_interior("u", "Test")?;
        Interval::at_most(15.).validate_interior("c", "Test")?;
        assert!(matches!(
            Interval::new("u", 0.5, 0.5)?.validate_interior("u", "Test"),
            Err(Error::Configuration {
                component: "Test",
                ..
            })
        ));
        assert!(matches!(
            Interval::new("u", 1., 0.).map(|i| i.validate_interior("u", "Test")),
            Err(Error::EmptyInterval { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_interval_shrink_keeps_infinite_limits() -> Result<()> {
        let i = Interval::at_most(15.).shrink(2.);
        assert_eq!(i.lower, f64::NEG_INFINITY);
        assert_eq!(i.upper, 13.);
        assert!(i.is_subset_of(&Interval::at_most(15.)));
        assert_eq!(Interval::new("v", 1., 3.)?.shrink(0.), Interval::new("v", 1., 3.)?);
        Ok(())
    }

    #[test]
    fn test_interval_excess() -> Result<()> {
        let i = Interval::new("c", 0., 10.)?;
        assert_eq!(i.excess(5.), 0.);
        assert_eq!(i.excess(12.), 2.);
        assert_eq!(i.excess(-1.), 1.);
        assert_eq!(i.clamp(12.), 10.);
        Ok(())
    }
}
