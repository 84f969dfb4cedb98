use crate::{Error, Result};

/// Day-ahead electricity prices in €/kWh for each hour of the day.
const DAY_AHEAD_PRICES: [f64; 24] = [
    0.09, 0.08, 0.08, 0.09, 0.10, 0.12, 0.18, 0.25, 0.28, 0.30, 0.32, 0.35, 0.37, 0.34, 0.30, 0.26,
    0.23, 0.20, 0.18, 0.16, 0.14, 0.12, 0.10, 0.09,
];

#[cfg_attr(doc, katexit::katexit)]
/// Smooth periodic time-of-use price.
///
/// Prices are given on an equidistant grid over one period and connected by a periodic
/// Catmull-Rom spline, so the price curve and its first derivative are continuous, including
/// across the period boundary. For the grid nodes $p_{i-1}, p_i, p_{i+1}, p_{i+2}$ and the
/// local coordinate $s \in [0, 1)$
///
/// $$ \lambda(s) = \tfrac{1}{2} \big( 2 p_i + (p_{i+1} - p_{i-1}) s + (2 p_{i-1} - 5 p_i + 4
/// p_{i+1} - p_{i+2}) s^2 + (3 p_i - p_{i-1} - 3 p_{i+1} + p_{i+2}) s^3 \big). $$
#[derive(Debug, Clone, PartialEq)]
pub struct TariffModel {
    prices: Vec<f64>,
    period: f64,
    reference_price: f64,
}

impl Default for TariffModel {
    fn default() -> Self {
        Self {
            prices: DAY_AHEAD_PRICES.to_vec(),
            period: 24.,
            reference_price: 0.1,
        }
    }
}

impl TariffModel {
    /// Creates a tariff of hourly prices repeating every 24 h.
    pub fn new(prices: Vec<f64>) -> Result<Self> {
        if prices.len() < 2 {
            return Err(Error::Configuration {
                component: "TariffModel",
                reason: format!("at least 2 prices required but {} given", prices.len()),
            });
        }
        if let Some(p) = prices.iter().find(|p| !(p.is_finite() && **p >= 0.)) {
            return Err(Error::Configuration {
                component: "TariffModel",
                reason: format!("prices must be finite and >= 0 but {p} given"),
            });
        }
        Ok(Self {
            prices,
            ..Self::default()
        })
    }

    /// Sets the period over which the prices repeat.
    pub fn with_period(mut self, period: f64) -> Result<Self> {
        if !(period.is_finite() && period > 0.) {
            return Err(Error::Configuration {
                component: "TariffModel",
                reason: format!("period must be finite and > 0 but is {period}"),
            });
        }
        self.period = period;
        Ok(self)
    }

    /// Sets the price which normalizes the economic objective.
    pub fn with_reference_price(mut self, reference_price: f64) -> Result<Self> {
        if !(reference_price.is_finite() && reference_price > 0.) {
            return Err(Error::Configuration {
                component: "TariffModel",
                reason: format!("reference price must be finite and > 0 but is {reference_price}"),
            });
        }
        self.reference_price = reference_price;
        Ok(self)
    }

    /// Period of the tariff.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Price at time t.
    pub fn price(&self, t: f64) -> f64 {
        let n = self.prices.len();
        let spacing = self.period / n as f64;
        let tau = t.rem_euclid(self.period) / spacing;
        let i = (tau.floor() as usize).min(n - 1);
        let s = tau - i as f64;
        let p = |j: isize| self.prices[(i as isize + j).rem_euclid(n as isize) as usize];
        let (p0, p1, p2, p3) = (p(-1), p(0), p(1), p(2));
        0.5 * (2. * p1
            + (p2 - p0) * s
            + (2. * p0 - 5. * p1 + 4. * p2 - p3) * s.powi(2)
            + (3. * p1 - p0 - 3. * p2 + p3) * s.powi(3))
    }

    /// Price at time t relative to the reference price.
    pub fn normalized_price(&self, t: f64) -> f64 {
        self.price(t) / self.reference_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EQ_EPS: f64 = 1e-12;

    #[test]
    fn test_price_interpolates_nodes() {
        let tariff = TariffModel::default();
        for (hour, price) in DAY_AHEAD_PRICES.iter().enumerate() {
            assert!((tariff.price(hour as f64) - price).abs() < EQ_EPS);
        }
    }

    #[test]
    fn test_price_periodic_and_smooth() {
        let tariff = TariffModel::default();
        for t in [0., 3.3, 11.7, 23.9] {
            assert!((tariff.price(t) - tariff.price(t + 24.)).abs() < 1e-10);
            assert!((tariff.price(t) - tariff.price(t - 48.)).abs() < 1e-10);
        }
        let h = 1e-6;
        for node in [0., 1., 12., 24.] {
            let left = (tariff.price(node) - tariff.price(node - h)) / h;
            let right = (tariff.price(node + h) - tariff.price(node)) / h;
            assert!((left - right).abs() < 1e-4);
        }
    }

    #[test]
    fn test_invalid_tariff() {
        assert!(TariffModel::new(vec![0.1]).is_err());
        assert!(TariffModel::new(vec![0.1, f64::NAN]).is_err());
        assert!(TariffModel::default().with_reference_price(0.).is_err());
        assert!(TariffModel::default().with_period(-1.).is_err());
    }

    #[test]
    fn test_normalized_price() -> Result<()> {
        let tariff = TariffModel::new(vec![0.3; 4])?.with_reference_price(0.1)?;
        assert!((tariff.normalized_price(7.) - 3.).abs() < EQ_EPS);
        Ok(())
    }
}
