//! Unit normalization for extracted values.

use std::collections::HashMap;

/// Parse a numeric capture, stripping thousands separators. `None` on NaN or
/// garbage.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// Factor table mapping lowercase unit names to multipliers into the target
/// unit. Unknown units multiply by 1.
pub fn convert(value: f64, unit: &str, factors: &HashMap<String, f64>) -> f64 {
    value * factors.get(&unit.to_lowercase()).copied().unwrap_or(1.0)
}

/// Newtons from kN/MN/lbf/klbf.
pub fn thrust_factors() -> HashMap<String, f64> {
    HashMap::from([
        ("n".to_string(), 1.0),
        ("kn".to_string(), 1000.0),
        ("mn".to_string(), 1e6),
        ("lbf".to_string(), 4.44822),
        ("klbf".to_string(), 4448.22),
    ])
}

/// Seconds; aliases only.
pub fn isp_factors() -> HashMap<String, f64> {
    HashMap::from([
        ("s".to_string(), 1.0),
        ("sec".to_string(), 1.0),
        ("seconds".to_string(), 1.0),
    ])
}

/// Kilograms from t/tonnes/lb.
pub fn mass_factors() -> HashMap<String, f64> {
    HashMap::from([
        ("kg".to_string(), 1.0),
        ("t".to_string(), 1000.0),
        ("tonne".to_string(), 1000.0),
        ("tonnes".to_string(), 1000.0),
        ("lb".to_string(), 0.453592),
        ("lbs".to_string(), 0.453592),
    ])
}

/// Bar from MPa/psi/atm.
pub fn pressure_factors() -> HashMap<String, f64> {
    HashMap::from([
        ("bar".to_string(), 1.0),
        ("mpa".to_string(), 10.0),
        ("psi".to_string(), 0.0689476),
        ("atm".to_string(), 1.01325),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_strips_thousands_separators() {
        assert_eq!(parse_number("2,300"), Some(2300.0));
        assert_eq!(parse_number("1,234,567.5"), Some(1234567.5));
        assert_eq!(parse_number("350"), Some(350.0));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("kN"), None);
    }

    #[test]
    fn thrust_conversion() {
        let f = thrust_factors();
        assert_eq!(convert(2300.0, "kN", &f), 2_300_000.0);
        assert_eq!(convert(2.3, "MN", &f), 2_300_000.0);
        assert!((convert(500.0, "klbf", &f) - 2_224_110.0).abs() < 1.0);
        // Unknown units pass through unscaled.
        assert_eq!(convert(42.0, "parsec", &f), 42.0);
    }

    #[test]
    fn pressure_conversion() {
        let f = pressure_factors();
        assert_eq!(convert(30.0, "MPa", &f), 300.0);
        assert!((convert(4351.0, "psi", &f) - 300.0).abs() < 0.5);
    }
}
