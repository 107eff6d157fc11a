//! Scope inference from snippet context.
//!
//! Scans lowercased snippet text:
//! - `vacuum`/`vac` → `altitude: "vac"`, else `sea level`/`sl ` → `"sl"`,
//! - `NN% throttle` → `throttle: "NN%"`.

use regex::Regex;

use truthledger_model::Scope;

/// Infer a claim scope from lowercased snippet text.
pub fn infer_scope(text_lower: &str) -> Scope {
    let mut scope = Scope::new();

    if text_lower.contains("vacuum") || text_lower.contains("vac") {
        scope.insert_text("altitude", "vac");
    } else if text_lower.contains("sea level") || text_lower.contains("sl ") {
        scope.insert_text("altitude", "sl");
    }

    let throttle_re = Regex::new(r"(\d{1,3})% throttle").unwrap();
    if let Some(caps) = throttle_re.captures(text_lower) {
        scope.insert_text("throttle", format!("{}%", &caps[1]));
    }

    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthledger_model::ScopeValue;

    fn text_of(scope: &Scope, key: &str) -> Option<String> {
        match scope.get(key) {
            Some(ScopeValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    #[test]
    fn vacuum_beats_sea_level() {
        let scope = infer_scope("vacuum isp measured at sea level test stand");
        assert_eq!(text_of(&scope, "altitude").as_deref(), Some("vac"));
    }

    #[test]
    fn sea_level_detected() {
        let scope = infer_scope("thrust at sea level is 2300 kn");
        assert_eq!(text_of(&scope, "altitude").as_deref(), Some("sl"));
    }

    #[test]
    fn throttle_percentage_captured() {
        let scope = infer_scope("at 65% throttle the engine produced less thrust at sea level");
        assert_eq!(text_of(&scope, "throttle").as_deref(), Some("65%"));
        assert_eq!(text_of(&scope, "altitude").as_deref(), Some("sl"));
    }

    #[test]
    fn no_context_gives_empty_scope() {
        assert!(infer_scope("the engine is quite large").is_empty());
    }
}
