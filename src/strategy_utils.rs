use crate::models::{Decision, Decisions, MarketStep, SignalAction};
use std::collections::BTreeMap;

/// Create a hold decision (default when no threshold fired)
pub fn hold_decision() -> Decision {
    Decision {
        action: SignalAction::Hold,
        variables: BTreeMap::new(),
        rationale: String::new(),
    }
}

/// Create a buy decision carrying the diagnostics that triggered it
pub fn buy_decision(rationale: &str, variables: &[(&str, f64)]) -> Decision {
    Decision {
        action: SignalAction::Buy,
        variables: collect_variables(variables),
        rationale: rationale.to_string(),
    }
}

/// Create a sell decision carrying the diagnostics that triggered it
pub fn sell_decision(rationale: &str, variables: &[(&str, f64)]) -> Decision {
    Decision {
        action: SignalAction::Sell,
        variables: collect_variables(variables),
        rationale: rationale.to_string(),
    }
}

fn collect_variables(variables: &[(&str, f64)]) -> BTreeMap<String, f64> {
    variables
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

/// Hold for every instrument in the step.
pub fn hold_all(step: &MarketStep) -> Decisions {
    step.keys()
        .map(|ticker| (ticker.clone(), hold_decision()))
        .collect()
}
