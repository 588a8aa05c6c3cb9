use serde_json::{Number, Value};

/// Column class inferred from its name. Drives CSV rounding and re-aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Rate / Score / CTR / ROAS: 4 decimals, averaged when merged.
    Ratio,
    /// Spend / Cost / Revenue: 2 decimals, summed when merged.
    Money,
    /// Count / Impressions / Clicks / Users / Sessions / Orders: integers, summed when merged.
    Counter,
    Other,
}

const RATIO: &[&str] = &["Rate", "Score", "CTR", "ROAS"];
const MONEY: &[&str] = &["Spend", "Cost", "Revenue"];
const COUNTER: &[&str] = &["Count", "Impressions", "Clicks", "Users", "Sessions", "Orders"];

impl FieldKind {
    // First matching class wins: "CostPerClicks" is Money, "ClickRate" is Ratio.
    pub fn of(name: &str) -> Self {
        if RATIO.iter().any(|m| name.contains(m)) { return FieldKind::Ratio; }
        if MONEY.iter().any(|m| name.contains(m)) { return FieldKind::Money; }
        if COUNTER.iter().any(|m| name.contains(m)) { return FieldKind::Counter; }
        FieldKind::Other
    }

    pub fn is_additive(&self) -> bool { matches!(self, FieldKind::Money | FieldKind::Counter) }

    fn decimals(&self) -> Option<i32> {
        match self {
            FieldKind::Ratio => Some(4),
            FieldKind::Money => Some(2),
            FieldKind::Counter => Some(0),
            FieldKind::Other => None,
        }
    }
}

/// Apply the naming-convention rounding to a numeric value; everything else is returned untouched.
pub fn round_for_field(name: &str, v: &Value) -> Value {
    let Value::Number(n) = v else { return v.clone() };
    let Some(decimals) = FieldKind::of(name).decimals() else { return v.clone() };
    if n.is_i64() || n.is_u64() { return v.clone(); }
    let Some(f) = n.as_f64() else { return v.clone() };
    if !f.is_finite() { return v.clone(); }
    if decimals == 0 {
        return Value::Number(Number::from(f.round() as i64));
    }
    let scale = 10f64.powi(decimals);
    let rounded = (f * scale).round() / scale;
    Number::from_f64(rounded).map(Value::Number).unwrap_or_else(|| v.clone())
}
