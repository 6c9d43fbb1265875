//! Wire fields carry sizes and mtimes as ASCII strings (sometimes with a
//! trailing `.0` for mtimes); this parses either form the way the
//! original `int(float(x))` coercion did.

#[must_use]
pub fn parse_num(field: &str) -> Option<u64> {
    if let Ok(v) = field.parse::<u64>() {
        return Some(v);
    }
    field.parse::<f64>().ok().map(|v| v as u64)
}
