//! Display formatting for monetary and percentage values
//!
//! All budget math happens in the data service. This module only renders
//! the numbers it relays.

/// Render an amount as whole US dollars, e.g. `1500000.4` → `"$1,500,000"`.
///
/// Rounds half away from zero. Non-finite input renders as `"$0"`.
pub fn format_currency(amount: f64) -> String {
    let rounded = if amount.is_finite() { amount.round() } else { 0.0 };

    // `-0.4` rounds to `-0.0`, which must not print a sign
    let negative = rounded < 0.0;
    let digits = group_thousands(rounded.abs() as u128);

    if negative {
        format!("-${}", digits)
    } else {
        format!("${}", digits)
    }
}

/// Render a percentage as the data service reported it, e.g. `87.5` → `"87.5%"`.
pub fn format_percent(value: f64) -> String {
    if value.is_finite() {
        format!("{}%", value)
    } else {
        "0%".to_string()
    }
}

fn group_thousands(value: u128) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);

    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    out
}
