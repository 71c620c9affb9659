//! Canonical forms for the three customer identifiers.
//!
//! All three functions are pure and total: unparseable input maps to
//! `None`, never an error. Matching elsewhere in the crate is exact
//! equality on these canonical forms.

/// Normalize a Vietnamese phone number to the 10-digit domestic format.
///
/// Strips formatting, folds the `84` country prefix into a leading `0`
/// and pads 9-digit numbers. Cleaned strings of 10+ digits that still
/// don't match the domestic pattern are passed through as-is; anything
/// shorter than 9 digits is rejected.
pub fn normalize_phone(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    // "+84" loses its '+' in the digit filter, so both forms land here.
    let phone = match digits.strip_prefix("84") {
        Some(rest) => format!("0{rest}"),
        None => digits,
    };

    if phone.len() == 10 && phone.starts_with('0') {
        return Some(phone);
    }
    if phone.len() == 9 {
        return Some(format!("0{phone}"));
    }

    // Lenient pass-through: keep the cleaned digits even when they
    // don't fit the 10-digit pattern.
    if phone.len() >= 9 {
        Some(phone)
    } else {
        None
    }
}

/// Normalize an email address: trim, lowercase, and require both an
/// `@` and a `.`. A syntactic sanity check, not RFC validation.
pub fn normalize_email(raw: Option<&str>) -> Option<String> {
    let email = raw?.trim().to_lowercase();
    if email.contains('@') && email.contains('.') {
        Some(email)
    } else {
        None
    }
}

/// Normalize a Vietnamese tax id (MST): strip formatting and accept
/// only 10 to 13 digit results.
pub fn normalize_tax_id(raw: Option<&str>) -> Option<String> {
    let digits: String = raw?.chars().filter(|c| c.is_ascii_digit()).collect();
    if (10..=13).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}
