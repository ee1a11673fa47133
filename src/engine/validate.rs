use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone regex"));

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email regex")
});

/// Strip the separators people type into phone fields; `None` if what is left
/// is not an E.164-like number (optional `+`, 7 to 15 digits).
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    PHONE_RE.is_match(&compact).then_some(compact)
}

pub fn is_valid_email(raw: &str) -> bool {
    raw.len() <= MAX_EMAIL_LEN && EMAIL_RE.is_match(raw)
}

pub fn validate_payment_reference(reference: &str) -> Result<(), EngineError> {
    if reference.trim().is_empty() {
        return Err(EngineError::validation("payment_reference must not be blank"));
    }
    if reference.len() > MAX_PAYMENT_REFERENCE_LEN {
        return Err(EngineError::LimitExceeded("payment reference too long"));
    }
    Ok(())
}

/// Shape checks that need neither the config nor a lock. Returns the request
/// with phone/email/name normalized.
pub fn validate_request(mut req: BookingRequest) -> Result<BookingRequest, EngineError> {
    req.customer_name = req.customer_name.trim().to_string();
    if req.customer_name.is_empty() {
        return Err(EngineError::validation("customer_name is required"));
    }
    if req.customer_name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    req.customer_phone = normalize_phone(&req.customer_phone).ok_or_else(|| {
        EngineError::validation("customer_phone must be 7-15 digits, optionally prefixed with +")
    })?;
    req.customer_email = req.customer_email.trim().to_ascii_lowercase();
    if !is_valid_email(&req.customer_email) {
        return Err(EngineError::validation("customer_email is not a valid address"));
    }
    if req.number_of_people == 0 {
        return Err(EngineError::validation("number_of_people must be at least 1"));
    }
    if let Some(ref s) = req.special_requests
        && s.len() > MAX_SPECIAL_REQUESTS_LEN
    {
        return Err(EngineError::LimitExceeded("special requests too long"));
    }
    if let Some(ref r) = req.payment_reference {
        validate_payment_reference(r)?;
    }
    if req.payment_status == PaymentStatus::Failed {
        return Err(EngineError::validation(
            "cannot create a booking with a failed payment",
        ));
    }
    if req.payment_status == PaymentStatus::Confirmed && req.payment_reference.is_none() {
        return Err(EngineError::validation(
            "a confirmed payment needs a payment_reference",
        ));
    }
    Ok(req)
}

/// Party size against the package and, for wheel work, the wheel inventory.
/// Runs before any capacity check.
pub fn validate_party(
    package: &Package,
    people: u32,
    config: &StudioConfig,
) -> Result<(), EngineError> {
    if people == 0 {
        return Err(EngineError::validation("number_of_people must be at least 1"));
    }
    if people > package.max_participants {
        return Err(EngineError::validation(format!(
            "maximum {} people allowed for {}",
            package.max_participants, package.name
        )));
    }
    if package.requires_wheel && people > config.usable_wheels() {
        return Err(EngineError::validation(format!(
            "{} wheels needed but only {} are in service",
            people,
            config.usable_wheels()
        )));
    }
    Ok(())
}

pub fn validate_not_past(date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
    if date < today {
        return Err(EngineError::validation("date cannot be in the past"));
    }
    Ok(())
}

/// Bookings open at most `horizon_days` ahead of `today`.
pub fn validate_horizon(date: NaiveDate, today: NaiveDate, horizon_days: u32) -> Result<(), EngineError> {
    if let Some(last) = today.checked_add_days(Days::new(horizon_days.into()))
        && date > last
    {
        return Err(EngineError::validation(format!(
            "bookings open at most {horizon_days} days ahead (until {last})"
        )));
    }
    Ok(())
}

pub fn validate_package(package: &Package) -> Result<(), EngineError> {
    if package.name.trim().is_empty() {
        return Err(EngineError::validation("package name is required"));
    }
    if package.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("package name too long"));
    }
    if package.code.len() > MAX_PACKAGE_CODE_LEN {
        return Err(EngineError::LimitExceeded("package code too long"));
    }
    if package.price.is_sign_negative() {
        return Err(EngineError::validation("price must not be negative"));
    }
    if package.max_participants == 0 || package.max_participants > MAX_PACKAGE_PARTICIPANTS {
        return Err(EngineError::validation(format!(
            "max_participants must be between 1 and {MAX_PACKAGE_PARTICIPANTS}"
        )));
    }
    if let Some(d) = package.duration_minutes
        && (d == 0 || d > MINUTES_PER_DAY)
    {
        return Err(EngineError::validation(
            "duration_minutes must be a positive number of minutes within a day",
        ));
    }
    Ok(())
}
