//! Registration and login input validation.
//!
//! Every problem with a form is collected, in field order, so the caller can
//! show them all at once.

use secrecy::ExposeSecret;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use validator::ValidateEmail;

use crate::auth::RegistrationForm;

/// Longest password bcrypt uses, in bytes. Anything beyond would be silently ignored.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Accepted phone number length, counted in digits.
pub const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 10..=15;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LENGTH: usize = 100;

/// A single problem with submitted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Name missing.
    #[error("Name is required.")]
    NameRequired,

    /// Name longer than allowed.
    #[error("Name must be at most {max} characters long.")]
    NameTooLong {
        /// Maximum length.
        max: usize,
    },

    /// Email missing.
    #[error("Email is required.")]
    EmailRequired,

    /// Email not well formed.
    #[error("Invalid email format.")]
    EmailInvalid,

    /// Phone missing.
    #[error("Phone number is required.")]
    PhoneRequired,

    /// Phone has the wrong number of digits.
    #[error("Invalid phone number format.")]
    PhoneInvalid,

    /// Password missing.
    #[error("Password is required.")]
    PasswordRequired,

    /// Password shorter than the minimum.
    #[error("Password must be at least {min} characters long.")]
    PasswordTooShort {
        /// Minimum length.
        min: usize,
    },

    /// Password longer than bcrypt accepts.
    #[error("Password must be at most {max} bytes long.")]
    PasswordTooLong {
        /// Maximum length in bytes.
        max: usize,
    },

    /// Confirmation differs from the password.
    #[error("Passwords do not match.")]
    PasswordMismatch,

    /// Login submitted with an empty identifier or password.
    #[error("Please enter both username and password.")]
    CredentialsMissing,
}

/// Join issues into one message, separated by spaces.
#[must_use]
pub fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip control characters, apply NFKC normalization and trim.
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    let stripped: String = input.chars().filter(|c| !c.is_control()).collect();
    stripped.nfkc().collect::<String>().trim().to_string()
}

/// Count the digits in a phone number, ignoring separators.
#[must_use]
pub fn phone_digits(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Check a registration form. Returns every issue found, empty if the form is valid.
#[must_use]
pub fn validate_registration(
    form: &RegistrationForm,
    min_password_length: usize,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let name = sanitize_text(&form.name);
    if name.is_empty() {
        issues.push(ValidationIssue::NameRequired);
    } else if name.chars().count() > MAX_NAME_LENGTH {
        issues.push(ValidationIssue::NameTooLong {
            max: MAX_NAME_LENGTH,
        });
    }

    let email = form.email.trim();
    if email.is_empty() {
        issues.push(ValidationIssue::EmailRequired);
    } else if !email.validate_email() {
        issues.push(ValidationIssue::EmailInvalid);
    }

    if form.phone.trim().is_empty() {
        issues.push(ValidationIssue::PhoneRequired);
    } else if !PHONE_DIGITS.contains(&phone_digits(&form.phone).len()) {
        issues.push(ValidationIssue::PhoneInvalid);
    }

    let password = form.password.expose_secret();
    if password.is_empty() {
        issues.push(ValidationIssue::PasswordRequired);
    } else if password.chars().count() < min_password_length {
        issues.push(ValidationIssue::PasswordTooShort {
            min: min_password_length,
        });
    } else if password.len() > MAX_PASSWORD_BYTES {
        issues.push(ValidationIssue::PasswordTooLong {
            max: MAX_PASSWORD_BYTES,
        });
    }

    if password != form.confirm_password.expose_secret() {
        issues.push(ValidationIssue::PasswordMismatch);
    }

    issues
}
