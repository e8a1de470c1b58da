//! Message validation applied before any network call.

use crate::models::{EmailMessage, ValidationCode, ValidationErrors};

/// Check a drafted message field by field.
///
/// Returns `None` when the message is sendable, otherwise every failure
/// found so the operator sees them all at once.
pub fn check_message(message: &EmailMessage) -> Option<ValidationErrors> {
    let email_re = regex::Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    let mut errors = ValidationErrors::default();

    if message.from.email.is_empty() {
        errors.push(ValidationCode::MissingParameter, missing("from"));
    } else if !email_re.is_match(&message.from.email) {
        errors.push(
            ValidationCode::WrongFormat,
            wrong_format("from", &message.from.email),
        );
    }

    if message.to.is_empty() {
        errors.push(ValidationCode::MissingParameter, missing("to"));
    } else {
        for address in &message.to {
            if !email_re.is_match(&address.email) {
                errors.push(
                    ValidationCode::WrongFormat,
                    wrong_format("to", &address.email),
                );
            }
        }
    }

    if message.text.as_deref().map_or(true, str::is_empty) {
        errors.push(ValidationCode::MissingParameter, missing("text"));
    }

    (!errors.is_empty()).then_some(errors)
}

// The "address parameter" wording applies to every key, text included.
fn missing(key: &str) -> String {
    format!("Missing \"{key}\" address parameter")
}

fn wrong_format(key: &str, address: &str) -> String {
    format!("Wrong email format for \"{key}\" address: \"{address}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Address;

    fn message(from: &str, to: &[&str], text: Option<&str>) -> EmailMessage {
        EmailMessage {
            from: Address::parse(from),
            to: to.iter().map(|t| Address::parse(t)).collect(),
            subject: "subject".to_string(),
            text: text.map(str::to_string),
            html: None,
            tags: vec![],
            delivery_time: None,
            dry_run: false,
            last_contact: false,
            marketing: None,
        }
    }

    #[test]
    fn complete_message_passes() {
        let msg = message("Ops <ops@example.com>", &["jane@example.com"], Some("hi"));
        assert!(check_message(&msg).is_none());
    }

    #[test]
    fn missing_fields_use_the_address_parameter_wording() {
        let msg = message("", &[], None);
        let errors = check_message(&msg).unwrap();

        let messages: Vec<&str> = errors.list.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Missing \"from\" address parameter",
                "Missing \"to\" address parameter",
                "Missing \"text\" address parameter",
            ]
        );
        assert!(errors
            .list
            .iter()
            .all(|e| e.code == ValidationCode::MissingParameter));
    }

    #[test]
    fn malformed_to_address_is_named_in_the_error() {
        let msg = message(
            "ops@example.com",
            &["jane@example.com", "not-an-email"],
            Some("hi"),
        );
        let errors = check_message(&msg).unwrap();

        assert_eq!(errors.list.len(), 1);
        assert_eq!(errors.list[0].code, ValidationCode::WrongFormat);
        assert_eq!(
            errors.list[0].message,
            "Wrong email format for \"to\" address: \"not-an-email\""
        );
    }

    #[test]
    fn malformed_from_address_is_a_format_error() {
        let msg = message("ops@nodot", &["jane@example.com"], Some("hi"));
        let errors = check_message(&msg).unwrap();

        assert_eq!(errors.list.len(), 1);
        assert_eq!(
            errors.list[0].message,
            "Wrong email format for \"from\" address: \"ops@nodot\""
        );
    }

    #[test]
    fn bracketed_from_validates_the_inner_address() {
        let msg = message("Jane Doe <jane@example.com>", &["a@b.co"], Some("hi"));
        assert!(check_message(&msg).is_none());
    }

    #[test]
    fn empty_text_body_counts_as_missing() {
        let msg = message("ops@example.com", &["jane@example.com"], Some(""));
        let errors = check_message(&msg).unwrap();
        assert_eq!(errors.list.len(), 1);
        assert_eq!(errors.list[0].message, "Missing \"text\" address parameter");
    }
}
