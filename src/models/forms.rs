use std::collections::{BTreeMap, HashMap};
use validator::{Validate, ValidationErrors};

use crate::core::query_params::{get_bool_flag, get_string};

pub const REQUIRED: &str = "This field is required.";

/// Inline error messages keyed by form field.
#[derive(Debug, Default, Clone)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn from_validation(result: Result<(), ValidationErrors>) -> Self {
        let mut errors = Self::default();
        if let Err(validation) = result {
            for (field, field_errors) in validation.field_errors() {
                for error in field_errors.iter() {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({}).", error.code));
                    errors.add(&field, message);
                }
            }
        }
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn for_field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Default, Validate)]
pub struct LoginForm {
    #[validate(length(min = 1, message = "This field is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "This field is required."))]
    pub password: String,
    pub remember_me: bool,
}

impl LoginForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            username: get_string(fields, "username"),
            password: get_string(fields, "password"),
            remember_me: get_bool_flag(fields, "remember_me"),
        }
    }
}

#[derive(Debug, Default, Validate)]
pub struct RegistrationForm {
    #[validate(length(min = 1, max = 64, message = "Username must be between 1 and 64 characters long."))]
    pub username: String,
    #[validate(
        email(message = "Invalid email address."),
        length(max = 120, message = "Email must be at most 120 characters long.")
    )]
    pub email: String,
    #[validate(length(min = 1, message = "This field is required."))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Field must be equal to password."))]
    pub password2: String,
}

impl RegistrationForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            username: get_string(fields, "username"),
            email: get_string(fields, "email"),
            password: get_string(fields, "password"),
            password2: get_string(fields, "password2"),
        }
    }
}

#[derive(Debug, Default, Validate)]
pub struct EditProfileForm {
    #[validate(length(min = 1, max = 64, message = "Username must be between 1 and 64 characters long."))]
    pub username: String,
    #[validate(length(max = 140, message = "About me must be at most 140 characters long."))]
    pub about_me: String,
}

impl EditProfileForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            username: get_string(fields, "username"),
            about_me: get_string(fields, "about_me"),
        }
    }
}
