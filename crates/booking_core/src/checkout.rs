use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use shared::protocol::OrderRequest;

use crate::cart::Cart;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z\s]+$").expect("name pattern compiles"));
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+$").expect("phone pattern compiles"));

/// Letters and whitespace only, at least one character.
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// Digits only, at least one character.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutForm {
    pub name: String,
    pub phone: String,
}

impl CheckoutForm {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.phone.is_empty()
    }

    pub fn clear(&mut self) {
        self.name.clear();
        self.phone.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckoutValidation {
    pub name_valid: bool,
    pub phone_valid: bool,
    pub has_items: bool,
}

impl CheckoutValidation {
    pub fn evaluate(form: &CheckoutForm, cart: &Cart) -> Self {
        Self {
            name_valid: is_valid_name(&form.name),
            phone_valid: is_valid_phone(&form.phone),
            has_items: !cart.is_empty(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.name_valid && self.phone_valid && self.has_items
    }
}

impl fmt::Display for CheckoutValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut problems = Vec::new();
        if !self.name_valid {
            problems.push("name must contain only letters and spaces");
        }
        if !self.phone_valid {
            problems.push("phone must contain only digits");
        }
        if !self.has_items {
            problems.push("cart is empty");
        }
        if problems.is_empty() {
            f.write_str("ready")
        } else {
            f.write_str(&problems.join("; "))
        }
    }
}

/// `Empty -> Editing -> Submitting -> {Confirmed | Failed}`; a failed
/// submission can be retried and any edit moves back to `Editing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum CheckoutPhase {
    #[default]
    Empty,
    Editing,
    Submitting,
    Confirmed,
    Failed {
        message: String,
    },
}

impl CheckoutPhase {
    pub fn is_submitting(&self) -> bool {
        matches!(self, Self::Submitting)
    }

    /// Phase after the user edits a form field.
    pub fn after_edit(&self, form: &CheckoutForm) -> Self {
        match self {
            Self::Submitting => Self::Submitting,
            _ if form.is_empty() => Self::Empty,
            _ => Self::Editing,
        }
    }
}

pub fn build_order(form: &CheckoutForm, cart: &Cart) -> OrderRequest {
    OrderRequest {
        name: form.name.clone(),
        phone: form.phone.clone(),
        lesson_ids: cart.order_lines(),
        total: cart.totals().price,
    }
}
