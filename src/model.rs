use serde::{Deserialize, Serialize};

/// How a price is determined at a given configuration scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    /// Defer to the next-less-specific scope.
    Inherit,
    /// The payer chooses the amount; zero is recorded here.
    Donation,
    /// Use the stored price.
    #[default]
    Custom,
}

impl PriceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceMode::Inherit => "inherit",
            PriceMode::Donation => "donation",
            PriceMode::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inherit" => Some(PriceMode::Inherit),
            "donation" => Some(PriceMode::Donation),
            "custom" => Some(PriceMode::Custom),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PriceMode::Inherit => "Inherit",
            PriceMode::Donation => "Donation",
            PriceMode::Custom => "Custom",
        }
    }
}

/// A decimal amount with its currency code. Amounts stay strings end to end;
/// this crate never does arithmetic on them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Price {
    pub amount: String,
    pub currency: String,
}

impl Price {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    /// The "no charge" sentinel: zero amount, empty currency code.
    pub fn free() -> Self {
        Self {
            amount: "0.00".to_string(),
            currency: String::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.currency.is_empty() && matches!(self.amount.as_str(), "" | "0" | "0.0" | "0.00")
    }
}

impl Default for Price {
    fn default() -> Self {
        Self::free()
    }
}

/// The slice of a content entity this crate needs. Implemented by whatever
/// entity representation the embedding application uses.
pub trait ContentEntity {
    fn entity_type(&self) -> &str;
    fn bundle(&self) -> &str;
    fn id(&self) -> &str;
    fn label(&self) -> &str;
}

/// Plain-struct entity handle, enough for the CLI and tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: String,
    pub bundle: String,
    pub id: String,
    pub label: String,
}

impl EntityRef {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            id: id.into(),
            label: label.into(),
        }
    }
}

impl ContentEntity for EntityRef {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn bundle(&self) -> &str {
        &self.bundle
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Who is asking for an invoice. Anonymous visitors are identified by their
/// client IP and session id, logged-in users by their uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous { ip: String, session: String },
    User { uid: String },
}

impl Actor {
    /// Key under which the "invoices viewed" session flag is stored.
    pub fn session_key(&self) -> &str {
        match self {
            Actor::Anonymous { session, .. } => session,
            Actor::User { uid } => uid,
        }
    }
}

/// Per-entity pricing row. `view_mode` of `""` means "all view modes".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceOverride {
    pub entity_type: String,
    pub entity_id: String,
    pub view_mode: String,
    pub price_mode: PriceMode,
    pub price: Price,
}

/// Per-view-mode settings payload accepted by the settings-save operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceSetting {
    pub price_mode: PriceMode,
    pub price: Price,
}
