use serde::{Deserialize, Serialize};

use bilee_core::ValueObject;

pub const DEFAULT_MERCHANT_NAME: &str = "MY BUSINESS";

/// Merchant business category as shown on receipts.
///
/// Parsing is case-insensitive and folds known synonyms onto the canonical
/// value. Anything unrecognised is kept verbatim in [`MerchantCategory::Unmapped`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MerchantCategory {
    Restaurant,
    Retail,
    Grocery,
    Pharmacy,
    Electronics,
    Clothing,
    Services,
    Entertainment,
    #[default]
    Other,
    Unmapped(String),
}

impl MerchantCategory {
    /// Normalize a raw category. Blank or missing input becomes `Other`.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return MerchantCategory::Other;
        };
        match raw.to_ascii_lowercase().as_str() {
            "restaurant" => MerchantCategory::Restaurant,
            "retail" => MerchantCategory::Retail,
            "grocery" | "groceries" => MerchantCategory::Grocery,
            "pharmacy" | "healthcare" => MerchantCategory::Pharmacy,
            "electronics" => MerchantCategory::Electronics,
            "clothing" | "fashion" => MerchantCategory::Clothing,
            "services" => MerchantCategory::Services,
            "entertainment" => MerchantCategory::Entertainment,
            "other" | "general" => MerchantCategory::Other,
            _ => MerchantCategory::Unmapped(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MerchantCategory::Restaurant => "Restaurant",
            MerchantCategory::Retail => "Retail",
            MerchantCategory::Grocery => "Grocery",
            MerchantCategory::Pharmacy => "Pharmacy",
            MerchantCategory::Electronics => "Electronics",
            MerchantCategory::Clothing => "Clothing",
            MerchantCategory::Services => "Services",
            MerchantCategory::Entertainment => "Entertainment",
            MerchantCategory::Other => "Other",
            MerchantCategory::Unmapped(raw) => raw,
        }
    }
}

impl From<String> for MerchantCategory {
    fn from(value: String) -> Self {
        MerchantCategory::normalize(Some(&value))
    }
}

impl From<MerchantCategory> for String {
    fn from(value: MerchantCategory) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for MerchantCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merchant display fields printed on receipts.
///
/// Every field is optional: profiles are filled in by merchants over time and
/// a receipt must still be issuable for a merchant with no profile at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantProfile {
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    /// Raw category as entered by the merchant.
    #[serde(default)]
    pub category: Option<String>,
}

impl ValueObject for MerchantProfile {}

impl MerchantProfile {
    pub fn display_name(&self) -> &str {
        self.business_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_MERCHANT_NAME)
    }

    pub fn category(&self) -> MerchantCategory {
        MerchantCategory::normalize(self.category.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_fold_case_insensitively() {
        assert_eq!(MerchantCategory::normalize(Some("groceries")), MerchantCategory::Grocery);
        assert_eq!(MerchantCategory::normalize(Some("HealthCare")), MerchantCategory::Pharmacy);
        assert_eq!(MerchantCategory::normalize(Some("FASHION")), MerchantCategory::Clothing);
        assert_eq!(MerchantCategory::normalize(Some("general")), MerchantCategory::Other);
        assert_eq!(MerchantCategory::normalize(Some(" retail ")), MerchantCategory::Retail);
    }

    #[test]
    fn unknown_category_passes_through_verbatim() {
        let category = MerchantCategory::normalize(Some("Bakery & Cafe"));
        assert_eq!(category, MerchantCategory::Unmapped("Bakery & Cafe".to_string()));
        assert_eq!(category.as_str(), "Bakery & Cafe");
    }

    #[test]
    fn missing_or_blank_category_defaults_to_other() {
        assert_eq!(MerchantCategory::normalize(None), MerchantCategory::Other);
        assert_eq!(MerchantCategory::normalize(Some("  ")), MerchantCategory::Other);
    }

    #[test]
    fn category_serializes_as_canonical_string() {
        let json = serde_json::to_string(&MerchantCategory::Grocery).unwrap();
        assert_eq!(json, "\"Grocery\"");
        let parsed: MerchantCategory = serde_json::from_str("\"groceries\"").unwrap();
        assert_eq!(parsed, MerchantCategory::Grocery);
    }

    #[test]
    fn empty_profile_falls_back_to_default_name() {
        assert_eq!(MerchantProfile::default().display_name(), DEFAULT_MERCHANT_NAME);
    }
}
