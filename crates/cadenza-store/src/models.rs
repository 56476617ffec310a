//! Row types shared by the store and its callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A customer's profile as held in the `customers` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub customer_id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub fax: Option<String>,
    pub email: String,
}

impl Profile {
    pub fn new(
        customer_id: i64,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            customer_id,
            first_name: first_name.into(),
            last_name: last_name.into(),
            company: None,
            address: None,
            city: None,
            state: None,
            country: None,
            postal_code: None,
            phone: None,
            fax: None,
            email: email.into(),
        }
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Current value of a field, `None` when nothing is on file
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let value = match field {
            ProfileField::FirstName => Some(&self.first_name),
            ProfileField::LastName => Some(&self.last_name),
            ProfileField::Company => self.company.as_ref(),
            ProfileField::Address => self.address.as_ref(),
            ProfileField::City => self.city.as_ref(),
            ProfileField::State => self.state.as_ref(),
            ProfileField::Country => self.country.as_ref(),
            ProfileField::PostalCode => self.postal_code.as_ref(),
            ProfileField::Phone => self.phone.as_ref(),
            ProfileField::Fax => self.fax.as_ref(),
            ProfileField::Email => Some(&self.email),
        };
        value.map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        let value = value.into();
        match field {
            ProfileField::FirstName => self.first_name = value,
            ProfileField::LastName => self.last_name = value,
            ProfileField::Company => self.company = Some(value),
            ProfileField::Address => self.address = Some(value),
            ProfileField::City => self.city = Some(value),
            ProfileField::State => self.state = Some(value),
            ProfileField::Country => self.country = Some(value),
            ProfileField::PostalCode => self.postal_code = Some(value),
            ProfileField::Phone => self.phone = Some(value),
            ProfileField::Fax => self.fax = Some(value),
            ProfileField::Email => self.email = value,
        }
    }
}

/// Profile columns a customer may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProfileField {
    FirstName,
    LastName,
    Company,
    Address,
    City,
    State,
    Country,
    PostalCode,
    Phone,
    Fax,
    Email,
}

impl ProfileField {
    pub const ALL: [ProfileField; 11] = [
        Self::FirstName,
        Self::LastName,
        Self::Company,
        Self::Address,
        Self::City,
        Self::State,
        Self::Country,
        Self::PostalCode,
        Self::Phone,
        Self::Fax,
        Self::Email,
    ];

    /// Column name in the `customers` table
    pub fn column(&self) -> &'static str {
        match self {
            Self::FirstName => "FirstName",
            Self::LastName => "LastName",
            Self::Company => "Company",
            Self::Address => "Address",
            Self::City => "City",
            Self::State => "State",
            Self::Country => "Country",
            Self::PostalCode => "PostalCode",
            Self::Phone => "Phone",
            Self::Fax => "Fax",
            Self::Email => "Email",
        }
    }

    /// Human-readable label used in prompts
    pub fn label(&self) -> &'static str {
        match self {
            Self::FirstName => "first name",
            Self::LastName => "last name",
            Self::Company => "company",
            Self::Address => "street address",
            Self::City => "city",
            Self::State => "state",
            Self::Country => "country",
            Self::PostalCode => "postal code",
            Self::Phone => "phone number",
            Self::Fax => "fax number",
            Self::Email => "email address",
        }
    }

    /// Parse a column name or a loose spelling ("email", "e-mail", "postal code")
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "firstname" | "first" => Some(Self::FirstName),
            "lastname" | "last" | "surname" => Some(Self::LastName),
            "company" => Some(Self::Company),
            "address" | "streetaddress" => Some(Self::Address),
            "city" => Some(Self::City),
            "state" => Some(Self::State),
            "country" => Some(Self::Country),
            "postalcode" | "zip" | "zipcode" | "postcode" => Some(Self::PostalCode),
            "phone" | "phonenumber" | "mobile" => Some(Self::Phone),
            "fax" | "faxnumber" => Some(Self::Fax),
            "email" | "emailaddress" | "mail" => Some(Self::Email),
            _ => None,
        }
    }

    /// Check that a proposed value is acceptable for this column
    pub fn validate(&self, value: &str) -> Result<(), String> {
        let value = value.trim();
        if value.is_empty() {
            return Err(format!("The new {} must not be empty", self.label()));
        }
        match self {
            Self::Email => {
                let valid = value
                    .split_once('@')
                    .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
                    .unwrap_or(false);
                if !valid || value.contains(char::is_whitespace) {
                    return Err(format!("'{}' is not a valid email address", value));
                }
            }
            Self::Phone | Self::Fax => {
                let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
                let allowed = value
                    .chars()
                    .all(|c| c.is_ascii_digit() || " +-().".contains(c));
                if !allowed || digits < 7 {
                    return Err(format!("'{}' is not a valid {}", value, self.label()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl std::fmt::Display for ProfileField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// Album row joined with its artist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub artist: String,
}

/// Track row joined with album and artist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

/// A track returned from a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTrack {
    pub track: Track,
    pub score: f32,
}

/// Saved conversation state, stored as opaque JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConversation {
    pub id: String,
    pub customer_id: i64,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_loose_spellings() {
        assert_eq!(ProfileField::parse("Email"), Some(ProfileField::Email));
        assert_eq!(ProfileField::parse("e-mail"), Some(ProfileField::Email));
        assert_eq!(ProfileField::parse("postal code"), Some(ProfileField::PostalCode));
        assert_eq!(ProfileField::parse("SupportRepId"), None);
    }

    #[test]
    fn test_validate_email() {
        assert!(ProfileField::Email.validate("ada@example.com").is_ok());
        assert!(ProfileField::Email.validate("not-an-email").is_err());
        assert!(ProfileField::Email.validate("   ").is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert!(ProfileField::Phone.validate("+1 (555) 010-9999").is_ok());
        assert!(ProfileField::Phone.validate("12ab").is_err());
    }

    #[test]
    fn test_profile_get_and_set() {
        let mut profile = Profile::new(1, "Ada", "Lovelace", "ada@example.com");
        assert_eq!(profile.get(ProfileField::Phone), None);
        profile.set(ProfileField::Phone, "555-0100-22");
        assert_eq!(profile.get(ProfileField::Phone), Some("555-0100-22"));
        assert_eq!(profile.full_name(), "Ada Lovelace");
    }
}
