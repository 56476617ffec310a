//! Customer profile tools

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info};

use cadenza_store::ProfileField;

use super::{ToolContext, ToolHandler, json_schema, names, required_str};
use crate::error::ToolError;
use crate::stores::ProfileStore;

/// Read the conversation user's own profile
pub struct GetCustomerInfoTool {
    profiles: Arc<dyn ProfileStore>,
}

impl GetCustomerInfoTool {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl ToolHandler for GetCustomerInfoTool {
    fn name(&self) -> &str {
        names::GET_CUSTOMER_INFO
    }

    fn description(&self) -> &str {
        "Retrieve the profile on file for the current customer."
    }

    fn input_schema(&self) -> Value {
        json_schema(json!({}), vec![])
    }

    async fn execute(&self, ctx: &ToolContext, _input: Value) -> Result<Value, ToolError> {
        debug!("Fetching profile for customer {}", ctx.user_id);
        let profile = self
            .profiles
            .get(ctx.user_id)
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("No customer found with ID {}", ctx.user_id)))?;
        serde_json::to_value(&profile).map_err(|e| ToolError::Connectivity(e.to_string()))
    }
}

/// Change one profile field. Always sensitive.
pub struct ProfileUpdateTool {
    profiles: Arc<dyn ProfileStore>,
    /// Fixed field for the single-field variants
    field: Option<ProfileField>,
    name: &'static str,
}

impl ProfileUpdateTool {
    /// `update_customer_profile`: the caller names the field
    pub fn any_field(profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            profiles,
            field: None,
            name: names::UPDATE_CUSTOMER_PROFILE,
        }
    }

    /// `update_email` / `update_phone`
    pub fn single_field(profiles: Arc<dyn ProfileStore>, field: ProfileField) -> Self {
        let name = match field {
            ProfileField::Email => names::UPDATE_EMAIL,
            ProfileField::Phone => names::UPDATE_PHONE,
            _ => names::UPDATE_CUSTOMER_PROFILE,
        };
        Self {
            profiles,
            field: Some(field),
            name,
        }
    }

    fn parse(&self, input: &Value) -> Result<(ProfileField, String), ToolError> {
        let field = match self.field {
            Some(field) => field,
            None => {
                let raw = required_str(input, "field")?;
                ProfileField::parse(raw).ok_or_else(|| {
                    let allowed: Vec<&str> = ProfileField::ALL.iter().map(|f| f.column()).collect();
                    ToolError::Validation(format!(
                        "Invalid field '{}'. Allowed fields: {}",
                        raw,
                        allowed.join(", ")
                    ))
                })?
            }
        };
        let new_value = required_str(input, "new_value")?;
        field.validate(new_value).map_err(ToolError::Validation)?;
        Ok((field, new_value.to_string()))
    }
}

#[async_trait]
impl ToolHandler for ProfileUpdateTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        match self.field {
            None => "Update a specific field (e.g. Email, Phone, City) in the customer's profile.",
            Some(ProfileField::Email) => "Update the customer's email address.",
            Some(ProfileField::Phone) => "Update the customer's phone number.",
            Some(_) => "Update a field in the customer's profile.",
        }
    }

    fn input_schema(&self) -> Value {
        match self.field {
            None => json_schema(
                json!({
                    "field": {
                        "type": "string",
                        "description": "Profile field to update (FirstName, LastName, Company, Address, City, State, Country, PostalCode, Phone, Fax, Email)"
                    },
                    "new_value": {
                        "type": "string",
                        "description": "The new value for the field"
                    }
                }),
                vec!["field", "new_value"],
            ),
            Some(field) => json_schema(
                json!({
                    "new_value": {
                        "type": "string",
                        "description": format!("The new {}", field.label())
                    }
                }),
                vec!["new_value"],
            ),
        }
    }

    fn mutated_fields(&self, input: &Value) -> Result<Vec<ProfileField>, ToolError> {
        let (field, _) = self.parse(input)?;
        Ok(vec![field])
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value, ToolError> {
        let (field, new_value) = self.parse(&input)?;
        let rows = self
            .profiles
            .update(ctx.user_id, &[(field, new_value.clone())])
            .await?;
        if rows == 0 {
            return Err(ToolError::NotFound(format!(
                "No rows updated. Customer ID {} does not exist",
                ctx.user_id
            )));
        }
        info!("Updated {} for customer {}", field, ctx.user_id);
        Ok(json!({
            "field": field,
            "new_value": new_value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_store::{MusicStoreDb, Profile};

    fn ctx(user_id: i64) -> ToolContext {
        ToolContext {
            user_id,
            conversation_id: "test".to_string(),
        }
    }

    async fn store() -> Arc<MusicStoreDb> {
        let db = MusicStoreDb::open_in_memory().unwrap();
        db.insert_customer(&Profile::new(1, "Ada", "Lovelace", "ada@example.com"))
            .await
            .unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn test_get_customer_info_own_profile() {
        let db = store().await;
        let tool = GetCustomerInfoTool::new(db);
        let out = tool.execute(&ctx(1), json!({})).await.unwrap();
        assert_eq!(out["email"], "ada@example.com");

        let missing = tool.execute(&ctx(2), json!({})).await.unwrap_err();
        assert!(matches!(missing, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_email_writes_store() {
        let db = store().await;
        let tool = ProfileUpdateTool::single_field(db.clone(), ProfileField::Email);
        assert_eq!(tool.name(), names::UPDATE_EMAIL);

        tool.execute(&ctx(1), json!({"new_value": "ada@new.example"}))
            .await
            .unwrap();
        let profile = db.get_customer(1).await.unwrap().unwrap();
        assert_eq!(profile.email, "ada@new.example");
    }

    #[test]
    fn test_mutated_fields_validates_input() {
        let db = Arc::new(MusicStoreDb::open_in_memory().unwrap());
        let tool = ProfileUpdateTool::any_field(db);

        let fields = tool
            .mutated_fields(&json!({"field": "City", "new_value": "London"}))
            .unwrap();
        assert_eq!(fields, vec![ProfileField::City]);

        let bad_field = tool.mutated_fields(&json!({"field": "SupportRepId", "new_value": "3"}));
        assert!(matches!(bad_field, Err(ToolError::Validation(_))));

        let bad_email = tool.mutated_fields(&json!({"field": "Email", "new_value": "nope"}));
        assert!(matches!(bad_email, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_missing_customer_is_not_found() {
        let db = store().await;
        let tool = ProfileUpdateTool::single_field(db, ProfileField::Phone);
        let err = tool
            .execute(&ctx(42), json!({"new_value": "555-0100-22"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
