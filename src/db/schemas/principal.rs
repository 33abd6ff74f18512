//! Principal document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::model::{Principal, PrincipalId};
use crate::types::Result;

pub const PRINCIPAL_COLLECTION: &str = "principals";

/// Principal stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PrincipalDoc {
    /// Identity-provider principal id
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Role name. Parsed on every read; an unknown name never falls back to
    /// a default role.
    pub role: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Partner managing this client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<String>,
}

impl PrincipalDoc {
    pub fn into_principal(self) -> Result<Principal> {
        Ok(Principal {
            id: PrincipalId::new(self._id),
            role: self.role.parse()?,
            display_name: self.display_name,
            email: self.email,
            managed_by: self.managed_by.map(PrincipalId::new),
        })
    }
}

impl From<&Principal> for PrincipalDoc {
    fn from(p: &Principal) -> Self {
        Self {
            _id: p.id.as_str().to_string(),
            metadata: Metadata::new(),
            role: p.role.as_str().to_string(),
            display_name: p.display_name.clone(),
            email: p.email.clone(),
            managed_by: p.managed_by.as_ref().map(|m| m.as_str().to_string()),
        }
    }
}

impl IntoIndexes for PrincipalDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "managed_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("managed_by_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .sparse(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for PrincipalDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
