//! Embedded entity references.

use crate::envelope::EntityEnvelope;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the receiving side obtains an embedded reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AutoExport {
    /// Resolve against the local store if the entity already exists.
    ResolveIfExists,
    /// The sender exports the entity as a dependency in its own transfer.
    ExportAsDependency,
    /// The full envelope travels inline in the `entity` key.
    EmbedInline,
}

impl AutoExport {
    /// Converts to the wire code.
    pub fn to_code(&self) -> u8 {
        match self {
            AutoExport::ResolveIfExists => 0,
            AutoExport::ExportAsDependency => 1,
            AutoExport::EmbedInline => 2,
        }
    }

    /// Converts from the wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AutoExport::ResolveIfExists),
            1 => Some(AutoExport::ExportAsDependency),
            2 => Some(AutoExport::EmbedInline),
            _ => None,
        }
    }
}

impl From<AutoExport> for u8 {
    fn from(value: AutoExport) -> Self {
        value.to_code()
    }
}

impl TryFrom<u8> for AutoExport {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        AutoExport::from_code(code).ok_or(ProtocolError::InvalidAutoExport(code))
    }
}

/// A reference to another entity inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedRef {
    /// API/channel name on the broker.
    pub api: String,
    /// Entity type of the referenced entity.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Bundle of the referenced entity.
    pub bundle: String,
    /// Schema version of the referenced entity type.
    pub version: String,
    /// UUID of the referenced entity.
    pub uuid: Uuid,
    /// Local id on the sending site, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// How the receiver obtains the entity.
    pub auto_export: AutoExport,
    /// Routing id of the sending connection.
    pub connection_id: String,
    /// Routing id of the connection the receiver should read from.
    pub next_connection_id: String,
    /// Nested envelope, present only for [`AutoExport::EmbedInline`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<Box<EntityEnvelope>>,
}

impl EmbeddedRef {
    /// Creates a reference without routing metadata.
    pub fn new(
        api: impl Into<String>,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        version: impl Into<String>,
        uuid: Uuid,
        auto_export: AutoExport,
    ) -> Self {
        Self {
            api: api.into(),
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            version: version.into(),
            uuid,
            id: None,
            auto_export,
            connection_id: String::new(),
            next_connection_id: String::new(),
            entity: None,
        }
    }

    /// Sets the sending site's local id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attaches routing metadata.
    pub fn with_routing(
        mut self,
        connection_id: impl Into<String>,
        next_connection_id: impl Into<String>,
    ) -> Self {
        self.connection_id = connection_id.into();
        self.next_connection_id = next_connection_id.into();
        self
    }

    /// Embeds the full envelope inline.
    pub fn with_inline(mut self, envelope: EntityEnvelope) -> Self {
        self.auto_export = AutoExport::EmbedInline;
        self.entity = Some(Box::new(envelope));
        self
    }

    /// Returns the inline envelope if the schema versions match.
    ///
    /// A version mismatch yields `None`; the caller reports the
    /// incompatible-version condition.
    pub fn inline_entity(&self, expected_version: &str) -> Option<&EntityEnvelope> {
        if self.auto_export != AutoExport::EmbedInline || self.version != expected_version {
            return None;
        }
        self.entity.as_deref()
    }
}

/// Builds the routing id of a (site, entity type) connection on the broker.
pub fn connection_id(api: &str, site_id: &str, entity_type: &str, bundle: &str) -> String {
    format!("{api}-{site_id}-{entity_type}-{bundle}")
}
