//! Entity identity and payload schema.
//!
//! Every entity mirrored by the feed is addressed by an [`EntityId`]: a
//! kind tag from a closed vocabulary plus an id unique within that kind.
//! The payload types are deliberately plain serde structs; the store only
//! relies on their identity and structural equality.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed vocabulary of entity kinds carried in the delta envelope.
///
/// Extending the feed to a new kind means adding a variant here and an arm
/// in the envelope dispatch table; unknown tags are a hard decode error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Machine,
    Service,
    Unit,
    Relation,
    Annotation,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Machine => "machine",
            EntityKind::Service => "service",
            EntityKind::Unit => "unit",
            EntityKind::Relation => "relation",
            EntityKind::Annotation => "annotation",
        }
    }

    pub fn parse(tag: &str) -> Option<EntityKind> {
        match tag {
            "machine" => Some(EntityKind::Machine),
            "service" => Some(EntityKind::Service),
            "unit" => Some(EntityKind::Unit),
            "relation" => Some(EntityKind::Relation),
            "annotation" => Some(EntityKind::Annotation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key identifying one entity: kind plus an id unique within it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityId {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> EntityId {
        EntityId {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Lifecycle phase reported by the backing for machines, services and units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub charm_url: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub min_units: u32,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub subordinate: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub private_address: Option<String>,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub subordinate: bool,
}

/// A single opened port on a unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub protocol: String,
    pub number: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationInfo {
    pub key: String,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One side of a relation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub relation: String,
    pub role: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationInfo {
    pub tag: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Payload for one entity.
///
/// Opaque to the store apart from [`EntityInfo::entity_id`] and structural
/// equality, which suppresses no-op updates. Serializes untagged: the kind
/// tag travels in the envelope, not in the payload.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntityInfo {
    Machine(MachineInfo),
    Service(ServiceInfo),
    Unit(UnitInfo),
    Relation(RelationInfo),
    Annotation(AnnotationInfo),
}

impl EntityInfo {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityInfo::Machine(_) => EntityKind::Machine,
            EntityInfo::Service(_) => EntityKind::Service,
            EntityInfo::Unit(_) => EntityKind::Unit,
            EntityInfo::Relation(_) => EntityKind::Relation,
            EntityInfo::Annotation(_) => EntityKind::Annotation,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        let id = match self {
            EntityInfo::Machine(m) => &m.id,
            EntityInfo::Service(s) => &s.name,
            EntityInfo::Unit(u) => &u.name,
            EntityInfo::Relation(r) => &r.key,
            EntityInfo::Annotation(a) => &a.tag,
        };
        EntityId::new(self.kind(), id.clone())
    }
}

impl From<MachineInfo> for EntityInfo {
    fn from(info: MachineInfo) -> EntityInfo {
        EntityInfo::Machine(info)
    }
}

impl From<ServiceInfo> for EntityInfo {
    fn from(info: ServiceInfo) -> EntityInfo {
        EntityInfo::Service(info)
    }
}

impl From<UnitInfo> for EntityInfo {
    fn from(info: UnitInfo) -> EntityInfo {
        EntityInfo::Unit(info)
    }
}

impl From<RelationInfo> for EntityInfo {
    fn from(info: RelationInfo) -> EntityInfo {
        EntityInfo::Relation(info)
    }
}

impl From<AnnotationInfo> for EntityInfo {
    fn from(info: AnnotationInfo) -> EntityInfo {
        EntityInfo::Annotation(info)
    }
}
