//! Payees and tags referenced from splits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PayeeId = i64;
pub type TagId = i64;

pub const DEFAULT_TAG_COLOR: &str = "yellow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payee {
    pub payee_id: PayeeId,
    pub tenant_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: TagId,
    pub tenant_id: Uuid,
    pub name: String,
    pub color: String,
}
