//! Represents a worker row in a company roster (nómina).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A roster entry. Its `rut` is the owner key documents are filed under.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Nomina {
    pub id: i64,

    /// National ID of the worker.
    pub rut: String,

    pub nombre: String,

    /// Client company the worker is rostered for.
    pub empresa: String,

    pub created_at: DateTime<Utc>,
}

/// Request body for `POST /nominas`.
#[derive(Deserialize, Debug, Clone)]
pub struct NewNomina {
    pub rut: String,
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub empresa: String,
}
