mod error;
mod guid;
pub mod timestamp;

pub use error::{ErrorKind, ServiceError};
pub use guid::Guid;
pub use timestamp::Timestamp;

macro_rules! define_guid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Copy,
            Clone,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Guid);

        impl $name {
            pub fn random() -> Self {
                Self(Guid::random())
            }
            pub fn is_null(&self) -> bool {
                self.0.is_null()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <Guid as std::str::FromStr>::Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<Guid> for $name {
            fn from(guid: Guid) -> Self {
                Self(guid)
            }
        }
    };
}

define_guid_newtype!(
    /// Object id of a table in the master; stable across renames.
    TableId
);
define_guid_newtype!(
    /// Id of one key-range shard of a dynamic table.
    TabletId
);
define_guid_newtype!(
    /// Id of a participant cell: the replicated group hosting tablets.
    CellId
);
define_guid_newtype!(
    /// Id of a client transaction, shared with slave transactions on
    /// peer clusters.
    TransactionId
);
define_guid_newtype!(
    /// Id of an upstream/downstream table replica.
    ReplicaId
);
define_guid_newtype!(
    /// Idempotency token attached to mutating calls.
    MutationId
);

/// Commit atomicity of a transaction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Atomicity {
    #[default]
    Full,
    None,
}

/// Durability requested of participant writes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    #[default]
    Sync,
    Async,
}
