//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

use crate::error::StoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = StoreError;

            fn try_from(id: StatusId) -> Result<Self, Self::Error> {
                match id {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(StoreError::Corrupt(format!(
                        "unknown {} id {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Queue-level job status. Independent of the session status.
    JobStatus {
        Pending = 1,
        /// Delivered to a worker and not yet acknowledged.
        Claimed = 2,
        Completed = 3,
        Failed = 4,
    }
}
