//! Newtype identifiers for the external entities the engine collaborates
//! with (projects, users, organizations) and for its own aggregates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh UUIDv7 identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_id!(
    /// A project in the surrounding platform. Owned externally; the engine
    /// only references it.
    ProjectId
);
uuid_id!(
    /// A platform user. The engine sees users only as trigger actors and
    /// permission subjects.
    UserId
);
uuid_id!(
    /// An organization in the surrounding platform (secret scoping).
    OrgId
);
uuid_id!(
    /// A stored workflow definition.
    WorkflowId
);
uuid_id!(
    /// One execution instance of a workflow.
    RunId
);
uuid_id!(
    /// A concrete job row within a run (distinct from the YAML `job_id` key).
    JobRowId
);
uuid_id!(
    /// A step row within a job.
    StepRowId
);
