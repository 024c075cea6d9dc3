use std::fmt;

use serde::{Deserialize, Serialize};

/// Partition key used when the caller does not run with data partitioning enabled.
pub const DEFAULT_PARTITION_KEY: i32 = 1;

/// Tenant/namespace key isolating one customer's studies from another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub i32);

impl PartitionKey {
    pub fn new(key: i32) -> Self {
        Self(key)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for PartitionKey {
    fn default() -> Self {
        Self(DEFAULT_PARTITION_KEY)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical identity of one DICOM instance.
///
/// The UIDs are opaque here; length and charset validation happen before
/// an identifier ever reaches the deletion engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    pub partition: PartitionKey,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

impl InstanceIdentifier {
    pub fn new(
        partition: PartitionKey,
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
        }
    }

    /// Attach a content version, producing the identifier physical stores address.
    pub fn with_version(self, version: i64) -> VersionedInstanceIdentifier {
        VersionedInstanceIdentifier {
            identifier: self,
            version,
        }
    }

    /// The narrowest scope covering exactly this instance.
    pub fn as_scope(&self) -> EntityScope {
        EntityScope::Instance {
            study_instance_uid: self.study_instance_uid.clone(),
            series_instance_uid: self.series_instance_uid.clone(),
            sop_instance_uid: self.sop_instance_uid.clone(),
        }
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.partition, self.study_instance_uid, self.series_instance_uid, self.sop_instance_uid
        )
    }
}

/// An instance identifier plus the watermark assigned when its content was written.
///
/// A study deleted and then re-uploaded under the same UIDs gets a new version,
/// so cleanup of the old generation can never touch the new one's blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedInstanceIdentifier {
    #[serde(flatten)]
    pub identifier: InstanceIdentifier,
    pub version: i64,
}

impl VersionedInstanceIdentifier {
    pub fn partition(&self) -> PartitionKey {
        self.identifier.partition
    }

    pub fn study_instance_uid(&self) -> &str {
        &self.identifier.study_instance_uid
    }

    pub fn series_instance_uid(&self) -> &str {
        &self.identifier.series_instance_uid
    }

    pub fn sop_instance_uid(&self) -> &str {
        &self.identifier.sop_instance_uid
    }
}

impl fmt::Display for VersionedInstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.version)
    }
}

/// Granularity of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum EntityScope {
    Study {
        study_instance_uid: String,
    },
    Series {
        study_instance_uid: String,
        series_instance_uid: String,
    },
    Instance {
        study_instance_uid: String,
        series_instance_uid: String,
        sop_instance_uid: String,
    },
}

impl EntityScope {
    pub fn study(study_instance_uid: impl Into<String>) -> Self {
        EntityScope::Study {
            study_instance_uid: study_instance_uid.into(),
        }
    }

    pub fn series(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
    ) -> Self {
        EntityScope::Series {
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
        }
    }

    pub fn instance(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        EntityScope::Instance {
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
        }
    }

    pub fn level(&self) -> &'static str {
        match self {
            EntityScope::Study { .. } => "study",
            EntityScope::Series { .. } => "series",
            EntityScope::Instance { .. } => "instance",
        }
    }

    pub fn study_instance_uid(&self) -> &str {
        match self {
            EntityScope::Study { study_instance_uid }
            | EntityScope::Series {
                study_instance_uid, ..
            }
            | EntityScope::Instance {
                study_instance_uid, ..
            } => study_instance_uid,
        }
    }

    pub fn series_instance_uid(&self) -> Option<&str> {
        match self {
            EntityScope::Study { .. } => None,
            EntityScope::Series {
                series_instance_uid,
                ..
            }
            | EntityScope::Instance {
                series_instance_uid,
                ..
            } => Some(series_instance_uid),
        }
    }

    pub fn sop_instance_uid(&self) -> Option<&str> {
        match self {
            EntityScope::Instance {
                sop_instance_uid, ..
            } => Some(sop_instance_uid),
            _ => None,
        }
    }

    /// Whether an instance (in any partition) falls inside this scope.
    pub fn contains(&self, instance: &InstanceIdentifier) -> bool {
        if instance.study_instance_uid != self.study_instance_uid() {
            return false;
        }
        if let Some(series) = self.series_instance_uid()
            && instance.series_instance_uid != series
        {
            return false;
        }
        if let Some(sop) = self.sop_instance_uid()
            && instance.sop_instance_uid != sop
        {
            return false;
        }
        true
    }
}

impl fmt::Display for EntityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityScope::Study { study_instance_uid } => write!(f, "study {study_instance_uid}"),
            EntityScope::Series {
                study_instance_uid,
                series_instance_uid,
            } => write!(f, "series {study_instance_uid}/{series_instance_uid}"),
            EntityScope::Instance {
                study_instance_uid,
                series_instance_uid,
                sop_instance_uid,
            } => write!(
                f,
                "instance {study_instance_uid}/{series_instance_uid}/{sop_instance_uid}"
            ),
        }
    }
}
