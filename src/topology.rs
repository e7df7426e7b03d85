use serde::{Deserialize, Serialize};

/// How the training data is partitioned across workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSplit {
    /// Every worker holds a disjoint subset of rows with all the columns.
    #[default]
    Row,
    /// Every worker holds a disjoint subset of feature columns.
    #[serde(alias = "col")]
    Column,
}

/// The partition facets of a training job.
///
/// Set once when the training metadata loads and identical on every worker,
/// nothing here verifies that the workers agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    #[serde(default)]
    pub split: DataSplit,
    #[serde(default)]
    pub federated: bool,
}

impl PartitionInfo {
    pub fn new(split: DataSplit, federated: bool) -> Self {
        Self { split, federated }
    }

    pub fn is_row_split(&self) -> bool {
        self.split == DataSplit::Row
    }

    pub fn is_column_split(&self) -> bool {
        self.split == DataSplit::Column
    }

    /// Column split in a federated job: the labels only live on the leader.
    pub fn is_vertical_federated(&self) -> bool {
        self.federated && self.is_column_split()
    }
}
