use serde::{Deserialize, Serialize};

use crate::metadata::ObjectMeta;
use crate::object::impl_resource;

/// External dataset that gets a pre-provisioned acceleration volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DataSetSpec,
}

impl_resource!(DataSet, "DataSet");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetSpec {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub endpoint: String,
}
