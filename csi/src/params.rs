use apis::{DiskClass, PoolType, VolumeKind, VolumeQoS, MAX_REPLICA_NUMBER};
use std::collections::BTreeMap;

use crate::{CsiError, CsiResult};

pub const POOL_CLASS_KEY: &str = "poolClass";
pub const POOL_TYPE_KEY: &str = "poolType";
pub const REPLICA_NUMBER_KEY: &str = "replicaNumber";
pub const CONVERTIBLE_KEY: &str = "convertible";
pub const VOLUME_KIND_KEY: &str = "volumeKind";
pub const FS_TYPE_KEY: &str = "csi.storage.k8s.io/fstype";
pub const PVC_NAME_KEY: &str = "csi.storage.k8s.io/pvc/name";
pub const PVC_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PV_NAME_KEY: &str = "csi.storage.k8s.io/pv/name";
pub const THROUGHPUT_KEY: &str = "throughput";
pub const IOPS_KEY: &str = "iops";

const KNOWN_KEYS: [&str; 11] = [
    POOL_CLASS_KEY,
    POOL_TYPE_KEY,
    REPLICA_NUMBER_KEY,
    CONVERTIBLE_KEY,
    VOLUME_KIND_KEY,
    FS_TYPE_KEY,
    PVC_NAME_KEY,
    PVC_NAMESPACE_KEY,
    PV_NAME_KEY,
    THROUGHPUT_KEY,
    IOPS_KEY,
];

/// Volume settings taken from a create request's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeParameters {
    pub pool_class: DiskClass,
    pub pool_type: PoolType,
    pub replica_number: i64,
    pub convertible: bool,
    pub volume_kind: VolumeKind,
    pub fs_type: Option<String>,
    /// Namespace and name of the claim the volume is provisioned for.
    pub claim: Option<(String, String)>,
    /// Device limits; throughput in bytes per second.
    pub qos: VolumeQoS,
}

impl VolumeParameters {
    pub fn pool_name(&self) -> &'static str {
        self.pool_class.pool_name()
    }

    pub fn parse(params: &BTreeMap<String, String>) -> CsiResult<Self> {
        if let Some(unknown) = params.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            return Err(CsiError::InvalidArgument(format!("unknown parameter {}", unknown)));
        }

        let pool_class = params
            .get(POOL_CLASS_KEY)
            .ok_or_else(|| CsiError::InvalidArgument("not found pool class".to_string()))?
            .parse::<DiskClass>()
            .map_err(|e| CsiError::InvalidArgument(e.to_string()))?;

        let pool_type = match params.get(POOL_TYPE_KEY).map(|s| s.to_ascii_uppercase()) {
            None => PoolType::Regular,
            Some(t) if t == PoolType::Regular.as_str() => PoolType::Regular,
            Some(t) if t == PoolType::Thin.as_str() => PoolType::Thin,
            Some(t) => return Err(CsiError::InvalidArgument(format!("unknown pool type {}", t))),
        };

        let raw = params
            .get(REPLICA_NUMBER_KEY)
            .ok_or_else(|| CsiError::InvalidArgument("not found volume replica count".to_string()))?;
        let replica_number: i64 = raw
            .parse()
            .map_err(|_| CsiError::InvalidArgument(format!("invalid replica number {}", raw)))?;
        if !(1..=MAX_REPLICA_NUMBER).contains(&replica_number) {
            return Err(CsiError::InvalidArgument(format!(
                "replica number {} out of range 1..={}",
                replica_number, MAX_REPLICA_NUMBER
            )));
        }

        // HA volumes are always convertible.
        let convertible = match params.get(CONVERTIBLE_KEY).map(|v| v.to_ascii_lowercase()) {
            None => replica_number >= 2,
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => {
                if replica_number >= 2 {
                    return Err(CsiError::InvalidArgument(
                        "an HA volume cannot be inconvertible".to_string(),
                    ));
                }
                false
            }
            Some(v) => return Err(CsiError::InvalidArgument(format!("invalid convertible value {}", v))),
        };

        let volume_kind = match params.get(VOLUME_KIND_KEY) {
            None => VolumeKind::Lvm,
            Some(k) => k.parse().map_err(|e: apis::StoreError| CsiError::InvalidArgument(e.to_string()))?,
        };

        let claim = match (params.get(PVC_NAMESPACE_KEY), params.get(PVC_NAME_KEY)) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => Some((ns.clone(), name.clone())),
            (None, None) => None,
            _ => {
                return Err(CsiError::InvalidArgument(
                    "claim name and namespace must be given together".to_string(),
                ))
            }
        };

        let qos = VolumeQoS {
            throughput: quantity(params, THROUGHPUT_KEY)?,
            iops: quantity(params, IOPS_KEY)?,
        };

        Ok(Self {
            pool_class,
            pool_type,
            replica_number,
            convertible,
            volume_kind,
            fs_type: params.get(FS_TYPE_KEY).cloned(),
            claim,
            qos,
        })
    }
}

/// A non-negative quantity parameter, kept as written. Absent means empty.
fn quantity(params: &BTreeMap<String, String>, key: &str) -> CsiResult<String> {
    let Some(raw) = params.get(key) else {
        return Ok(String::new());
    };
    match system::parse_bytes(raw) {
        Ok(value) if value >= 0 => Ok(raw.clone()),
        Ok(_) => Err(CsiError::InvalidArgument(format!("negative {} {}", key, raw))),
        Err(e) => Err(CsiError::InvalidArgument(format!("invalid {} {}: {}", key, raw, e))),
    }
}
