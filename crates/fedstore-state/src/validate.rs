//! Input validation run by the store facade before any backend access.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{StoreError, StoreResult};
use crate::types::{SubClusterInfo, SubClusterPolicyConfiguration, SubClusterState};

static SUB_CLUSTER_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").ok());

/// Record keys: no whitespace or control characters.
static RECORD_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[^\s\p{Cc}]+$").ok());

const MAX_KEY_LEN: usize = 256;

fn invalid(msg: String) -> StoreError {
    StoreError::Validation(msg)
}

fn is_match(pattern: &LazyLock<Option<Regex>>, value: &str) -> StoreResult<bool> {
    let Some(pattern) = pattern.as_ref() else {
        return Err(invalid("key validation unavailable".into()));
    };
    Ok(pattern.is_match(value))
}

pub fn sub_cluster_id(id: &str) -> StoreResult<()> {
    if id.is_empty() {
        return Err(invalid("sub-cluster id must not be empty".into()));
    }
    if id.len() > MAX_KEY_LEN || !is_match(&SUB_CLUSTER_ID, id)? {
        return Err(invalid(format!("malformed sub-cluster id {id:?}")));
    }
    Ok(())
}

fn record_key(kind: &str, key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(invalid(format!("{kind} must not be empty")));
    }
    if key.len() > MAX_KEY_LEN || !is_match(&RECORD_KEY, key)? {
        return Err(invalid(format!("malformed {kind} {key:?}")));
    }
    Ok(())
}

pub fn application_id(id: &str) -> StoreResult<()> {
    record_key("application id", id)
}

pub fn reservation_id(id: &str) -> StoreResult<()> {
    record_key("reservation id", id)
}

pub fn queue(name: &str) -> StoreResult<()> {
    record_key("queue name", name)
}

/// Validate a `host:port` endpoint. IPv6 hosts must be bracketed.
pub fn endpoint(name: &str, address: &str) -> StoreResult<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid(format!("{name} {address:?} is not host:port")))?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(invalid(format!("{name} {address:?} has an invalid host")));
    }
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(invalid(format!("{name} {address:?} has an unbracketed IPv6 host")));
    }
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(()),
        _ => Err(invalid(format!("{name} {address:?} has an invalid port"))),
    }
}

/// Validate a registration record. Registration moves a sub-cluster to
/// `Active`, so the record must carry that state.
pub fn registration(info: &SubClusterInfo) -> StoreResult<()> {
    sub_cluster_id(&info.sub_cluster_id)?;
    for (name, address) in info.endpoints.iter() {
        endpoint(name, address)?;
    }
    capability(&info.capability)?;
    if info.state != SubClusterState::Active {
        return Err(invalid(format!(
            "registration of {} must carry state active, got {}",
            info.sub_cluster_id, info.state
        )));
    }
    Ok(())
}

pub fn capability(capability: &str) -> StoreResult<()> {
    if capability.trim().is_empty() {
        return Err(invalid("capability must not be empty".into()));
    }
    Ok(())
}

pub fn policy(policy: &SubClusterPolicyConfiguration) -> StoreResult<()> {
    queue(&policy.queue)?;
    if policy.policy_type.trim().is_empty() {
        return Err(invalid(format!(
            "policy type for queue {} must not be empty",
            policy.queue
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubClusterEndpoints;

    fn valid_info() -> SubClusterInfo {
        SubClusterInfo {
            sub_cluster_id: "SC1".to_string(),
            endpoints: SubClusterEndpoints {
                amrm_service_address: "rm1.example.com:8030".to_string(),
                client_rm_service_address: "rm1.example.com:8032".to_string(),
                rm_admin_service_address: "10.0.0.1:8033".to_string(),
                rm_web_service_address: "[::1]:8088".to_string(),
            },
            state: SubClusterState::Active,
            last_heartbeat: 0,
            last_start_time: 0,
            capability: "{}".to_string(),
        }
    }

    #[test]
    fn valid_registration_passes() {
        assert!(registration(&valid_info()).is_ok());
    }

    #[test]
    fn sub_cluster_ids() {
        assert!(sub_cluster_id("SC1").is_ok());
        assert!(sub_cluster_id("east-1.prod_a").is_ok());
        assert!(sub_cluster_id("").is_err());
        assert!(sub_cluster_id("-leading").is_err());
        assert!(sub_cluster_id("has space").is_err());
        assert!(sub_cluster_id(&"x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn record_keys() {
        assert!(application_id("app_1_1").is_ok());
        assert!(application_id("application_1700000000000_0001").is_ok());
        assert!(application_id("").is_err());
        assert!(reservation_id("reservation 1").is_err());
        assert!(queue("root.default").is_ok());
        assert!(queue("tab\there").is_err());
    }

    #[test]
    fn endpoints() {
        assert!(endpoint("e", "host:1").is_ok());
        assert!(endpoint("e", "[fe80::1]:8030").is_ok());
        assert!(endpoint("e", "host").is_err());
        assert!(endpoint("e", ":8030").is_err());
        assert!(endpoint("e", "host:0").is_err());
        assert!(endpoint("e", "host:99999").is_err());
        assert!(endpoint("e", "fe80::1:8030").is_err());
    }

    #[test]
    fn registration_requires_active_state() {
        let mut info = valid_info();
        info.state = SubClusterState::Lost;
        assert!(matches!(registration(&info), Err(StoreError::Validation(_))));
    }

    #[test]
    fn registration_requires_capability() {
        let mut info = valid_info();
        info.capability = "  ".to_string();
        assert!(registration(&info).is_err());
    }

    #[test]
    fn registration_checks_every_endpoint() {
        let mut info = valid_info();
        info.endpoints.rm_web_service_address = "nope".to_string();
        let err = registration(&info).unwrap_err();
        assert!(err.to_string().contains("rm_web_service_address"));
    }

    #[test]
    fn policy_requires_type() {
        let policy = SubClusterPolicyConfiguration {
            queue: "root.a".to_string(),
            policy_type: String::new(),
            params: vec![],
        };
        assert!(super::policy(&policy).is_err());
    }
}
