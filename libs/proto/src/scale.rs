//! CPU-scale collaborator protocol, interface level only.
//!
//! The scale helper and the in-guest scale agent exchange these payloads
//! through the bridge. The bridge never interprets them; they live here so
//! both sides agree on the shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `resource` discriminator for CPU scaling.
pub const RESOURCE_CPU: &str = "cpu";

/// `direction` discriminator for bringing a CPU online.
pub const DIRECTION_UP: &str = "up";

/// `direction` discriminator for taking a CPU offline.
pub const DIRECTION_DOWN: &str = "down";

/// Scale request sent from the host helper to the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub version: u32,
    pub resource: String,
    pub direction: String,
    /// CPU index being added or removed.
    pub cpu: u32,
    /// CPU set the hypervisor believes is currently online in the guest.
    pub online_cpus: Vec<u32>,
    pub timeout_ms: u64,
}

/// Scale response reported by the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleResponse {
    pub version: u32,
    pub resource: String,
    pub direction: String,
    /// "ok" or "fail".
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_cpu: Option<u32>,
    /// CPU set online in the guest after the operation.
    #[serde(default)]
    pub online_cpus: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Check a scale-up response against the requested CPU set.
///
/// The reported set must equal the requested set with the pending CPU
/// inserted at its position, or the requested set unchanged (the guest
/// has not brought the CPU online yet). Any other shape, including an
/// equal-length set that differs from the request, is a mismatch.
pub fn verify_scale_up(requested: &[u32], pending_cpu: u32, reported: &[u32]) -> bool {
    let mut req = requested.iter();
    let mut next_req = req.next();
    let mut used_pending = false;

    for &cpu in reported {
        match next_req {
            Some(&r) if r == cpu => next_req = req.next(),
            _ if cpu == pending_cpu && !used_pending => used_pending = true,
            _ => return false,
        }
    }

    next_req.is_none()
}

/// Check a scale-down response: the removed CPU must no longer be in the
/// guest's reported online set.
pub fn verify_scale_down(offline_cpu: u32, reported: &[u32]) -> bool {
    !reported.contains(&offline_cpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_up_cpu_now_online() {
        assert!(verify_scale_up(&[0, 1, 3], 2, &[0, 1, 2, 3]));
    }

    #[test]
    fn test_scale_up_cpu_at_end() {
        assert!(verify_scale_up(&[0, 1, 2], 3, &[0, 1, 2, 3]));
    }

    #[test]
    fn test_scale_up_cpu_not_yet_online() {
        // Same length as the request and identical contents: the guest
        // simply has not onlined the CPU yet.
        assert!(verify_scale_up(&[0, 1, 2], 3, &[0, 1, 2]));
    }

    #[test]
    fn test_scale_up_equal_length_mismatch() {
        // Equal lengths but different contents must be rejected, not read
        // past the end of the response set.
        assert!(!verify_scale_up(&[0, 1, 2], 3, &[0, 1, 4]));
    }

    #[test]
    fn test_scale_up_unknown_cpu_rejected() {
        assert!(!verify_scale_up(&[0, 1], 2, &[0, 1, 5]));
    }

    #[test]
    fn test_scale_up_missing_requested_cpu_rejected() {
        assert!(!verify_scale_up(&[0, 1, 2], 3, &[0, 2, 3]));
    }

    #[test]
    fn test_scale_up_empty_request() {
        assert!(verify_scale_up(&[], 0, &[0]));
        assert!(verify_scale_up(&[], 0, &[]));
    }

    #[test]
    fn test_scale_down() {
        assert!(verify_scale_down(2, &[0, 1]));
        assert!(!verify_scale_down(2, &[0, 1, 2]));
    }

    #[test]
    fn test_scale_request_roundtrip() {
        let req = ScaleRequest {
            version: 1,
            resource: RESOURCE_CPU.to_string(),
            direction: DIRECTION_UP.to_string(),
            cpu: 2,
            online_cpus: vec![0, 1],
            timeout_ms: 1000,
        };

        let json = serde_json::to_string(&req).unwrap();
        let back: ScaleRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cpu, 2);
        assert_eq!(back.online_cpus, vec![0, 1]);
    }

    #[test]
    fn test_scale_response_minimal() {
        let resp: ScaleResponse = serde_json::from_str(
            r#"{"version":1,"resource":"cpu","direction":"up","result":"fail"}"#,
        )
        .unwrap();
        assert_eq!(resp.result, "fail");
        assert!(resp.online_cpus.is_empty());
        assert!(resp.err_msg.is_none());
    }
}
