use k8s_openapi::api::core::v1::Pod;

/// Receives a notification for every Pod whose Eviction was created. Callers use this to remember recently evicted
/// Pods, for example to avoid treating their replacements as unschedulable while they are pending.
pub trait EvictionRegister: Send + Sync {
    fn register_eviction(&self, pod: &Pod);
}
