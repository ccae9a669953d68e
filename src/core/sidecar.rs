use crate::core::interpolate::Ambient;
use crate::domain::model::SidecarSpec;

impl SidecarSpec {
    /// 實際使用的 app port：環境變數優先，否則使用宣告的預設值
    pub fn effective_app_port(&self, ambient: &Ambient) -> u16 {
        self.app_port_env
            .as_deref()
            .and_then(|var| ambient.get(var))
            .and_then(|value| match value.trim().parse::<u16>() {
                Ok(port) => Some(port),
                Err(_) => {
                    tracing::warn!(
                        "⚠️ Ignoring invalid sidecar app port '{}', using {}",
                        value,
                        self.app_port
                    );
                    None
                }
            })
            .unwrap_or(self.app_port)
    }

    /// 組出 sidecar 的啟動參數（明確傳入，不做動態探索）
    pub fn startup_args(&self, ambient: &Ambient) -> Vec<String> {
        vec![
            self.program.clone(),
            "-app-id".to_string(),
            self.app_id.clone(),
            "-app-port".to_string(),
            self.effective_app_port(ambient).to_string(),
            "-app-protocol".to_string(),
            self.app_protocol.clone(),
            "-dapr-grpc-port".to_string(),
            self.control_port.to_string(),
            "-placement-host-address".to_string(),
            self.placement_address.clone(),
        ]
    }
}
