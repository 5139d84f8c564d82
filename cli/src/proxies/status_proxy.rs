use zbus::{Result, proxy};
#[proxy(
    default_service = "com.canonical.fpgahpd",
    interface = "com.canonical.fpgahpd.status",
    default_path = "/com/canonical/fpgahpd/status"
)]
pub trait Status {
    async fn available_images(&self, bridge: &str) -> Result<String>;
    async fn get_reload_state(&self, bridge: &str) -> Result<String>;
    async fn list_slots(&self) -> Result<String>;
}
