use zbus::{Result, proxy};
#[proxy(
    default_service = "com.canonical.fpgahpd",
    interface = "com.canonical.fpgahpd.control",
    default_path = "/com/canonical/fpgahpd/control"
)]
pub trait Control {
    async fn register_card(&self, bridge: &str, device_path: &str, name: &str) -> Result<String>;
    async fn unregister_card(&self, bridge: &str) -> Result<String>;
    async fn register_bmc(&self, bmc_device_path: &str) -> Result<String>;
    async fn unregister_bmc(&self, bridge: &str) -> Result<String>;
    async fn image_load(&self, bridge: &str, image: &str) -> Result<String>;
}
