mod controller;
#[cfg(feature = "esp32")]
mod esp;
mod hal;
#[cfg(not(feature = "esp32"))]
mod host;
mod provision;
mod wifi;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
