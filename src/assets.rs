use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "./assets"]
pub struct Assets;

const DEFAULT_CONFIG: &str = "default-config.json";

/// The default config shipped inside the binary
pub fn get_default_config() -> Option<String> {
    Assets::get(DEFAULT_CONFIG).map(|file| String::from_utf8_lossy(&file.data).into_owned())
}
