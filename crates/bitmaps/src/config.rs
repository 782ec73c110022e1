use serde::{Deserialize, Serialize};

use crate::backend::TextureExtent;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BitmapManagerConfig {
    /// Tile size cap. Never raises the backend's own limit.
    pub max_texture_size: Option<TextureExtent>,
    /// Code of the bitmap mirrored by the display surface. Clones of that
    /// bitmap read their pixels back from the backend.
    pub display_code: Option<i32>,
}

impl BitmapManagerConfig {
    pub fn effective_max_texture_size(&self, backend_limit: TextureExtent) -> TextureExtent {
        match self.max_texture_size {
            Some(limit) => limit.clamp_to(backend_limit),
            None => backend_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: BitmapManagerConfig = serde_json::from_str("{}").expect("parse config");
        assert_eq!(config, BitmapManagerConfig::default());

        let config: BitmapManagerConfig = serde_json::from_str(
            r#"{ "max_texture_size": { "width": 512, "height": 4096 }, "display_code": 0 }"#,
        )
        .expect("parse config");
        assert_eq!(config.display_code, Some(0));
        assert_eq!(
            config.effective_max_texture_size(TextureExtent::new(2048, 2048)),
            TextureExtent::new(512, 2048)
        );
    }
}
