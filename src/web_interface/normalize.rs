//! Rewrites absolute image URLs stored in drafts to their `/images_v1/...` path.
//!
//! Clients sometimes persist the full URL they loaded an image from; only the
//! path part is stable across deployments.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

const IMAGE_PATH_PREFIX: &str = "/images_v1/";
const URL_KEYS: [&str; 3] = ["imageUrl", "image_url", "src"];

fn image_path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"/images_v1/[^?#]+(?:\?[^#]*)?").ok())
        .as_ref()
}

/// Normalized form of one URL value; blank strings come back untouched.
pub fn normalize_image_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return value.to_string();
    }
    if trimmed.starts_with(IMAGE_PATH_PREFIX) {
        return trimmed.to_string();
    }
    image_path_pattern()
        .and_then(|re| re.find(trimmed))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Normalizes the URL fields of every entry in `draft["images"]`, in place.
pub fn normalize_draft_images(draft: &mut Map<String, Value>) {
    let Some(Value::Array(images)) = draft.get_mut("images") else {
        return;
    };
    for image in images.iter_mut() {
        let Value::Object(fields) = image else {
            continue;
        };
        for key in URL_KEYS {
            if let Some(Value::String(url)) = fields.get_mut(key) {
                let normalized = normalize_image_url(url);
                if normalized != *url {
                    *url = normalized;
                }
            }
        }
    }
}

/// Same as [`normalize_draft_images`] for a draft that may not be an object.
pub fn normalize_draft_value(draft: Option<Value>) -> Option<Value> {
    match draft {
        Some(Value::Object(mut map)) => {
            normalize_draft_images(&mut map);
            Some(Value::Object(map))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_image_url() {
        assert_eq!(
            normalize_image_url("https://cdn.example.org/static/images_v1/Health_medical/a.jpg"),
            "/images_v1/Health_medical/a.jpg"
        );
        assert_eq!(
            normalize_image_url("http://localhost:5173/images_v1/x.png?v=2#frag"),
            "/images_v1/x.png?v=2"
        );
        assert_eq!(normalize_image_url("  /images_v1/a.jpg "), "/images_v1/a.jpg");
        assert_eq!(normalize_image_url(" blob:abc "), "blob:abc");
        assert_eq!(normalize_image_url("   "), "   ");
    }

    #[test]
    fn test_normalize_draft_images() {
        let mut draft = match json!({
            "images": [
                { "image_id": "a.jpg", "imageUrl": "https://host/images_v1/a.jpg", "src": 3 },
                "not an object",
                { "image_url": "https://host/app/images_v1/b.jpg?x=1", "src": "https://host/images_v1/b.jpg" }
            ],
            "demographics": { "src": "https://host/images_v1/untouched.jpg" }
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        normalize_draft_images(&mut draft);
        assert_eq!(
            Value::Object(draft),
            json!({
                "images": [
                    { "image_id": "a.jpg", "imageUrl": "/images_v1/a.jpg", "src": 3 },
                    "not an object",
                    { "image_url": "/images_v1/b.jpg?x=1", "src": "/images_v1/b.jpg" }
                ],
                "demographics": { "src": "https://host/images_v1/untouched.jpg" }
            })
        );
    }

    #[test]
    fn test_non_object_draft_passes_through() {
        assert_eq!(normalize_draft_value(None), None);
        assert_eq!(normalize_draft_value(Some(json!([1]))), Some(json!([1])));
    }
}
